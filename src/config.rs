//! Configuration surface: a flat keyed parameter map with typed accessors,
//! and the typed settings structs derived from it at setup.

use crate::error::Result;
use crate::error::SylvaError;
use crate::HEIGHT_CELL_SIZE;
use crate::LIGHT_CELL_SIZE;
use crate::RU_CELL_SIZE;
use crate::grid::Rect;
use std::collections::BTreeMap;

/// flat string-to-string parameter map; the host fills it (e.g. from a JSON
/// object) and the core reads typed values with defaults
#[derive(Debug, Clone, Default)]
pub struct Parameters(BTreeMap<String, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// build from a flat JSON object; scalars are stringified, arrays are
    /// joined with commas
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SylvaError::config(format!("invalid configuration JSON: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| SylvaError::config("configuration must be a JSON object"))?;
        let mut map = BTreeMap::new();
        for (key, entry) in object {
            let text = match entry {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Array(items) => items
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                _ => {
                    return Err(SylvaError::config(format!(
                        "configuration key {} has an unsupported value",
                        key
                    )));
                }
            };
            map.insert(key.clone(), text);
        }
        Ok(Self(map))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn value_f64(&self, key: &str, default: f64) -> Result<f64> {
        match self.0.get(key) {
            None => Ok(default),
            Some(text) => text
                .trim()
                .parse()
                .map_err(|_| SylvaError::config(format!("{}: not a number: {}", key, text))),
        }
    }
    pub fn required_f64(&self, key: &str) -> Result<f64> {
        match self.0.get(key) {
            None => Err(SylvaError::config(format!("{}: missing", key))),
            Some(_) => self.value_f64(key, 0.),
        }
    }
    pub fn value_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.0.get(key).map(|s| s.trim()) {
            None => Ok(default),
            Some("true") | Some("1") => Ok(true),
            Some("false") | Some("0") => Ok(false),
            Some(text) => Err(SylvaError::config(format!(
                "{}: not a boolean: {}",
                key, text
            ))),
        }
    }
    pub fn value_u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.0.get(key) {
            None => Ok(default),
            Some(text) => text
                .trim()
                .parse()
                .map_err(|_| SylvaError::config(format!("{}: not an integer: {}", key, text))),
        }
    }
    pub fn value_str(&self, key: &str, default: &str) -> String {
        self.0
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
    /// comma- or whitespace-separated list of indices
    pub fn value_list(&self, key: &str) -> Result<Vec<usize>> {
        match self.0.get(key) {
            None => Ok(Vec::new()),
            Some(text) => text
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|p| !p.is_empty())
                .map(|p| {
                    p.parse()
                        .map_err(|_| SylvaError::config(format!("{}: not an index: {}", key, p)))
                })
                .collect(),
        }
    }
}

/// water-cycle parameters of a site
#[derive(Debug, Clone)]
pub struct WaterSettings {
    pub soil_depth_cm: f64,
    pub pct_sand: f64,
    pub pct_silt: f64,
    pub pct_clay: f64,
    pub use_soil_saturation: bool,
    pub interception_storage_needle: f64,
    pub interception_storage_broadleaf: f64,
    pub snow_melt_temperature: f64,
    pub lai_threshold_closed_stands: f64,
    pub boundary_layer_conductance: f64,
    pub air_density: f64,
}

impl Default for WaterSettings {
    fn default() -> Self {
        Self {
            soil_depth_cm: 100.,
            pct_sand: 40.,
            pct_silt: 40.,
            pct_clay: 20.,
            use_soil_saturation: false,
            interception_storage_needle: 4.,
            interception_storage_broadleaf: 2.,
            snow_melt_temperature: 0.,
            lai_threshold_closed_stands: 3.,
            boundary_layer_conductance: 0.2,
            air_density: 1.204,
        }
    }
}

/// climate-table parameters
#[derive(Debug, Clone)]
pub struct ClimateSettings {
    pub table_name: String,
    pub batch_years: usize,
    pub random_sampling_enabled: bool,
    pub random_sampling_list: Vec<usize>,
    pub temperature_shift: f64,
    pub precipitation_shift: f64,
    /// memory time of the delayed tissue temperature (days)
    pub temperature_tau: f64,
    pub co2_ppm: f64,
}

impl Default for ClimateSettings {
    fn default() -> Self {
        Self {
            table_name: String::new(),
            batch_years: 100,
            random_sampling_enabled: false,
            random_sampling_list: Vec::new(),
            temperature_shift: 0.,
            precipitation_shift: 1.,
            temperature_tau: 5.,
            co2_ppm: 380.,
        }
    }
}

/// full typed configuration of a simulation
#[derive(Debug, Clone)]
pub struct Settings {
    pub world_rect: Rect,
    pub lif_cell_size: f64,
    pub ru_cell_size: f64,
    pub height_cell_size: f64,
    /// latitude in radians; mandatory in the parameter map (degrees)
    pub latitude_rad: f64,
    /// master seed of every random draw of a run
    pub seed: u64,
    pub multithreaded: bool,
    pub available_nitrogen: f64,
    pub water: WaterSettings,
    pub climate: ClimateSettings,
}

impl Settings {
    /// read the recognised option groups from the parameter map
    pub fn from_params(params: &Parameters) -> Result<Self> {
        let rect_text = params
            .get("model.worldRectangle")
            .ok_or_else(|| SylvaError::config("model.worldRectangle: missing"))?;
        let parts: Vec<f64> = rect_text
            .split(',')
            .map(|p| {
                p.trim().parse().map_err(|_| {
                    SylvaError::config(format!("model.worldRectangle: bad value {}", p))
                })
            })
            .collect::<Result<_>>()?;
        if parts.len() != 4 || parts[2] <= parts[0] || parts[3] <= parts[1] {
            return Err(SylvaError::config(
                "model.worldRectangle must be x1,y1,x2,y2 with positive extent",
            ));
        }
        let world_rect = Rect::new(parts[0], parts[1], parts[2], parts[3]);
        if !params.contains("model.latitude") {
            return Err(SylvaError::config("model.latitude: missing"));
        }
        let latitude_deg = params.required_f64("model.latitude")?;
        if !(-90. ..=90.).contains(&latitude_deg) {
            return Err(SylvaError::config("model.latitude out of range"));
        }
        let lif_cell_size = params.value_f64("model.lifCellSize", LIGHT_CELL_SIZE)?;
        let ru_cell_size = params.value_f64("model.ruCellSize", RU_CELL_SIZE)?;
        let height_cell_size = params.value_f64("model.heightCellSize", HEIGHT_CELL_SIZE)?;
        if lif_cell_size <= 0.
            || (ru_cell_size / lif_cell_size).fract() != 0.
            || (height_cell_size / lif_cell_size).fract() != 0.
        {
            return Err(SylvaError::config(
                "cell sizes must nest: ru and height cells must be multiples of the lif cell",
            ));
        }
        let default_water = WaterSettings::default();
        let water = WaterSettings {
            soil_depth_cm: params.value_f64("water.soilDepth", default_water.soil_depth_cm)?,
            pct_sand: params.value_f64("water.pctSand", default_water.pct_sand)?,
            pct_silt: params.value_f64("water.pctSilt", default_water.pct_silt)?,
            pct_clay: params.value_f64("water.pctClay", default_water.pct_clay)?,
            use_soil_saturation: params.value_bool("water.useSoilSaturation", false)?,
            interception_storage_needle: params.value_f64(
                "water.interceptionStorageNeedle",
                default_water.interception_storage_needle,
            )?,
            interception_storage_broadleaf: params.value_f64(
                "water.interceptionStorageBroadleaf",
                default_water.interception_storage_broadleaf,
            )?,
            snow_melt_temperature: params.value_f64(
                "water.snowMeltTemperature",
                default_water.snow_melt_temperature,
            )?,
            lai_threshold_closed_stands: params.value_f64(
                "water.laiThresholdForClosedStands",
                default_water.lai_threshold_closed_stands,
            )?,
            boundary_layer_conductance: params.value_f64(
                "water.boundaryLayerConductance",
                default_water.boundary_layer_conductance,
            )?,
            air_density: params.value_f64("water.airDensity", default_water.air_density)?,
        };
        let default_climate = ClimateSettings::default();
        let climate = ClimateSettings {
            table_name: params.value_str("climate.tableName", ""),
            batch_years: params.value_u64("climate.batchYears", 100)? as usize,
            random_sampling_enabled: params.value_bool("climate.randomSamplingEnabled", false)?,
            random_sampling_list: params.value_list("climate.randomSamplingList")?,
            temperature_shift: params.value_f64("climate.temperatureShift", 0.)?,
            precipitation_shift: params.value_f64("climate.precipitationShift", 1.)?,
            temperature_tau: params.value_f64(
                "numerics.temperatureTau",
                default_climate.temperature_tau,
            )?,
            co2_ppm: params.value_f64("climate.co2concentration", default_climate.co2_ppm)?,
        };
        Ok(Self {
            world_rect,
            lif_cell_size,
            ru_cell_size,
            height_cell_size,
            latitude_rad: latitude_deg.to_radians(),
            seed: params.value_u64("model.seed", 0)?,
            multithreaded: params.value_bool("model.multithreaded", true)?,
            available_nitrogen: params.value_f64("site.availableNitrogen", 50.)?,
            water,
            climate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Parameters {
        let mut params = Parameters::new();
        params.insert("model.worldRectangle", "0,0,200,100");
        params.insert("model.latitude", "48");
        params
    }

    #[test]
    fn minimal_settings_parse_with_defaults() {
        let settings = Settings::from_params(&minimal()).unwrap();
        assert_eq!(settings.world_rect.width(), 200.);
        assert_eq!(settings.lif_cell_size, 2.);
        assert_eq!(settings.ru_cell_size, 100.);
        assert!((settings.latitude_rad - 48f64.to_radians()).abs() < 1e-12);
        assert_eq!(settings.water.pct_sand, 40.);
        assert_eq!(settings.climate.precipitation_shift, 1.);
        assert!(settings.multithreaded);
    }

    #[test]
    fn latitude_is_mandatory() {
        let mut params = Parameters::new();
        params.insert("model.worldRectangle", "0,0,100,100");
        let err = Settings::from_params(&params).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn world_rectangle_is_mandatory_and_validated() {
        let mut params = Parameters::new();
        params.insert("model.latitude", "48");
        assert!(Settings::from_params(&params).is_err());
        params.insert("model.worldRectangle", "0,0,-10,100");
        assert!(Settings::from_params(&params).is_err());
        params.insert("model.worldRectangle", "0,0,ten,100");
        assert!(Settings::from_params(&params).is_err());
    }

    #[test]
    fn cell_sizes_must_nest() {
        let mut params = minimal();
        params.insert("model.lifCellSize", "3");
        assert!(Settings::from_params(&params).is_err());
    }

    #[test]
    fn json_surface_round_trips() {
        let params = Parameters::from_json(
            r#"{
                "model.worldRectangle": "0,0,100,100",
                "model.latitude": 47.5,
                "water.pctSand": 30,
                "water.pctSilt": 50,
                "water.pctClay": 20,
                "climate.randomSamplingEnabled": true,
                "climate.randomSamplingList": [0, 2, 2]
            }"#,
        )
        .unwrap();
        let settings = Settings::from_params(&params).unwrap();
        assert_eq!(settings.water.pct_sand, 30.);
        assert!(settings.climate.random_sampling_enabled);
        assert_eq!(settings.climate.random_sampling_list, vec![0, 2, 2]);
        assert!(Parameters::from_json("[1,2]").is_err());
        assert!(Parameters::from_json("{ nope").is_err());
    }

    #[test]
    fn typed_accessors_validate() {
        let mut params = Parameters::new();
        params.insert("a", "1.5");
        params.insert("b", "yes");
        assert_eq!(params.value_f64("a", 0.).unwrap(), 1.5);
        assert_eq!(params.value_f64("missing", 7.).unwrap(), 7.);
        assert!(params.value_bool("b", false).is_err());
        assert!(params.required_f64("missing").is_err());
    }
}
