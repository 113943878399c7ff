//! Daily water cycle of one resource unit: canopy interception, snow pack,
//! the soil water bucket, and Penman-Monteith evapotranspiration in the
//! 3-PG formulation. Soil hydraulic properties derive once from the soil
//! texture via the Schwalm & Ek (2004) pedotransfer functions.

use crate::GROUND_VEGETATION_CONDUCTANCE;
use crate::KiloPascal;
use crate::Millimeters;
use crate::LATENT_HEAT_OF_VAPORIZATION;
use crate::PSI_FIELD_CAPACITY;
use crate::PSI_PERMANENT_WILTING_POINT;
use crate::SNOW_MELT_COEFFICIENT;
use crate::climate::ClimateDay;
use crate::climate::Sun;
use crate::config::WaterSettings;
use crate::error::Result;
use crate::error::SylvaError;
use crate::limit;
use crate::resunit::RuSpeciesStat;
use crate::species::SpeciesSet;

/// snow storage; accumulates below the melt temperature, melts at a fixed
/// rate per degree-day above it
#[derive(Debug, Clone, Default)]
pub struct SnowPack {
    pack: f64,
    melt_temperature: f64,
}

impl SnowPack {
    /// route precipitation through the pack, returns the water reaching the
    /// ground (throughfall plus melt)
    fn flow(&mut self, precipitation_mm: f64, temperature: f64) -> f64 {
        if temperature > self.melt_temperature {
            if self.pack == 0. {
                precipitation_mm
            } else {
                let melt = ((temperature - self.melt_temperature) * SNOW_MELT_COEFFICIENT)
                    .min(self.pack);
                self.pack -= melt;
                precipitation_mm + melt
            }
        } else {
            self.pack += precipitation_mm;
            0.
        }
    }

    /// add residual canopy water: passes through above the melt temperature,
    /// freezes into the pack below
    fn add(&mut self, water_mm: f64, temperature: f64) -> f64 {
        if temperature > self.melt_temperature {
            water_mm
        } else {
            self.pack += water_mm;
            0.
        }
    }

    pub fn pack(&self) -> f64 {
        self.pack
    }
}

/// canopy interception storage plus the Penman-Monteith evapotranspiration
/// of the stand
#[derive(Debug, Clone, Default)]
pub struct Canopy {
    lai_needle: f64,
    lai_broadleaved: f64,
    lai: f64,
    max_canopy_conductance: f64,
    interception: f64,
    evaporation: f64,
    needle_storage_factor: f64,
    broadleaf_storage_factor: f64,
    air_density: f64,
    boundary_layer_conductance: f64,
    et0: [f64; 12],
}

impl Canopy {
    fn set_stand_parameters(&mut self, lai_needle: f64, lai_broadleaved: f64, conductance: f64) {
        self.lai_needle = lai_needle;
        self.lai_broadleaved = lai_broadleaved;
        self.lai = lai_needle + lai_broadleaved;
        self.max_canopy_conductance = conductance;
        self.et0 = [0.; 12];
    }

    /// Interception of a day's precipitation in the crown. The through-flow
    /// fraction follows the empirical saturation curves (separately for
    /// needle and broadleaf foliage); storage is capped by the current LAI.
    /// Returns the precipitation surpassing the canopy.
    fn flow(&mut self, precipitation_mm: f64) -> f64 {
        self.interception = 0.;
        self.evaporation = 0.;
        if self.lai == 0. {
            return precipitation_mm;
        }
        if precipitation_mm == 0. {
            return 0.;
        }
        let mut max_interception_mm = 0.;
        let mut max_storage_mm = 0.;
        if self.lai_needle > 0. {
            let max_flow_needle = 0.9 * (1.03 - (-0.055 * precipitation_mm).exp()).sqrt();
            max_interception_mm +=
                precipitation_mm * (1. - max_flow_needle * self.lai_needle / self.lai);
            max_storage_mm += self.needle_storage_factor * (1. - (-0.55 * self.lai_needle).exp());
        }
        if self.lai_broadleaved > 0. {
            let max_flow_broad = 0.9 * (1.22 - (-0.055 * precipitation_mm).exp()).powf(0.35);
            max_interception_mm +=
                precipitation_mm * (1. - max_flow_broad * self.lai_broadleaved / self.lai);
            max_storage_mm +=
                self.broadleaf_storage_factor * (1. - (-0.5 * self.lai_broadleaved).exp());
        }
        self.interception = max_storage_mm.min(max_interception_mm).min(precipitation_mm);
        precipitation_mm - self.interception
    }

    /// Daily evaporation/transpiration after Penman-Monteith in the 3-PG
    /// variant: net radiation is a linear function of global radiation, the
    /// saturation vapour pressure slope is the fixed 2.2 mbar per degree,
    /// and on wet days transpiration is reduced by the Wigmosta ratio.
    /// Returns the canopy transpiration of the day (mm).
    fn evapotranspiration_3pg(
        &mut self,
        day: &ClimateDay,
        daylength_h: f64,
        combined_response: f64,
    ) -> f64 {
        let vpd_mbar = day.vpd * 10.;
        let temperature = day.temperature;
        let daylength = daylength_h * 3600.;
        let rad = day.radiation / daylength * 1_000_000.; // MJ/m2 day sum -> W/m2

        // net radiation from the linear empirical function
        let qa = -90.;
        let qb = 0.8;
        let net_rad = qa + qb * rad;

        const VPD_TO_SATURATION_DEFICIT: f64 = 0.000622; // 18/29/1000
        let g_bl = self.boundary_layer_conductance;
        let g_c = self.max_canopy_conductance * combined_response;
        let def_term =
            self.air_density * LATENT_HEAT_OF_VAPORIZATION * (vpd_mbar * VPD_TO_SATURATION_DEFICIT) * g_bl;
        let svp_slope = 2.2; // mbar/degC, following the original 3-PG code

        let div = 1. + svp_slope + g_bl / g_c;
        let e_transp = (svp_slope * net_rad + def_term) / div;
        let mut canopy_transpiration = e_transp / LATENT_HEAT_OF_VAPORIZATION * daylength;

        // reference evapotranspiration (Adair et al. 2008), monthly sums
        const PSYCHROMETRIC: f64 = 0.0672718682328237; // kPa/degC
        const WINDSPEED: f64 = 2.; // m/s
        let net_rad_mj_day = net_rad * daylength / 1_000_000.;
        let et0_day = 0.408 * svp_slope * net_rad_mj_day
            + PSYCHROMETRIC * 900. / (temperature + 273.) * WINDSPEED * day.vpd;
        let et0_div = svp_slope + PSYCHROMETRIC * (1. + 0.34 * WINDSPEED);
        self.et0[day.month as usize - 1] += et0_day / et0_div;

        if self.interception > 0. {
            // evaporation from the leaf surface: gBL/gC drops out
            let div_evap = 1. + svp_slope;
            let evap_potential =
                (svp_slope * net_rad + def_term) / div_evap / LATENT_HEAT_OF_VAPORIZATION * daylength;
            let ratio_transpiration_evaporation = canopy_transpiration / evap_potential;
            let evap_canopy = evap_potential.min(self.interception);
            canopy_transpiration =
                (evap_potential - evap_canopy) * ratio_transpiration_evaporation;
            self.interception -= evap_canopy;
            self.evaporation = evap_canopy;
        }
        canopy_transpiration.max(0.)
    }

    pub fn interception(&self) -> f64 {
        self.interception
    }
    pub fn evaporation(&self) -> f64 {
        self.evaporation
    }
    /// monthly reference evapotranspiration sums (mm)
    pub fn reference_evapotranspiration(&self) -> &[f64; 12] {
        &self.et0
    }
}

/// annual fluxes and state deltas for conservation checks and collaborators
#[derive(Debug, Clone, Copy, Default)]
pub struct WaterBalance {
    pub precipitation: f64,
    pub transpiration: f64,
    pub canopy_evaporation: f64,
    pub lateral_excess: f64,
    pub delta_content: f64,
    pub delta_snow: f64,
}

impl WaterBalance {
    /// closure error of the annual balance (should be ~0)
    pub fn residual(&self) -> f64 {
        self.precipitation
            - self.transpiration
            - self.canopy_evaporation
            - self.lateral_excess
            - self.delta_content
            - self.delta_snow
    }
}

/// Daily soil-water bucket of one resource unit.
///
/// Invariants: permanent wilting point <= content <= field capacity; excess
/// above field capacity leaves as lateral flow, transpiration is capped at
/// the wilting point.
#[derive(Debug, Clone)]
pub struct WaterCycle {
    soil_depth: f64, // mm
    psi_sat: f64,
    psi_koeff_b: f64,
    theta_sat: f64,
    field_capacity: f64,
    permanent_wilting_point: f64,
    content: f64,
    snow: SnowPack,
    canopy: Canopy,
    lai_threshold_closed_stands: f64,
    psi: Vec<f64>,
    water_to_ground: Vec<f64>,
    snow_cover: Vec<f64>,
    balance: WaterBalance,
    last_year: Option<i32>,
}

impl WaterCycle {
    /// Derive the soil characteristics from the texture percentages (must
    /// sum to 100 +- 0.01) and initialize the bucket at field capacity.
    pub fn setup(settings: &WaterSettings) -> Result<Self> {
        let (sand, silt, clay) = (settings.pct_sand, settings.pct_silt, settings.pct_clay);
        if (100. - (sand + silt + clay)).abs() > 0.01 {
            return Err(SylvaError::config(format!(
                "soil composition does not sum to 100: sand {} silt {} clay {}",
                sand, silt, clay
            )));
        }
        if settings.soil_depth_cm <= 0. {
            return Err(SylvaError::config("soil depth must be positive"));
        }
        // Schwalm & Ek (2004): psi_sat (kPa), moisture exponent b, theta_sat
        let psi_sat = -((1.54 - 0.0095 * sand + 0.0063 * silt) * 10f64.ln()).exp() * 0.000098;
        let psi_koeff_b = -(3.1 + 0.157 * clay - 0.003 * sand);
        let theta_sat = 0.01 * (50.5 - 0.142 * sand - 0.037 * clay);
        let mut cycle = Self {
            soil_depth: settings.soil_depth_cm * 10.,
            psi_sat,
            psi_koeff_b,
            theta_sat,
            field_capacity: 0.,
            permanent_wilting_point: 0.,
            content: 0.,
            snow: SnowPack {
                pack: 0.,
                melt_temperature: settings.snow_melt_temperature,
            },
            canopy: Canopy {
                needle_storage_factor: settings.interception_storage_needle,
                broadleaf_storage_factor: settings.interception_storage_broadleaf,
                air_density: settings.air_density,
                boundary_layer_conductance: settings.boundary_layer_conductance,
                ..Canopy::default()
            },
            lai_threshold_closed_stands: settings.lai_threshold_closed_stands,
            psi: Vec::new(),
            water_to_ground: Vec::new(),
            snow_cover: Vec::new(),
            balance: WaterBalance::default(),
            last_year: None,
        };
        cycle.permanent_wilting_point = cycle.height_from_psi(PSI_PERMANENT_WILTING_POINT);
        cycle.field_capacity = if settings.use_soil_saturation {
            cycle.height_from_psi(psi_sat)
        } else {
            cycle.height_from_psi(PSI_FIELD_CAPACITY)
        };
        if cycle.permanent_wilting_point >= cycle.field_capacity {
            return Err(SylvaError::consistency(format!(
                "wilting point {} above field capacity {}",
                cycle.permanent_wilting_point, cycle.field_capacity
            )));
        }
        cycle.content = cycle.field_capacity;
        log::debug!(
            "water setup: psi_sat {} theta_sat {} b {} fc {} pwp {}",
            psi_sat,
            theta_sat,
            psi_koeff_b,
            cycle.field_capacity,
            cycle.permanent_wilting_point
        );
        Ok(cycle)
    }

    /// water potential (kPa) for a water column (mm)
    fn psi_from_height(&self, mm: f64) -> f64 {
        if mm < 0.001 {
            return -100_000_000.;
        }
        self.psi_sat * (mm / self.soil_depth / self.theta_sat).powf(self.psi_koeff_b)
    }

    /// water column (mm) for a water potential (kPa)
    fn height_from_psi(&self, psi_kpa: f64) -> f64 {
        self.soil_depth * self.theta_sat * (psi_kpa / self.psi_sat).powf(1. / self.psi_koeff_b)
    }

    pub fn content(&self) -> Millimeters {
        self.content
    }
    pub fn set_content(&mut self, content: f64) {
        self.content = limit(content, 0., self.field_capacity);
    }
    pub fn field_capacity(&self) -> Millimeters {
        self.field_capacity
    }
    pub fn permanent_wilting_point(&self) -> Millimeters {
        self.permanent_wilting_point
    }
    pub fn snow(&self) -> &SnowPack {
        &self.snow
    }
    pub fn canopy(&self) -> &Canopy {
        &self.canopy
    }
    /// per-day soil water potential (kPa) of the last simulated year
    pub fn psi_kpa(&self, day_of_year: usize) -> KiloPascal {
        self.psi[day_of_year]
    }
    pub fn psi_all(&self) -> &[f64] {
        &self.psi
    }
    /// per-day water reaching the ground, for disturbance collaborators
    pub fn water_to_ground(&self) -> &[f64] {
        &self.water_to_ground
    }
    /// per-day snow cover, for disturbance collaborators
    pub fn snow_cover(&self) -> &[f64] {
        &self.snow_cover
    }
    pub fn balance(&self) -> &WaterBalance {
        &self.balance
    }

    /// Aggregate canopy characteristics from the RU species statistics:
    /// needle and broadleaf LAI and the LAI-weighted maximum canopy
    /// conductance, with the ground-vegetation share below LAI 1 and the
    /// Landsberg & Waring ramp below the closed-stand threshold.
    fn stand_values(&self, species: &SpeciesSet, stats: &[RuSpeciesStat]) -> (f64, f64, f64) {
        let mut lai_needle = 0.;
        let mut lai_broadleaved = 0.;
        let mut conductance = 0.;
        for (index, stat) in stats.iter().enumerate() {
            if species.get(index).is_coniferous() {
                lai_needle += stat.lai;
            } else {
                lai_broadleaved += stat.lai;
            }
            conductance += species.get(index).max_canopy_conductance() * stat.lai;
        }
        let mut total_lai = lai_needle + lai_broadleaved;
        if total_lai < 1. {
            conductance += GROUND_VEGETATION_CONDUCTANCE * (1. - total_lai);
            total_lai = 1.;
        }
        conductance /= total_lai;
        if total_lai < self.lai_threshold_closed_stands {
            conductance *= total_lai / self.lai_threshold_closed_stands;
        }
        (lai_needle, lai_broadleaved, conductance)
    }

    /// combined response of ground vegetation (fixed parameters)
    fn ground_response(psi_kpa: f64, vpd_kpa: f64) -> f64 {
        let psi_mpa = psi_kpa / 1000.;
        let water_response = limit(1. - psi_mpa / -1.5, 0., 1.);
        let vpd_response = (-0.6 * vpd_kpa).exp();
        water_response.min(vpd_response)
    }

    /// LAI-weighted minimum of vpd and soil-water response over the species
    /// of the RU, blended with ground vegetation below LAI 1 and scaled by
    /// the leaf-area weighted mean aging
    fn soil_atmosphere_response(
        &self,
        species: &SpeciesSet,
        stats: &[RuSpeciesStat],
        average_aging: f64,
        psi_kpa: f64,
        vpd_kpa: f64,
    ) -> f64 {
        let mut total = 0.;
        let mut total_lai_factor = 0.;
        for (index, stat) in stats.iter().enumerate() {
            if stat.lai_factor > 0. {
                let response = species.get(index).soil_atmosphere_response(psi_kpa, vpd_kpa);
                total += response * stat.lai_factor;
                total_lai_factor += stat.lai_factor;
            }
        }
        if total_lai_factor < 1. {
            total += Self::ground_response(psi_kpa, vpd_kpa) * (1. - total_lai_factor);
        }
        // ground vegetation ages as 1
        if total_lai_factor == 1. {
            total *= average_aging;
        } else if total_lai_factor > 0. && average_aging > 0. {
            total *= (1. - total_lai_factor) + total_lai_factor * average_aging;
        }
        total
    }

    /// Run the daily loop over one climate year. Repeated calls for the same
    /// year are no-ops.
    pub fn run_year(
        &mut self,
        species: &SpeciesSet,
        stats: &[RuSpeciesStat],
        average_aging: f64,
        days: &[ClimateDay],
        sun: &Sun,
        year: i32,
    ) -> Result<()> {
        if self.last_year == Some(year) {
            return Ok(());
        }
        let (lai_needle, lai_broadleaved, conductance) = self.stand_values(species, stats);
        self.canopy
            .set_stand_parameters(lai_needle, lai_broadleaved, conductance);
        self.psi.clear();
        self.psi.resize(days.len(), 0.);
        self.water_to_ground.clear();
        self.water_to_ground.resize(days.len(), 0.);
        self.snow_cover.clear();
        self.snow_cover.resize(days.len(), 0.);
        let content_before = self.content;
        let snow_before = self.snow.pack();
        let mut balance = WaterBalance::default();
        for (doy, day) in days.iter().enumerate() {
            // (1) precipitation of the day
            let precipitation = day.precipitation;
            balance.precipitation += precipitation;
            // (2) interception by the crown
            let after_interception = self.canopy.flow(precipitation);
            // (3) storage in the snow pack
            let to_soil = self.snow.flow(after_interception, day.temperature);
            self.water_to_ground[doy] = to_soil;
            self.snow_cover[doy] = self.snow.pack();
            // (4) add the rest to the soil bucket, route the excess out
            self.content += to_soil;
            if self.content > self.field_capacity {
                let excess = self.content - self.field_capacity;
                balance.lateral_excess += excess;
                self.content = self.field_capacity;
            }
            let current_psi = self.psi_from_height(self.content);
            self.psi[doy] = current_psi;
            // (5) transpiration from the combined response of the stand
            let combined_response =
                self.soil_atmosphere_response(species, stats, average_aging, current_psi, day.vpd);
            let mut transpiration =
                self.canopy
                    .evapotranspiration_3pg(day, sun.daylength(doy), combined_response);
            balance.canopy_evaporation += self.canopy.evaporation();
            // (6) residual intercepted water reaches the soil (or the snow
            // pack on cold days)
            let residual = self.canopy.interception();
            let residual_to_soil = self.snow.add(residual, day.temperature);
            self.water_to_ground[doy] += residual_to_soil;
            self.snow_cover[doy] = self.snow.pack();
            self.content += residual_to_soil;
            // (7) transpiration out of the bucket, floored at the wilting
            // point (transpiration is reduced accordingly)
            self.content -= transpiration;
            if self.content < self.permanent_wilting_point {
                transpiration -= self.permanent_wilting_point - self.content;
                self.content = self.permanent_wilting_point;
            }
            balance.transpiration += transpiration;
        }
        balance.delta_content = self.content - content_before;
        balance.delta_snow = self.snow.pack() - snow_before;
        self.balance = balance;
        self.last_year = Some(year);
        Ok(())
    }
}
