//! In-memory climate table with one row per day, plus solar day-length
//! calculations. Climate data arrives from the host as [`ClimateRow`]s;
//! database ingestion lives outside the core.

use crate::config::ClimateSettings;
use crate::error::Result;
use crate::error::SylvaError;
use crate::limit;
use rand::Rng;
use rand::rngs::SmallRng;

/// one row of the climate input table
#[derive(Debug, Clone, Copy)]
pub struct ClimateRow {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub precipitation: f64,
    pub radiation: f64,
    pub vpd: f64,
}

/// derived climate state of one day
#[derive(Debug, Clone, Copy, Default)]
pub struct ClimateDay {
    pub year: i32,
    pub month: u32,
    pub day_of_month: u32,
    /// effective day temperature (Floyd & Braddock 1984 fit)
    pub temperature: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
    /// exponentially smoothed temperature for response calculations
    pub temp_delayed: f64,
    pub precipitation: f64,
    pub radiation: f64,
    pub vpd: f64,
}

impl ClimateDay {
    pub fn mean_temp(&self) -> f64 {
        (self.min_temperature + self.max_temperature) / 2.
    }
    pub fn id(&self) -> i32 {
        self.year * 10000 + self.month as i32 * 100 + self.day_of_month as i32
    }
}

/// Day lengths for a latitude, using the length-of-day approximation of
/// Gandraxa. Day 0 is January 1st.
pub struct Sun {
    latitude: f64,
    day_with_max_length: usize,
    daylength_h: [f64; 366],
}

impl Sun {
    pub fn new(latitude_rad: f64) -> Self {
        // northern hemisphere: longest day around June 21st
        let day_with_max_length = if latitude_rad > 0. { 172 } else { 355 };
        let j = std::f64::consts::PI / 182.625;
        let ecliptic = 23.439f64.to_radians();
        let mut daylength_h = [0.; 366];
        for (day, length) in daylength_h.iter_mut().enumerate() {
            let m = 1. - latitude_rad.tan() * (ecliptic * (j * (day as f64 + 10.)).cos()).tan();
            let m = limit(m, 0., 2.);
            *length = (1. - m).acos() / std::f64::consts::PI * 24.;
        }
        Self {
            latitude: latitude_rad,
            day_with_max_length,
            daylength_h,
        }
    }
    pub fn latitude(&self) -> f64 {
        self.latitude
    }
    pub fn daylength(&self, day_of_year: usize) -> f64 {
        self.daylength_h[day_of_year]
    }
    pub fn longest_day(&self) -> usize {
        self.day_with_max_length
    }
    pub fn northern_hemisphere(&self) -> bool {
        self.day_with_max_length < 300
    }
}

/// Climate table of one or more whole years with a year cursor.
///
/// Years advance sequentially (wrapping back to the first loaded year), or
/// by sampling from a configured year list when random sampling is on.
pub struct Climate {
    name: String,
    store: Vec<ClimateDay>,
    /// start offset of every (year, month); `years * 12 + 1` entries
    month_index: Vec<usize>,
    years: usize,
    current_year: usize,
    sun: Sun,
    sampling: Option<Vec<usize>>,
}

impl Climate {
    /// Build the table from raw rows. Rows must start at a January 1st and
    /// be contiguous; the year break is checked on the first day of each
    /// year. Validation ranges are advisory and only logged.
    pub fn from_rows(
        name: impl Into<String>,
        rows: &[ClimateRow],
        latitude_rad: f64,
        settings: &ClimateSettings,
    ) -> Result<Self> {
        let name = name.into();
        if rows.is_empty() {
            return Err(SylvaError::input(format!("climate {}: no rows", name)));
        }
        if settings.random_sampling_enabled
            && (settings.temperature_shift != 0. || settings.precipitation_shift != 1.)
        {
            return Err(SylvaError::config(
                "climate: cannot combine random sampling with temperature/precipitation shifts",
            ));
        }
        let mut store = Vec::with_capacity(rows.len());
        let mut month_index = Vec::new();
        let mut years = 0usize;
        let mut last: Option<(i32, u32, u32)> = None;
        let mut year_days = 0usize;
        for row in rows {
            if row.month < 1 || row.month > 12 || row.day < 1 || row.day > 31 {
                return Err(SylvaError::input(format!(
                    "climate {}: invalid date {}-{}-{}",
                    name, row.year, row.month, row.day
                )));
            }
            if row.min_temperature < -70.
                || row.max_temperature > 50.
                || row.min_temperature > row.max_temperature
            {
                log::warn!(
                    "climate {}: temperature out of range on {}-{}-{}",
                    name,
                    row.year,
                    row.month,
                    row.day
                );
            }
            if row.precipitation < 0. || row.precipitation > 200. {
                log::warn!("climate {}: precipitation out of range (0..200 mm)", name);
            }
            if row.radiation < 0. || row.radiation > 50. {
                log::warn!("climate {}: radiation out of range (0..50 MJ/m2)", name);
            }
            if row.vpd < 0. || row.vpd > 10. {
                log::warn!("climate {}: vpd out of range (0..10 kPa)", name);
            }
            match last {
                None => {
                    if row.month != 1 || row.day != 1 {
                        return Err(SylvaError::input(format!(
                            "climate {}: table must start on a January 1st",
                            name
                        )));
                    }
                    years = 1;
                    year_days = 1;
                    month_index.push(store.len());
                }
                Some((py, pm, pd)) => {
                    if row.month == 1 && row.day == 1 {
                        // year break
                        if row.year != py + 1 {
                            return Err(SylvaError::input(format!(
                                "climate {}: invalid year break at {}-{}-{}",
                                name, row.year, row.month, row.day
                            )));
                        }
                        if year_days != 365 && year_days != 366 {
                            return Err(SylvaError::input(format!(
                                "climate {}: year {} has {} days",
                                name, py, year_days
                            )));
                        }
                        years += 1;
                        year_days = 1;
                        month_index.push(store.len());
                    } else if row.month == pm {
                        if row.day != pd + 1 || row.year != py {
                            return Err(SylvaError::input(format!(
                                "climate {}: dates not contiguous at {}-{}-{}",
                                name, row.year, row.month, row.day
                            )));
                        }
                        year_days += 1;
                    } else {
                        if row.month != pm + 1 || row.day != 1 || row.year != py {
                            return Err(SylvaError::input(format!(
                                "climate {}: dates not contiguous at {}-{}-{}",
                                name, row.year, row.month, row.day
                            )));
                        }
                        year_days += 1;
                        month_index.push(store.len());
                    }
                    if year_days > 366 {
                        return Err(SylvaError::input(format!(
                            "climate {}: more than 366 days in year {}",
                            name, row.year
                        )));
                    }
                }
            }
            last = Some((row.year, row.month, row.day));
            let min_temperature = row.min_temperature + settings.temperature_shift;
            let max_temperature = row.max_temperature + settings.temperature_shift;
            let mean = (min_temperature + max_temperature) / 2.;
            store.push(ClimateDay {
                year: row.year,
                month: row.month,
                day_of_month: row.day,
                temperature: 0.212 * (max_temperature - mean) + mean,
                min_temperature,
                max_temperature,
                temp_delayed: 0.,
                precipitation: row.precipitation * settings.precipitation_shift,
                radiation: row.radiation,
                vpd: row.vpd,
            });
        }
        if year_days != 365 && year_days != 366 {
            return Err(SylvaError::input(format!(
                "climate {}: final year is incomplete ({} days)",
                name, year_days
            )));
        }
        if month_index.len() != years * 12 {
            return Err(SylvaError::input(format!(
                "climate {}: expected {} months, found {}",
                name,
                years * 12,
                month_index.len()
            )));
        }
        month_index.push(store.len());
        // delayed temperature, smoothed over the memory time tau
        let tau = settings.temperature_tau.max(1.);
        let mut delayed = store[0].temperature;
        store[0].temp_delayed = delayed;
        for day in store.iter_mut().skip(1) {
            delayed += (day.temperature - delayed) / tau;
            day.temp_delayed = delayed;
        }
        let sampling = if settings.random_sampling_enabled {
            let list = if settings.random_sampling_list.is_empty() {
                (0..years).collect()
            } else {
                let list = settings.random_sampling_list.clone();
                if let Some(bad) = list.iter().find(|&&y| y >= years) {
                    return Err(SylvaError::config(format!(
                        "climate {}: sampling list year {} out of range (0..{})",
                        name, bad, years
                    )));
                }
                list
            };
            Some(list)
        } else {
            None
        };
        log::info!("climate {}: loaded {} years", name, years);
        Ok(Self {
            name,
            store,
            month_index,
            years,
            current_year: 0,
            sun: Sun::new(latitude_rad),
            sampling,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn years(&self) -> usize {
        self.years
    }
    pub fn current_year(&self) -> usize {
        self.current_year
    }
    pub fn sun(&self) -> &Sun {
        &self.sun
    }
    pub fn daylength_h(&self, day_of_year: usize) -> f64 {
        self.sun.daylength(day_of_year)
    }

    /// all days of the current year in order
    pub fn days(&self) -> &[ClimateDay] {
        let begin = self.month_index[self.current_year * 12];
        let end = self.month_index[(self.current_year + 1) * 12];
        &self.store[begin..end]
    }
    pub fn days_of_year(&self) -> usize {
        self.days().len()
    }
    pub fn day(&self, day_of_year: usize) -> &ClimateDay {
        &self.days()[day_of_year]
    }
    /// days of a month (0-based) of the current year
    pub fn month(&self, month: usize) -> &[ClimateDay] {
        let begin = self.month_index[self.current_year * 12 + month];
        let end = self.month_index[self.current_year * 12 + month + 1];
        &self.store[begin..end]
    }
    pub fn days_in_month(&self, month: usize) -> usize {
        self.month(month).len()
    }
    /// decode a day-of-year into (month 0-based, day-of-month 1-based)
    pub fn to_date(&self, day_of_year: usize) -> (usize, u32) {
        let day = &self.days()[day_of_year];
        (day.month as usize - 1, day.day_of_month)
    }

    /// advance the year cursor: sequentially with wrap-around, or by
    /// sampling when random sampling is configured
    pub fn next_year(&mut self, rng: &mut SmallRng) {
        match &self.sampling {
            Some(list) => {
                self.current_year = list[rng.random_range(0..list.len())];
            }
            None => {
                self.current_year += 1;
                if self.current_year >= self.years {
                    log::debug!("climate {}: restart of climate table", self.name);
                    self.current_year = 0;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::SeedableRng;

    pub(crate) fn synthetic_rows(year: i32, leap: bool) -> Vec<ClimateRow> {
        const DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
        let mut rows = Vec::new();
        for (m, &days) in DAYS.iter().enumerate() {
            let days = if m == 1 && leap { days + 1 } else { days };
            for d in 1..=days {
                rows.push(ClimateRow {
                    year,
                    month: m as u32 + 1,
                    day: d,
                    min_temperature: 0.,
                    max_temperature: 10.,
                    precipitation: 2.,
                    radiation: 10.,
                    vpd: 0.5,
                });
            }
        }
        rows
    }

    fn settings() -> ClimateSettings {
        ClimateSettings::default()
    }

    #[test]
    fn loads_365_and_366_day_years() {
        let mut rows = synthetic_rows(2000, false);
        rows.extend(synthetic_rows(2001, true));
        let climate = Climate::from_rows("t", &rows, 0.84, &settings()).unwrap();
        assert_eq!(climate.years(), 2);
        assert_eq!(climate.days_of_year(), 365);
        let mut rng = SmallRng::seed_from_u64(1);
        let mut climate = climate;
        climate.next_year(&mut rng);
        assert_eq!(climate.days_of_year(), 366);
        assert_eq!(climate.days_in_month(1), 29);
        climate.next_year(&mut rng);
        assert_eq!(climate.current_year(), 0);
    }

    #[test]
    fn effective_temperature_uses_floyd_fit() {
        let rows = synthetic_rows(2000, false);
        let climate = Climate::from_rows("t", &rows, 0.84, &settings()).unwrap();
        let day = climate.day(0);
        // mean 5, max 10: 0.212 * (10 - 5) + 5
        assert!((day.temperature - 6.06).abs() < 1e-9);
    }

    #[test]
    fn delayed_temperature_approaches_mean() {
        let rows = synthetic_rows(2000, false);
        let climate = Climate::from_rows("t", &rows, 0.84, &settings()).unwrap();
        let first = climate.day(0);
        let late = climate.day(200);
        assert_eq!(first.temp_delayed, first.temperature);
        assert!((late.temp_delayed - late.temperature).abs() < 1e-6);
    }

    #[test]
    fn shifts_apply() {
        let rows = synthetic_rows(2000, false);
        let mut cfg = settings();
        cfg.temperature_shift = 2.;
        cfg.precipitation_shift = 0.5;
        let climate = Climate::from_rows("t", &rows, 0.84, &cfg).unwrap();
        assert_eq!(climate.day(0).max_temperature, 12.);
        assert_eq!(climate.day(0).precipitation, 1.);
    }

    #[test]
    fn sampling_and_shifts_are_exclusive() {
        let rows = synthetic_rows(2000, false);
        let mut cfg = settings();
        cfg.random_sampling_enabled = true;
        cfg.temperature_shift = 1.;
        assert!(Climate::from_rows("t", &rows, 0.84, &cfg).is_err());
    }

    #[test]
    fn broken_year_sequence_is_rejected() {
        let mut rows = synthetic_rows(2000, false);
        rows.extend(synthetic_rows(2002, false));
        assert!(Climate::from_rows("t", &rows, 0.84, &settings()).is_err());
    }

    #[test]
    fn gap_in_days_is_rejected() {
        let mut rows = synthetic_rows(2000, false);
        rows.remove(40);
        assert!(Climate::from_rows("t", &rows, 0.84, &settings()).is_err());
    }

    #[test]
    fn daylength_follows_the_season() {
        let sun = Sun::new(48f64.to_radians());
        assert!(sun.northern_hemisphere());
        assert!(sun.daylength(172) > 15.);
        assert!(sun.daylength(355) < 9.);
        let equator = Sun::new(0.);
        assert!((equator.daylength(10) - 12.).abs() < 0.1);
        assert!((equator.daylength(180) - 12.).abs() < 0.1);
    }
}
