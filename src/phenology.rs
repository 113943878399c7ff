//! Growing-season phenology after Jolly et al. 2005: a growing season index
//! built from ramp responses of vpd, temperature and day length decides the
//! leaf-on period, which is then folded into per-month fractions.

use crate::climate::Climate;
use crate::error::Result;
use crate::error::SylvaError;

/// "ramp" response: 0 below min, 1 above max, linear in between
fn ramp(value: f64, min_value: f64, max_value: f64) -> f64 {
    if value < min_value {
        0.
    } else if value > max_value {
        1.
    } else {
        (value - min_value) / (max_value - min_value)
    }
}

/// fixed-window floating average used to smooth the daily index
struct FloatingAverage {
    window: Vec<f64>,
    filled: usize,
    cursor: usize,
}

impl FloatingAverage {
    fn new(size: usize) -> Self {
        Self {
            window: vec![0.; size],
            filled: 0,
            cursor: 0,
        }
    }
    fn add(&mut self, value: f64) -> f64 {
        self.window[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.window.len();
        self.filled = (self.filled + 1).min(self.window.len());
        self.window.iter().take(self.filled).sum::<f64>() / self.filled as f64
    }
}

/// Phenology group: class 0 is the evergreen identity; other classes derive
/// their vegetation period from the climate each year.
#[derive(Debug, Clone)]
pub struct Phenology {
    id: usize,
    min_vpd: f64,
    max_vpd: f64,
    min_temp: f64,
    max_temp: f64,
    min_daylength: f64,
    max_daylength: f64,
    day_start: usize,
    day_end: usize,
    fractions: [f64; 12],
}

impl Phenology {
    /// evergreen identity group: leaf-on all year
    pub fn evergreen() -> Self {
        Self {
            id: 0,
            min_vpd: 0.,
            max_vpd: 0.,
            min_temp: 0.,
            max_temp: 0.,
            min_daylength: 0.,
            max_daylength: 0.,
            day_start: 0,
            day_end: 365,
            fractions: [1.; 12],
        }
    }

    pub fn new(
        id: usize,
        min_vpd: f64,
        max_vpd: f64,
        min_temp: f64,
        max_temp: f64,
        min_daylength: f64,
        max_daylength: f64,
    ) -> Self {
        Self {
            id,
            min_vpd,
            max_vpd,
            min_temp,
            max_temp,
            min_daylength,
            max_daylength,
            day_start: 0,
            day_end: 365,
            fractions: [1.; 12],
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }
    /// leaf-on fraction of a month (0-based)
    pub fn fraction(&self, month: usize) -> f64 {
        self.fractions[month]
    }
    pub fn day_start(&self) -> usize {
        self.day_start
    }
    pub fn day_end(&self) -> usize {
        self.day_end
    }
    /// length of the vegetation period in days
    pub fn vegetation_period(&self) -> usize {
        self.day_end.saturating_sub(self.day_start)
    }

    /// Recompute the vegetation period for the current climate year. The
    /// daily index is the product of the three ramp responses, smoothed by a
    /// three-week floating average; crossings of 0.5 mark the season.
    pub fn calculate(&mut self, climate: &Climate) -> Result<()> {
        if self.id == 0 {
            return Ok(());
        }
        let inside_at_new_year = !climate.sun().northern_hemisphere();
        let mut inside = inside_at_new_year;
        let mut day_start: isize = -1;
        let mut day_stop: isize = -1;
        let mut wait_for: isize = -1;
        let mut floater = FloatingAverage::new(21);
        for (doy, day) in climate.days().iter().enumerate() {
            if wait_for >= 0 && (doy as isize) < wait_for {
                continue;
            }
            let vpd = 1. - ramp(day.vpd, self.min_vpd, self.max_vpd); // high for low vpd
            let temp = ramp(day.temperature, self.min_temp, self.max_temp);
            let daylength = ramp(
                climate.sun().daylength(doy),
                self.min_daylength,
                self.max_daylength,
            );
            let gsi = floater.add(vpd * temp * daylength);
            if !inside && gsi > 0.5 {
                inside = true;
                day_start = doy as isize;
                if day_stop != -1 {
                    break;
                }
                wait_for = climate.sun().longest_day() as isize;
            } else if inside && gsi < 0.5 {
                day_stop = doy as isize;
                if day_start != -1 {
                    break;
                }
                wait_for = climate.sun().longest_day() as isize;
                inside = false;
            }
        }
        // season never ends within the year: evergreen-like year
        if day_start != -1 && day_stop == -1 {
            day_stop = climate.days_of_year() as isize;
        }
        // correct for the three-week floating average
        day_start -= 10;
        day_stop -= 10;
        if day_start < 0 || day_stop < 0 {
            return Err(SylvaError::config(format!(
                "phenology group {}: unable to determine the vegetation period",
                self.id
            )));
        }
        self.day_start = day_start as usize;
        self.day_end = (day_stop as usize).min(climate.days_of_year());
        let (begin_month, begin_day) = climate.to_date(self.day_start);
        let (end_month, end_day) = climate.to_date(self.day_end.min(climate.days_of_year() - 1));
        for month in 0..12 {
            if month < begin_month || month > end_month {
                self.fractions[month] = 0.;
            } else if month > begin_month && month < end_month {
                self.fractions[month] = 1.;
            } else {
                let mut fraction = 1.;
                if month == begin_month {
                    fraction -= begin_day as f64 / climate.days_in_month(begin_month) as f64;
                }
                if month == end_month {
                    fraction -= (climate.days_in_month(end_month) as f64 - end_day as f64)
                        / climate.days_in_month(end_month) as f64;
                }
                self.fractions[month] = fraction.max(0.);
            }
        }
        log::debug!(
            "phenology group {}: vegetation period day {} to {}",
            self.id,
            self.day_start,
            self.day_end
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::ClimateRow;
    use crate::config::ClimateSettings;

    fn seasonal_rows() -> Vec<ClimateRow> {
        const DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
        let mut rows = Vec::new();
        let mut doy = 0f64;
        for (m, &days) in DAYS.iter().enumerate() {
            for d in 1..=days {
                // sinusoidal annual temperature course, peak in July
                let t = 10. - 15. * (2. * std::f64::consts::PI * (doy + 10.) / 365.).cos();
                rows.push(ClimateRow {
                    year: 2000,
                    month: m as u32 + 1,
                    day: d,
                    min_temperature: t - 5.,
                    max_temperature: t + 5.,
                    precipitation: 2.,
                    radiation: 10.,
                    vpd: 0.8,
                });
                doy += 1.;
            }
        }
        rows
    }

    #[test]
    fn ramp_is_clamped_linear() {
        assert_eq!(ramp(-1., 0., 10.), 0.);
        assert_eq!(ramp(5., 0., 10.), 0.5);
        assert_eq!(ramp(42., 0., 10.), 1.);
    }

    #[test]
    fn floating_average_warms_up() {
        let mut avg = FloatingAverage::new(3);
        assert_eq!(avg.add(3.), 3.);
        assert_eq!(avg.add(6.), 4.5);
        assert_eq!(avg.add(9.), 6.);
        assert_eq!(avg.add(0.), 5.);
    }

    #[test]
    fn evergreen_group_is_identity() {
        let phenology = Phenology::evergreen();
        for month in 0..12 {
            assert_eq!(phenology.fraction(month), 1.);
        }
        assert_eq!(phenology.vegetation_period(), 365);
    }

    #[test]
    fn deciduous_group_finds_a_summer_season() {
        let climate = Climate::from_rows(
            "seasonal",
            &seasonal_rows(),
            48f64.to_radians(),
            &ClimateSettings::default(),
        )
        .unwrap();
        let mut phenology = Phenology::new(1, 0.9, 4.1, 2., 9., 10., 11.);
        phenology.calculate(&climate).unwrap();
        assert!(phenology.day_start() > 31, "starts after January");
        assert!(phenology.day_end() > phenology.day_start());
        assert!(phenology.day_end() < 365, "ends before New Year");
        assert_eq!(phenology.fraction(0), 0.);
        assert_eq!(phenology.fraction(6), 1.);
        assert_eq!(phenology.fraction(11), 0.);
        let total: f64 = (0..12).map(|m| phenology.fraction(m)).sum();
        assert!(total > 3. && total < 11.);
    }
}
