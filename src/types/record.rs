//! The canonical per-day weather record produced by the normalizer.

use crate::units::{km_per_day_to_ms, ms_to_km_per_day};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit of [`DailyWeatherRecord::wind_speed`], chosen by the consumer profile.
///
/// WOFOST and MONICA take wind in m/s, DSSAT in km/day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindUnit {
    #[default]
    MetresPerSecond,
    KilometresPerDay,
}

impl fmt::Display for WindUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindUnit::MetresPerSecond => write!(f, "m/s"),
            WindUnit::KilometresPerDay => write!(f, "km/day"),
        }
    }
}

/// Reference evapotranspiration values for one day, all in cm/day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEt {
    /// Penman open-water evaporation.
    pub e0: f64,
    /// Penman bare-soil evaporation.
    pub es0: f64,
    /// FAO-56 Penman-Monteith reference crop evapotranspiration.
    pub et0: f64,
}

/// One calendar day of weather at one location, in canonical units.
///
/// Produced by [`crate::WeatherNormalizer::normalize`] and persisted in cached weather
/// files. A record never contains missing values: every field is a finite number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyWeatherRecord {
    pub date: NaiveDate,
    /// Daily minimum air temperature (°C).
    pub temp_min: f64,
    /// Daily maximum air temperature (°C).
    pub temp_max: f64,
    /// Daily mean air temperature (°C).
    pub temp_mean: f64,
    /// Precipitation (cm/day).
    pub precipitation: f64,
    /// Wind speed at 2 m, in `wind_unit`.
    pub wind_speed: f64,
    pub wind_unit: WindUnit,
    /// Global (surface) irradiance (MJ/m²/day).
    pub irradiance: f64,
    /// Actual vapour pressure (hPa).
    pub vapour_pressure: f64,
    /// Dewpoint temperature (°C), when the source provides it.
    pub dewpoint: Option<f64>,
    /// Relative humidity (%), when the source provides it.
    pub relative_humidity: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation above sea level (m).
    pub elevation: f64,
    pub reference_et: Option<ReferenceEt>,
}

impl DailyWeatherRecord {
    /// Wind speed in m/s regardless of the profile's wind unit.
    pub fn wind_speed_ms(&self) -> f64 {
        match self.wind_unit {
            WindUnit::MetresPerSecond => self.wind_speed,
            WindUnit::KilometresPerDay => km_per_day_to_ms(self.wind_speed),
        }
    }

    /// Re-expresses the wind speed in `unit`.
    pub fn with_wind_unit(mut self, unit: WindUnit) -> Self {
        if unit != self.wind_unit {
            let ms = self.wind_speed_ms();
            self.wind_speed = match unit {
                WindUnit::MetresPerSecond => ms,
                WindUnit::KilometresPerDay => ms_to_km_per_day(ms),
            };
            self.wind_unit = unit;
        }
        self
    }
}
