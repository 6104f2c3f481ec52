//! Daily weather for crop-growth models.
//!
//! `cropweather` fetches raw daily weather for a point, normalizes it into canonical
//! [`DailyWeatherRecord`]s, caches the result on disk and reshapes it for DSSAT, MONICA and
//! WOFOST.
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use cropweather::{CropWeatherConfig, DateRange, LocationQuery, WeatherService};
//!
//! # fn main() -> Result<(), cropweather::CropWeatherError> {
//! let config = CropWeatherConfig::load(None)?;
//! // NASA POWER variables, wind in `config.wind_unit`.
//! let service = WeatherService::from_config(&config, None)?;
//!
//! let range = DateRange::new(
//!     NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
//! )?;
//! let weather = service.load(&LocationQuery::new(52.0, 5.0)?, &range)?;
//! println!("{} days from {:?}", weather.records.len(), weather.origin);
//! # Ok(())
//! # }
//! ```

pub mod agro;
pub mod cache;
pub mod config;
mod error;
pub mod normalize;
pub mod service;
pub mod sources;
mod types;
pub mod units;
mod utils;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, CropWeatherConfig};
pub use error::CropWeatherError;
pub use normalize::normalizer::{NormalizedWeather, WeatherNormalizer};
pub use service::{LoadedWeather, WeatherOrigin, WeatherService};
pub use types::date_range::{DateRange, InvalidDateRange};
pub use types::location::{LocationQuery, ValidationError};
pub use types::raw_series::{RawSeries, DEFAULT_FILL_VALUE};
pub use types::record::{DailyWeatherRecord, ReferenceEt, WindUnit};
pub use units::ConversionError;
pub use utils::get_cache_dir;
