//! Runtime configuration: built-in defaults, then an optional TOML file, then
//! `CROPWEATHER_`-prefixed environment variables.

use crate::agro::calendar::CalendarClampPolicy;
use crate::cache::error::CacheError;
use crate::normalize::filter::FilterPolicy;
use crate::sources::elevation::DEFAULT_FALLBACK_ELEVATION;
use crate::sources::nasa_power::DEFAULT_RESPONSE_CACHE_CAPACITY;
use crate::types::raw_series::DEFAULT_FILL_VALUE;
use crate::types::record::WindUnit;
use crate::utils::get_cache_dir;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "CROPWEATHER_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration")]
    Load(#[source] Box<figment::Error>),
}

/// Settings shared by the weather service and its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropWeatherConfig {
    /// Directory holding cached weather files. `None` uses the user cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Timeout for every outbound request, in seconds.
    pub timeout_secs: u64,
    /// Elevation (m) used when the elevation lookup fails.
    pub elevation_fallback: f64,
    /// Number of memoized source responses.
    pub response_cache_capacity: u64,
    pub filter_policy: FilterPolicy,
    pub fill_value: f64,
    pub wind_unit: WindUnit,
    /// Attach E0/ES0/ET0 to normalized records.
    pub derive_et: bool,
    pub calendar_clamp: CalendarClampPolicy,
}

impl Default for CropWeatherConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            timeout_secs: 10,
            elevation_fallback: DEFAULT_FALLBACK_ELEVATION,
            response_cache_capacity: DEFAULT_RESPONSE_CACHE_CAPACITY,
            filter_policy: FilterPolicy::default(),
            fill_value: DEFAULT_FILL_VALUE,
            wind_unit: WindUnit::default(),
            derive_et: false,
            calendar_clamp: CalendarClampPolicy::default(),
        }
    }
}

impl CropWeatherConfig {
    /// The layered provider, exposed so callers can merge their own sources on top.
    ///
    /// Nested keys in the environment use a double underscore, e.g.
    /// `CROPWEATHER_CALENDAR_CLAMP__LATEST_HARVEST`.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(CropWeatherConfig::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads the configuration.
    ///
    /// A missing `file` is not an error; its layer is simply empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a layer cannot be parsed or a value has the wrong
    /// type.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::figment(file)
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The configured cache directory, or the default one.
    pub fn resolved_cache_dir(&self) -> Result<PathBuf, CacheError> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => get_cache_dir(),
        }
    }
}
