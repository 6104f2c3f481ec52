use crate::agro::engine::SimulationError;
use crate::cache::error::CacheError;
use crate::config::ConfigError;
use crate::normalize::error::NormalizeError;
use crate::sources::error::FetchError;
use crate::types::date_range::InvalidDateRange;
use crate::types::location::{LocationQuery, ValidationError};
use crate::units::ConversionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CropWeatherError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    DateRange(#[from] InvalidDateRange),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The live fetch failed and the cache held nothing to fall back on.
    #[error("No weather for {location}: live fetch failed and the cache is empty")]
    FallbackExhausted {
        location: LocationQuery,
        #[source]
        source: FetchError,
    },
}
