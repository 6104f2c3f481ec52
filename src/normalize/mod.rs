//! The weather-normalization pipeline: join, filter, calibrate, convert.

pub mod calibration;
pub mod error;
pub mod evapotranspiration;
pub mod filter;
pub mod normalizer;
pub mod schema;
pub mod table;
