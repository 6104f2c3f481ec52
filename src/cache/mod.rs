//! Per-location weather files on disk and the nearest-neighbour fallback over them.

pub mod error;
pub mod nearest;
pub mod weather_file;
