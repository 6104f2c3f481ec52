pub mod date_range;
pub mod location;
pub mod raw_series;
pub mod record;
