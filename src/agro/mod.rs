//! Crop calendars, simulation engines and batch runs on top of normalized weather.

pub mod batch;
pub mod calendar;
pub mod engine;
