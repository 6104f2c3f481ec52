use crate::normalize::filter::FilterPolicy;
use chrono::NaiveDate;
use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("No usable rows left after {policy} filtering ({rows_in} rows in)")]
    InsufficientData { policy: FilterPolicy, rows_in: usize },

    #[error("Weather source and solar source share no dates")]
    NoOverlappingDates,

    #[error("Required source variable '{0}' is missing from the raw series")]
    MissingVariable(String),

    #[error("Unexpected value {value} for '{field}' on {date}")]
    DataIntegrity {
        field: String,
        date: NaiveDate,
        value: f64,
    },

    #[error("Elevation {0} is not a finite number")]
    InvalidElevation(f64),

    #[error("Output schema is invalid: {0}")]
    InvalidSchema(String),

    #[error("Weather table operation failed: {0}")]
    Frame(String),
}

impl From<PolarsError> for NormalizeError {
    fn from(e: PolarsError) -> Self {
        NormalizeError::Frame(e.to_string())
    }
}
