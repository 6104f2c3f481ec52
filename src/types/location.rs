//! Defines the validated geographical point used by every fetch, lookup and
//! normalization call.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Latitude {0} is outside the range [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("Longitude {0} is outside the range [-180, 180]")]
    LongitudeOutOfRange(f64),
}

/// A geographical point with latitude and longitude in decimal degrees.
///
/// The only way to obtain a `LocationQuery` is through [`LocationQuery::new`], which
/// rejects coordinates outside `[-90, 90] x [-180, 180]` (and NaN). Anything holding a
/// `LocationQuery` can therefore rely on the coordinates being in range.
///
/// # Examples
///
/// ```
/// use cropweather::{LocationQuery, ValidationError};
///
/// let berlin = LocationQuery::new(52.52, 13.40).unwrap();
/// assert_eq!(berlin.latitude(), 52.52);
///
/// let err = LocationQuery::new(91.0, 0.0).unwrap_err();
/// assert_eq!(err, ValidationError::LatitudeOutOfRange(91.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLocation")]
pub struct LocationQuery {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawLocation {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawLocation> for LocationQuery {
    type Error = ValidationError;

    fn try_from(raw: RawLocation) -> Result<Self, Self::Error> {
        LocationQuery::new(raw.latitude, raw.longitude)
    }
}

impl LocationQuery {
    /// Creates a new `LocationQuery`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::LatitudeOutOfRange`] or
    /// [`ValidationError::LongitudeOutOfRange`] when a coordinate is outside its range
    /// or is not a number.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        // Range checks written as negated containment so NaN fails too.
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ValidationError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ValidationError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// The point as `[latitude, longitude]`, the layout used by the spatial index.
    pub(crate) fn as_point(&self) -> [f64; 2] {
        [self.latitude, self.longitude]
    }
}

impl fmt::Display for LocationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}
