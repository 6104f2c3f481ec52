//! Stateless unit conversions shared by every weather profile.
//!
//! All conversions are plain `f64 -> f64` functions. They never fail and propagate NaN,
//! so a missing value stays missing no matter how many conversions are chained.
//! The [`convert`] table maps a `(from, to)` unit pair to one of these functions and
//! [`ConversionChain`] strings several of them together without intermediate rounding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const SECONDS_PER_DAY: f64 = 86_400.0;
pub const ZERO_CELSIUS_IN_KELVIN: f64 = 273.15;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConversionError {
    #[error("Value '{0}' cannot be converted to a number")]
    NonNumeric(String),

    #[error("No conversion defined from {from} to {to}")]
    Unsupported { from: Unit, to: Unit },

    #[error("Conversion chain is broken: step from {found} does not follow a step ending in {expected}")]
    BrokenChain { expected: Unit, found: Unit },
}

/// Physical units appearing in raw weather sources and canonical records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Kelvin,
    Celsius,
    /// Mass flux, kg/m²/s (precipitation in gridded archives).
    KgPerSquareMetreSecond,
    MillimetresPerDay,
    CentimetresPerDay,
    MetresPerSecond,
    KilometresPerDay,
    /// Mean irradiance, W/m².
    WattsPerSquareMetre,
    JoulesPerSquareMetreDay,
    MegajoulesPerSquareMetreDay,
    /// Vapour pressure, hPa. Only reachable from a dewpoint temperature in °C.
    Hectopascal,
    Percent,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Unit::Kelvin => "K",
            Unit::Celsius => "°C",
            Unit::KgPerSquareMetreSecond => "kg/m²/s",
            Unit::MillimetresPerDay => "mm/day",
            Unit::CentimetresPerDay => "cm/day",
            Unit::MetresPerSecond => "m/s",
            Unit::KilometresPerDay => "km/day",
            Unit::WattsPerSquareMetre => "W/m²",
            Unit::JoulesPerSquareMetreDay => "J/m²/day",
            Unit::MegajoulesPerSquareMetreDay => "MJ/m²/day",
            Unit::Hectopascal => "hPa",
            Unit::Percent => "%",
        };
        f.write_str(symbol)
    }
}

pub fn kelvin_to_celsius(x: f64) -> f64 {
    x - ZERO_CELSIUS_IN_KELVIN
}

pub fn celsius_to_kelvin(x: f64) -> f64 {
    x + ZERO_CELSIUS_IN_KELVIN
}

pub fn flux_to_mm_per_day(x: f64) -> f64 {
    x * SECONDS_PER_DAY
}

pub fn mm_to_cm(x: f64) -> f64 {
    x / 10.0
}

pub fn cm_to_mm(x: f64) -> f64 {
    x * 10.0
}

pub fn ms_to_km_per_day(x: f64) -> f64 {
    x * 86.4
}

pub fn km_per_day_to_ms(x: f64) -> f64 {
    x / 86.4
}

pub fn watts_to_joules_per_day(x: f64) -> f64 {
    x * SECONDS_PER_DAY
}

pub fn mj_to_j(x: f64) -> f64 {
    x * 1e6
}

pub fn j_to_mj(x: f64) -> f64 {
    x / 1e6
}

/// Saturation vapour pressure (kPa) at temperature `t` in °C (Tetens form, FAO-56 eq. 11).
pub fn saturation_vapour_pressure_kpa(t: f64) -> f64 {
    0.6108 * ((17.27 * t) / (t + 237.3)).exp()
}

/// Actual vapour pressure in hPa from a dewpoint temperature in °C.
pub fn dewpoint_to_vapour_pressure_hpa(tdew: f64) -> f64 {
    saturation_vapour_pressure_kpa(tdew) * 10.0
}

/// Dewpoint (°C) at which the saturation vapour pressure equals `vap` hPa. Inverse of
/// [`dewpoint_to_vapour_pressure_hpa`].
pub fn vapour_pressure_hpa_to_dewpoint(vap: f64) -> f64 {
    let x = (vap / 10.0 / 0.6108).ln();
    237.3 * x / (17.27 - x)
}

/// Relative humidity (%) from actual vapour pressure (hPa) and air temperature (°C),
/// capped at 100.
pub fn relative_humidity(vap: f64, t: f64) -> f64 {
    (vap / (saturation_vapour_pressure_kpa(t) * 10.0) * 100.0).min(100.0)
}

fn identity(x: f64) -> f64 {
    x
}

/// Looks up the conversion function for a unit pair.
///
/// Returns `None` when no direct conversion exists; multi-step conversions are expressed
/// with a [`ConversionChain`].
pub fn convert(from: Unit, to: Unit) -> Option<fn(f64) -> f64> {
    use Unit::*;
    let f: fn(f64) -> f64 = match (from, to) {
        (a, b) if a == b => identity,
        (Kelvin, Celsius) => kelvin_to_celsius,
        (Celsius, Kelvin) => celsius_to_kelvin,
        (KgPerSquareMetreSecond, MillimetresPerDay) => flux_to_mm_per_day,
        (MillimetresPerDay, CentimetresPerDay) => mm_to_cm,
        (CentimetresPerDay, MillimetresPerDay) => cm_to_mm,
        (MetresPerSecond, KilometresPerDay) => ms_to_km_per_day,
        (KilometresPerDay, MetresPerSecond) => km_per_day_to_ms,
        (WattsPerSquareMetre, JoulesPerSquareMetreDay) => watts_to_joules_per_day,
        (MegajoulesPerSquareMetreDay, JoulesPerSquareMetreDay) => mj_to_j,
        (JoulesPerSquareMetreDay, MegajoulesPerSquareMetreDay) => j_to_mj,
        (Celsius, Hectopascal) => dewpoint_to_vapour_pressure_hpa,
        _ => return None,
    };
    Some(f)
}

/// A single validated step of a conversion chain.
#[derive(Debug, Clone, Copy)]
pub struct Conversion {
    pub from: Unit,
    pub to: Unit,
    apply: fn(f64) -> f64,
}

impl Conversion {
    pub fn new(from: Unit, to: Unit) -> Result<Self, ConversionError> {
        let apply = convert(from, to).ok_or(ConversionError::Unsupported { from, to })?;
        Ok(Self { from, to, apply })
    }

    pub fn apply(&self, x: f64) -> f64 {
        (self.apply)(x)
    }
}

// The function is fully determined by the unit pair.
impl PartialEq for Conversion {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from && self.to == other.to
    }
}

/// An ordered sequence of conversions applied left to right.
///
/// The chain is validated on construction: each step must start in the unit the
/// previous step ended in.
///
/// # Examples
///
/// ```
/// use cropweather::units::{ConversionChain, Unit};
///
/// // Gridded precipitation flux to cm/day.
/// let chain = ConversionChain::through(&[
///     Unit::KgPerSquareMetreSecond,
///     Unit::MillimetresPerDay,
///     Unit::CentimetresPerDay,
/// ])
/// .unwrap();
/// assert!((chain.apply(1.0 / 86_400.0) - 0.1).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConversionChain {
    steps: Vec<Conversion>,
}

impl ConversionChain {
    /// The empty chain: values pass through unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn new(steps: Vec<Conversion>) -> Result<Self, ConversionError> {
        for pair in steps.windows(2) {
            if pair[0].to != pair[1].from {
                return Err(ConversionError::BrokenChain {
                    expected: pair[0].to,
                    found: pair[1].from,
                });
            }
        }
        Ok(Self { steps })
    }

    /// Builds a chain visiting each unit in `units` in order.
    pub fn through(units: &[Unit]) -> Result<Self, ConversionError> {
        let steps = units
            .windows(2)
            .map(|pair| Conversion::new(pair[0], pair[1]))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(steps)
    }

    pub fn apply(&self, x: f64) -> f64 {
        self.steps.iter().fold(x, |acc, step| step.apply(acc))
    }

    pub fn source_unit(&self) -> Option<Unit> {
        self.steps.first().map(|s| s.from)
    }

    pub fn target_unit(&self) -> Option<Unit> {
        self.steps.last().map(|s| s.to)
    }
}

/// Coerces a raw payload value into a number.
///
/// Numbers pass through, numeric strings are parsed, `null` becomes NaN (missing).
///
/// # Errors
///
/// Returns [`ConversionError::NonNumeric`] for booleans, non-numeric strings, arrays
/// and objects.
pub fn to_numeric(value: &Value) -> Result<f64, ConversionError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ConversionError::NonNumeric(n.to_string())),
        Value::Null => Ok(f64::NAN),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ConversionError::NonNumeric(s.clone())),
        other => Err(ConversionError::NonNumeric(other.to_string())),
    }
}
