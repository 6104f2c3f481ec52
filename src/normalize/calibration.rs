//! Estimation of Angstrom A/B coefficients from top-of-atmosphere and surface radiation.
//!
//! The ratio `sfc / toa` is computed for every day. Its 5th percentile approaches the lower
//! envelope of the data (`A`, a fully overcast sky) and its 98th percentile the upper
//! envelope (`A + B`, a clear sky). Estimation needs at least [`MIN_CALIBRATION_DAYS`]
//! days; with less data, or when the estimate is physically implausible, the defaults are
//! used. Calibration never fails the caller.

use log::{debug, warn};
use polars::prelude::{ChunkQuantile, Float64Chunked, QuantileMethod};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fewer valid days than this and the percentiles are not meaningful.
pub const MIN_CALIBRATION_DAYS: usize = 200;

const LOWER_QUANTILE: f64 = 0.05;
const UPPER_QUANTILE: f64 = 0.98;

/// Angstrom-Prescott coefficients relating top-of-atmosphere radiation to surface radiation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngstromCoefficients {
    pub a: f64,
    pub b: f64,
}

impl Default for AngstromCoefficients {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for AngstromCoefficients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(A={:.4}, B={:.4})", self.a, self.b)
    }
}

impl AngstromCoefficients {
    /// Process-wide defaults used whenever estimation is infeasible.
    pub const DEFAULT: AngstromCoefficients = AngstromCoefficients { a: 0.29, b: 0.49 };

    /// Physical turbidity bounds: `0 < A`, `0 < B` and `A + B < 1`.
    pub fn is_valid(&self) -> bool {
        self.a > 0.0 && self.b > 0.0 && self.a + self.b < 1.0
    }

    /// Clear-sky transmissivity, `A + B`.
    pub fn clear_sky_fraction(&self) -> f64 {
        self.a + self.b
    }
}

/// Ratios `sfc / toa` for days where both are finite and `toa` is positive.
fn ratio_column(toa: &[f64], sfc: &[f64]) -> Float64Chunked {
    let ratios: Vec<f64> = toa
        .iter()
        .zip(sfc)
        .filter(|(t, s)| t.is_finite() && s.is_finite() && **t > 0.0)
        .map(|(t, s)| s / t)
        .collect();
    Float64Chunked::from_vec("ratio".into(), ratios)
}

/// The raw percentile estimate, without the minimum-sample floor or plausibility check.
///
/// Percentiles interpolate linearly between ranks. Returns `None` when no day has a usable
/// ratio.
pub fn percentile_estimate(toa: &[f64], sfc: &[f64]) -> Option<AngstromCoefficients> {
    let ratios = ratio_column(toa, sfc);
    let a = ratios
        .quantile(LOWER_QUANTILE, QuantileMethod::Linear)
        .ok()
        .flatten()?;
    let ab = ratios
        .quantile(UPPER_QUANTILE, QuantileMethod::Linear)
        .ok()
        .flatten()?;
    Some(AngstromCoefficients { a, b: ab - a })
}

/// Estimates Angstrom A/B from daily top-of-atmosphere (`toa`) and surface (`sfc`)
/// radiation, falling back to [`AngstromCoefficients::DEFAULT`].
///
/// Both slices are expected to come from a filtered table, so they have equal length. Only
/// days where both values are finite and `toa > 0` count towards the sample.
///
/// # Examples
///
/// ```
/// use cropweather::normalize::calibration::{estimate_angstrom_ab, AngstromCoefficients};
///
/// // Too few days: defaults.
/// let toa = vec![30.0; 50];
/// let sfc = vec![15.0; 50];
/// assert_eq!(estimate_angstrom_ab(&toa, &sfc), AngstromCoefficients::DEFAULT);
/// ```
pub fn estimate_angstrom_ab(toa: &[f64], sfc: &[f64]) -> AngstromCoefficients {
    let valid = ratio_column(toa, sfc).len();
    if valid < MIN_CALIBRATION_DAYS {
        warn!(
            "Less than {} days of radiation data available ({}). Reverting to default Angstrom A/B coefficients {}",
            MIN_CALIBRATION_DAYS,
            valid,
            AngstromCoefficients::DEFAULT
        );
        return AngstromCoefficients::DEFAULT;
    }

    match percentile_estimate(toa, sfc) {
        Some(estimate) if estimate.is_valid() => {
            debug!("Angstrom A/B values estimated: {}", estimate);
            estimate
        }
        Some(estimate) => {
            warn!(
                "Angstrom A/B values {} outside valid range. Reverting to default values {}",
                estimate,
                AngstromCoefficients::DEFAULT
            );
            AngstromCoefficients::DEFAULT
        }
        None => AngstromCoefficients::DEFAULT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_too_few_rows_returns_defaults() {
        for n in [0, 1, 150, 199] {
            let toa = vec![35.0; n];
            let sfc: Vec<f64> = (0..n).map(|i| 10.0 + (i % 10) as f64).collect();
            assert_eq!(estimate_angstrom_ab(&toa, &sfc), AngstromCoefficients::DEFAULT);
        }
    }

    #[test]
    fn test_missing_days_do_not_count_towards_sample() {
        let mut toa = vec![30.0; 250];
        let sfc: Vec<f64> = (0..250).map(|i| 6.0 + (i % 50) as f64 * 0.3).collect();
        for t in toa.iter_mut().take(60) {
            *t = f64::NAN;
        }
        assert_eq!(estimate_angstrom_ab(&toa, &sfc), AngstromCoefficients::DEFAULT);
    }

    #[test]
    fn test_constant_ratio_is_degenerate() {
        let toa = vec![30.0; 365];
        let sfc = vec![15.0; 365];
        let raw = percentile_estimate(&toa, &sfc).unwrap();
        assert_relative_eq!(raw.a, 0.5);
        assert_relative_eq!(raw.b, 0.0);
        // B = 0 violates the physical bounds, so the calibrated result is the default pair.
        assert!(!raw.is_valid());
        assert_eq!(estimate_angstrom_ab(&toa, &sfc), AngstromCoefficients::DEFAULT);
    }

    #[test]
    fn test_spread_ratios_give_percentiles() {
        // Ratios 0.20, 0.21, ..., 0.79 repeated: 5th percentile ~0.23, 98th ~0.78.
        let n = 600;
        let toa = vec![40.0; n];
        let sfc: Vec<f64> = (0..n).map(|i| 40.0 * (0.20 + (i % 60) as f64 * 0.01)).collect();
        let ab = estimate_angstrom_ab(&toa, &sfc);
        assert!(ab.is_valid());
        assert_relative_eq!(ab.a, 0.23, epsilon = 0.01);
        assert_relative_eq!(ab.a + ab.b, 0.78, epsilon = 0.01);
    }

    #[test]
    fn test_implausible_estimate_falls_back() {
        // Surface radiation above top-of-atmosphere: A + B > 1.
        let toa = vec![20.0; 300];
        let sfc: Vec<f64> = (0..300).map(|i| 10.0 + (i % 30) as f64).collect();
        assert_eq!(estimate_angstrom_ab(&toa, &sfc), AngstromCoefficients::DEFAULT);
    }

    #[test]
    fn test_percentiles_interpolate_between_ranks() {
        // Ratios 1..=5: the 5th percentile sits between the first two ranks.
        let toa = [1.0; 5];
        let sfc = [5.0, 3.0, 1.0, 4.0, 2.0];
        let raw = percentile_estimate(&toa, &sfc).unwrap();
        assert_relative_eq!(raw.a, 1.2, epsilon = 1e-12);
        assert_relative_eq!(raw.a + raw.b, 4.92, epsilon = 1e-12);
        assert_eq!(percentile_estimate(&[0.0, f64::NAN], &[1.0, 1.0]), None);
    }
}
