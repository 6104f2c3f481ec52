//! Missing-value handling for daily weather tables.

use crate::normalize::error::NormalizeError;
use crate::normalize::table::WeatherTable;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the quality filter deals with missing cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Drop every row that contains at least one missing value. Used for
    /// simulation-grade series where gaps are unacceptable.
    #[default]
    Strict,
    /// Reindex to a contiguous daily range and carry the last valid value forward.
    /// Used when continuity matters more than exactness, e.g. cached multi-year series.
    FillForward,
}

impl fmt::Display for FilterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterPolicy::Strict => write!(f, "strict"),
            FilterPolicy::FillForward => write!(f, "fill-forward"),
        }
    }
}

/// What the filter did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterReport {
    pub policy: FilterPolicy,
    /// Rows removed. Under fill-forward these are leading rows with no earlier valid value.
    pub dropped_rows: usize,
    /// Cells that were missing and received a carried-forward value.
    pub filled_cells: usize,
    /// Rows inserted to close date gaps (fill-forward only).
    pub inserted_rows: usize,
}

/// Masks fill values and removes or fills every missing cell.
///
/// Cells equal to `fill_value`, NaN and infinities count as missing. On success the
/// returned table contains no missing values.
///
/// # Errors
///
/// Returns [`NormalizeError::InsufficientData`] when no rows survive.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use cropweather::normalize::filter::{filter_missing, FilterPolicy};
/// use cropweather::normalize::table::WeatherTable;
///
/// let d = |day| NaiveDate::from_ymd_opt(2022, 1, day).unwrap();
/// let table = WeatherTable::new(
///     vec![d(1), d(2), d(3)],
///     vec![("T2M".to_string(), vec![1.0, -999.0, 3.0])],
/// )
/// .unwrap();
///
/// let (strict, report) = filter_missing(table.clone(), -999.0, FilterPolicy::Strict).unwrap();
/// assert_eq!((strict.height(), report.dropped_rows), (2, 1));
///
/// let (filled, report) = filter_missing(table, -999.0, FilterPolicy::FillForward).unwrap();
/// assert_eq!(filled.column("T2M").unwrap(), vec![1.0, 1.0, 3.0]);
/// assert_eq!(report.filled_cells, 1);
/// ```
pub fn filter_missing(
    table: WeatherTable,
    fill_value: f64,
    policy: FilterPolicy,
) -> Result<(WeatherTable, FilterReport), NormalizeError> {
    let rows_in = table.height();
    let table = table.mask_missing(fill_value)?;

    let mut report = FilterReport {
        policy,
        ..FilterReport::default()
    };

    let table = match policy {
        FilterPolicy::Strict => {
            let kept = table.drop_incomplete_rows()?;
            report.dropped_rows = rows_in - kept.height();
            kept
        }
        FilterPolicy::FillForward => {
            let aligned = table.align_to_calendar()?;
            report.inserted_rows = aligned.height() - rows_in;
            let filled = aligned.fill_forward()?;
            report.filled_cells = aligned.null_count() - filled.null_count();
            // Leading gaps have nothing to carry forward.
            let kept = filled.drop_incomplete_rows()?;
            report.dropped_rows = filled.height() - kept.height();
            kept
        }
    };

    if table.is_empty() {
        return Err(NormalizeError::InsufficientData { policy, rows_in });
    }

    if report.dropped_rows > 0 || report.filled_cells > 0 {
        info!(
            "{} filter: {} rows in, {} dropped, {} cells filled, {} rows inserted",
            policy, rows_in, report.dropped_rows, report.filled_cells, report.inserted_rows
        );
    } else {
        debug!("{} filter: {} rows, nothing missing", policy, rows_in);
    }

    Ok((table, report))
}
