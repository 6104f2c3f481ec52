//! The daily table the normalizer works on: a polars frame keyed by a `DAY` date column.

use crate::normalize::error::NormalizeError;
use crate::types::raw_series::RawSeries;
use chrono::NaiveDate;
use log::{debug, warn};
use polars::prelude::*;

/// Name of the date column every table carries.
pub const DAY_COLUMN: &str = "DAY";

/// One row per date, one `Float64` column per source variable.
///
/// Dates are strictly ascending. Missing cells are nulls once the quality filter has masked
/// them; before that a cell may also hold NaN or the source's fill value.
#[derive(Debug, Clone)]
pub struct WeatherTable {
    frame: DataFrame,
}

impl WeatherTable {
    /// Builds a table from dates and named columns.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::InvalidSchema`] when a column length differs from the
    /// number of dates or the dates are not strictly ascending.
    pub fn new(
        dates: Vec<NaiveDate>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, NormalizeError> {
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(NormalizeError::InvalidSchema(
                "table dates must be strictly ascending".to_string(),
            ));
        }
        let height = dates.len();
        let mut frame_columns = vec![Column::new(DAY_COLUMN.into(), dates)];
        for (name, values) in columns {
            if values.len() != height {
                return Err(NormalizeError::InvalidSchema(format!(
                    "column '{}' has {} values for {} dates",
                    name,
                    values.len(),
                    height
                )));
            }
            frame_columns.push(Column::new(name.into(), values));
        }
        Ok(Self {
            frame: DataFrame::new(frame_columns)?,
        })
    }

    /// Inner-joins two raw series on date.
    ///
    /// Dates present in only one of the sources are dropped. If both sources carry a
    /// variable with the same name, the weather source's column is kept. Each source's fill
    /// value becomes null.
    pub fn merge(weather: &RawSeries, solar: &RawSeries) -> Result<Self, NormalizeError> {
        let duplicates: Vec<&str> = solar
            .variable_names()
            .filter(|name| weather.variable(name).is_some())
            .collect();
        for name in &duplicates {
            warn!(
                "Variable '{}' from the solar source duplicates a weather column; ignoring it",
                name
            );
        }

        let weather_frame = series_frame(weather, &[])?;
        let solar_frame = series_frame(solar, &duplicates)?;
        let frame = weather_frame
            .join(
                &solar_frame,
                [DAY_COLUMN],
                [DAY_COLUMN],
                JoinArgs::new(JoinType::Inner),
                None,
            )?
            .sort([DAY_COLUMN], SortMultipleOptions::default())?;

        let dropped = weather_frame.height() + solar_frame.height() - 2 * frame.height();
        if dropped > 0 {
            debug!("Inner join on date dropped {} single-source dates", dropped);
        }
        if frame.height() == 0 {
            return Err(NormalizeError::NoOverlappingDates);
        }
        Ok(Self { frame })
    }

    /// Projects the table onto `names`, in that order.
    ///
    /// # Errors
    ///
    /// [`NormalizeError::MissingVariable`] for the first name with no column.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, NormalizeError> {
        if let Some(missing) = names
            .iter()
            .map(|name| name.as_ref())
            .find(|name| *name == DAY_COLUMN || self.frame.column(name).is_err())
        {
            return Err(NormalizeError::MissingVariable(missing.to_string()));
        }
        let selection = std::iter::once(DAY_COLUMN).chain(names.iter().map(|name| name.as_ref()));
        Ok(Self {
            frame: self.frame.select(selection)?,
        })
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.frame
            .column(DAY_COLUMN)
            .and_then(|c| {
                c.as_materialized_series()
                    .date()
                    .map(|days| days.as_date_iter().flatten().collect())
            })
            .unwrap_or_default()
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn width(&self) -> usize {
        self.frame.width().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Variable names, without the date column.
    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .filter(|name| name.as_str() != DAY_COLUMN)
            .map(|name| name.to_string())
            .collect()
    }

    /// Values of one variable, with missing cells as NaN.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        if name == DAY_COLUMN {
            return None;
        }
        let values = self
            .frame
            .column(name)
            .ok()?
            .as_materialized_series()
            .f64()
            .ok()?;
        Some(
            values
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect(),
        )
    }

    /// Cells that are null or not finite.
    pub fn count_missing(&self) -> usize {
        self.column_names()
            .iter()
            .filter_map(|name| self.column(name))
            .map(|values| values.iter().filter(|v| !v.is_finite()).count())
            .sum()
    }

    /// Null cells across the variable columns.
    pub(crate) fn null_count(&self) -> usize {
        self.frame.get_columns().iter().map(Column::null_count).sum()
    }

    /// Replaces `fill_value`, NaN and infinities with null.
    pub(crate) fn mask_missing(self, fill_value: f64) -> Result<Self, NormalizeError> {
        let masks: Vec<Expr> = self
            .frame
            .get_column_names()
            .into_iter()
            .filter(|name| name.as_str() != DAY_COLUMN)
            .map(|name| {
                let value = col(name.clone());
                when(
                    value
                        .clone()
                        .eq(lit(fill_value))
                        .or(value.clone().is_finite().not()),
                )
                .then(lit(NULL))
                .otherwise(value)
                .alias(name.clone())
            })
            .collect();
        let frame = self.frame.lazy().with_columns(masks).collect()?;
        Ok(Self { frame })
    }

    /// Drops every row with at least one null cell.
    pub(crate) fn drop_incomplete_rows(&self) -> Result<Self, NormalizeError> {
        Ok(Self {
            frame: self.frame.drop_nulls::<String>(None)?,
        })
    }

    /// Left-joins the table onto every day between its first and last date. Days that were
    /// absent come back as all-null rows.
    pub(crate) fn align_to_calendar(&self) -> Result<Self, NormalizeError> {
        let dates = self.dates();
        let (Some(&first), Some(&last)) = (dates.first(), dates.last()) else {
            return Ok(self.clone());
        };
        if (last - first).num_days() + 1 == dates.len() as i64 {
            return Ok(self.clone());
        }
        let calendar = DataFrame::new(vec![Column::new(
            DAY_COLUMN.into(),
            first
                .iter_days()
                .take_while(|d| *d <= last)
                .collect::<Vec<NaiveDate>>(),
        )])?;
        let frame = calendar
            .join(
                &self.frame,
                [DAY_COLUMN],
                [DAY_COLUMN],
                JoinArgs::new(JoinType::Left),
                None,
            )?
            .sort([DAY_COLUMN], SortMultipleOptions::default())?;
        Ok(Self { frame })
    }

    /// Carries the last non-null value of each column forward.
    pub(crate) fn fill_forward(&self) -> Result<Self, NormalizeError> {
        Ok(Self {
            frame: self.frame.fill_null(FillNullStrategy::Forward(None))?,
        })
    }
}

/// One frame per raw series: the series' dates plus one nullable column per variable.
fn series_frame(series: &RawSeries, skip: &[&str]) -> Result<DataFrame, NormalizeError> {
    let dates: Vec<NaiveDate> = series.dates().into_iter().collect();
    let mut columns = Vec::new();
    for name in series.variable_names().filter(|name| !skip.contains(name)) {
        let values: Vec<Option<f64>> = dates
            .iter()
            .map(|date| {
                let v = series.value(name, *date);
                (v != series.fill_value && !v.is_nan()).then_some(v)
            })
            .collect();
        columns.push(Column::new(name.into(), values));
    }
    columns.insert(0, Column::new(DAY_COLUMN.into(), dates));
    Ok(DataFrame::new(columns)?)
}
