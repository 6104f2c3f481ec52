use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// Fill value used by NASA POWER when the payload header does not declare one.
pub const DEFAULT_FILL_VALUE: f64 = -999.0;

/// Daily values exactly as a weather source returned them.
///
/// Maps a source variable name (e.g. `"T2M_MAX"`) to a date-indexed series. Values equal to
/// `fill_value` stand in for missing observations; they are only interpreted later by the
/// quality filter.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeries {
    pub fill_value: f64,
    /// Elevation (m) of the grid cell, when the source reports one.
    pub elevation: Option<f64>,
    variables: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
}

impl Default for RawSeries {
    fn default() -> Self {
        Self::new(DEFAULT_FILL_VALUE)
    }
}

impl RawSeries {
    pub fn new(fill_value: f64) -> Self {
        Self {
            fill_value,
            elevation: None,
            variables: BTreeMap::new(),
        }
    }

    /// Sets one value, replacing any previous value for the same variable and date.
    pub fn insert(&mut self, variable: &str, date: NaiveDate, value: f64) {
        self.variables
            .entry(variable.to_string())
            .or_default()
            .insert(date, value);
    }

    /// Adds (or extends) a whole variable from `(date, value)` pairs.
    pub fn with_variable<I>(mut self, variable: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, f64)>,
    {
        self.variables
            .entry(variable.to_string())
            .or_default()
            .extend(values);
        self
    }

    /// Moves the named variables into a new series with the same fill value and elevation.
    /// Names that are not present are skipped.
    pub fn take_variables<S: AsRef<str>>(&mut self, names: &[S]) -> RawSeries {
        let mut taken = RawSeries::new(self.fill_value);
        taken.elevation = self.elevation;
        for name in names {
            if let Some(series) = self.variables.remove(name.as_ref()) {
                taken.variables.insert(name.as_ref().to_string(), series);
            }
        }
        taken
    }

    pub fn variable(&self, name: &str) -> Option<&BTreeMap<NaiveDate, f64>> {
        self.variables.get(name)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Every date present in at least one variable, ascending.
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.variables
            .values()
            .flat_map(|series| series.keys().copied())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.values().all(BTreeMap::is_empty)
    }

    /// Value of `variable` on `date`, with NaN when the source had no entry at all.
    pub fn value(&self, variable: &str, date: NaiveDate) -> f64 {
        self.variables
            .get(variable)
            .and_then(|series| series.get(&date))
            .copied()
            .unwrap_or(f64::NAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, d).unwrap()
    }

    #[test]
    fn test_dates_are_union_of_variables() {
        let series = RawSeries::default()
            .with_variable("T2M", [(day(1), 1.0), (day(2), 2.0)])
            .with_variable("RH2M", [(day(3), 50.0)]);

        assert_eq!(series.dates().into_iter().collect::<Vec<_>>(), vec![day(1), day(2), day(3)]);
        assert_eq!(series.value("T2M", day(2)), 2.0);
        assert!(series.value("T2M", day(3)).is_nan());
        assert!(series.value("UNKNOWN", day(1)).is_nan());
        assert_eq!(series.fill_value, DEFAULT_FILL_VALUE);
    }

    #[test]
    fn test_take_variables_splits_the_series() {
        let mut weather = RawSeries::new(-99.0)
            .with_variable("T2M", [(day(1), 1.0)])
            .with_variable("TOA_SW_DWN", [(day(1), 30.0)]);
        let solar = weather.take_variables(&["TOA_SW_DWN", "ALLSKY_SFC_SW_DWN"]);
        assert_eq!(solar.fill_value, -99.0);
        assert_eq!(solar.variable_names().collect::<Vec<_>>(), vec!["TOA_SW_DWN"]);
        assert_eq!(weather.variable_names().collect::<Vec<_>>(), vec!["T2M"]);
    }
}
