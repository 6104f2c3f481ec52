//! Shared fixtures for unit tests.

use crate::types::raw_series::RawSeries;
use chrono::NaiveDate;

pub(crate) fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()
}

/// One year of plausible NASA POWER API values, with `T2M_MAX` at the fill value on
/// `filled_days` (indices from January 1st).
pub(crate) fn synthetic_year(filled_days: &[usize]) -> (RawSeries, RawSeries) {
    let mut weather = RawSeries::new(-999.0);
    let mut solar = RawSeries::new(-999.0);
    for (i, date) in start().iter_days().take(365).enumerate() {
        let seasonal = (i as f64 / 365.0 * std::f64::consts::TAU).sin();
        let tmax = if filled_days.contains(&i) {
            -999.0
        } else {
            18.0 + 8.0 * seasonal + (i % 7) as f64 * 0.1
        };
        weather.insert("T2M_MAX", date, tmax);
        weather.insert("T2M_MIN", date, 6.0 + 6.0 * seasonal);
        weather.insert("T2M", date, 12.0 + 7.0 * seasonal);
        weather.insert("T2MDEW", date, 4.0 + 4.0 * seasonal);
        weather.insert("WS2M", date, 2.0 + (i % 5) as f64 * 0.2);
        weather.insert("PRECTOTCORR", date, (i % 4) as f64 * 1.5);
        weather.insert("RH2M", date, 70.0);
        let toa = 25.0 + 10.0 * seasonal;
        solar.insert("TOA_SW_DWN", date, toa);
        solar.insert("ALLSKY_SFC_SW_DWN", date, toa * (0.3 + (i % 50) as f64 * 0.01));
    }
    (weather, solar)
}
