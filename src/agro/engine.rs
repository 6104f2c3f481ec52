//! Crop simulation engines and the weather frames they consume.

use crate::types::location::LocationQuery;
use crate::types::record::{DailyWeatherRecord, ReferenceEt, WindUnit};
use crate::units::{cm_to_mm, mj_to_j, relative_humidity, vapour_pressure_hpa_to_dewpoint};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Invalid simulation request: {0}")]
    InvalidRequest(String),

    #[error("{engine} produced no output")]
    NoOutput { engine: String },

    #[error("{engine} failed: {message}")]
    Failed { engine: String, message: String },

    #[error("Failed to build weather frame")]
    Frame(#[from] PolarsError),

    #[error("Failed to write weather file {path:?}")]
    WeatherFile {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("Failed to create weather file {0:?}")]
    WeatherFileCreate(PathBuf, #[source] std::io::Error),
}

/// One season of one crop at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub crop: String,
    pub variety: String,
    pub location: LocationQuery,
    pub sowing: NaiveDate,
    pub harvest: NaiveDate,
}

impl SimulationRequest {
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidRequest`] unless sowing precedes harvest.
    pub fn new(
        crop: &str,
        variety: &str,
        location: LocationQuery,
        sowing: NaiveDate,
        harvest: NaiveDate,
    ) -> Result<Self, SimulationError> {
        if sowing >= harvest {
            return Err(SimulationError::InvalidRequest(format!(
                "sowing {} is not before harvest {}",
                sowing, harvest
            )));
        }
        Ok(Self {
            crop: crop.to_string(),
            variety: variety.to_string(),
            location,
            sowing,
            harvest,
        })
    }
}

/// A crop model that turns a season of weather into a yield.
pub trait SimulationEngine: Send + Sync {
    fn name(&self) -> &str;

    /// The frame layout `compute` expects.
    fn layout(&self) -> EngineLayout;

    /// Simulated yield (kg/ha) for `request`, given weather shaped by [`Self::layout`].
    fn compute(&self, request: &SimulationRequest, weather: &DataFrame)
        -> Result<f64, SimulationError>;
}

/// Column naming, units and delimiter of an engine's weather input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineLayout {
    Dssat,
    Monica,
    Wofost,
}

impl fmt::Display for EngineLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineLayout::Dssat => write!(f, "DSSAT"),
            EngineLayout::Monica => write!(f, "MONICA"),
            EngineLayout::Wofost => write!(f, "WOFOST"),
        }
    }
}

const MONICA_DATE_FORMAT: &str = "%d.%m.%Y";
const WOFOST_DATE_FORMAT: &str = "%Y%m%d";

impl EngineLayout {
    /// The wind unit the engine reads.
    pub fn wind_unit(&self) -> WindUnit {
        match self {
            EngineLayout::Dssat => WindUnit::KilometresPerDay,
            EngineLayout::Monica | EngineLayout::Wofost => WindUnit::MetresPerSecond,
        }
    }

    pub fn separator(&self) -> u8 {
        match self {
            EngineLayout::Monica => b';',
            EngineLayout::Dssat | EngineLayout::Wofost => b',',
        }
    }

    /// Reshapes canonical records into the engine's columns and units.
    ///
    /// Records may be in either wind unit. Humidity fields the source did not provide are
    /// derived from vapour pressure.
    ///
    /// # Examples
    ///
    /// ```
    /// use cropweather::agro::engine::EngineLayout;
    ///
    /// let df = EngineLayout::Monica.frame(&[]).unwrap();
    /// assert_eq!(df.get_column_names()[0].as_str(), "de-date");
    /// ```
    pub fn frame(&self, records: &[DailyWeatherRecord]) -> Result<DataFrame, PolarsError> {
        let records: Vec<DailyWeatherRecord> = records
            .iter()
            .cloned()
            .map(|r| r.with_wind_unit(self.wind_unit()))
            .collect();
        match self {
            EngineLayout::Dssat => dssat_frame(&records),
            EngineLayout::Monica => monica_frame(&records),
            EngineLayout::Wofost => wofost_frame(&records),
        }
    }

    /// Writes the engine frame of `records` to `path` as delimited text.
    pub fn write_csv(
        &self,
        records: &[DailyWeatherRecord],
        path: &Path,
    ) -> Result<(), SimulationError> {
        let mut df = self.frame(records)?;
        let mut file = File::create(path)
            .map_err(|e| SimulationError::WeatherFileCreate(path.to_path_buf(), e))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(self.separator())
            .finish(&mut df)
            .map_err(|e| SimulationError::WeatherFile {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

fn float_column(
    name: &str,
    records: &[DailyWeatherRecord],
    f: impl Fn(&DailyWeatherRecord) -> f64,
) -> Column {
    Column::new(name.into(), records.iter().map(f).collect::<Vec<f64>>())
}

fn date_column(name: &str, records: &[DailyWeatherRecord], format: &str) -> Column {
    Column::new(
        name.into(),
        records
            .iter()
            .map(|r| r.date.format(format).to_string())
            .collect::<Vec<String>>(),
    )
}

fn dewpoint(record: &DailyWeatherRecord) -> f64 {
    record
        .dewpoint
        .unwrap_or_else(|| vapour_pressure_hpa_to_dewpoint(record.vapour_pressure))
}

fn humidity(record: &DailyWeatherRecord) -> f64 {
    record
        .relative_humidity
        .unwrap_or_else(|| relative_humidity(record.vapour_pressure, record.temp_mean))
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn dssat_frame(records: &[DailyWeatherRecord]) -> Result<DataFrame, PolarsError> {
    DataFrame::new(vec![
        Column::new(
            "DATE".into(),
            records.iter().map(|r| r.date).collect::<Vec<NaiveDate>>(),
        ),
        float_column("TMEAN", records, |r| r.temp_mean),
        float_column("TMIN", records, |r| r.temp_min),
        float_column("TMAX", records, |r| r.temp_max),
        float_column("WIND", records, |r| r.wind_speed),
        float_column("RAD", records, |r| r.irradiance),
        float_column("RAIN", records, |r| cm_to_mm(r.precipitation)),
        float_column("DEWP", records, dewpoint),
        float_column("RHUM", records, humidity),
    ])
}

fn monica_frame(records: &[DailyWeatherRecord]) -> Result<DataFrame, PolarsError> {
    DataFrame::new(vec![
        date_column("de-date", records, MONICA_DATE_FORMAT),
        float_column("tavg", records, |r| round2(r.temp_mean)),
        float_column("tmin", records, |r| round2(r.temp_min)),
        float_column("tmax", records, |r| round2(r.temp_max)),
        float_column("wind", records, |r| round2(r.wind_speed)),
        float_column("globrad", records, |r| round2(r.irradiance)),
        float_column("precip", records, |r| round2(cm_to_mm(r.precipitation))),
        float_column("relhumid", records, |r| round2(humidity(r))),
    ])
}

fn wofost_frame(records: &[DailyWeatherRecord]) -> Result<DataFrame, PolarsError> {
    let et_column = |name: &str, f: fn(&ReferenceEt) -> f64| {
        Column::new(
            name.into(),
            records
                .iter()
                .map(|r| r.reference_et.as_ref().map(f))
                .collect::<Vec<Option<f64>>>(),
        )
    };
    DataFrame::new(vec![
        date_column("DAY", records, WOFOST_DATE_FORMAT),
        float_column("IRRAD", records, |r| mj_to_j(r.irradiance)),
        float_column("TMIN", records, |r| r.temp_min),
        float_column("TMAX", records, |r| r.temp_max),
        float_column("VAP", records, |r| r.vapour_pressure),
        float_column("WIND", records, |r| r.wind_speed),
        float_column("RAIN", records, |r| r.precipitation),
        et_column("E0", |et| et.e0),
        et_column("ES0", |et| et.es0),
        et_column("ET0", |et| et.et0),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn record(day: u32) -> DailyWeatherRecord {
        DailyWeatherRecord {
            date: NaiveDate::from_ymd_opt(2022, 6, day).unwrap(),
            temp_min: 12.004,
            temp_max: 24.0,
            temp_mean: 18.0,
            precipitation: 0.25,
            wind_speed: 2.0,
            wind_unit: WindUnit::MetresPerSecond,
            irradiance: 21.456,
            vapour_pressure: 12.3,
            dewpoint: None,
            relative_humidity: None,
            latitude: 52.0,
            longitude: 5.0,
            elevation: 10.0,
            reference_et: None,
        }
    }

    #[test]
    fn test_request_requires_sowing_before_harvest() {
        let loc = LocationQuery::new(52.0, 5.0).unwrap();
        let d = |m| NaiveDate::from_ymd_opt(2022, m, 1).unwrap();
        assert!(SimulationRequest::new("maize", "early", loc, d(4), d(9)).is_ok());
        assert!(matches!(
            SimulationRequest::new("maize", "early", loc, d(9), d(9)),
            Err(SimulationError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_dssat_frame_units() {
        let df = EngineLayout::Dssat.frame(&[record(1), record(2)]).unwrap();
        assert_eq!(df.height(), 2);
        let wind = df.column("WIND").unwrap().f64().unwrap().get(0).unwrap();
        assert_relative_eq!(wind, 172.8, epsilon = 1e-9);
        let rain = df.column("RAIN").unwrap().f64().unwrap().get(0).unwrap();
        assert_relative_eq!(rain, 2.5, epsilon = 1e-9);
        // 12.3 hPa is saturated at about 10 °C.
        let dewp = df.column("DEWP").unwrap().f64().unwrap().get(0).unwrap();
        assert_relative_eq!(dewp, 10.0, epsilon = 0.1);
        let rhum = df.column("RHUM").unwrap().f64().unwrap().get(0).unwrap();
        assert!(rhum > 55.0 && rhum < 65.0, "rhum = {}", rhum);
    }

    #[test]
    fn test_monica_csv_rounds_and_uses_semicolons() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monica.csv");
        EngineLayout::Monica
            .write_csv(&[record(1)], &path)
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "de-date;tavg;tmin;tmax;wind;globrad;precip;relhumid"
        );
        let row: Vec<&str> = lines.next().unwrap().split(';').collect();
        assert_eq!(row[0], "01.06.2022");
        assert_eq!(row[2], "12.0");
        assert_eq!(row[5], "21.46");
        assert_eq!(row[6], "2.5");
    }

    #[test]
    fn test_wofost_frame_joules_and_optional_et() {
        let mut with_et = record(2);
        with_et.reference_et = Some(ReferenceEt {
            e0: 0.5,
            es0: 0.4,
            et0: 0.45,
        });
        let df = EngineLayout::Wofost.frame(&[record(1), with_et]).unwrap();
        let irrad = df.column("IRRAD").unwrap().f64().unwrap().get(0).unwrap();
        assert_relative_eq!(irrad, 21_456_000.0, epsilon = 1e-3);
        let rain = df.column("RAIN").unwrap().f64().unwrap().get(0).unwrap();
        assert_relative_eq!(rain, 0.25);
        let et0 = df.column("ET0").unwrap().f64().unwrap();
        assert_eq!(et0.get(0), None);
        assert_eq!(et0.get(1), Some(0.45));
        let day = df.column("DAY").unwrap().str().unwrap().get(0).unwrap();
        assert_eq!(day, "20220601");
    }

    #[test]
    fn test_frame_accepts_records_in_km_per_day() {
        let records = vec![record(1).with_wind_unit(WindUnit::KilometresPerDay)];
        let df = EngineLayout::Wofost.frame(&records).unwrap();
        let wind = df.column("WIND").unwrap().f64().unwrap().get(0).unwrap();
        assert_relative_eq!(wind, 2.0, epsilon = 1e-9);
    }
}
