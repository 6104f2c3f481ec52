//! The on-disk weather cache format.
//!
//! One file per location, named `NASA_weather_latitude_{lat}_longitude_{lon}.csv`, laid out
//! the way PCSE's `CSVWeatherDataProvider` reads it:
//!
//! ```text
//! ## Site Characteristics
//! Country = 'Unknown'
//! Station = 'NASA POWER grid cell at latitude 52, longitude 5'
//! Description = 'Daily weather from NASA POWER'
//! Source = 'NASA POWER'
//! Contact = 'NASA Langley Research Center'
//! Longitude = 5; Latitude = 52; Elevation = 12; AngstromA = 0.29; AngstromB = 0.49; HasSunshine = False
//! ## Daily weather observations (missing values are NaN)
//! DAY,IRRAD,TMIN,TMAX,VAP,WIND,RAIN,SNOWDEPTH
//! 20210101,5123.4,-1.2,4.5,0.61,3.2,0.5,NaN
//! ```
//!
//! IRRAD is in kJ/m2/day, VAP in kPa, WIND in m/s and RAIN in mm/day. Records are converted
//! to and from the canonical units on write and read.

use crate::cache::error::CacheError;
use crate::normalize::calibration::AngstromCoefficients;
use crate::types::location::LocationQuery;
use crate::types::record::{DailyWeatherRecord, WindUnit};
use chrono::NaiveDate;
use log::{debug, info};
use polars::prelude::*;
use rstar::{PointDistance, RTreeObject, AABB};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const FILE_PREFIX: &str = "NASA_weather_latitude_";
const LONGITUDE_INFIX: &str = "_longitude_";
const FILE_SUFFIX: &str = ".csv";
const DATE_FORMAT: &str = "%Y%m%d";
const FLOAT_PRECISION: usize = 6;
const MISSING: &str = "NaN";

const KJ_PER_MJ: f64 = 1000.0;
const HPA_PER_KPA: f64 = 10.0;
const MM_PER_CM: f64 = 10.0;

/// File name for the cache entry of a location.
///
/// # Examples
///
/// ```
/// use cropweather::cache::weather_file::{cache_file_name, parse_cache_file_name};
///
/// let name = cache_file_name(52.25, -5.0);
/// assert_eq!(name, "NASA_weather_latitude_52.25_longitude_-5.csv");
/// assert_eq!(parse_cache_file_name(&name), Some((52.25, -5.0)));
/// assert_eq!(parse_cache_file_name("notes.txt"), None);
/// ```
pub fn cache_file_name(latitude: f64, longitude: f64) -> String {
    format!(
        "{}{}{}{}{}",
        FILE_PREFIX, latitude, LONGITUDE_INFIX, longitude, FILE_SUFFIX
    )
}

/// Recovers `(latitude, longitude)` from a cache file name, or `None` if the name does not
/// follow the pattern.
pub fn parse_cache_file_name(name: &str) -> Option<(f64, f64)> {
    let coordinates = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    let (lat, lon) = coordinates.split_once(LONGITUDE_INFIX)?;
    let lat: f64 = lat.parse().ok()?;
    let lon: f64 = lon.parse().ok()?;
    LocationQuery::new(lat, lon).ok().map(|_| (lat, lon))
}

/// Site metadata stored in the header of a cache file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteMetadata {
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: f64,
    pub angstrom: AngstromCoefficients,
}

/// Everything read back from a cache file.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherFileContents {
    pub site: SiteMetadata,
    /// Records with wind in m/s and no dewpoint, humidity or evapotranspiration.
    pub records: Vec<DailyWeatherRecord>,
}

/// A cached weather file on disk, identified by the location encoded in its name.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedWeatherFile {
    pub path: PathBuf,
    pub latitude: f64,
    pub longitude: f64,
}

impl CachedWeatherFile {
    /// The entry for `location` inside `cache_dir`, whether or not the file exists yet.
    pub fn for_location(cache_dir: &Path, location: &LocationQuery) -> Self {
        Self {
            path: cache_dir.join(cache_file_name(location.latitude(), location.longitude())),
            latitude: location.latitude(),
            longitude: location.longitude(),
        }
    }

    /// Wraps an existing path if its file name encodes a location.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (latitude, longitude) = parse_cache_file_name(name)?;
        Some(Self {
            path: path.to_path_buf(),
            latitude,
            longitude,
        })
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Writes `records` with the site header, atomically.
    ///
    /// Rows go to a temporary file in the same directory which is then moved into place
    /// without overwriting: when another writer finished first its file is kept.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheWrite`] or [`CacheError::CsvWritePolars`] if the file
    /// cannot be produced. The destination is never left half-written.
    pub fn write(
        &self,
        site: &SiteMetadata,
        records: &[DailyWeatherRecord],
    ) -> Result<(), CacheError> {
        let temp = self.stage(site, records)?;
        match temp.persist_noclobber(&self.path) {
            Ok(_) => {
                info!("Cached {} days of weather to {:?}", records.len(), self.path);
                Ok(())
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!("{:?} was written concurrently; keeping the existing file", self.path);
                Ok(())
            }
            Err(e) => Err(CacheError::CacheWrite(self.path.clone(), e.error)),
        }
    }

    /// Like [`write`](Self::write), but atomically replaces an existing file.
    pub fn replace(
        &self,
        site: &SiteMetadata,
        records: &[DailyWeatherRecord],
    ) -> Result<(), CacheError> {
        let temp = self.stage(site, records)?;
        temp.persist(&self.path)
            .map_err(|e| CacheError::CacheWrite(self.path.clone(), e.error))?;
        info!(
            "Replaced {:?} with {} days of weather",
            self.path,
            records.len()
        );
        Ok(())
    }

    /// Writes the complete file to a synced temporary file next to the destination.
    fn stage(
        &self,
        site: &SiteMetadata,
        records: &[DailyWeatherRecord],
    ) -> Result<NamedTempFile, CacheError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .map_err(|e| CacheError::CacheDirCreation(dir.to_path_buf(), e))?;

        let mut df = records_to_frame(records)?;
        let mut temp =
            NamedTempFile::new_in(dir).map_err(|e| CacheError::CacheWrite(self.path.clone(), e))?;
        write_header(temp.as_file_mut(), site)
            .map_err(|e| CacheError::CacheWrite(self.path.clone(), e))?;
        CsvWriter::new(temp.as_file_mut())
            .include_header(true)
            .with_float_precision(Some(FLOAT_PRECISION))
            .with_null_value(MISSING.to_string())
            .finish(&mut df)
            .map_err(|e| CacheError::CsvWritePolars {
                path: self.path.clone(),
                source: e,
            })?;
        temp.as_file_mut()
            .sync_all()
            .map_err(|e| CacheError::CacheWrite(self.path.clone(), e))?;
        Ok(temp)
    }

    /// Reads the site header and every record.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheRead`] if the file cannot be opened,
    /// [`CacheError::MalformedHeader`] if the metadata line is unusable, and
    /// [`CacheError::CsvReadPolars`], [`CacheError::MissingColumn`] or
    /// [`CacheError::InvalidDate`] for a corrupt body.
    pub fn read(&self) -> Result<WeatherFileContents, CacheError> {
        let (site, header_row) = self.read_header()?;

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_skip_rows(header_row)
            .try_into_reader_with_file_path(Some(self.path.clone()))
            .map_err(|e| CacheError::CsvReadPolars {
                path: self.path.clone(),
                source: e,
            })?
            .finish()
            .map_err(|e| CacheError::CsvReadPolars {
                path: self.path.clone(),
                source: e,
            })?;

        let dates = self.date_column(&df)?;
        let irradiance = self.float_column(&df, "IRRAD")?;
        let temp_min = self.float_column(&df, "TMIN")?;
        let temp_max = self.float_column(&df, "TMAX")?;
        let vapour = self.float_column(&df, "VAP")?;
        let wind = self.float_column(&df, "WIND")?;
        let rain = self.float_column(&df, "RAIN")?;

        let records = dates
            .into_iter()
            .enumerate()
            .map(|(i, date)| DailyWeatherRecord {
                date,
                temp_min: temp_min[i],
                temp_max: temp_max[i],
                temp_mean: (temp_min[i] + temp_max[i]) / 2.0,
                precipitation: rain[i] / MM_PER_CM,
                wind_speed: wind[i],
                wind_unit: WindUnit::MetresPerSecond,
                irradiance: irradiance[i] / KJ_PER_MJ,
                vapour_pressure: vapour[i] * HPA_PER_KPA,
                dewpoint: None,
                relative_humidity: None,
                latitude: site.latitude,
                longitude: site.longitude,
                elevation: site.elevation,
                reference_et: None,
            })
            .collect();

        Ok(WeatherFileContents { site, records })
    }

    /// Parses the site line and finds the row of the column header. Both are located by
    /// content, so extra comment or metadata lines are allowed.
    fn read_header(&self) -> Result<(SiteMetadata, usize), CacheError> {
        let file = File::open(&self.path).map_err(|e| CacheError::CacheRead(self.path.clone(), e))?;
        let mut site = None;
        for (row, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| CacheError::CacheRead(self.path.clone(), e))?;
            if line.starts_with("DAY,") {
                let site =
                    site.ok_or_else(|| self.malformed("no site line before the column header"))?;
                return Ok((site, row));
            }
            if site.is_none() && line.contains("Longitude") {
                site = Some(parse_site_line(&line).map_err(|message| self.malformed(&message))?);
            }
        }
        Err(self.malformed(match site {
            Some(_) => "file has no DAY column header",
            None => "file has no site line",
        }))
    }

    fn malformed(&self, message: &str) -> CacheError {
        CacheError::MalformedHeader {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }

    fn column<'a>(&self, df: &'a DataFrame, name: &str) -> Result<&'a Column, CacheError> {
        df.column(name).map_err(|_| CacheError::MissingColumn {
            path: self.path.clone(),
            column: name.to_string(),
        })
    }

    fn float_column(&self, df: &DataFrame, name: &str) -> Result<Vec<f64>, CacheError> {
        let column = self.column(df, name)?.cast(&DataType::Float64)?;
        Ok(column
            .as_materialized_series()
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect())
    }

    fn date_column(&self, df: &DataFrame) -> Result<Vec<NaiveDate>, CacheError> {
        // Depending on inference, DAY arrives as an integer or a string column.
        let column = self.column(df, "DAY")?.cast(&DataType::String)?;
        column
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|v| {
                let raw = v.unwrap_or_default();
                NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| CacheError::InvalidDate {
                    path: self.path.clone(),
                    value: raw.to_string(),
                })
            })
            .collect()
    }
}

fn write_header(out: &mut File, site: &SiteMetadata) -> std::io::Result<()> {
    writeln!(out, "## Site Characteristics")?;
    writeln!(out, "Country = 'Unknown'")?;
    writeln!(
        out,
        "Station = 'NASA POWER grid cell at latitude {}, longitude {}'",
        site.latitude, site.longitude
    )?;
    writeln!(out, "Description = 'Daily weather from NASA POWER'")?;
    writeln!(out, "Source = 'NASA POWER'")?;
    writeln!(out, "Contact = 'NASA Langley Research Center'")?;
    writeln!(
        out,
        "Longitude = {}; Latitude = {}; Elevation = {}; AngstromA = {}; AngstromB = {}; HasSunshine = False",
        site.longitude, site.latitude, site.elevation, site.angstrom.a, site.angstrom.b
    )?;
    writeln!(out, "## Daily weather observations (missing values are NaN)")
}

/// Reads `Key = value` pairs from the site line. A leading `##` is tolerated.
fn parse_site_line(line: &str) -> Result<SiteMetadata, String> {
    let body = line.trim_start_matches('#');
    let lookup = |key: &str| -> Result<f64, String> {
        body.split(';')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| k.trim() == key)
            .ok_or_else(|| format!("missing '{}'", key))
            .and_then(|(_, v)| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|_| format!("'{}' is not a number", v.trim()))
            })
    };
    Ok(SiteMetadata {
        longitude: lookup("Longitude")?,
        latitude: lookup("Latitude")?,
        elevation: lookup("Elevation")?,
        angstrom: AngstromCoefficients {
            a: lookup("AngstromA")?,
            b: lookup("AngstromB")?,
        },
    })
}

fn records_to_frame(records: &[DailyWeatherRecord]) -> Result<DataFrame, PolarsError> {
    let column = |name: &str, f: fn(&DailyWeatherRecord) -> f64| {
        Column::new(name.into(), records.iter().map(f).collect::<Vec<f64>>())
    };
    DataFrame::new(vec![
        Column::new(
            "DAY".into(),
            records
                .iter()
                .map(|r| r.date.format(DATE_FORMAT).to_string())
                .collect::<Vec<String>>(),
        ),
        column("IRRAD", |r| r.irradiance * KJ_PER_MJ),
        column("TMIN", |r| r.temp_min),
        column("TMAX", |r| r.temp_max),
        column("VAP", |r| r.vapour_pressure / HPA_PER_KPA),
        column("WIND", DailyWeatherRecord::wind_speed_ms),
        column("RAIN", |r| r.precipitation * MM_PER_CM),
        Column::new("SNOWDEPTH".into(), vec![None::<f64>; records.len()]),
    ])
}

impl RTreeObject for CachedWeatherFile {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.latitude, self.longitude])
    }
}

impl PointDistance for CachedWeatherFile {
    /// Squared Euclidean distance in (latitude, longitude) degree space.
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.latitude - point[0];
        let dy = self.longitude - point[1];
        dx * dx + dy * dy
    }
}
