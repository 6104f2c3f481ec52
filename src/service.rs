//! Cache-first weather loading for a location.

use crate::cache::error::CacheError;
use crate::cache::nearest::NearestWeatherCache;
use crate::cache::weather_file::{CachedWeatherFile, SiteMetadata};
use crate::config::CropWeatherConfig;
use crate::error::CropWeatherError;
use crate::normalize::evapotranspiration::attach_reference_et;
use crate::normalize::normalizer::WeatherNormalizer;
use crate::normalize::schema::{OutputSchema, WeatherField};
use crate::sources::elevation::{ElevationLookup, OpenTopoData};
use crate::sources::error::FetchError;
use crate::sources::nasa_power::NasaPowerSource;
use crate::sources::WeatherSource;
use crate::types::date_range::DateRange;
use crate::types::location::LocationQuery;
use crate::types::raw_series::RawSeries;
use crate::types::record::DailyWeatherRecord;
use crate::utils::{ensure_cache_dir_exists, get_cache_dir};
use bon::bon;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Where the records of a [`LoadedWeather`] came from.
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherOrigin {
    /// The cache file for the exact location.
    Cache(PathBuf),
    /// A live fetch, now persisted.
    Live,
    /// The nearest cached location, after the live fetch failed.
    Nearest { path: PathBuf, distance_km: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedWeather {
    /// Days inside the requested range, ascending, in the schema's wind unit.
    pub records: Vec<DailyWeatherRecord>,
    pub site: SiteMetadata,
    pub origin: WeatherOrigin,
}

/// Loads normalized weather, preferring the local cache.
///
/// Resolution order for a location:
///
/// 1. the cache file for the exact location;
/// 2. a live fetch, which is normalized and persisted;
/// 3. when the fetch fails, the nearest cached location.
///
/// When nothing is cached the fetch error is returned inside
/// [`CropWeatherError::FallbackExhausted`].
pub struct WeatherService {
    source: Box<dyn WeatherSource>,
    elevation: Box<dyn ElevationLookup>,
    normalizer: WeatherNormalizer,
    cache_dir: PathBuf,
}

#[bon]
impl WeatherService {
    /// Creates a service.
    ///
    /// # Arguments
    ///
    /// * `source` - Live weather provider.
    /// * `normalizer` - Pipeline applied to fetched series.
    /// * `elevation` - Elevation lookup used when the source reports none. Defaults to
    ///   OpenTopoData.
    /// * `cache_dir` - Cache directory, created if missing. Defaults to the user cache
    ///   directory.
    #[builder]
    pub fn new(
        source: Box<dyn WeatherSource>,
        normalizer: WeatherNormalizer,
        elevation: Option<Box<dyn ElevationLookup>>,
        cache_dir: Option<PathBuf>,
    ) -> Result<Self, CropWeatherError> {
        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None => get_cache_dir()?,
        };
        ensure_cache_dir_exists(&cache_dir)?;
        let elevation = match elevation {
            Some(lookup) => lookup,
            None => Box::new(OpenTopoData::builder().build()?),
        };
        Ok(Self {
            source,
            elevation,
            normalizer,
            cache_dir,
        })
    }

    /// A NASA POWER backed service configured from `config`.
    ///
    /// Without an explicit `schema` the NASA POWER API schema is used, in the configured
    /// wind unit.
    pub fn from_config(
        config: &CropWeatherConfig,
        schema: Option<OutputSchema>,
    ) -> Result<Self, CropWeatherError> {
        let schema = match schema {
            Some(schema) => schema,
            None => OutputSchema::power_api(config.wind_unit)?,
        };
        let source = NasaPowerSource::builder()
            .timeout(config.timeout())
            .cache_capacity(config.response_cache_capacity)
            .build()?;
        let elevation = OpenTopoData::builder()
            .timeout(config.timeout())
            .fallback(config.elevation_fallback)
            .build()?;
        let normalizer = WeatherNormalizer::builder()
            .schema(schema)
            .policy(config.filter_policy)
            .fill_value(config.fill_value)
            .derive_et(config.derive_et)
            .calibrate(true)
            .build();
        WeatherService::builder()
            .source(Box::new(source))
            .elevation(Box::new(elevation))
            .normalizer(normalizer)
            .cache_dir(config.resolved_cache_dir()?)
            .build()
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn normalizer(&self) -> &WeatherNormalizer {
        &self.normalizer
    }

    /// Weather for `location` over `range`.
    ///
    /// # Errors
    ///
    /// * [`CropWeatherError::Normalize`] when fetched data fails normalization. No fallback
    ///   is attempted for bad data.
    /// * [`CropWeatherError::FallbackExhausted`] when the fetch failed and no cached location
    ///   holds every day of `range`.
    /// * [`CropWeatherError::Cache`] when a cache file cannot be read.
    pub fn load(
        &self,
        location: &LocationQuery,
        range: &DateRange,
    ) -> Result<LoadedWeather, CropWeatherError> {
        let exact = CachedWeatherFile::for_location(&self.cache_dir, location);
        if exact.exists() {
            let origin = WeatherOrigin::Cache(exact.path.clone());
            let loaded = self.read_cached(&exact, range, origin)?;
            if covers(&loaded.records, range) {
                info!("Cache hit for {}: {:?}", location, exact.path);
                return Ok(loaded);
            }
            warn!(
                "Cache file {:?} holds {} of the {} days in {}. Fetching live data",
                exact.path,
                loaded.records.len(),
                range.num_days(),
                range
            );
        } else {
            debug!("Cache miss for {}", location);
        }

        let variables = self.normalizer.schema().source_variables();
        match self.source.fetch(location, range, &variables) {
            Ok(raw) => self.normalize_and_persist(raw, location, &exact),
            Err(e) => self.fall_back(location, range, e),
        }
    }

    fn normalize_and_persist(
        &self,
        mut raw: RawSeries,
        location: &LocationQuery,
        file: &CachedWeatherFile,
    ) -> Result<LoadedWeather, CropWeatherError> {
        let schema = self.normalizer.schema();
        let solar_variables: Vec<&str> = match schema.radiation() {
            Some(radiation) => vec![
                radiation.top_of_atmosphere.as_str(),
                radiation.surface.as_str(),
            ],
            None => schema
                .field(WeatherField::Irradiance)
                .map(|spec| vec![spec.source.as_str()])
                .unwrap_or_default(),
        };
        let solar = raw.take_variables(&solar_variables);
        let elevation = match raw.elevation.filter(|e| e.is_finite()) {
            Some(elevation) => elevation,
            None => self.elevation.elevation(location),
        };

        let normalized = self
            .normalizer
            .normalize(&raw, &solar, location, elevation)?;
        let site = SiteMetadata {
            longitude: location.longitude(),
            latitude: location.latitude(),
            elevation,
            angstrom: normalized.angstrom_or_default(),
        };
        if let Err(e) = persist(file, &site, &normalized.records) {
            warn!("Could not cache weather for {}: {}", location, e);
        }
        Ok(LoadedWeather {
            records: normalized.records,
            site,
            origin: WeatherOrigin::Live,
        })
    }

    fn fall_back(
        &self,
        location: &LocationQuery,
        range: &DateRange,
        error: FetchError,
    ) -> Result<LoadedWeather, CropWeatherError> {
        warn!(
            "Fetching from {} failed for {}: {}",
            self.source.name(),
            location,
            error
        );
        match NearestWeatherCache::find_closest(location, &self.cache_dir) {
            Ok(nearest) => {
                let origin = WeatherOrigin::Nearest {
                    path: nearest.file.path.clone(),
                    distance_km: nearest.distance_km,
                };
                let loaded = self.read_cached(&nearest.file, range, origin)?;
                if !covers(&loaded.records, range) {
                    warn!(
                        "Nearest cache file {:?} holds {} of the {} days in {}",
                        nearest.file.path,
                        loaded.records.len(),
                        range.num_days(),
                        range
                    );
                    return Err(CropWeatherError::FallbackExhausted {
                        location: *location,
                        source: error,
                    });
                }
                warn!(
                    "Using cached weather of ({}, {}), {:.1} km from {}",
                    nearest.file.latitude, nearest.file.longitude, nearest.distance_km, location
                );
                Ok(loaded)
            }
            Err(CacheError::CacheEmpty(_)) => Err(CropWeatherError::FallbackExhausted {
                location: *location,
                source: error,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn read_cached(
        &self,
        file: &CachedWeatherFile,
        range: &DateRange,
        origin: WeatherOrigin,
    ) -> Result<LoadedWeather, CropWeatherError> {
        let contents = file.read()?;
        let wind_unit = self.normalizer.schema().wind_unit();
        let mut records: Vec<DailyWeatherRecord> = contents
            .records
            .into_iter()
            .filter(|r| range.contains(r.date))
            .map(|r| r.with_wind_unit(wind_unit))
            .collect();
        if self.normalizer.derives_et() {
            attach_reference_et(&mut records, contents.site.angstrom);
        }
        Ok(LoadedWeather {
            records,
            site: contents.site,
            origin,
        })
    }
}

/// True when `records`, ascending and inside `range`, hold every day of `range`.
fn covers(records: &[DailyWeatherRecord], range: &DateRange) -> bool {
    records.len() as i64 == range.num_days()
        && records.first().map(|r| r.date) == Some(range.start())
        && records.last().map(|r| r.date) == Some(range.end())
}

/// Writes fetched records to `file`. An existing file is merged with them and replaced:
/// fetched days win, cached days outside the fetch are kept.
fn persist(
    file: &CachedWeatherFile,
    site: &SiteMetadata,
    records: &[DailyWeatherRecord],
) -> Result<(), CacheError> {
    if !file.exists() {
        return file.write(site, records);
    }
    let fetched: BTreeSet<NaiveDate> = records.iter().map(|r| r.date).collect();
    let mut merged: Vec<DailyWeatherRecord> = match file.read() {
        Ok(contents) => contents
            .records
            .into_iter()
            .filter(|r| !fetched.contains(&r.date))
            .collect(),
        Err(e) => {
            warn!("Replacing unreadable cache file {:?}: {}", file.path, e);
            Vec::new()
        }
    };
    merged.extend_from_slice(records);
    merged.sort_by_key(|r| r.date);
    file.replace(site, &merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::filter::FilterPolicy;
    use crate::sources::elevation::FixedElevation;
    use crate::test_support::{start, synthetic_year};
    use crate::normalize::calibration::AngstromCoefficients;
    use crate::types::record::WindUnit;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Serves the synthetic year, or fails when `fail` is set. Counts calls.
    struct MockSource {
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl WeatherSource for MockSource {
        fn name(&self) -> &str {
            "mock"
        }

        fn fetch(
            &self,
            _location: &LocationQuery,
            _range: &DateRange,
            _variables: &[String],
        ) -> Result<RawSeries, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::Unavailable {
                    source_name: "mock".to_string(),
                    message: "offline".to_string(),
                });
            }
            let (mut weather, solar) = synthetic_year(&[]);
            for name in ["TOA_SW_DWN", "ALLSKY_SFC_SW_DWN"] {
                for (date, value) in solar.variable(name).unwrap() {
                    weather.insert(name, *date, *value);
                }
            }
            weather.elevation = Some(12.0);
            Ok(weather)
        }
    }

    fn service(dir: &Path, fail: bool, derive_et: bool) -> (WeatherService, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let normalizer = WeatherNormalizer::builder()
            .schema(OutputSchema::power_api(WindUnit::KilometresPerDay).unwrap())
            .policy(FilterPolicy::FillForward)
            .derive_et(derive_et)
            .build();
        let service = WeatherService::builder()
            .source(Box::new(MockSource {
                fail,
                calls: calls.clone(),
            }))
            .elevation(Box::new(FixedElevation(99.0)))
            .normalizer(normalizer)
            .cache_dir(dir.to_path_buf())
            .build()
            .unwrap();
        (service, calls)
    }

    fn year() -> DateRange {
        DateRange::new(start(), NaiveDate::from_ymd_opt(2021, 12, 31).unwrap()).unwrap()
    }

    #[test]
    fn test_live_fetch_is_persisted_then_served_from_cache() {
        let dir = tempdir().unwrap();
        let location = LocationQuery::new(10.0, 10.0).unwrap();
        let (live, calls) = service(dir.path(), false, false);

        let first = live.load(&location, &year()).unwrap();
        assert_eq!(first.origin, WeatherOrigin::Live);
        assert_eq!(first.records.len(), 365);
        assert_eq!(first.site.elevation, 12.0);
        assert!(first.site.angstrom.is_valid());
        assert!(CachedWeatherFile::for_location(dir.path(), &location).exists());

        let second = live.load(&location, &year()).unwrap();
        assert!(matches!(second.origin, WeatherOrigin::Cache(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.records.len(), 365);
        assert_eq!(second.records[0].wind_unit, WindUnit::KilometresPerDay);
        approx::assert_relative_eq!(
            second.records[0].wind_speed,
            first.records[0].wind_speed,
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_failed_fetch_uses_nearest_cached_location() {
        let dir = tempdir().unwrap();
        let (live, _) = service(dir.path(), false, false);
        live.load(&LocationQuery::new(10.0, 10.0).unwrap(), &year())
            .unwrap();
        live.load(&LocationQuery::new(50.0, 50.0).unwrap(), &year())
            .unwrap();

        let (offline, _) = service(dir.path(), true, true);
        let loaded = offline
            .load(&LocationQuery::new(11.0, 11.0).unwrap(), &year())
            .unwrap();
        match loaded.origin {
            WeatherOrigin::Nearest { path, distance_km } => {
                assert!(path.ends_with("NASA_weather_latitude_10_longitude_10.csv"));
                assert!(distance_km > 100.0 && distance_km < 200.0);
            }
            other => panic!("unexpected origin {:?}", other),
        }
        assert_eq!(loaded.site.latitude, 10.0);
        // Evapotranspiration is recomputed for cached records.
        assert!(loaded.records.iter().all(|r| r.reference_et.is_some()));
    }

    #[test]
    fn test_failed_fetch_with_empty_cache_is_exhausted() {
        let dir = tempdir().unwrap();
        let (offline, _) = service(dir.path(), true, false);
        let location = LocationQuery::new(11.0, 11.0).unwrap();
        match offline.load(&location, &year()) {
            Err(CropWeatherError::FallbackExhausted { location: l, source }) => {
                assert_eq!(l, location);
                assert!(matches!(source, FetchError::Unavailable { .. }));
            }
            other => panic!("unexpected result {:?}", other.map(|w| w.origin)),
        }
    }

    #[test]
    fn test_cached_records_are_limited_to_the_range() {
        let dir = tempdir().unwrap();
        let location = LocationQuery::new(10.0, 10.0).unwrap();
        let (live, _) = service(dir.path(), false, false);
        live.load(&location, &year()).unwrap();

        let june = DateRange::new(
            NaiveDate::from_ymd_opt(2021, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 6, 30).unwrap(),
        )
        .unwrap();
        let loaded = live.load(&location, &june).unwrap();
        assert_eq!(loaded.records.len(), 30);
        assert!(loaded.records.iter().all(|r| june.contains(r.date)));
    }

    fn range(from: (i32, u32, u32), to: (i32, u32, u32)) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(from.0, from.1, from.2).unwrap(),
            NaiveDate::from_ymd_opt(to.0, to.1, to.2).unwrap(),
        )
        .unwrap()
    }

    /// Writes a cache file with one plain record per day of `days`.
    fn cache_days(dir: &Path, location: &LocationQuery, days: &DateRange) {
        let records: Vec<DailyWeatherRecord> = days
            .start()
            .iter_days()
            .take_while(|d| *d <= days.end())
            .map(|date| DailyWeatherRecord {
                date,
                temp_min: 8.0,
                temp_max: 20.0,
                temp_mean: 14.0,
                precipitation: 0.1,
                wind_speed: 2.0,
                wind_unit: WindUnit::MetresPerSecond,
                irradiance: 15.0,
                vapour_pressure: 10.0,
                dewpoint: None,
                relative_humidity: None,
                latitude: location.latitude(),
                longitude: location.longitude(),
                elevation: 5.0,
                reference_et: None,
            })
            .collect();
        let site = SiteMetadata {
            longitude: location.longitude(),
            latitude: location.latitude(),
            elevation: 5.0,
            angstrom: AngstromCoefficients::DEFAULT,
        };
        CachedWeatherFile::for_location(dir, location)
            .write(&site, &records)
            .unwrap();
    }

    #[test]
    fn test_partially_covering_cache_file_fetches_live() {
        let dir = tempdir().unwrap();
        let location = LocationQuery::new(10.0, 10.0).unwrap();
        let (live, calls) = service(dir.path(), false, false);
        live.load(&location, &year()).unwrap();

        let three_years = range((2020, 1, 1), (2022, 12, 31));
        let loaded = live.load(&location, &three_years).unwrap();
        assert_eq!(loaded.origin, WeatherOrigin::Live);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_live_fetch_merges_into_existing_cache_file() {
        let dir = tempdir().unwrap();
        let location = LocationQuery::new(10.0, 10.0).unwrap();
        cache_days(dir.path(), &location, &range((2020, 1, 1), (2020, 12, 31)));
        let (live, calls) = service(dir.path(), false, false);

        // 2020 alone does not cover 2021, so the year is fetched and added to the file.
        assert_eq!(live.load(&location, &year()).unwrap().origin, WeatherOrigin::Live);
        let both = range((2020, 1, 1), (2021, 12, 31));
        let loaded = live.load(&location, &both).unwrap();
        assert!(matches!(loaded.origin, WeatherOrigin::Cache(_)));
        assert_eq!(loaded.records.len(), 366 + 365);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_nearest_file_outside_the_range_is_exhausted() {
        let dir = tempdir().unwrap();
        cache_days(
            dir.path(),
            &LocationQuery::new(10.0, 10.0).unwrap(),
            &range((2021, 1, 1), (2021, 12, 31)),
        );
        let (offline, _) = service(dir.path(), true, false);
        let location = LocationQuery::new(11.0, 11.0).unwrap();
        match offline.load(&location, &range((2019, 1, 1), (2019, 12, 31))) {
            Err(CropWeatherError::FallbackExhausted { location: l, source }) => {
                assert_eq!(l, location);
                assert!(matches!(source, FetchError::Unavailable { .. }));
            }
            other => panic!("unexpected result {:?}", other.map(|w| w.origin)),
        }
    }

    #[test]
    fn test_from_config_uses_configured_wind_unit() {
        let dir = tempdir().unwrap();
        let config = CropWeatherConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            wind_unit: WindUnit::KilometresPerDay,
            filter_policy: FilterPolicy::FillForward,
            ..CropWeatherConfig::default()
        };
        let service = WeatherService::from_config(&config, None).unwrap();
        assert_eq!(service.normalizer().schema().wind_unit(), WindUnit::KilometresPerDay);
        assert_eq!(service.normalizer().policy(), FilterPolicy::FillForward);
        assert_eq!(service.cache_dir(), dir.path());

        let archive = OutputSchema::power_archive(WindUnit::MetresPerSecond).unwrap();
        let service = WeatherService::from_config(&config, Some(archive.clone())).unwrap();
        assert_eq!(service.normalizer().schema().name(), archive.name());
    }
}
