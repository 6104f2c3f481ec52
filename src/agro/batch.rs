//! Runs a crop simulation over many locations.

use crate::agro::calendar::CropCalendar;
use crate::agro::engine::{SimulationEngine, SimulationError, SimulationRequest};
use crate::error::CropWeatherError;
use crate::service::WeatherService;
use crate::types::date_range::DateRange;
use crate::types::location::LocationQuery;
use chrono::NaiveDate;
use log::{info, warn};

/// One location of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPoint {
    pub crop: String,
    pub variety: String,
    pub location: LocationQuery,
}

#[derive(Debug)]
pub enum LocationOutcome {
    /// Simulated yield, kg/ha.
    Yield(f64),
    /// The calendar has no season for the crop here.
    Skipped,
    Failed(CropWeatherError),
}

#[derive(Debug)]
pub struct BatchResult {
    pub point: BatchPoint,
    pub outcome: LocationOutcome,
}

/// Simulates `year` at every point.
///
/// Each point resolves its planting window, loads weather for the season and hands it to
/// `engine`. A failing point is recorded and the batch moves on.
pub fn run_batch(
    points: &[BatchPoint],
    year: i32,
    calendar: &dyn CropCalendar,
    service: &WeatherService,
    engine: &dyn SimulationEngine,
) -> Vec<BatchResult> {
    let results: Vec<BatchResult> = points
        .iter()
        .map(|point| {
            let outcome = match run_point(point, year, calendar, service, engine) {
                Ok(Some(value)) => LocationOutcome::Yield(value),
                Ok(None) => LocationOutcome::Skipped,
                Err(e) => {
                    warn!("{} at {} failed: {}", point.crop, point.location, e);
                    LocationOutcome::Failed(e)
                }
            };
            BatchResult {
                point: point.clone(),
                outcome,
            }
        })
        .collect();

    let failed = results
        .iter()
        .filter(|r| matches!(r.outcome, LocationOutcome::Failed(_)))
        .count();
    info!(
        "{} run for {} locations finished with {} failures",
        engine.name(),
        results.len(),
        failed
    );
    results
}

fn run_point(
    point: &BatchPoint,
    year: i32,
    calendar: &dyn CropCalendar,
    service: &WeatherService,
    engine: &dyn SimulationEngine,
) -> Result<Option<f64>, CropWeatherError> {
    let Some(window) = calendar.window(&point.crop, &point.location, year) else {
        return Ok(None);
    };
    let request = SimulationRequest::new(
        &point.crop,
        &point.variety,
        point.location,
        window.sowing,
        window.harvest,
    )?;
    let season = season_range(year, window.harvest)?;
    let weather = service.load(&point.location, &season)?;
    let frame = engine
        .layout()
        .frame(&weather.records)
        .map_err(SimulationError::Frame)?;
    Ok(Some(engine.compute(&request, &frame)?))
}

/// January 1st of `year` through harvest, so models can spin up before sowing.
fn season_range(year: i32, harvest: NaiveDate) -> Result<DateRange, CropWeatherError> {
    let start = NaiveDate::from_yo_opt(year, 1).unwrap_or(harvest);
    Ok(DateRange::new(start, harvest)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agro::calendar::{CalendarCell, CalendarClampPolicy, DayOfYearCalendar};
    use crate::agro::engine::EngineLayout;
    use crate::cache::weather_file::{CachedWeatherFile, SiteMetadata};
    use crate::normalize::calibration::AngstromCoefficients;
    use crate::normalize::normalizer::WeatherNormalizer;
    use crate::normalize::schema::OutputSchema;
    use crate::sources::elevation::FixedElevation;
    use crate::sources::error::FetchError;
    use crate::sources::WeatherSource;
    use crate::types::raw_series::RawSeries;
    use crate::types::record::{DailyWeatherRecord, WindUnit};
    use polars::prelude::{ChunkAgg, DataFrame};
    use tempfile::tempdir;

    struct Offline;

    impl WeatherSource for Offline {
        fn name(&self) -> &str {
            "offline"
        }

        fn fetch(
            &self,
            _location: &LocationQuery,
            _range: &DateRange,
            _variables: &[String],
        ) -> Result<RawSeries, FetchError> {
            Err(FetchError::Unavailable {
                source_name: "offline".to_string(),
                message: "no network".to_string(),
            })
        }
    }

    /// Sums DSSAT rainfall (mm) over the season; fails for one variety.
    struct RainSum;

    impl SimulationEngine for RainSum {
        fn name(&self) -> &str {
            "rain-sum"
        }

        fn layout(&self) -> EngineLayout {
            EngineLayout::Dssat
        }

        fn compute(
            &self,
            request: &SimulationRequest,
            weather: &DataFrame,
        ) -> Result<f64, SimulationError> {
            if request.variety == "broken" {
                return Err(SimulationError::Failed {
                    engine: self.name().to_string(),
                    message: "model crashed".to_string(),
                });
            }
            weather
                .column("RAIN")?
                .f64()?
                .sum()
                .ok_or_else(|| SimulationError::NoOutput {
                    engine: self.name().to_string(),
                })
        }
    }

    fn cached_season(dir: &std::path::Path, location: LocationQuery) {
        let records: Vec<DailyWeatherRecord> = NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .iter_days()
            .take(365)
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
        CachedWeatherFile::for_location(dir, &location)
            .write(&site, &records)
            .unwrap();
    }

    fn point(variety: &str, lat: f64) -> BatchPoint {
        BatchPoint {
            crop: "maize".to_string(),
            variety: variety.to_string(),
            location: LocationQuery::new(lat, 10.0).unwrap(),
        }
    }

    #[test]
    fn test_batch_continues_after_failures() {
        let dir = tempdir().unwrap();
        cached_season(dir.path(), LocationQuery::new(45.0, 10.0).unwrap());

        let calendar = DayOfYearCalendar::new(CalendarClampPolicy::default()).with_crop(
            "maize",
            vec![
                CalendarCell {
                    latitude: 45.0,
                    longitude: 10.0,
                    plant_doy: Some(100),
                    harvest_doy: Some(250),
                },
                CalendarCell {
                    latitude: 60.0,
                    longitude: 10.0,
                    plant_doy: None,
                    harvest_doy: None,
                },
            ],
        );
        let service = WeatherService::builder()
            .source(Box::new(Offline))
            .elevation(Box::new(FixedElevation(0.0)))
            .normalizer(
                WeatherNormalizer::builder()
                    .schema(OutputSchema::power_api(WindUnit::KilometresPerDay).unwrap())
                    .build(),
            )
            .cache_dir(dir.path().to_path_buf())
            .build()
            .unwrap();

        let points = vec![
            point("broken", 45.0),
            point("early", 45.0),
            point("early", 60.0),
        ];
        let results = run_batch(&points, 2022, &calendar, &service, &RainSum);
        assert_eq!(results.len(), 3);
        assert!(matches!(
            results[0].outcome,
            LocationOutcome::Failed(CropWeatherError::Simulation(SimulationError::Failed { .. }))
        ));
        match results[1].outcome {
            // January 1st to September 7th (day 250) is 250 days of 1 mm.
            LocationOutcome::Yield(v) => approx::assert_relative_eq!(v, 250.0, epsilon = 1e-6),
            ref other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(results[2].outcome, LocationOutcome::Skipped));
    }

    #[test]
    fn test_empty_cache_is_recorded_as_failure() {
        let dir = tempdir().unwrap();
        let calendar = DayOfYearCalendar::new(CalendarClampPolicy::disabled()).with_crop(
            "maize",
            vec![CalendarCell {
                latitude: 45.0,
                longitude: 10.0,
                plant_doy: Some(100),
                harvest_doy: Some(250),
            }],
        );
        let service = WeatherService::builder()
            .source(Box::new(Offline))
            .elevation(Box::new(FixedElevation(0.0)))
            .normalizer(
                WeatherNormalizer::builder()
                    .schema(OutputSchema::power_api(WindUnit::MetresPerSecond).unwrap())
                    .build(),
            )
            .cache_dir(dir.path().to_path_buf())
            .build()
            .unwrap();
        let results = run_batch(&[point("early", 45.0)], 2022, &calendar, &service, &RainSum);
        assert!(matches!(
            results[0].outcome,
            LocationOutcome::Failed(CropWeatherError::FallbackExhausted { .. })
        ));
    }
}
