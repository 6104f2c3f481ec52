use crate::normalize::calibration::{estimate_angstrom_ab, AngstromCoefficients};
use crate::normalize::error::NormalizeError;
use crate::normalize::evapotranspiration::{reference_et, EtInputs};
use crate::normalize::filter::{filter_missing, FilterPolicy, FilterReport};
use crate::normalize::schema::{OutputSchema, WeatherField};
use crate::normalize::table::WeatherTable;
use crate::types::location::LocationQuery;
use crate::types::raw_series::{RawSeries, DEFAULT_FILL_VALUE};
use crate::types::record::{DailyWeatherRecord, WindUnit};
use crate::units::{dewpoint_to_vapour_pressure_hpa, km_per_day_to_ms};
use bon::bon;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::HashMap;

/// Result of one normalization call.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWeather {
    /// One record per date, ascending.
    pub records: Vec<DailyWeatherRecord>,
    /// Present when calibration ran (requested, or needed for evapotranspiration).
    pub angstrom: Option<AngstromCoefficients>,
    pub report: FilterReport,
}

impl NormalizedWeather {
    /// Calibrated coefficients, or the defaults when calibration did not run.
    pub fn angstrom_or_default(&self) -> AngstromCoefficients {
        self.angstrom.unwrap_or_default()
    }
}

/// Turns raw weather and solar series into canonical [`DailyWeatherRecord`]s.
///
/// One normalizer serves every consumer; what differs between them (source variable
/// names, units, wind unit) lives in its [`OutputSchema`]. The normalizer performs no I/O
/// and holds no mutable state, so a single instance can be shared across threads.
#[derive(Debug, Clone)]
pub struct WeatherNormalizer {
    schema: OutputSchema,
    policy: FilterPolicy,
    fill_value: f64,
    derive_et: bool,
    calibrate: bool,
}

#[bon]
impl WeatherNormalizer {
    /// Creates a normalizer for `schema`.
    ///
    /// # Arguments
    ///
    /// * `schema` - Mapping from source variables to canonical fields.
    /// * `policy` - Missing-value policy. Defaults to [`FilterPolicy::Strict`].
    /// * `fill_value` - Value marking missing cells. Defaults to `-999`.
    /// * `derive_et` - Attach E0/ES0/ET0 to every record. Implies calibration.
    /// * `calibrate` - Estimate Angstrom coefficients from the solar series.
    ///
    /// # Examples
    ///
    /// ```
    /// use cropweather::normalize::filter::FilterPolicy;
    /// use cropweather::normalize::schema::OutputSchema;
    /// use cropweather::normalize::normalizer::WeatherNormalizer;
    /// use cropweather::WindUnit;
    ///
    /// let normalizer = WeatherNormalizer::builder()
    ///     .schema(OutputSchema::power_api(WindUnit::MetresPerSecond).unwrap())
    ///     .policy(FilterPolicy::FillForward)
    ///     .derive_et(true)
    ///     .build();
    /// assert_eq!(normalizer.policy(), FilterPolicy::FillForward);
    /// ```
    #[builder]
    pub fn new(
        schema: OutputSchema,
        #[builder(default)] policy: FilterPolicy,
        fill_value: Option<f64>,
        #[builder(default)] derive_et: bool,
        #[builder(default)] calibrate: bool,
    ) -> Self {
        Self {
            schema,
            policy,
            fill_value: fill_value.unwrap_or(DEFAULT_FILL_VALUE),
            derive_et,
            calibrate,
        }
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    pub fn policy(&self) -> FilterPolicy {
        self.policy
    }

    pub fn fill_value(&self) -> f64 {
        self.fill_value
    }

    pub fn derives_et(&self) -> bool {
        self.derive_et
    }

    /// Runs the pipeline: join, filter, calibrate, convert, validate.
    ///
    /// The caller supplies `elevation` (m). Either every record is returned or none is.
    ///
    /// # Errors
    ///
    /// * [`NormalizeError::NoOverlappingDates`] if the two series share no dates.
    /// * [`NormalizeError::MissingVariable`] if a schema source is absent from both series.
    /// * [`NormalizeError::InsufficientData`] if filtering leaves no rows.
    /// * [`NormalizeError::DataIntegrity`] if a converted value is non-finite or outside its
    ///   physical range.
    /// * [`NormalizeError::InvalidElevation`] if `elevation` is not finite.
    pub fn normalize(
        &self,
        raw_weather: &RawSeries,
        raw_solar: &RawSeries,
        location: &LocationQuery,
        elevation: f64,
    ) -> Result<NormalizedWeather, NormalizeError> {
        if !elevation.is_finite() {
            return Err(NormalizeError::InvalidElevation(elevation));
        }

        let merged = WeatherTable::merge(raw_weather, raw_solar)?;
        // Only the schema's own variables may cause rows to be dropped.
        let table = merged.select(&self.schema.source_variables())?;
        let (table, report) = filter_missing(table, self.fill_value, self.policy)?;

        let angstrom = if self.calibrate || self.derive_et {
            Some(self.calibrate_radiation(&table))
        } else {
            None
        };

        let records = self.build_records(&table, location, elevation, angstrom)?;
        info!(
            "Normalized {} days for {} with schema '{}'",
            records.len(),
            location,
            self.schema.name()
        );
        Ok(NormalizedWeather {
            records,
            angstrom,
            report,
        })
    }

    fn calibrate_radiation(&self, table: &WeatherTable) -> AngstromCoefficients {
        let Some(radiation) = self.schema.radiation() else {
            warn!(
                "Schema '{}' declares no radiation sources. Using default Angstrom A/B {}",
                self.schema.name(),
                AngstromCoefficients::DEFAULT
            );
            return AngstromCoefficients::DEFAULT;
        };
        match (
            table.column(&radiation.top_of_atmosphere),
            table.column(&radiation.surface),
        ) {
            (Some(toa), Some(sfc)) => estimate_angstrom_ab(&toa, &sfc),
            // `select` already guaranteed both columns.
            _ => AngstromCoefficients::DEFAULT,
        }
    }

    fn build_records(
        &self,
        table: &WeatherTable,
        location: &LocationQuery,
        elevation: f64,
        angstrom: Option<AngstromCoefficients>,
    ) -> Result<Vec<DailyWeatherRecord>, NormalizeError> {
        let mut converted: HashMap<WeatherField, Vec<f64>> = HashMap::new();
        for spec in self.schema.fields() {
            let column = table
                .column(&spec.source)
                .ok_or_else(|| NormalizeError::MissingVariable(spec.source.clone()))?;
            converted.insert(
                spec.target,
                column.iter().map(|v| spec.chain.apply(*v)).collect(),
            );
        }

        let wind_unit = self.schema.wind_unit();
        let mut records = Vec::with_capacity(table.height());
        let dates = table.dates();
        for (row, date) in dates.iter().enumerate() {
            let get = |field: WeatherField| converted.get(&field).map(|c| c[row]);
            let checked = |field: WeatherField, value: f64| check(field, *date, value, wind_unit);

            let temp_min = checked(
                WeatherField::TempMin,
                get(WeatherField::TempMin).unwrap_or(f64::NAN),
            )?;
            let temp_max = checked(
                WeatherField::TempMax,
                get(WeatherField::TempMax).unwrap_or(f64::NAN),
            )?;
            let temp_mean = checked(
                WeatherField::TempMean,
                get(WeatherField::TempMean).unwrap_or((temp_min + temp_max) / 2.0),
            )?;
            let dewpoint = get(WeatherField::Dewpoint)
                .map(|v| checked(WeatherField::Dewpoint, v))
                .transpose()?;
            let vapour = match (get(WeatherField::VapourPressure), dewpoint) {
                (Some(v), _) => v,
                (None, Some(tdew)) => dewpoint_to_vapour_pressure_hpa(tdew),
                (None, None) => f64::NAN,
            };
            let vapour_pressure = checked(WeatherField::VapourPressure, vapour)?;
            let relative_humidity = get(WeatherField::RelativeHumidity)
                .map(|v| checked(WeatherField::RelativeHumidity, v))
                .transpose()?;

            let mut record = DailyWeatherRecord {
                date: *date,
                temp_min,
                temp_max,
                temp_mean,
                precipitation: checked(
                    WeatherField::Precipitation,
                    get(WeatherField::Precipitation).unwrap_or(f64::NAN),
                )?,
                wind_speed: checked(
                    WeatherField::WindSpeed,
                    get(WeatherField::WindSpeed).unwrap_or(f64::NAN),
                )?,
                wind_unit,
                irradiance: checked(
                    WeatherField::Irradiance,
                    get(WeatherField::Irradiance).unwrap_or(f64::NAN),
                )?,
                vapour_pressure,
                dewpoint,
                relative_humidity,
                latitude: location.latitude(),
                longitude: location.longitude(),
                elevation,
                reference_et: None,
            };

            if self.derive_et {
                let inputs = EtInputs::from_record(&record);
                record.reference_et = Some(reference_et(&inputs, angstrom.unwrap_or_default()));
            }
            records.push(record);
        }
        debug!("Built {} records in {} wind", records.len(), wind_unit);
        Ok(records)
    }
}

/// Rejects non-finite values and values outside the field's physical range.
fn check(
    field: WeatherField,
    date: NaiveDate,
    value: f64,
    wind_unit: WindUnit,
) -> Result<f64, NormalizeError> {
    let comparable = match (field, wind_unit) {
        (WeatherField::WindSpeed, WindUnit::KilometresPerDay) => km_per_day_to_ms(value),
        _ => value,
    };
    if value.is_finite() && field.physical_range().contains(&comparable) {
        Ok(value)
    } else {
        Err(NormalizeError::DataIntegrity {
            field: field.name().to_string(),
            date,
            value,
        })
    }
}
