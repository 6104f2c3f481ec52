//! NASA POWER daily-point API client.

use crate::sources::error::FetchError;
use crate::sources::{check_status, http_client, WeatherSource, DEFAULT_TIMEOUT};
use crate::types::date_range::DateRange;
use crate::types::location::LocationQuery;
use crate::types::raw_series::{RawSeries, DEFAULT_FILL_VALUE};
use crate::units::to_numeric;
use bon::bon;
use chrono::NaiveDate;
use log::{debug, info};
use moka::sync::Cache;
use ordered_float::OrderedFloat;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

const POWER_URL: &str = "https://power.larc.nasa.gov/api/temporal/daily/point";
const POWER_DATE_FORMAT: &str = "%Y%m%d";

/// Default number of memoized responses.
pub const DEFAULT_RESPONSE_CACHE_CAPACITY: u64 = 128;

/// Every variable the crop-model pipelines read from NASA POWER.
pub const POWER_VARIABLES: [&str; 9] = [
    "TOA_SW_DWN",
    "ALLSKY_SFC_SW_DWN",
    "T2M",
    "T2M_MIN",
    "T2M_MAX",
    "T2MDEW",
    "WS2M",
    "PRECTOTCORR",
    "RH2M",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    latitude: OrderedFloat<f64>,
    longitude: OrderedFloat<f64>,
    range: DateRange,
    variables: Vec<String>,
}

#[derive(Deserialize)]
struct PowerPayload {
    #[serde(default)]
    header: PowerHeader,
    geometry: Option<PowerGeometry>,
    properties: PowerProperties,
}

#[derive(Deserialize, Default)]
struct PowerHeader {
    fill_value: Option<Value>,
}

#[derive(Deserialize)]
struct PowerGeometry {
    #[serde(default)]
    coordinates: Vec<Value>,
}

#[derive(Deserialize)]
struct PowerProperties {
    parameter: HashMap<String, BTreeMap<String, Value>>,
}

/// Weather source backed by the NASA POWER agroclimatology API.
///
/// Responses are memoized per `(location, range, variables)` in a bounded, thread-safe
/// cache, so repeated queries for the same point within a process hit the network once.
pub struct NasaPowerSource {
    client: reqwest::blocking::Client,
    base_url: String,
    responses: Cache<RequestKey, Arc<RawSeries>>,
}

#[bon]
impl NasaPowerSource {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Per-request timeout. Defaults to 10 seconds.
    /// * `cache_capacity` - Maximum memoized responses. Defaults to 128.
    /// * `base_url` - Endpoint override, for mirrors and tests.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ClientBuild`] if the HTTP client cannot be created.
    #[builder]
    pub fn new(
        timeout: Option<Duration>,
        cache_capacity: Option<u64>,
        base_url: Option<String>,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(timeout.unwrap_or(DEFAULT_TIMEOUT))?,
            base_url: base_url.unwrap_or_else(|| POWER_URL.to_string()),
            responses: Cache::new(cache_capacity.unwrap_or(DEFAULT_RESPONSE_CACHE_CAPACITY)),
        })
    }

    fn download(
        &self,
        location: &LocationQuery,
        range: &DateRange,
        variables: &[String],
    ) -> Result<RawSeries, FetchError> {
        let url = &self.base_url;
        info!("Downloading NASA POWER data for {} over {}", location, range);
        let response = self
            .client
            .get(url)
            .query(&[
                ("request", "execute".to_string()),
                ("parameters", variables.join(",")),
                ("latitude", location.latitude().to_string()),
                ("longitude", location.longitude().to_string()),
                ("start", range.start().format(POWER_DATE_FORMAT).to_string()),
                ("end", range.end().format(POWER_DATE_FORMAT).to_string()),
                ("community", "AG".to_string()),
                ("format", "JSON".to_string()),
                ("user", "anonymous".to_string()),
            ])
            .send()
            .map_err(|e| FetchError::NetworkRequest(url.clone(), e))?;
        let body = check_status(response, url)?
            .text()
            .map_err(|e| FetchError::NetworkRequest(url.clone(), e))?;
        parse_power_payload(&body, variables, url)
    }
}

impl WeatherSource for NasaPowerSource {
    fn name(&self) -> &str {
        "nasa-power"
    }

    fn fetch(
        &self,
        location: &LocationQuery,
        range: &DateRange,
        variables: &[String],
    ) -> Result<RawSeries, FetchError> {
        let key = RequestKey {
            latitude: OrderedFloat(location.latitude()),
            longitude: OrderedFloat(location.longitude()),
            range: *range,
            variables: variables.to_vec(),
        };
        if let Some(hit) = self.responses.get(&key) {
            debug!("Response cache hit for {} over {}", location, range);
            return Ok(hit.as_ref().clone());
        }
        let series = self.download(location, range, variables)?;
        self.responses.insert(key, Arc::new(series.clone()));
        Ok(series)
    }
}

/// Parses a NASA POWER daily-point JSON document into a [`RawSeries`].
///
/// Values are kept as reported, including fill values; the declared `header.fill_value`
/// (or `-999` when absent) becomes the series fill value. `url` only labels errors.
///
/// # Errors
///
/// Returns [`FetchError::Json`] for invalid JSON, [`FetchError::MalformedPayload`] when a
/// requested variable or a date key is unusable, and [`FetchError::Conversion`] for a
/// value that is not numeric.
pub fn parse_power_payload(
    body: &str,
    variables: &[String],
    url: &str,
) -> Result<RawSeries, FetchError> {
    let payload: PowerPayload = serde_json::from_str(body).map_err(|e| FetchError::Json {
        url: url.to_string(),
        source: e,
    })?;
    let malformed = |message: String| FetchError::MalformedPayload {
        url: url.to_string(),
        message,
    };

    let fill_value = match &payload.header.fill_value {
        Some(v) => to_numeric(v)?,
        None => DEFAULT_FILL_VALUE,
    };
    let mut series = RawSeries::new(fill_value);
    series.elevation = payload
        .geometry
        .as_ref()
        .and_then(|g| g.coordinates.get(2))
        .and_then(|v| to_numeric(v).ok())
        .filter(|v| v.is_finite());

    for name in variables {
        let values = payload
            .properties
            .parameter
            .get(name)
            .ok_or_else(|| malformed(format!("variable '{}' not in response", name)))?;
        for (day, value) in values {
            let date = NaiveDate::parse_from_str(day, POWER_DATE_FORMAT)
                .map_err(|_| malformed(format!("'{}' is not a YYYYMMDD date", day)))?;
            series.insert(name, date, to_numeric(value)?);
        }
    }
    debug!(
        "Parsed {} variables over {} days from {}",
        variables.len(),
        series.dates().len(),
        url
    );
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::ConversionError;

    const SAMPLE: &str = r#"{
        "type": "Feature",
        "geometry": {"type": "Point", "coordinates": [5.0, 52.0, 3.82]},
        "properties": {"parameter": {
            "T2M_MAX": {"20210101": 4.5, "20210102": -999.0, "20210103": "6.25"},
            "RH2M": {"20210101": 88.1, "20210102": 90.0, "20210103": null}
        }},
        "header": {"title": "NASA/POWER", "fill_value": -999.0}
    }"#;

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_sample_payload() {
        let series = parse_power_payload(SAMPLE, &vars(&["T2M_MAX", "RH2M"]), "test").unwrap();
        let d = |day| NaiveDate::from_ymd_opt(2021, 1, day).unwrap();
        assert_eq!(series.fill_value, -999.0);
        assert_eq!(series.elevation, Some(3.82));
        assert_eq!(series.value("T2M_MAX", d(1)), 4.5);
        // Fill values are passed through untouched; numeric strings are coerced.
        assert_eq!(series.value("T2M_MAX", d(2)), -999.0);
        assert_eq!(series.value("T2M_MAX", d(3)), 6.25);
        assert!(series.value("RH2M", d(3)).is_nan());
    }

    #[test]
    fn test_missing_variable_is_malformed() {
        let err = parse_power_payload(SAMPLE, &vars(&["WS2M"]), "test").unwrap_err();
        assert!(matches!(err, FetchError::MalformedPayload { .. }));
    }

    #[test]
    fn test_non_numeric_value_is_conversion_error() {
        let body = r#"{"properties": {"parameter": {"T2M": {"20210101": "warm"}}}}"#;
        let err = parse_power_payload(body, &vars(&["T2M"]), "test").unwrap_err();
        assert!(matches!(
            err,
            FetchError::Conversion(ConversionError::NonNumeric(_))
        ));
    }

    #[test]
    fn test_bad_date_key_is_malformed() {
        let body = r#"{"properties": {"parameter": {"T2M": {"2021-01-01": 1.0}}}}"#;
        let err = parse_power_payload(body, &vars(&["T2M"]), "test").unwrap_err();
        assert!(matches!(err, FetchError::MalformedPayload { .. }));
    }

    #[test]
    fn test_builtin_schemas_request_known_variables() {
        use crate::normalize::schema::OutputSchema;
        use crate::types::record::WindUnit;

        let schemas = [
            OutputSchema::power_api(WindUnit::MetresPerSecond).unwrap(),
            OutputSchema::power_archive(WindUnit::KilometresPerDay).unwrap(),
        ];
        for schema in schemas {
            for variable in schema.source_variables() {
                assert!(
                    POWER_VARIABLES.contains(&variable.as_str()),
                    "{} requests unknown variable {}",
                    schema.name(),
                    variable
                );
            }
        }
    }

    #[test]
    fn test_invalid_json() {
        let err = parse_power_payload("<html>", &vars(&["T2M"]), "test").unwrap_err();
        assert!(matches!(err, FetchError::Json { .. }));
    }
}
