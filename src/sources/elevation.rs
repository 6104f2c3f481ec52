use crate::sources::error::FetchError;
use crate::sources::{check_status, http_client, DEFAULT_TIMEOUT};
use crate::types::location::LocationQuery;
use crate::units::to_numeric;
use bon::bon;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const OPENTOPODATA_URL: &str = "https://api.opentopodata.org/v1/aster30m";

/// Elevation used when a lookup fails.
pub const DEFAULT_FALLBACK_ELEVATION: f64 = 200.0;

/// Resolves the elevation (m) of a point.
///
/// Lookups never fail: implementations substitute a fallback and log a warning, so a
/// missing elevation never aborts a simulation.
pub trait ElevationLookup: Send + Sync {
    fn elevation(&self, location: &LocationQuery) -> f64;
}

/// A constant elevation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedElevation(pub f64);

impl ElevationLookup for FixedElevation {
    fn elevation(&self, _location: &LocationQuery) -> f64 {
        self.0
    }
}

#[derive(Deserialize)]
struct TopoResponse {
    #[serde(default)]
    results: Vec<TopoResult>,
}

#[derive(Deserialize)]
struct TopoResult {
    elevation: Option<Value>,
}

/// Elevation from the OpenTopoData ASTER 30 m dataset.
pub struct OpenTopoData {
    client: reqwest::blocking::Client,
    base_url: String,
    fallback: f64,
}

#[bon]
impl OpenTopoData {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Per-request timeout. Defaults to 10 seconds.
    /// * `fallback` - Elevation returned when a lookup fails. Defaults to 200 m.
    /// * `base_url` - Endpoint override.
    #[builder]
    pub fn new(
        timeout: Option<Duration>,
        fallback: Option<f64>,
        base_url: Option<String>,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(timeout.unwrap_or(DEFAULT_TIMEOUT))?,
            base_url: base_url.unwrap_or_else(|| OPENTOPODATA_URL.to_string()),
            fallback: fallback.unwrap_or(DEFAULT_FALLBACK_ELEVATION),
        })
    }

    /// Looks up the elevation without the fallback.
    ///
    /// # Errors
    ///
    /// Any network, status or payload problem, as a [`FetchError`].
    pub fn try_elevation(&self, location: &LocationQuery) -> Result<f64, FetchError> {
        let url = format!(
            "{}?locations={},{}",
            self.base_url,
            location.latitude(),
            location.longitude()
        );
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| FetchError::NetworkRequest(url.clone(), e))?;
        let body = check_status(response, &url)?
            .text()
            .map_err(|e| FetchError::NetworkRequest(url.clone(), e))?;
        parse_topo_response(&body, &url)
    }
}

impl ElevationLookup for OpenTopoData {
    fn elevation(&self, location: &LocationQuery) -> f64 {
        match self.try_elevation(location) {
            Ok(elevation) => {
                debug!("Elevation of {} is {} m", location, elevation);
                elevation
            }
            Err(e) => {
                warn!(
                    "Elevation lookup for {} failed ({}). Using fallback elevation {} m",
                    location, e, self.fallback
                );
                self.fallback
            }
        }
    }
}

fn parse_topo_response(body: &str, url: &str) -> Result<f64, FetchError> {
    let response: TopoResponse = serde_json::from_str(body).map_err(|e| FetchError::Json {
        url: url.to_string(),
        source: e,
    })?;
    let value = response
        .results
        .first()
        .and_then(|r| r.elevation.as_ref())
        .ok_or_else(|| FetchError::MalformedPayload {
            url: url.to_string(),
            message: "no elevation in response".to_string(),
        })?;
    let elevation = to_numeric(value)?;
    if elevation.is_finite() {
        Ok(elevation)
    } else {
        Err(FetchError::MalformedPayload {
            url: url.to_string(),
            message: format!("elevation {} is not finite", elevation),
        })
    }
}
