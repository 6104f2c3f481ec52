//! Remote collaborators: daily weather sources and elevation lookups.

pub mod elevation;
pub mod error;
pub mod nasa_power;

use crate::sources::error::FetchError;
use crate::types::date_range::DateRange;
use crate::types::location::LocationQuery;
use crate::types::raw_series::RawSeries;
use log::warn;
use reqwest::blocking::Response;
use std::time::Duration;

/// Timeout applied to every outbound request unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A provider of raw daily weather for a point.
///
/// Implementations block until the data is available or the request fails. A failure is
/// not retried here; the caller decides whether to fall back to cached data.
pub trait WeatherSource: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Fetches `variables` for every day of `range` at `location`.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] for network failures, non-success HTTP statuses and
    /// payloads that cannot be interpreted.
    fn fetch(
        &self,
        location: &LocationQuery,
        range: &DateRange,
        variables: &[String],
    ) -> Result<RawSeries, FetchError>;
}

/// Maps a non-success status to [`FetchError::HttpStatus`].
pub(crate) fn check_status(response: Response, url: &str) -> Result<Response, FetchError> {
    match response.error_for_status() {
        Ok(resp) => Ok(resp),
        Err(e) => {
            warn!("HTTP error for {}: {:?}", url, e);
            Err(if let Some(status) = e.status() {
                FetchError::HttpStatus {
                    url: url.to_string(),
                    status,
                    source: e,
                }
            } else {
                FetchError::NetworkRequest(url.to_string(), e)
            })
        }
    }
}

/// Builds the blocking client shared by the HTTP collaborators.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, FetchError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(FetchError::ClientBuild)
}
