//! HTTP collaborators: Overpass for features, Nominatim for geocoding.
//!
//! Both clients:
//! - Share a pooled reqwest client with a request timeout
//! - Space out request starts (public instances ask for gentle use)
//! - Retry with exponential backoff on 429/504 and transport errors

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{NarratorError, Result};
use crate::features::Feature;
use crate::query::{parse_overpass_json, FeatureQuery};
use crate::source::{FeatureSource, Geocoder};
use crate::GpsPoint;

pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

const USER_AGENT: &str = concat!("route-narrator/", env!("CARGO_PKG_VERSION"));
const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Enforces a minimum gap between request starts.
struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                debug!("Rate limit: waiting {:?}", ready_at - now);
                tokio::time::sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn backoff(attempt: u32) -> Duration {
    // 1s, 2s, 4s, 8s...
    Duration::from_millis(1000 * (1 << attempt.min(4)))
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::GATEWAY_TIMEOUT
}

/// Outcome of one request attempt, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Attempt {
    Status(StatusCode),
    Transport,
}

/// Wait before the next attempt, or `None` to give up.
///
/// `retries` counts the retries already made.
fn next_retry(attempt: Attempt, retries: u32) -> Option<Duration> {
    if retries >= MAX_RETRIES {
        return None;
    }
    match attempt {
        Attempt::Status(status) if should_retry(status) => Some(backoff(retries + 1)),
        Attempt::Status(_) => None,
        Attempt::Transport => Some(Duration::from_millis(500 * (1 << (retries + 1)))),
    }
}

/// Send a request (rebuilt per attempt) and return the success body.
///
/// Retries 429/504 responses and transport errors with backoff; every
/// attempt waits its turn on `rate_limiter`.
async fn fetch_text<F>(tag: &str, rate_limiter: &RateLimiter, build: F) -> Result<String>
where
    F: Fn() -> RequestBuilder,
{
    let mut retries = 0;

    loop {
        rate_limiter.wait_turn().await;

        let resp = match build().send().await {
            Ok(resp) => resp,
            Err(e) => match next_retry(Attempt::Transport, retries) {
                Some(wait) => {
                    retries += 1;
                    warn!("[{}] Error: {}, retry {} after {:?}", tag, e, retries, wait);
                    tokio::time::sleep(wait).await;
                    continue;
                }
                None => {
                    return Err(NarratorError::HttpError {
                        message: format!("Request error: {}", e),
                        status_code: None,
                    });
                }
            },
        };

        let status = resp.status();
        if let Some(wait) = next_retry(Attempt::Status(status), retries) {
            retries += 1;
            warn!(
                "[{}] {} from server, retry {} after {:?}",
                tag, status, retries, wait
            );
            tokio::time::sleep(wait).await;
            continue;
        }
        if !status.is_success() {
            return Err(NarratorError::HttpError {
                message: format!("{} returned {}", tag, status),
                status_code: Some(status.as_u16()),
            });
        }

        return resp.text().await.map_err(|e| NarratorError::HttpError {
            message: format!("Failed to read response body: {}", e),
            status_code: None,
        });
    }
}

fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| NarratorError::HttpError {
            message: format!("Failed to create HTTP client: {}", e),
            status_code: None,
        })
}

/// Feature source backed by an Overpass API endpoint.
pub struct OverpassClient {
    client: Client,
    endpoint: String,
    rate_limiter: Arc<RateLimiter>,
}

impl OverpassClient {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(DEFAULT_OVERPASS_URL)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            endpoint: endpoint.to_string(),
            rate_limiter: Arc::new(RateLimiter::new(Duration::from_millis(500))),
        })
    }

    async fn post_query(&self, ql: &str) -> Result<String> {
        fetch_text("OverpassClient", &self.rate_limiter, || {
            self.client.post(&self.endpoint).form(&[("data", ql)])
        })
        .await
    }
}

impl FeatureSource for OverpassClient {
    async fn fetch_features(&self, query: &FeatureQuery) -> Result<Vec<Feature>> {
        let ql = query.to_overpass_ql();
        let start = Instant::now();
        info!(
            "[OverpassClient] Querying {} points at {:.0}m",
            query.points.len(),
            query.radius_meters
        );

        let body = self.post_query(&ql).await?;
        let features = parse_overpass_json(&body)?;

        info!(
            "[OverpassClient] {} features in {:.2}s",
            features.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(features)
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Parse a Nominatim `format=json` search response; first hit wins.
fn parse_nominatim_json(body: &str) -> Result<Option<GpsPoint>> {
    let places: Vec<NominatimPlace> =
        serde_json::from_str(body).map_err(|e| NarratorError::HttpError {
            message: format!("Malformed geocoder response: {}", e),
            status_code: None,
        })?;

    let Some(place) = places.into_iter().next() else {
        return Ok(None);
    };
    let point = match (place.lat.parse::<f64>(), place.lon.parse::<f64>()) {
        (Ok(lat), Ok(lon)) => GpsPoint::new(lat, lon),
        _ => GpsPoint::new(f64::NAN, f64::NAN),
    };
    if !point.is_valid() {
        return Err(NarratorError::HttpError {
            message: format!(
                "Geocoder returned invalid coordinates ({}, {})",
                place.lat, place.lon
            ),
            status_code: None,
        });
    }
    Ok(Some(point))
}

/// Geocoder backed by a Nominatim search endpoint.
pub struct NominatimClient {
    client: Client,
    endpoint: String,
    rate_limiter: Arc<RateLimiter>,
}

impl NominatimClient {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(DEFAULT_NOMINATIM_URL)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            endpoint: endpoint.to_string(),
            // Public Nominatim allows one request per second
            rate_limiter: Arc::new(RateLimiter::new(Duration::from_secs(1))),
        })
    }
}

impl Geocoder for NominatimClient {
    async fn geocode(&self, place: &str) -> Result<Option<GpsPoint>> {
        let body = fetch_text("NominatimClient", &self.rate_limiter, || {
            self.client
                .get(&self.endpoint)
                .query(&[("q", place), ("format", "json"), ("limit", "1")])
        })
        .await?;
        let result = parse_nominatim_json(&body)?;
        debug!("[NominatimClient] '{}' -> {:?}", place, result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter() {
        let limiter = RateLimiter::new(Duration::from_millis(20));

        // Should not wait on first request
        let start = Instant::now();
        limiter.wait_turn().await;
        assert!(start.elapsed() < Duration::from_millis(15));

        limiter.wait_turn().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_parse_nominatim() {
        let body = r#"[{"place_id": 1, "lat": "46.6863", "lon": "7.8632",
                       "display_name": "Interlaken"}]"#;
        assert_eq!(
            parse_nominatim_json(body).unwrap(),
            Some(GpsPoint::new(46.6863, 7.8632))
        );
        assert_eq!(parse_nominatim_json("[]").unwrap(), None);
        assert!(parse_nominatim_json(r#"[{"lat": "abc", "lon": "1"}]"#).is_err());
        assert!(parse_nominatim_json("{}").is_err());
    }

    #[test]
    fn test_retry_policy() {
        // Transport errors and throttling both retry, up to the same limit
        for attempt in [
            Attempt::Transport,
            Attempt::Status(StatusCode::TOO_MANY_REQUESTS),
            Attempt::Status(StatusCode::GATEWAY_TIMEOUT),
        ] {
            for retries in 0..MAX_RETRIES {
                assert!(next_retry(attempt, retries).is_some(), "{:?} {}", attempt, retries);
            }
            assert_eq!(next_retry(attempt, MAX_RETRIES), None);
        }
        assert_eq!(
            next_retry(Attempt::Transport, 0),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(next_retry(Attempt::Status(StatusCode::BAD_REQUEST), 0), None);
        assert_eq!(next_retry(Attempt::Status(StatusCode::OK), 0), None);
    }

    #[test]
    fn test_backoff() {
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(10), Duration::from_secs(16));
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
    }
}
