//! HTTP reference elevation source with rate limiting.
//!
//! Queries an Open-Elevation compatible endpoint:
//! `GET {base}/api/v1/lookup?locations=lat,lon|lat,lon` answering
//! `{"results": [{"latitude": .., "longitude": .., "elevation": ..}]}`.
//!
//! - Connection pooling with a 30 s timeout
//! - Rate limiting (sliding one-second window)
//! - Retry with exponential backoff on 429 and network errors
//! - Bounded concurrency for many lookups
//!
//! [`ElevationSource::lookup`] is synchronous and drives the async client
//! on an owned tokio runtime. It must not be called from inside another
//! tokio runtime.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::runtime::Runtime;
use tokio::sync::{Mutex, Semaphore};

use crate::elevation::{ElevationLookup, ElevationSource};
use crate::error::{Result, TrackError};

const BURST_LIMIT: usize = 10; // Max requests per second
const MAX_CONCURRENCY: usize = 8;
const MAX_RETRIES: u32 = 3;
const TIMEOUT_SECS: u64 = 30;

/// Public Open-Elevation instance.
pub const DEFAULT_BASE_URL: &str = "https://api.open-elevation.com";

#[derive(Debug, Deserialize)]
struct LookupResponse {
    results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    elevation: Option<f64>,
}

/// Map a decoded response to the answer for its first location.
fn first_answer(response: LookupResponse) -> ElevationLookup {
    match response.results.first().and_then(|r| r.elevation) {
        Some(e) if e.is_finite() => ElevationLookup::Found(e),
        _ => ElevationLookup::NotFound,
    }
}

/// Sliding-window rate limiter.
struct RateLimiter {
    request_times: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            request_times: Mutex::new(VecDeque::with_capacity(BURST_LIMIT + 1)),
        }
    }

    /// Wait until a request fits in the window, then record it.
    async fn acquire(&self) {
        loop {
            let wait_time = {
                let mut times = self.request_times.lock().await;
                let now = Instant::now();
                let cutoff = now - Duration::from_secs(1);
                while times.front().map_or(false, |&t| t < cutoff) {
                    times.pop_front();
                }
                if times.len() < BURST_LIMIT {
                    times.push_back(now);
                    None
                } else {
                    times
                        .front()
                        .map(|&oldest| (oldest + Duration::from_secs(1)).saturating_duration_since(now))
                }
            };

            match wait_time {
                Some(duration) => {
                    debug!("[HttpElevation] Rate limit: waiting {:?}", duration);
                    tokio::time::sleep(duration).await;
                }
                None => break,
            }
        }
    }
}

/// Reference elevation over HTTP.
pub struct HttpElevationSource {
    client: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
    runtime: Runtime,
}

impl HttpElevationSource {
    /// Create a source for `base_url` (without the `/api/v1/lookup` path).
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(MAX_CONCURRENCY)
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .map_err(|e| TrackError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;
        let runtime = Runtime::new().map_err(|e| TrackError::Http {
            message: format!("Failed to create tokio runtime: {}", e),
            status_code: None,
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::new()),
            runtime,
        })
    }

    fn url(&self, latitude: f64, longitude: f64) -> String {
        format!(
            "{}/api/v1/lookup?locations={:.6},{:.6}",
            self.base_url, latitude, longitude
        )
    }

    async fn fetch(
        client: &Client,
        rate_limiter: &RateLimiter,
        url: &str,
    ) -> ElevationLookup {
        let mut retries = 0;

        loop {
            rate_limiter.acquire().await;

            match client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::NOT_FOUND {
                        return ElevationLookup::NotFound;
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            warn!("[HttpElevation] Max retries exceeded (429)");
                            return ElevationLookup::Unavailable;
                        }
                        let backoff = Duration::from_millis(1000 * (1 << retries));
                        warn!("[HttpElevation] 429, retry {} after {:?}", retries, backoff);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    if !status.is_success() {
                        warn!("[HttpElevation] HTTP {}", status);
                        return ElevationLookup::Unavailable;
                    }

                    return match resp.json::<LookupResponse>().await {
                        Ok(data) => first_answer(data),
                        Err(e) => {
                            warn!("[HttpElevation] Parse error: {}", e);
                            ElevationLookup::Unavailable
                        }
                    };
                }
                Err(e) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        warn!("[HttpElevation] Request error: {}", e);
                        return ElevationLookup::Unavailable;
                    }
                    let backoff = Duration::from_millis(500 * (1 << retries));
                    warn!(
                        "[HttpElevation] Error: {}, retry {} after {:?}",
                        e, retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Look up many locations with bounded concurrency, in input order.
    pub fn lookup_many(&self, locations: &[(f64, f64)]) -> Vec<ElevationLookup> {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENCY));

        let results = self.runtime.block_on(async {
            let tasks = locations.iter().map(|&(lat, lon)| {
                let client = self.client.clone();
                let rate_limiter = Arc::clone(&self.rate_limiter);
                let semaphore = Arc::clone(&semaphore);
                let url = self.url(lat, lon);
                async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return ElevationLookup::Unavailable,
                    };
                    Self::fetch(&client, &rate_limiter, &url).await
                }
            });
            futures::future::join_all(tasks).await
        });

        let found = results
            .iter()
            .filter(|r| matches!(r, ElevationLookup::Found(_)))
            .count();
        info!(
            "[HttpElevation] {}/{} found in {:.2}s",
            found,
            locations.len(),
            start.elapsed().as_secs_f64()
        );
        results
    }
}

impl ElevationSource for HttpElevationSource {
    fn lookup(&self, latitude: f64, longitude: f64) -> ElevationLookup {
        let url = self.url(latitude, longitude);
        self.runtime
            .block_on(Self::fetch(&self.client, &self.rate_limiter, &url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = r#"{"results":[{"latitude":46.5,"longitude":6.6,"elevation":372.0}]}"#;
        let response: LookupResponse = serde_json::from_str(body).unwrap();
        assert_eq!(first_answer(response), ElevationLookup::Found(372.0));

        let body = r#"{"results":[{"latitude":0.1,"longitude":0.1,"elevation":null}]}"#;
        let response: LookupResponse = serde_json::from_str(body).unwrap();
        assert_eq!(first_answer(response), ElevationLookup::NotFound);

        let response: LookupResponse = serde_json::from_str(r#"{"results":[]}"#).unwrap();
        assert_eq!(first_answer(response), ElevationLookup::NotFound);
    }

    #[test]
    fn test_url() {
        let source = HttpElevationSource::new("http://localhost:8080/").unwrap();
        assert_eq!(
            source.url(46.5, 6.6),
            "http://localhost:8080/api/v1/lookup?locations=46.500000,6.600000"
        );
    }

    #[tokio::test]
    async fn test_rate_limiter() {
        let limiter = RateLimiter::new();

        // Should not wait within the burst
        let start = Instant::now();
        for _ in 0..BURST_LIMIT {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
