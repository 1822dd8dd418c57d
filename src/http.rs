//!
//! src/http.rs
//!
//! Shared reqwest client construction plus the retry wrapper the
//! Sheets and Spotify collaborators route their calls through
//!

use rand::{Rng, SeedableRng, rngs::SmallRng};
use reqwest::{Client, RequestBuilder, header, redirect};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::config::{HttpConfig, RetryConfig};
use crate::errors::SyncError;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

pub fn json_client(http: &HttpConfig) -> Result<Client, SyncError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_helper(http)
        .default_headers(h)
        .build()
        .map_err(|e| SyncError::Config(format!("build client: {e}")))
}

pub fn page_client(http: &HttpConfig, user_agent: &str) -> Result<Client, SyncError> {
    client_helper(http)
        .user_agent(user_agent)
        .build()
        .map_err(|e| SyncError::Config(format!("build client: {e}")))
}

/// Simple function to generate random wait for http_with_retry
fn generate_backoff(
    base: Duration,
    attempt: usize,
    jitter: bool,
    rng: &mut SmallRng
) -> Duration {
    let exp = (1_u64 << attempt.min(6)) * base.as_millis() as u64;
    let jitter_ms: u64 = if jitter { rng.gen_range(50..=200) } else { 0 };
    Duration::from_millis(exp + jitter_ms)
}

/// Sends a request, retrying 429/5xx with exponential backoff. Failures
/// are reported through `kind` so each collaborator surfaces its own
/// error variant.
pub async fn http_with_retry(
    request: RequestBuilder,
    retry: &RetryConfig,
    kind: fn(String) -> SyncError,
) -> Result<serde_json::Value, SyncError> {
    let mut rng = SmallRng::from_entropy();
    let mut attempt = 0_usize;
    loop {
        let response = request.try_clone()
            .ok_or_else(|| kind("non-cloneable request".to_string()))?
            .send()
            .await;
        match response {
            Ok(resp) => {
                if resp.status().is_success() {
                    return resp.json::<serde_json::Value>().await
                        .map_err(|e| kind(format!("decode body: {e}")));
                }
                let status = resp.status();
                let retryable = retry.retryable_statuses.contains(&status.as_u16());
                if !retryable || attempt + 1 >= retry.max_attempts as usize {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(kind(
                        format!("status {status} after {attempt} retries: {body}")
                    ));
                }
                let backoff = generate_backoff(
                    retry.base_backoff, attempt, retry.jitter, &mut rng
                );
                warn!(status = %status, backoff = ?backoff.as_millis(), "http.retry");
                sleep(backoff).await;
                attempt += 1;
            },
            Err(e) => {
                if attempt + 1 >= retry.max_attempts as usize {
                    return Err(kind(format!("send: {e}")));
                }
                let backoff = generate_backoff(
                    retry.base_backoff, attempt, retry.jitter, &mut rng
                );
                warn!(backoff = ?backoff.as_millis(), "http.retry.error");
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut rng = SmallRng::seed_from_u64(7);
        let base = Duration::from_millis(250);

        let first = generate_backoff(base, 0, false, &mut rng);
        let third = generate_backoff(base, 2, false, &mut rng);
        assert_eq!(first, Duration::from_millis(250));
        assert_eq!(third, Duration::from_millis(1000));

        // shift saturates at attempt 6
        let deep = generate_backoff(base, 40, false, &mut rng);
        assert_eq!(deep, Duration::from_millis(64 * 250));
    }

    #[test]
    fn jitter_stays_in_band() {
        let mut rng = SmallRng::seed_from_u64(7);
        let base = Duration::from_millis(100);
        for attempt in 0..4 {
            let b = generate_backoff(base, attempt, true, &mut rng);
            let floor = (1_u64 << attempt) * 100 + 50;
            let ceil = (1_u64 << attempt) * 100 + 200;
            assert!(b >= Duration::from_millis(floor));
            assert!(b <= Duration::from_millis(ceil));
        }
    }
}
