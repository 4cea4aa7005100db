use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

const MAX_ATTEMPTS: u32 = 3;
const MAX_WAIT_SECS: u64 = 30;

/// Sends a request, waiting out 429/503 responses a few times before handing the
/// last response back. Other statuses are returned as-is; the caller decodes the body.
pub(crate) async fn send_with_retry<F>(mut build: F) -> Result<Response, reqwest::Error>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 1;
    loop {
        let response = build().send().await?;
        let status = response.status();
        if !is_retryable(status) || attempt >= MAX_ATTEMPTS {
            return Ok(response);
        }
        let delay = retry_delay_from_headers(response.headers()).unwrap_or(Duration::from_secs(1));
        debug!(%status, attempt, delay_secs = delay.as_secs(), "provider throttled request");
        let _ = response.bytes().await;
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    )
}

fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let seconds = retry_after_seconds(headers).or_else(|| ratelimit_reset_seconds(headers))?;
    Some(Duration::from_secs(seconds.min(MAX_WAIT_SECS)))
}

fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

fn ratelimit_reset_seconds(headers: &HeaderMap) -> Option<u64> {
    let reset = headers
        .get("x-rate-limit-reset")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    reset.checked_sub(now).filter(|delay| *delay > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("5"));
        assert_eq!(retry_after_seconds(&headers), Some(5));
        assert_eq!(retry_delay_from_headers(&headers), Some(Duration::from_secs(5)));
    }

    #[test]
    fn long_waits_are_capped() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("600"));
        assert_eq!(
            retry_delay_from_headers(&headers),
            Some(Duration::from_secs(MAX_WAIT_SECS))
        );
    }

    #[test]
    fn ratelimit_reset_uses_future_time() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-rate-limit-reset",
            HeaderValue::from_str(&(now + 10).to_string()).unwrap(),
        );
        let delay = ratelimit_reset_seconds(&headers).unwrap();
        assert!(delay > 0);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-rate-limit-reset",
            HeaderValue::from_str(&(now - 10).to_string()).unwrap(),
        );
        assert_eq!(ratelimit_reset_seconds(&headers), None);
    }

    #[test]
    fn only_throttling_statuses_retry() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::OK));
    }
}
