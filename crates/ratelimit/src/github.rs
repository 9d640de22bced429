//! reqwest-backed [`Transport`] for the GitHub REST API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};

use crate::error::TransportError;
use crate::transport::{ApiRequest, ApiResponse, RateInfo, Transport};

const API_VERSION: &str = "2022-11-28";

/// Sends authenticated requests to GitHub and extracts the rate headers.
#[derive(Debug)]
pub struct GithubTransport {
    base_url: String,
    client: reqwest::Client,
}

impl GithubTransport {
    /// Build a transport for `base_url` (e.g. `https://api.github.com`)
    /// authenticating every request with `token`.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::Fatal(format!("invalid token header: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("vetbot/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Transport for GithubTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let rate = rate_info(response.headers());
        let retry_after = retry_after(response.headers());

        let text = response.text().await.map_err(classify)?;
        let body = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };

        Ok(ApiResponse {
            status,
            rate,
            retry_after,
            body,
        })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
        TransportError::Transient(e.to_string())
    } else {
        TransportError::Fatal(e.to_string())
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Parse `x-ratelimit-{limit,remaining,reset}`; all three must be present.
pub(crate) fn rate_info(headers: &HeaderMap) -> Option<RateInfo> {
    let limit = header_u64(headers, "x-ratelimit-limit")?;
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    let reset = header_u64(headers, "x-ratelimit-reset")?;
    Some(RateInfo {
        limit: u32::try_from(limit).unwrap_or(u32::MAX),
        remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
        reset: DateTime::<Utc>::from_timestamp(i64::try_from(reset).ok()?, 0)?,
    })
}

/// `Retry-After` in delta-seconds form (the only form GitHub sends).
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, "retry-after").map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn parses_rate_headers() {
        let map = headers(&[
            ("x-ratelimit-limit", "5000"),
            ("x-ratelimit-remaining", "4987"),
            ("x-ratelimit-reset", "1700000000"),
        ]);
        let info = rate_info(&map).unwrap();
        assert_eq!(info.limit, 5000);
        assert_eq!(info.remaining, 4987);
        assert_eq!(info.reset.timestamp(), 1_700_000_000);
    }

    #[test]
    fn partial_rate_headers_are_ignored() {
        let map = headers(&[("x-ratelimit-remaining", "12")]);
        assert!(rate_info(&map).is_none());
    }

    #[test]
    fn parses_retry_after_seconds() {
        assert_eq!(
            retry_after(&headers(&[("retry-after", "60")])),
            Some(Duration::from_secs(60))
        );
        assert_eq!(retry_after(&headers(&[("retry-after", "soon")])), None);
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let t = GithubTransport::new("https://api.github.com/", "t", Duration::from_secs(5)).unwrap();
        assert_eq!(t.base_url, "https://api.github.com");
    }

    #[test]
    fn rejects_token_with_newline() {
        let result = GithubTransport::new("https://api.github.com", "bad\ntoken", Duration::from_secs(5));
        assert!(matches!(result, Err(TransportError::Fatal(_))));
    }
}
