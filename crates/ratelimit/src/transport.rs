//! The remote service capability the access layer wraps.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;

use crate::error::TransportError;

/// An outbound API request, relative to the service's base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path beginning with `/`, e.g. `/repos/rust-lang/rust`.
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    /// A POST with a JSON body. Serialization failures become a `null` body
    /// which the service rejects with a 4xx, so callers see a normal error.
    pub fn post(path: impl Into<String>, body: &impl Serialize) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(serde_json::to_value(body).unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// Consumption metadata the service attaches to every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateInfo {
    pub limit: u32,
    pub remaining: u32,
    /// When the current window ends and `remaining` resets to `limit`.
    pub reset: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub rate: Option<RateInfo>,
    /// Server-suggested wait before retrying (`Retry-After`).
    pub retry_after: Option<Duration>,
    /// Parsed JSON body; `Null` when empty, a JSON string when not JSON.
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// The service's `message` field, or the raw body when absent.
    pub fn message(&self) -> String {
        match self.body.get("message").and_then(|m| m.as_str()) {
            Some(msg) => msg.to_string(),
            None => match &self.body {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }

    /// Whether a 403/429 is a throttling signal rather than a permission
    /// problem.
    pub fn is_throttled(&self) -> bool {
        match self.status {
            429 => true,
            403 => {
                self.retry_after.is_some()
                    || self.rate.is_some_and(|r| r.remaining == 0)
                    || self.message().to_lowercase().contains("rate limit")
            }
            _ => false,
        }
    }

    /// Throttled because the primary budget is spent, as opposed to a
    /// secondary (abuse-control) limit.
    pub fn is_budget_exhausted(&self) -> bool {
        self.is_throttled() && self.retry_after.is_none() && self.rate.is_some_and(|r| r.remaining == 0)
    }
}

/// Issues one request against the remote service, without any retry or
/// rate-limit handling.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: serde_json::Value) -> ApiResponse {
        ApiResponse {
            status,
            rate: None,
            retry_after: None,
            body,
        }
    }

    #[test]
    fn plain_forbidden_is_not_throttling() {
        let r = response(403, json!({"message": "Resource not accessible by integration"}));
        assert!(!r.is_throttled());
    }

    #[test]
    fn secondary_limit_message_is_throttling() {
        let r = response(
            403,
            json!({"message": "You have exceeded a secondary rate limit. Please wait."}),
        );
        assert!(r.is_throttled());
        assert!(!r.is_budget_exhausted());
    }

    #[test]
    fn zero_remaining_is_budget_exhaustion() {
        let mut r = response(403, json!({"message": "API rate limit exceeded"}));
        r.rate = Some(RateInfo {
            limit: 5000,
            remaining: 0,
            reset: Utc::now(),
        });
        assert!(r.is_budget_exhausted());

        r.retry_after = Some(Duration::from_secs(10));
        assert!(!r.is_budget_exhausted());
    }

    #[test]
    fn message_falls_back_to_body() {
        assert_eq!(response(500, json!("upstream down")).message(), "upstream down");
        assert_eq!(response(500, serde_json::Value::Null).message(), "");
    }
}
