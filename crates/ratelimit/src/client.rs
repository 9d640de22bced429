//! The rate-limited client every outbound call goes through.
//!
//! [`RateLimitedClient::call`] performs the full lifecycle of one request:
//! 1. Take a unit from the shared [`Budget`], sleeping until the window
//!    resets if none is left
//! 2. Send through the [`Transport`]
//! 3. Fold the response's rate metadata back into the budget
//! 4. Retry throttled and transient failures with bounded backoff

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use vetbot_core::RateLimitConfig;

use crate::budget::Budget;
use crate::error::{AccessError, TransportError};
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Floor on the wait after the server reports an exhausted budget, so a
/// reset time already in the past cannot turn into a hot retry loop.
const MIN_RESET_WAIT: Duration = Duration::from_secs(1);

/// Shared, reentrant access to the remote service.
///
/// Safe to use from any number of tasks at once: the budget sits behind a
/// single mutex and a unit is taken in the same critical section that checks
/// it, so concurrent callers can never overshoot the allowance.
pub struct RateLimitedClient {
    transport: Arc<dyn Transport>,
    budget: Mutex<Budget>,
    config: RateLimitConfig,
    calls: AtomicU64,
}

impl RateLimitedClient {
    pub fn new(transport: Arc<dyn Transport>, config: RateLimitConfig) -> Self {
        Self::with_budget(transport, config, Budget::default())
    }

    /// Start from a known budget instead of the default allowance.
    pub fn with_budget(transport: Arc<dyn Transport>, config: RateLimitConfig, budget: Budget) -> Self {
        Self {
            transport,
            budget: Mutex::new(budget),
            config,
            calls: AtomicU64::new(0),
        }
    }

    /// Fetch the current allowance from `/rate_limit` (which does not count
    /// against it) and seed the budget. Fails fast on a bad credential.
    pub async fn prime(&self) -> Result<(), AccessError> {
        let response = self.transport.send(&ApiRequest::get("/rate_limit")).await?;
        self.calls.fetch_add(1, Ordering::Relaxed);

        if response.status == 401 {
            return Err(AccessError::Unauthorized {
                message: response.message(),
            });
        }
        if let Some(rate) = response.rate {
            self.budget
                .lock()
                .await
                .observe(&rate, Instant::now(), Utc::now());
            info!(
                limit = rate.limit,
                remaining = rate.remaining,
                reset = %rate.reset,
                "rate budget primed"
            );
        }
        Ok(())
    }

    /// Issue `request`, honouring the budget and retrying throttled or
    /// transient failures up to the configured number of attempts.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse, AccessError> {
        let mut attempt: u32 = 1;

        loop {
            self.acquire(&request).await;
            self.calls.fetch_add(1, Ordering::Relaxed);

            let response = match self.transport.send(&request).await {
                Ok(response) => response,
                Err(TransportError::Transient(msg)) => {
                    self.retry_or_give_up(&request, &mut attempt, None, msg).await?;
                    continue;
                }
                Err(e) => {
                    error!(method = %request.method, path = %request.path, error = %e, "request failed");
                    return Err(e.into());
                }
            };

            if let Some(rate) = response.rate {
                self.budget
                    .lock()
                    .await
                    .observe(&rate, Instant::now(), Utc::now());
            }

            if response.is_success() {
                debug!(
                    method = %request.method,
                    path = %request.path,
                    status = response.status,
                    "request completed"
                );
                return Ok(response);
            }

            if response.status == 401 {
                error!(path = %request.path, "credential rejected");
                return Err(AccessError::Unauthorized {
                    message: response.message(),
                });
            }

            if response.is_budget_exhausted() {
                if let Some(rate) = response.rate {
                    self.budget
                        .lock()
                        .await
                        .exhaust(rate.reset, Instant::now(), Utc::now(), MIN_RESET_WAIT);
                }
                warn!(
                    path = %request.path,
                    "server reports rate budget exhausted, retrying after reset"
                );
                continue;
            }

            if response.is_throttled() {
                warn!(
                    path = %request.path,
                    attempt,
                    message = %response.message(),
                    "secondary rate limit hit"
                );
                if attempt >= self.config.max_attempts {
                    return Err(AccessError::Throttled { attempts: attempt });
                }
                let wait = response
                    .retry_after
                    .unwrap_or_else(|| self.backoff(attempt));
                self.wait(&request, attempt, wait).await;
                attempt += 1;
                continue;
            }

            if response.status >= 500 {
                let msg = format!("status {}: {}", response.status, response.message());
                self.retry_or_give_up(&request, &mut attempt, response.retry_after, msg)
                    .await?;
                continue;
            }

            return Err(AccessError::Status {
                status: response.status,
                message: response.message(),
            });
        }
    }

    /// [`call`](Self::call) and decode the JSON body.
    pub async fn call_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, AccessError> {
        let response = self.call(request).await?;
        serde_json::from_value(response.body).map_err(|e| AccessError::Decode(e.to_string()))
    }

    /// Snapshot of the current budget.
    pub async fn budget(&self) -> Budget {
        self.budget.lock().await.clone()
    }

    /// Number of requests handed to the transport so far, retries included.
    pub fn calls_issued(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Block the calling task until a unit of budget is available.
    async fn acquire(&self, request: &ApiRequest) {
        loop {
            let wait_until = {
                let mut budget = self.budget.lock().await;
                match budget.try_acquire(Instant::now()) {
                    Ok(()) => return,
                    Err(reset_at) => reset_at,
                }
            };
            let wait = wait_until.saturating_duration_since(Instant::now());
            warn!(
                path = %request.path,
                wait_secs = wait.as_secs_f64(),
                "rate budget exhausted, waiting for reset"
            );
            tokio::time::sleep_until(wait_until).await;
        }
    }

    async fn retry_or_give_up(
        &self,
        request: &ApiRequest,
        attempt: &mut u32,
        suggested: Option<Duration>,
        last: String,
    ) -> Result<(), AccessError> {
        if *attempt >= self.config.max_attempts {
            error!(
                method = %request.method,
                path = %request.path,
                attempts = *attempt,
                error = %last,
                "giving up on request"
            );
            return Err(AccessError::RetriesExhausted {
                attempts: *attempt,
                last,
            });
        }
        warn!(path = %request.path, attempt = *attempt, error = %last, "transient failure");
        let wait = suggested.unwrap_or_else(|| self.backoff(*attempt));
        self.wait(request, *attempt, wait).await;
        *attempt += 1;
        Ok(())
    }

    async fn wait(&self, request: &ApiRequest, attempt: u32, wait: Duration) {
        info!(
            path = %request.path,
            attempt,
            wait_ms = wait.as_millis() as u64,
            "backing off before retry"
        );
        tokio::time::sleep(wait).await;
    }

    /// `base * 2^(attempt-1)`, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1).min(20));
        let ms = self.config.base_backoff_ms.saturating_mul(factor);
        Duration::from_millis(ms).min(Duration::from_secs(self.config.max_backoff_secs))
    }
}
