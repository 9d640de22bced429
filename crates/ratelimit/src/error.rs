//! Access layer error types.

use thiserror::Error;

/// Failure of a single request at the transport level.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection reset, timeout, truncated body: worth retrying.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// The request can never succeed as built.
    #[error("transport error: {0}")]
    Fatal(String),
}

/// What a caller of [`crate::RateLimitedClient::call`] can get back.
///
/// Budget exhaustion never appears here: it is waited out.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The credential was rejected. No further call can succeed.
    #[error("authentication failed: {message}")]
    Unauthorized { message: String },

    #[error("still throttled after {attempts} attempts")]
    Throttled { attempts: u32 },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl AccessError {
    /// True when the whole process should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AccessError::Unauthorized { .. })
    }

    /// True when the call never got a definitive answer: throttling that
    /// outlasted the retries, exhausted 5xx or transport retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AccessError::Throttled { .. }
                | AccessError::RetriesExhausted { .. }
                | AccessError::Transport(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AccessError::Status { status: 404, .. })
    }
}
