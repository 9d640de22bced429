//! The server-advertised call allowance.

use chrono::{DateTime, Utc};
use tokio::time::{Duration, Instant};

use crate::transport::RateInfo;

/// GitHub's allowance for an authenticated token, used until the first
/// response reports the real one.
pub const DEFAULT_LIMIT: u32 = 5000;

/// Remaining calls in the current window and when the window ends.
///
/// Pure bookkeeping: the access layer owns one behind a mutex and is the only
/// thing that mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Budget {
    pub limit: u32,
    pub remaining: u32,
    /// Monotonic deadline for the current window, if one is known.
    pub reset_at: Option<Instant>,
    /// The server's wall-clock reset for the current window. Used to tell a
    /// new window from a late response about the old one.
    window: Option<DateTime<Utc>>,
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl Budget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            remaining: limit,
            reset_at: None,
            window: None,
        }
    }

    /// Take one unit. On failure returns the instant the caller has to wait
    /// for before trying again.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Instant> {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(());
        }
        match self.reset_at {
            Some(reset_at) if now < reset_at => Err(reset_at),
            _ => {
                // Window rolled over; the next response will correct this.
                self.remaining = self.limit.saturating_sub(1);
                self.reset_at = None;
                self.window = None;
                Ok(())
            }
        }
    }

    /// Fold a response's rate metadata into the budget.
    ///
    /// A later reset time starts a new window and the server's numbers are
    /// taken as-is. Within the same window `remaining` only goes down, so
    /// concurrent responses arriving out of order cannot inflate it.
    pub fn observe(&mut self, info: &RateInfo, now: Instant, now_utc: DateTime<Utc>) {
        match self.window {
            Some(window) if info.reset < window => return,
            Some(window) if info.reset == window => {
                self.remaining = self.remaining.min(info.remaining);
            }
            _ => {
                self.limit = info.limit;
                self.remaining = info.remaining;
                self.window = Some(info.reset);
            }
        }
        self.reset_at = Some(now + until(info.reset, now_utc));
    }

    /// The server refused a call for lack of budget: nothing is left until
    /// `reset`, which is never less than `min_wait` away.
    pub fn exhaust(&mut self, reset: DateTime<Utc>, now: Instant, now_utc: DateTime<Utc>, min_wait: Duration) {
        self.remaining = 0;
        self.window = Some(self.window.map_or(reset, |w| w.max(reset)));
        self.reset_at = Some(now + until(reset, now_utc).max(min_wait));
    }
}

fn until(reset: DateTime<Utc>, now_utc: DateTime<Utc>) -> Duration {
    (reset - now_utc).to_std().unwrap_or(Duration::ZERO)
}
