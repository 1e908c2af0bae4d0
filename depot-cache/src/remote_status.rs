//! Remote availability tracking
//!
//! Remembers the outcome of the last availability probe of a proxy's remote
//! and for how long it may be trusted. While the repository is auto-blocked
//! the retain time grows along a Fibonacci sequence (step, step, 2·step,
//! 3·step, 5·step, ...) capped at one hour; otherwise it is constant.

use depot_core::ProxyMode;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Retain time outside auto-block.
pub const DEFAULT_REMOTE_STATUS_RETAIN: Duration = Duration::from_secs(5 * 60);

/// Upper bound for the growing retain time while auto-blocked.
pub const MAX_AUTO_BLOCK_RETAIN: Duration = Duration::from_secs(60 * 60);

/// Last known remote availability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    #[default]
    Unknown,
    Available,
    Unavailable { reason: String },
}

impl RemoteStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, RemoteStatus::Available)
    }
}

/// Fibonacci multiples of a base step.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FibonacciSequence {
    step: Duration,
    current: u32,
    next: u32,
}

impl FibonacciSequence {
    fn new(step: Duration) -> Self {
        Self {
            step,
            current: 1,
            next: 1,
        }
    }

    fn peek(&self) -> Duration {
        self.step.saturating_mul(self.current)
    }

    fn advance(&mut self) -> Duration {
        let following = self.current.saturating_add(self.next);
        self.current = self.next;
        self.next = following;
        self.peek()
    }
}

#[derive(Debug)]
struct StatusInner {
    status: RemoteStatus,
    checked_at: Option<Instant>,
    consecutive_failures: u32,
    /// Present only while auto-blocked.
    backoff: Option<FibonacciSequence>,
}

/// Per-repository remote status.
#[derive(Debug)]
pub struct RemoteStatusTracker {
    retain_step: Duration,
    inner: Mutex<StatusInner>,
}

impl RemoteStatusTracker {
    /// # Arguments
    /// * `retain_step` - First retain time once auto-blocked, usually twice
    ///   the connection timeout
    pub fn new(retain_step: Duration) -> Self {
        Self {
            retain_step,
            inner: Mutex::new(StatusInner {
                status: RemoteStatus::Unknown,
                checked_at: None,
                consecutive_failures: 0,
                backoff: None,
            }),
        }
    }

    pub fn status(&self) -> RemoteStatus {
        self.lock().status.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// How long the current status may be trusted.
    pub fn retain_time(&self) -> Duration {
        Self::retain_of(&self.lock())
    }

    /// True when the status is unknown or older than its retain time.
    pub fn needs_check(&self, now: Instant) -> bool {
        let inner = self.lock();
        match (&inner.status, inner.checked_at) {
            (RemoteStatus::Unknown, _) | (_, None) => true,
            (_, Some(checked_at)) => {
                now.saturating_duration_since(checked_at) >= Self::retain_of(&inner)
            }
        }
    }

    /// Forget the last result so the next request probes again.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.status = RemoteStatus::Unknown;
        inner.checked_at = None;
    }

    pub fn record_available(&self, now: Instant) {
        let mut inner = self.lock();
        inner.status = RemoteStatus::Available;
        inner.checked_at = Some(now);
        inner.consecutive_failures = 0;
    }

    /// Record a failed probe.
    ///
    /// # Returns
    /// The number of consecutive failures including this one.
    pub fn record_unavailable(&self, reason: impl Into<String>, now: Instant) -> u32 {
        let mut inner = self.lock();
        inner.status = RemoteStatus::Unavailable {
            reason: reason.into(),
        };
        inner.checked_at = Some(now);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if let Some(backoff) = inner.backoff.as_mut() {
            if backoff.peek() <= MAX_AUTO_BLOCK_RETAIN {
                backoff.advance();
            }
        }
        inner.consecutive_failures
    }

    /// Follow a proxy mode change: entering auto-block starts the growing
    /// retain time, any other mode restores the constant one.
    pub fn on_mode_changed(&self, mode: ProxyMode) {
        let mut inner = self.lock();
        match mode {
            ProxyMode::BlockedAuto => {
                if inner.backoff.is_none() {
                    inner.backoff = Some(FibonacciSequence::new(self.retain_step));
                }
            }
            _ => inner.backoff = None,
        }
    }

    fn retain_of(inner: &StatusInner) -> Duration {
        inner
            .backoff
            .as_ref()
            .map(|backoff| backoff.peek().min(MAX_AUTO_BLOCK_RETAIN))
            .unwrap_or(DEFAULT_REMOTE_STATUS_RETAIN)
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
