//! Retry policies and recovered-fault records.
//
// A recovered fault is something that went wrong during teardown or helper
// supervision, was handled, and must not be raised to the caller. They are
// logged where they happen and handed back so the arbitrator can keep a record.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` (at least one) and no delay.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_delay: Duration::ZERO,
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Sleep for the backoff delay, if any.
    pub async fn backoff(&self) {
        if !self.backoff_delay.is_zero() {
            tokio::time::sleep(self.backoff_delay).await;
        }
    }
}

/// Where a recovered fault came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultSource {
    /// The bridge process had exited and was launched again.
    BridgeRelaunch,
    /// Stopping the bridge process failed or it had already exited.
    BridgeShutdown,
    /// Closing a device session socket failed.
    SessionTeardown,
}

impl fmt::Display for FaultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultSource::BridgeRelaunch => "bridge relaunch",
            FaultSource::BridgeShutdown => "bridge shutdown",
            FaultSource::SessionTeardown => "session teardown",
        };
        f.write_str(name)
    }
}

/// A fault that was handled and logged rather than raised.
#[derive(Clone, Debug)]
pub struct RecoveredFault {
    /// Origin of the fault.
    pub source: FaultSource,
    /// Free-form description.
    pub detail: String,
    /// When it was recorded.
    pub at: DateTime<Utc>,
}

impl RecoveredFault {
    /// Record a fault now.
    pub fn new(source: FaultSource, detail: impl Into<String>) -> Self {
        Self {
            source,
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for RecoveredFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.at.to_rfc3339(), self.source, self.detail)
    }
}
