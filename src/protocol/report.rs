//! Completion report waiter
//!
//! Long-running operations answer twice: an immediate acknowledgement correlated
//! by transmission id, then a report named `<op>_f_r` once the action finishes.
//! Reports are matched by name only. A wrong report means the remote state
//! machine is out of step, so it is surfaced rather than skipped.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::debug;

use super::framed::FramedStream;
use super::message::{report_op, Message};
use crate::error::{LinkError, LinkResult};

/// Report name the server documents for completion reports.
pub const DEFAULT_REPORT_NAME: &str = "finished";

/// Default wait for a completion report.
pub const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest accepted wait for a completion report.
pub const MAX_REPORT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Caller's request for a completion report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    /// Value sent in the request's `report` parameter.
    pub name: String,
    /// How long to wait for the report once the response has arrived.
    pub timeout: Duration,
}

impl ReportRequest {
    /// Request the `finished` report with the given wait.
    pub fn finished(timeout: Duration) -> Self {
        Self {
            name: DEFAULT_REPORT_NAME.to_string(),
            timeout,
        }
    }
}

impl Default for ReportRequest {
    fn default() -> Self {
        Self::finished(DEFAULT_REPORT_TIMEOUT)
    }
}

/// A report the session is waiting for.
#[derive(Debug, Clone)]
pub struct ReportExpectation {
    /// Operation whose completion is awaited.
    pub operation: String,
    /// Instant after which the wait fails.
    pub deadline: Instant,
}

impl ReportExpectation {
    /// Expect the report for `operation` within `timeout` from now.
    ///
    /// `timeout` is clamped to [`MAX_REPORT_TIMEOUT`].
    pub fn new(operation: impl Into<String>, timeout: Duration) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout.min(MAX_REPORT_TIMEOUT))
            .unwrap_or(now);
        Self {
            operation: operation.into(),
            deadline,
        }
    }

    /// The `op` the report will carry.
    pub fn expected_op(&self) -> String {
        report_op(&self.operation)
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Wait for the report described by `expectation`.
///
/// The stream's read deadline is overridden for this wait only and restored on
/// every exit path. The transmission counter is not touched.
pub async fn await_report<S>(
    stream: &mut FramedStream<S>,
    expectation: &ReportExpectation,
) -> LinkResult<Message>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let expected = expectation.expected_op();
    let timeout = expectation.remaining();
    debug!(report = %expected, ?timeout, "Waiting for report");

    let mut scoped = stream.scoped_timeout(timeout);
    let report = scoped
        .recv()
        .await?
        .ok_or_else(|| LinkError::ReportTimeout {
            expected: expected.clone(),
            timeout,
        })?;

    if report.op != expected {
        return Err(LinkError::UnexpectedReport {
            expected,
            received: report.to_string(),
        });
    }

    debug!(report = %report.op, "Report received");
    Ok(report)
}
