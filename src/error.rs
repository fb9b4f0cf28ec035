//! Custom error types for the link.
//!
//! This module defines the primary error type, `LinkError`, for the whole crate.
//! Using the `thiserror` crate, it provides a single place to describe every fault
//! that can surface from the wire protocol, the device sessions and the arbitrator.
//!
//! ## Error Hierarchy
//!
//! - **Transport**: `Disconnected`, `Framing`, `Io`. The socket is unusable after any
//!   of these (see [`LinkError::is_session_fatal`]), as it is after `RequestInFlight`.
//! - **Protocol**: `RemoteParse`, `CorrelationExhausted`, `UnexpectedReport`,
//!   `ResponseTimeout`, `ReportTimeout`, `MalformedMessage`. They abort the call in
//!   flight; the session stays usable for the next request.
//! - **Session setup**: `HandshakeRejected`, `BackendUnreachable`, `Bridge`.
//! - **Local validation**: `OwnershipConflict`, `BackendUnconfigured`,
//!   `UnknownBackend`, `UnknownOperation`, `InvalidArgument`. No request is sent
//!   for any of these.
//! - **Device status**: `OperationFailed`, a response that arrived but reported a
//!   failing status word.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::backends::BackendKind;
use crate::config::ConfigError;
use crate::protocol::{ParseFailure, TransmissionId};

/// Convenience alias for results using the link error type.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum LinkError {
    #[error("Connection closed by remote with {pending_bytes} unparsed bytes buffered")]
    Disconnected { pending_bytes: usize },

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Remote rejected request ({failure}); original: {original}")]
    RemoteParse {
        failure: ParseFailure,
        original: String,
    },

    #[error("No response with transmission id {expected} after {attempts} attempts (last seen: {last_seen})")]
    CorrelationExhausted {
        expected: TransmissionId,
        attempts: u32,
        last_seen: String,
    },

    #[error("Timed out after {timeout:?} waiting for response to '{operation}'")]
    ResponseTimeout {
        operation: String,
        timeout: std::time::Duration,
    },

    #[error("Timed out after {timeout:?} waiting for report '{expected}'")]
    ReportTimeout {
        expected: String,
        timeout: std::time::Duration,
    },

    #[error("Failed to receive report '{expected}', instead received: {received}")]
    UnexpectedReport { expected: String, received: String },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Request {id} ('{operation}') never resolved; session is desynchronized")]
    RequestInFlight {
        id: TransmissionId,
        operation: String,
    },

    #[error("Handshake rejected by {backend}: {response}")]
    HandshakeRejected {
        backend: BackendKind,
        response: String,
    },

    #[error("{backend} unreachable at {address}: {reason}")]
    BackendUnreachable {
        backend: BackendKind,
        address: String,
        reason: String,
    },

    #[error("Bridge process error: {0}")]
    Bridge(String),

    #[error("Another client ('{holder}') was using the laser (last call: {since})")]
    OwnershipConflict {
        holder: String,
        since: DateTime<Utc>,
    },

    #[error("\"{0}\" is not configured with an address. Can't initialize.")]
    BackendUnconfigured(BackendKind),

    #[error("Unknown backend '{0}'. Must be one of (case matters): \"EMM\", \"solstis\"")]
    UnknownBackend(String),

    #[error("Function \"{operation}\" not found in laser \"{backend}\". Available: {}", .available.join(", "))]
    UnknownOperation {
        operation: String,
        backend: BackendKind,
        available: Vec<&'static str>,
    },

    #[error("Invalid argument for '{operation}': {reason}")]
    InvalidArgument { operation: String, reason: String },

    #[error("'{operation}' failed: {reason}")]
    OperationFailed { operation: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkError {
    /// Whether the underlying socket can no longer carry requests.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::Disconnected { .. }
                | LinkError::Framing(_)
                | LinkError::Io(_)
                | LinkError::RequestInFlight { .. }
        )
    }

    /// Whether the fault was raised by local validation, before any request was sent.
    pub fn is_local_validation(&self) -> bool {
        matches!(
            self,
            LinkError::OwnershipConflict { .. }
                | LinkError::BackendUnconfigured(_)
                | LinkError::UnknownBackend(_)
                | LinkError::UnknownOperation { .. }
                | LinkError::InvalidArgument { .. }
        )
    }
}
