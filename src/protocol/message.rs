//! Wire message envelope
//!
//! Every frame on the socket is one JSON object of the form
//! `{"message": {"transmission_id": [N], "op": "<name>", "parameters": {...}}}`.
//! Requests and immediate responses are correlated by `transmission_id`;
//! completion reports are correlated by the `<op>_f_r` naming convention.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Parameter mapping carried by every message.
pub type Parameters = Map<String, Value>;

/// Suffix the server appends to an operation name for its completion report.
pub const REPORT_SUFFIX: &str = "_f_r";

/// Operation tag the server uses to reject a request it could not parse.
pub const PARSE_FAIL_OP: &str = "parse_fail";

/// Per-session request identifier, sent on the wire as a one-element list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransmissionId(pub u64);

impl TransmissionId {
    /// The identifier that follows this one.
    pub fn next(self) -> Self {
        TransmissionId(self.0 + 1)
    }
}

impl fmt::Display for TransmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TransmissionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.0].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TransmissionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            List(Vec<u64>),
            Bare(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::List(ids) => ids
                .first()
                .copied()
                .map(TransmissionId)
                .ok_or_else(|| D::Error::custom("No transmission id value.")),
            Repr::Bare(id) => Ok(TransmissionId(id)),
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id; inbound reports may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmission_id: Option<TransmissionId>,
    /// Operation name.
    pub op: String,
    /// Request arguments or response results.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Parameters,
}

impl Message {
    /// Build an outbound request.
    pub fn request(id: TransmissionId, op: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            transmission_id: Some(id),
            op: op.into(),
            parameters,
        }
    }

    /// Whether this is a completion report (`<op>_f_r`).
    pub fn is_report(&self) -> bool {
        self.op.ends_with(REPORT_SUFFIX)
    }

    /// The operation a report completes, if this is a report.
    pub fn reported_operation(&self) -> Option<&str> {
        self.op.strip_suffix(REPORT_SUFFIX)
    }

    /// Whether the server rejected the request as unparseable.
    pub fn is_parse_failure(&self) -> bool {
        self.op == PARSE_FAIL_OP
    }

    /// Numeric status word, accepting both `0` and `[0]` encodings.
    pub fn status_code(&self) -> Option<i64> {
        status_code(&self.parameters)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Numeric `status` in a parameter map, accepting both `0` and `[0]`.
pub fn status_code(parameters: &Parameters) -> Option<i64> {
    match parameters.get("status")? {
        Value::Array(items) => items.first().and_then(Value::as_i64),
        other => other.as_i64(),
    }
}

/// Name of the report that completes `operation`.
pub fn report_op(operation: &str) -> String {
    format!("{operation}{REPORT_SUFFIX}")
}

/// Outer `{"message": ...}` wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The wrapped message.
    pub message: Message,
}

impl Envelope {
    /// Wrap a message.
    pub fn new(message: Message) -> Self {
        Self { message }
    }

    /// Serialize for the wire.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
