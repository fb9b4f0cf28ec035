//! Server-side parse failure reports
//!
//! When the server cannot make sense of a request it answers with
//! `op == "parse_fail"` and a `protocol_error` sub-code. Sub-code 1 also carries
//! the server's own JSON parser complaint in `JSON_parse_error`.

use serde_json::Value;
use std::fmt;

use super::message::Parameters;

/// Documented `protocol_error` sub-codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailureCode {
    /// 1: JSON parsing error, invalid start command, wrong IP address.
    InvalidJson,
    /// 2: "message" string missing.
    MissingMessage,
    /// 3: "transmission_id" string missing.
    MissingTransmissionId,
    /// 4: No transmission id value.
    EmptyTransmissionId,
    /// 5: "op" string missing.
    MissingOp,
    /// 6: No operation name.
    EmptyOp,
    /// 7: Operation not recognised.
    UnknownOp,
    /// 8: "parameters" string missing.
    MissingParameters,
    /// 9: Invalid parameter tag or value.
    InvalidParameter,
    /// Anything outside the documented range.
    Other(i64),
}

impl ParseFailureCode {
    /// Map a raw sub-code.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::InvalidJson,
            2 => Self::MissingMessage,
            3 => Self::MissingTransmissionId,
            4 => Self::EmptyTransmissionId,
            5 => Self::MissingOp,
            6 => Self::EmptyOp,
            7 => Self::UnknownOp,
            8 => Self::MissingParameters,
            9 => Self::InvalidParameter,
            other => Self::Other(other),
        }
    }

    /// Raw numeric sub-code.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidJson => 1,
            Self::MissingMessage => 2,
            Self::MissingTransmissionId => 3,
            Self::EmptyTransmissionId => 4,
            Self::MissingOp => 5,
            Self::EmptyOp => 6,
            Self::UnknownOp => 7,
            Self::MissingParameters => 8,
            Self::InvalidParameter => 9,
            Self::Other(code) => *code,
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidJson => "JSON parsing error, invalid start command, wrong IP address.",
            Self::MissingMessage => "\"message\" string missing.",
            Self::MissingTransmissionId => "\"transmission_id\" string missing.",
            Self::EmptyTransmissionId => "No transmission id value.",
            Self::MissingOp => "\"op\" string missing.",
            Self::EmptyOp => "No operation name.",
            Self::UnknownOp => "Operation not recognised.",
            Self::MissingParameters => "\"parameters\" string missing.",
            Self::InvalidParameter => "Invalid parameter tag or value.",
            Self::Other(_) => "Undocumented protocol error.",
        }
    }
}

/// Decoded `parse_fail` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    /// Sub-code.
    pub code: ParseFailureCode,
    /// Parser detail, only sent with sub-code 1.
    pub detail: Option<String>,
}

impl ParseFailure {
    /// Decode from the parameters of a `parse_fail` message.
    pub fn from_parameters(parameters: &Parameters) -> Self {
        let raw = match parameters.get("protocol_error") {
            Some(Value::Array(items)) => items.first().and_then(Value::as_i64),
            Some(other) => other.as_i64(),
            None => None,
        };
        let code = ParseFailureCode::from_code(raw.unwrap_or(0));

        let detail = match code {
            ParseFailureCode::InvalidJson => parameters.get("JSON_parse_error").map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            _ => None,
        };

        Self { code, detail }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code.code(), self.code.description())?;
        if let Some(detail) = &self.detail {
            write!(f, " Error at: {detail}")?;
        }
        Ok(())
    }
}
