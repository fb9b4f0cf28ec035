//! Capability descriptors and argument binding.
//!
//! Every operation a backend exposes is described by a static [`Capability`]:
//! the wire op it sends, the positional arguments it accepts and how each one
//! lands in the request parameters. Binding validates caller arguments against
//! the descriptor before any network I/O, producing a [`BoundCall`].

use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

use crate::error::{LinkError, LinkResult};
use crate::protocol::{status_code, Parameters, ReportRequest, MAX_REPORT_TIMEOUT};

use super::Reply;

/// Accepted values for one argument.
#[derive(Debug, Clone, Copy)]
pub enum ArgKind {
    /// One of a fixed set of strings.
    Choice(&'static [&'static str]),
    /// One of a fixed set of integers.
    IntChoice(&'static [i64]),
    /// Any finite number.
    Number,
    /// A number in `0..=100`.
    Percent,
    /// Report wait in seconds; `0` (or `null`) sends no report request.
    ReportTimeout,
}

/// Default for an optional argument.
#[derive(Debug, Clone, Copy)]
pub enum ArgDefault {
    /// String default.
    Str(&'static str),
    /// Numeric default.
    Int(i64),
}

impl ArgDefault {
    fn to_value(self) -> Value {
        match self {
            ArgDefault::Str(s) => json!(s),
            ArgDefault::Int(n) => json!(n),
        }
    }
}

impl fmt::Display for ArgDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgDefault::Str(s) => write!(f, "'{s}'"),
            ArgDefault::Int(n) => write!(f, "{n}"),
        }
    }
}

/// Where a bound argument goes in the request.
#[derive(Debug, Clone, Copy)]
pub enum Wire {
    /// `parameters[name] = value`
    Field(&'static str),
    /// `parameters[name] = [value]`
    Wrapped(&'static str),
    /// Not a parameter; sets the completion report wait.
    Report,
}

/// One positional argument.
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    /// Name shown in prototypes and errors.
    pub name: &'static str,
    /// Accepted values.
    pub kind: ArgKind,
    /// Default when omitted; `None` makes the argument required.
    pub default: Option<ArgDefault>,
    /// Placement in the request.
    pub wire: Wire,
}

impl ArgSpec {
    /// Required argument.
    pub const fn required(name: &'static str, kind: ArgKind, wire: Wire) -> Self {
        Self {
            name,
            kind,
            default: None,
            wire,
        }
    }

    /// Optional argument.
    pub const fn optional(
        name: &'static str,
        kind: ArgKind,
        default: ArgDefault,
        wire: Wire,
    ) -> Self {
        Self {
            name,
            kind,
            default: Some(default),
            wire,
        }
    }

    /// Report wait in seconds with the given default.
    pub const fn report_timeout(default_secs: i64) -> Self {
        Self::optional(
            "timeout",
            ArgKind::ReportTimeout,
            ArgDefault::Int(default_secs),
            Wire::Report,
        )
    }
}

/// Constant parameter added to every request of a capability.
#[derive(Debug, Clone, Copy)]
pub enum FixedValue {
    /// JSON `null`.
    Null,
    /// `[n]`
    Wrapped(i64),
}

impl FixedValue {
    fn to_value(self) -> Value {
        match self {
            FixedValue::Null => Value::Null,
            FixedValue::Wrapped(n) => json!([n]),
        }
    }
}

/// Post-response check on the `status` word.
#[derive(Debug, Clone, Copy)]
pub struct StatusCheck {
    /// Error reason when status is not zero.
    pub failure: &'static str,
}

/// What a capability does when invoked.
#[derive(Debug, Clone, Copy)]
pub enum Target {
    /// Send `op` to the server.
    Remote(&'static str),
    /// Answer locally once preconditions hold.
    LocalFlag(bool),
}

/// What the caller gets back from a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    /// The response parameters (and report, if requested).
    Response,
    /// Nothing; the response is checked and dropped.
    Ack,
}

/// Static description of one backend operation.
#[derive(Debug)]
pub struct Capability {
    /// Name callers dispatch on.
    pub name: &'static str,
    /// Wire op or local answer.
    pub target: Target,
    /// Positional arguments.
    pub args: &'static [ArgSpec],
    /// Constant parameters.
    pub fixed: &'static [(&'static str, FixedValue)],
    /// Whether the bridge process must be running first.
    pub needs_bridge: bool,
    /// Optional status check on the response.
    pub status_check: Option<StatusCheck>,
    /// Return shape.
    pub returns: Returns,
}

impl Capability {
    /// Plain remote call without arguments.
    pub const fn remote(name: &'static str, op: &'static str) -> Self {
        Self {
            name,
            target: Target::Remote(op),
            args: &[],
            fixed: &[],
            needs_bridge: false,
            status_check: None,
            returns: Returns::Response,
        }
    }

    /// Call answered locally with `flag`.
    pub const fn local(name: &'static str, flag: bool) -> Self {
        Self {
            target: Target::LocalFlag(flag),
            ..Self::remote(name, name)
        }
    }

    /// Set the positional arguments.
    pub const fn with_args(mut self, args: &'static [ArgSpec]) -> Self {
        self.args = args;
        self
    }

    /// Set constant parameters.
    pub const fn with_fixed(mut self, fixed: &'static [(&'static str, FixedValue)]) -> Self {
        self.fixed = fixed;
        self
    }

    /// Require the bridge process.
    pub const fn needs_bridge(mut self) -> Self {
        self.needs_bridge = true;
        self
    }

    /// Fail with `failure` unless the response status is zero.
    pub const fn check_status(mut self, failure: &'static str) -> Self {
        self.status_check = Some(StatusCheck { failure });
        self
    }

    /// Drop the response and return an acknowledgement.
    pub const fn ack_only(mut self) -> Self {
        self.returns = Returns::Ack;
        self
    }

    /// Whether the capability can wait for a completion report.
    pub fn supports_report(&self) -> bool {
        self.args.iter().any(|a| matches!(a.wire, Wire::Report))
    }

    /// `name(arg, opt=default)`
    pub fn prototype(&self) -> String {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| match a.default {
                Some(default) => format!("{}={}", a.name, default),
                None => a.name.to_string(),
            })
            .collect();
        format!("{}({})", self.name, args.join(", "))
    }

    /// Validate positional `args` and build the call.
    pub fn bind(&'static self, args: &[Value]) -> LinkResult<BoundCall> {
        if args.len() > self.args.len() {
            return Err(self.invalid(format!(
                "takes at most {} argument(s), {} given",
                self.args.len(),
                args.len()
            )));
        }

        let mut parameters = Parameters::new();
        let mut report = None;

        for (index, spec) in self.args.iter().enumerate() {
            let value = match (args.get(index), spec.default) {
                (Some(value), _) => value.clone(),
                (None, Some(default)) => default.to_value(),
                (None, None) => {
                    return Err(self.invalid(format!("missing required argument '{}'", spec.name)))
                }
            };

            match spec.kind {
                ArgKind::ReportTimeout => {
                    report = self.report_wait(spec, &value)?.map(ReportRequest::finished);
                    continue;
                }
                kind => self.check_value(spec, kind, &value)?,
            }

            match spec.wire {
                Wire::Field(name) => {
                    parameters.insert(name.to_string(), value);
                }
                Wire::Wrapped(name) => {
                    parameters.insert(name.to_string(), Value::Array(vec![value]));
                }
                Wire::Report => {}
            }
        }

        for (name, fixed) in self.fixed {
            parameters.insert((*name).to_string(), fixed.to_value());
        }

        let target = match self.target {
            Target::Remote(op) => CallTarget::Remote {
                op,
                parameters,
                report,
            },
            Target::LocalFlag(flag) => CallTarget::Local(Reply::Flag(flag)),
        };

        Ok(BoundCall {
            capability: self,
            target,
        })
    }

    fn check_value(&self, spec: &ArgSpec, kind: ArgKind, value: &Value) -> LinkResult<()> {
        let ok = match kind {
            ArgKind::Choice(choices) => value.as_str().is_some_and(|s| choices.contains(&s)),
            ArgKind::IntChoice(choices) => integral(value).is_some_and(|n| choices.contains(&n)),
            ArgKind::Number => value.as_f64().is_some_and(f64::is_finite),
            ArgKind::Percent => value.as_f64().is_some_and(|p| (0.0..=100.0).contains(&p)),
            ArgKind::ReportTimeout => true,
        };
        if ok {
            return Ok(());
        }

        let expected = match kind {
            ArgKind::Choice(choices) => format!("one of {}", quoted(choices)),
            ArgKind::IntChoice(choices) => format!(
                "one of {}",
                choices.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
            ),
            ArgKind::Number => "a number".to_string(),
            ArgKind::Percent => "a percent between [0,100]".to_string(),
            ArgKind::ReportTimeout => "a number of seconds".to_string(),
        };
        Err(self.invalid(format!("'{}' must be {expected}, got {value}", spec.name)))
    }

    fn report_wait(&self, spec: &ArgSpec, value: &Value) -> LinkResult<Option<Duration>> {
        if value.is_null() || value == &Value::Bool(false) {
            return Ok(None);
        }
        let secs = value
            .as_f64()
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .filter(|wait| *wait <= MAX_REPORT_TIMEOUT)
            .ok_or_else(|| {
                self.invalid(format!(
                    "'{}' must be between 0 and {} seconds, got {value}",
                    spec.name,
                    MAX_REPORT_TIMEOUT.as_secs()
                ))
            })?;
        Ok((!secs.is_zero()).then_some(secs))
    }

    fn invalid(&self, reason: String) -> LinkError {
        LinkError::InvalidArgument {
            operation: self.name.to_string(),
            reason,
        }
    }
}

/// Integer value of `value`, accepting floats with no fractional part.
fn integral(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() <= i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn quoted(choices: &[&str]) -> String {
    choices
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolved action for a bound call.
#[derive(Debug, Clone)]
pub enum CallTarget {
    /// Nothing to send; answer with this reply.
    Local(Reply),
    /// Request to send.
    Remote {
        /// Wire op.
        op: &'static str,
        /// Request parameters, `report` not yet included.
        parameters: Parameters,
        /// Completion report to wait for.
        report: Option<ReportRequest>,
    },
}

/// A capability with validated arguments.
#[derive(Debug, Clone)]
pub struct BoundCall {
    /// The descriptor this call was bound from.
    pub capability: &'static Capability,
    /// What to do.
    pub target: CallTarget,
}

impl BoundCall {
    /// Whether the bridge must be running before the call.
    pub fn needs_bridge(&self) -> bool {
        self.capability.needs_bridge
    }

    /// Apply the capability's status check to a response.
    pub fn check_response(&self, response: &Parameters) -> LinkResult<()> {
        match self.capability.status_check {
            Some(check) if status_code(response) != Some(0) => Err(LinkError::OperationFailed {
                operation: self.capability.name.to_string(),
                reason: check.failure.to_string(),
            }),
            _ => Ok(()),
        }
    }
}
