//! Backend kinds and live backends.
//!
//! A backend is one of the two laser servers. Each kind has a static capability
//! table; a live [`Backend`] pairs a handshaken [`DeviceSession`] with the bridge
//! process supervisor where the kind needs one.

pub mod capabilities;
pub mod emm;
pub mod solstis;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::config::{host_of, LinkConfig};
use crate::error::{LinkError, LinkResult};
use crate::error_recovery::RecoveredFault;
use crate::hardware::{BridgeProcess, DeviceSession, Execution, SessionSettings};
use crate::protocol::Parameters;

pub use capabilities::{BoundCall, CallTarget, Capability, Returns};

/// The two mutually exclusive laser servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// EMM, wire name `"EMM"`.
    #[serde(rename = "EMM")]
    Emm,
    /// SolsTiS, wire name `"solstis"`.
    #[serde(rename = "solstis")]
    Solstis,
}

impl BackendKind {
    /// Every kind, in help order.
    pub const ALL: [BackendKind; 2] = [BackendKind::Emm, BackendKind::Solstis];

    /// Name used on the dispatch surface (case-sensitive).
    pub fn wire_name(self) -> &'static str {
        match self {
            BackendKind::Emm => "EMM",
            BackendKind::Solstis => "solstis",
        }
    }

    /// Static capability table.
    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            BackendKind::Emm => emm::CAPABILITIES,
            BackendKind::Solstis => solstis::CAPABILITIES,
        }
    }

    /// Exact lookup of one capability.
    pub fn capability(self, name: &str) -> Option<&'static Capability> {
        self.capabilities().iter().find(|c| c.name == name)
    }

    /// Names of every capability.
    pub fn capability_names(self) -> Vec<&'static str> {
        self.capabilities().iter().map(|c| c.name).collect()
    }

    /// Look up `operation` and bind `args` to it.
    pub fn bind(self, operation: &str, args: &[Value]) -> LinkResult<BoundCall> {
        self.capability(operation)
            .ok_or_else(|| LinkError::UnknownOperation {
                operation: operation.to_string(),
                backend: self,
                available: self.capability_names(),
            })?
            .bind(args)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for BackendKind {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMM" => Ok(BackendKind::Emm),
            "solstis" => Ok(BackendKind::Solstis),
            other => Err(LinkError::UnknownBackend(other.to_string())),
        }
    }
}

/// What an invocation hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Completed, nothing to return.
    Ack,
    /// Local answer.
    Flag(bool),
    /// Immediate response parameters.
    Response(Parameters),
    /// Immediate response plus completion report.
    WithReport {
        /// Immediate response parameters
        response: Parameters,
        /// Report parameters
        report: Parameters,
    },
}

impl Reply {
    /// JSON form: `null`, a bool, the response object or `[response, report]`.
    pub fn into_value(self) -> Value {
        match self {
            Reply::Ack => Value::Null,
            Reply::Flag(flag) => Value::Bool(flag),
            Reply::Response(response) => Value::Object(response),
            Reply::WithReport { response, report } => json!([response, report]),
        }
    }
}

impl From<Execution> for Reply {
    fn from(execution: Execution) -> Self {
        match execution.report {
            Some(report) => Reply::WithReport {
                response: execution.response,
                report,
            },
            None => Reply::Response(execution.response),
        }
    }
}

/// A live backend: a handshaken session plus its bridge supervisor, if any.
#[derive(Debug)]
pub struct Backend {
    kind: BackendKind,
    session: DeviceSession,
    bridge: Option<BridgeProcess>,
}

impl Backend {
    /// Connect and handshake with the server configured for `kind`.
    pub async fn connect(kind: BackendKind, config: &LinkConfig) -> LinkResult<Self> {
        let address = config
            .backends
            .address(kind)
            .ok_or(LinkError::BackendUnconfigured(kind))?;

        let session =
            DeviceSession::connect(kind, address, SessionSettings::from(&config.link)).await?;

        let bridge = match kind {
            BackendKind::Emm => config
                .bridge
                .clone()
                .map(|bridge| BridgeProcess::new(bridge, host_of(address))),
            BackendKind::Solstis => None,
        };

        Ok(Self {
            kind,
            session,
            bridge,
        })
    }

    /// Backend kind.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// The underlying session.
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Run a bound call. Bridge relaunches are appended to `faults`.
    pub async fn invoke(
        &mut self,
        call: &BoundCall,
        faults: &mut Vec<RecoveredFault>,
    ) -> LinkResult<Reply> {
        if call.needs_bridge() {
            let bridge = self.bridge.as_mut().ok_or_else(|| {
                LinkError::Bridge(format!(
                    "'{}' needs the bridge process but none is configured",
                    call.capability.name
                ))
            })?;
            if let Some(fault) = bridge.ensure_running().await? {
                faults.push(fault);
            }
        }

        match &call.target {
            CallTarget::Local(reply) => Ok(reply.clone()),
            CallTarget::Remote {
                op,
                parameters,
                report,
            } => {
                let execution = self
                    .session
                    .execute(op, parameters.clone(), report.as_ref())
                    .await?;
                call.check_response(&execution.response)?;
                match call.capability.returns {
                    Returns::Ack => Ok(Reply::Ack),
                    Returns::Response => Ok(execution.into()),
                }
            }
        }
    }

    /// Stop the bridge and close the session.
    ///
    /// The socket is closed even when stopping the bridge fails; every failure
    /// is returned as a recovered fault.
    pub async fn shutdown(mut self) -> Vec<RecoveredFault> {
        info!(backend = %self.kind, "Shutting down backend");
        let mut faults = Vec::new();
        if let Some(bridge) = self.bridge.as_mut() {
            faults.extend(bridge.shutdown().await);
        }
        faults.extend(self.session.close().await);
        faults
    }
}
