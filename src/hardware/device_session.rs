//! Device Session
//!
//! One TCP connection to a laser server, with its own transmission counter.
//! The protocol is strictly half-duplex: a session carries at most one request
//! at a time and [`DeviceSession::execute`] takes `&mut self`.
//!
//! A session is only handed out after the `start_link` handshake succeeded.
//! If an `execute` future is dropped while its request is unresolved, the
//! session refuses further requests with [`LinkError::RequestInFlight`], since
//! the orphaned response would otherwise be read as the answer to the next one.

use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::backends::BackendKind;
use crate::config::LinkSettings;
use crate::error::{LinkError, LinkResult};
use crate::error_recovery::{FaultSource, RecoveredFault, RetryPolicy};
use crate::protocol::{
    await_report, Correlator, Envelope, FramedStream, Parameters, ReportExpectation,
    ReportRequest, TransmissionId,
};

/// Handshake operation.
pub const START_LINK_OP: &str = "start_link";

/// Session timing and retry settings
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Address announced in the handshake
    pub client_address: String,
    /// Read deadline for one response
    pub default_timeout: Duration,
    /// TCP connect deadline
    pub connect_timeout: Duration,
    /// Mismatched ids tolerated per request
    pub max_correlation_attempts: u32,
    /// Handshake retry policy
    pub handshake: RetryPolicy,
}

impl From<&LinkSettings> for SessionSettings {
    fn from(link: &LinkSettings) -> Self {
        Self {
            client_address: link.client_address.clone(),
            default_timeout: link.default_timeout(),
            connect_timeout: link.connect_timeout(),
            max_correlation_attempts: link.max_correlation_attempts,
            handshake: RetryPolicy::immediate(link.handshake_attempts),
        }
    }
}

/// The request a session is waiting on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    /// Id sent with the request
    pub transmission_id: TransmissionId,
    /// Operation name
    pub operation: String,
}

/// Result of one executed request.
#[derive(Clone, Debug, PartialEq)]
pub struct Execution {
    /// Parameters of the immediate response
    pub response: Parameters,
    /// Parameters of the completion report, when one was requested
    pub report: Option<Parameters>,
}

/// A connected, handshaken session with one backend server.
#[derive(Debug)]
pub struct DeviceSession<S = TcpStream> {
    kind: BackendKind,
    peer: String,
    stream: FramedStream<S>,
    correlator: Correlator,
    pending: Option<PendingRequest>,
    settings: SessionSettings,
}

impl DeviceSession<TcpStream> {
    /// Connect to `address` and perform the handshake.
    ///
    /// # Errors
    ///
    /// [`LinkError::BackendUnreachable`] if the connection cannot be opened or
    /// every handshake attempt fails, [`LinkError::HandshakeRejected`] if the
    /// server answers with a status other than `"ok"`.
    pub async fn connect(
        kind: BackendKind,
        address: &str,
        settings: SessionSettings,
    ) -> LinkResult<Self> {
        info!(backend = %kind, %address, "Connecting");
        let unreachable = |reason: String| LinkError::BackendUnreachable {
            backend: kind,
            address: address.to_string(),
            reason,
        };

        let socket = tokio::time::timeout(settings.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| unreachable(format!("connect timed out after {:?}", settings.connect_timeout)))?
            .map_err(|err| unreachable(err.to_string()))?;
        socket.set_nodelay(true)?;

        Self::from_stream(kind, address, socket, settings).await
    }
}

impl<S> DeviceSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected stream and perform the handshake.
    pub async fn from_stream(
        kind: BackendKind,
        peer: impl Into<String>,
        io: S,
        settings: SessionSettings,
    ) -> LinkResult<Self> {
        let mut session = Self {
            kind,
            peer: peer.into(),
            stream: FramedStream::new(io, settings.default_timeout),
            correlator: Correlator::new(settings.max_correlation_attempts),
            pending: None,
            settings,
        };
        session.handshake().await?;
        Ok(session)
    }

    async fn handshake(&mut self) -> LinkResult<()> {
        let policy = self.settings.handshake.clone();
        let mut parameters = Parameters::new();
        parameters.insert(
            "ip_address".to_string(),
            json!(self.settings.client_address),
        );

        let mut attempt = 0;
        let execution = loop {
            attempt += 1;
            match self.execute(START_LINK_OP, parameters.clone(), None).await {
                Ok(execution) => break execution,
                Err(err) if policy.should_retry(attempt) => {
                    warn!(backend = %self.kind, attempt, error = %err, "Handshake failed, retrying");
                    policy.backoff().await;
                }
                Err(err) => {
                    return Err(LinkError::BackendUnreachable {
                        backend: self.kind,
                        address: self.peer.clone(),
                        reason: format!("handshake failed after {attempt} attempt(s): {err}"),
                    })
                }
            }
        };

        match execution.response.get("status") {
            Some(Value::String(status)) if status == "ok" => {
                info!(backend = %self.kind, peer = %self.peer, "Link established");
                Ok(())
            }
            _ => Err(LinkError::HandshakeRejected {
                backend: self.kind,
                response: Value::Object(execution.response).to_string(),
            }),
        }
    }

    /// Send one request and wait for its response, and its report if asked.
    ///
    /// Stale bytes already received are discarded first. When `report` is
    /// given the request carries `"report": <name>` and, once the response
    /// arrived, the `<op>_f_r` report is awaited within `report.timeout`.
    pub async fn execute(
        &mut self,
        operation: &str,
        mut parameters: Parameters,
        report: Option<&ReportRequest>,
    ) -> LinkResult<Execution> {
        if let Some(pending) = &self.pending {
            return Err(LinkError::RequestInFlight {
                id: pending.transmission_id,
                operation: pending.operation.clone(),
            });
        }

        self.stream.drain_stale()?;

        if let Some(report) = report {
            parameters.insert("report".to_string(), json!(report.name));
        }
        let request = self.correlator.next_request(operation, parameters);
        self.pending = Some(PendingRequest {
            transmission_id: self.correlator.last_id(),
            operation: operation.to_string(),
        });

        let result = self.exchange(&request, report).await;
        self.pending = None;
        result
    }

    async fn exchange(
        &mut self,
        request: &Envelope,
        report: Option<&ReportRequest>,
    ) -> LinkResult<Execution> {
        self.stream.send(request).await?;
        let response = self.correlator.await_match(&mut self.stream, request).await?;

        let report = match report {
            Some(report) => {
                let expectation = ReportExpectation::new(request.message.op.clone(), report.timeout);
                Some(await_report(&mut self.stream, &expectation).await?.parameters)
            }
            None => None,
        };

        Ok(Execution {
            response: response.parameters,
            report,
        })
    }

    /// Close the connection.
    ///
    /// Consumes the session, so the socket is released exactly once. A failed
    /// shutdown is returned as a recovered fault.
    pub async fn close(mut self) -> Vec<RecoveredFault> {
        debug!(backend = %self.kind, "Closing TCP socket");
        let mut faults = Vec::new();
        if let Err(err) = self.stream.shutdown().await {
            warn!(backend = %self.kind, error = %err, "Socket shutdown failed");
            faults.push(RecoveredFault::new(
                FaultSource::SessionTeardown,
                format!("{} socket shutdown: {err}", self.kind),
            ));
        }
        info!(backend = %self.kind, peer = %self.peer, "Session closed");
        faults
    }

    /// Backend this session talks to.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Remote address.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Id of the most recently sent request.
    pub fn last_transmission_id(&self) -> TransmissionId {
        self.correlator.last_id()
    }

    /// The unresolved request, if a previous call was abandoned mid-flight.
    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }
}
