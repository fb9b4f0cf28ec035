//! Backend Arbitrator
//!
//! Exposes both laser servers behind one exclusive-access facade. At most one
//! backend session is alive at a time: dispatching to the other kind tears the
//! current session down and opens a fresh one. Access is leased to a single
//! client; anyone else is refused until the holder releases the lease or it is
//! force-evicted.
//!
//! # Design
//!
//! - Ownership, backend name and configuration are validated before any
//!   network I/O. The operation and its arguments are checked against the
//!   live backend's table after a swap, before anything is sent.
//! - A backend is only swapped in after its handshake succeeded.
//! - Teardown never raises. Its faults, like bridge relaunches, are kept in a
//!   recovered-fault log.
//! - A session left unusable by a transport failure is torn down, and the next
//!   call reconnects.
//!
//! # Example
//!
//! ```no_run
//! use solstis_link::{Arbitrator, LinkConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> solstis_link::LinkResult<()> {
//! let mut arbitrator = Arbitrator::new(LinkConfig::load()?);
//! let reply = arbitrator
//!     .dispatch("10.0.0.7", "laser_control", &[json!("EMM"), json!("on")])
//!     .await?;
//! println!("{}", reply.into_value());
//! arbitrator.dispatch("10.0.0.7", "close", &[]).await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::backends::{Backend, BackendKind, Reply};
use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::error_recovery::RecoveredFault;

/// The client currently allowed to use the lasers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLease {
    /// Client identity
    pub client: String,
    /// Time of the holder's most recent call
    pub acquired_at: DateTime<Utc>,
}

/// A parsed dispatch request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Clear the lease whoever holds it.
    ForceEvict,
    /// Give up the lease.
    Release,
    /// Run an operation on a backend.
    Invoke {
        /// Target backend
        backend: BackendKind,
        /// Capability name
        operation: String,
        /// Positional arguments, backend name removed
        args: Vec<Value>,
    },
}

impl Request {
    /// Parse the generic `(function, args)` form.
    ///
    /// `force_client`/`force_evict` and `close`/`release` take no backend; every
    /// other function takes the backend name as its first argument.
    pub fn parse(function: &str, args: &[Value]) -> LinkResult<Self> {
        match function {
            "force_client" | "force_evict" => return Ok(Request::ForceEvict),
            "close" | "release" => return Ok(Request::Release),
            _ => {}
        }

        let (backend, rest) = args.split_first().ok_or_else(|| LinkError::InvalidArgument {
            operation: function.to_string(),
            reason: "The first argument must be the laser!".to_string(),
        })?;
        let backend = match backend {
            Value::String(name) => name.parse()?,
            other => return Err(LinkError::UnknownBackend(other.to_string())),
        };

        Ok(Request::Invoke {
            backend,
            operation: function.to_string(),
            args: rest.to_vec(),
        })
    }
}

/// Single-owner facade over the two backends.
#[derive(Debug)]
pub struct Arbitrator {
    config: LinkConfig,
    active: Option<Backend>,
    lease: Option<ClientLease>,
    faults: Vec<RecoveredFault>,
}

impl Arbitrator {
    /// Arbitrator with no backend active and no lease.
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            active: None,
            lease: None,
            faults: Vec::new(),
        }
    }

    /// Handle one request in the generic `(function, args)` form.
    pub async fn dispatch(
        &mut self,
        client: &str,
        function: &str,
        args: &[Value],
    ) -> LinkResult<Reply> {
        match Request::parse(function, args)? {
            Request::ForceEvict => {
                self.force_evict(client);
                Ok(Reply::Ack)
            }
            Request::Release => {
                self.release(client);
                Ok(Reply::Ack)
            }
            Request::Invoke {
                backend,
                operation,
                args,
            } => self.invoke(client, backend, &operation, &args).await,
        }
    }

    /// Run `operation` on `kind` on behalf of `client`.
    ///
    /// # Errors
    ///
    /// [`LinkError::OwnershipConflict`] if another client holds the lease, in
    /// which case nothing changes. [`LinkError::BackendUnconfigured`] is raised
    /// before the active session is touched. Operation and argument errors are
    /// raised once `kind` is the live backend, before any request is sent.
    pub async fn invoke(
        &mut self,
        client: &str,
        kind: BackendKind,
        operation: &str,
        args: &[Value],
    ) -> LinkResult<Reply> {
        self.claim(client)?;

        if self.config.backends.address(kind).is_none() {
            return Err(LinkError::BackendUnconfigured(kind));
        }

        let backend = activate(&mut self.active, &self.config, &mut self.faults, kind).await?;
        let call = kind.bind(operation, args)?;
        let result = backend.invoke(&call, &mut self.faults).await;

        if let Err(err) = &result {
            if err.is_session_fatal() {
                warn!(backend = %kind, error = %err, "Session unusable, tearing down");
                self.teardown().await;
            }
        }
        result
    }

    fn claim(&mut self, client: &str) -> LinkResult<()> {
        match &self.lease {
            Some(lease) if lease.client != client => {
                return Err(LinkError::OwnershipConflict {
                    holder: lease.client.clone(),
                    since: lease.acquired_at,
                })
            }
            Some(_) => {}
            None => info!(client, "Lease acquired"),
        }
        self.lease = Some(ClientLease {
            client: client.to_string(),
            acquired_at: Utc::now(),
        });
        Ok(())
    }

    /// Clear the lease unconditionally; returns the evicted lease.
    pub fn force_evict(&mut self, client: &str) -> Option<ClientLease> {
        let evicted = self.lease.take();
        match &evicted {
            Some(lease) => info!(by = client, evicted = %lease.client, "Lease force-evicted"),
            None => info!(by = client, "Force-evict with no lease held"),
        }
        evicted
    }

    /// Give up the lease.
    pub fn release(&mut self, client: &str) -> Option<ClientLease> {
        let released = self.lease.take();
        match &released {
            Some(lease) if lease.client != client => {
                warn!(by = client, holder = %lease.client, "Lease released by non-holder")
            }
            Some(_) => info!(client, "Lease released"),
            None => {}
        }
        released
    }

    /// Current lease.
    pub fn lease(&self) -> Option<&ClientLease> {
        self.lease.as_ref()
    }

    /// Kind of the live backend, if any.
    pub fn active_kind(&self) -> Option<BackendKind> {
        self.active.as_ref().map(Backend::kind)
    }

    /// Faults recovered so far.
    pub fn recovered_faults(&self) -> &[RecoveredFault] {
        &self.faults
    }

    /// Drain the recovered-fault log.
    pub fn take_recovered_faults(&mut self) -> Vec<RecoveredFault> {
        std::mem::take(&mut self.faults)
    }

    /// Tear down the live backend.
    pub async fn shutdown(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if let Some(backend) = self.active.take() {
            let faults = backend.shutdown().await;
            self.faults.extend(faults);
        }
    }

    /// Usage text listing every backend's operations.
    pub fn help() -> String {
        let mut text = String::from(
            "Switches between EMM and solstis as needed, keeping the last one used alive until \
another is called.\n\n\
The last client keeps the lasers until it calls \"close\" (function=\"close\", args=[]). \
Any client can force the current one out with \"force_client\" (function=\"force_client\", args=[]).\n\n\
When calling a laser, the first argument must be its name \
(function=\"function_name\", args=[\"laser_name\", ...]). Anything with an equals sign in the \
prototype is optional. Anything with a positive timeout returns the command response together \
with its completion report.\n\
Valid \"laser_name\" options (with their valid \"function_name\" options):\n",
        );
        for kind in BackendKind::ALL {
            text.push('\n');
            text.push_str(kind.wire_name());
            text.push_str(":\n");
            for capability in kind.capabilities() {
                text.push_str("  ");
                text.push_str(&capability.prototype());
                text.push('\n');
            }
        }
        text
    }
}

/// Make `kind` the live backend, swapping out whatever else was live.
async fn activate<'a>(
    active: &'a mut Option<Backend>,
    config: &LinkConfig,
    faults: &mut Vec<RecoveredFault>,
    kind: BackendKind,
) -> LinkResult<&'a mut Backend> {
    let backend = match active.take() {
        Some(current) if current.kind() == kind => current,
        previous => {
            if let Some(previous) = previous {
                info!(from = %previous.kind(), to = %kind, "Swapping backend");
                faults.extend(previous.shutdown().await);
            }
            Backend::connect(kind, config).await?
        }
    };
    Ok(active.insert(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn arbitrator() -> Arbitrator {
        Arbitrator::new(
            LinkConfig::new("127.0.0.1").with_backend(BackendKind::Emm, "127.0.0.1:1"),
        )
    }

    #[test]
    fn test_parse_requests() {
        assert_eq!(Request::parse("force_client", &[]).unwrap(), Request::ForceEvict);
        assert_eq!(Request::parse("close", &[]).unwrap(), Request::Release);
        assert_eq!(
            Request::parse("status", &[json!("solstis")]).unwrap(),
            Request::Invoke {
                backend: BackendKind::Solstis,
                operation: "status".into(),
                args: vec![],
            }
        );
        assert!(matches!(
            Request::parse("status", &[]),
            Err(LinkError::InvalidArgument { .. })
        ));
        assert!(matches!(
            Request::parse("status", &[json!("Solstis")]),
            Err(LinkError::UnknownBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_conflict_mutates_nothing() {
        let mut arbitrator = arbitrator();
        // Lease is taken before the (failing) connect
        let _ = arbitrator.invoke("alice", BackendKind::Emm, "status", &[]).await;
        let before = arbitrator.lease().cloned().unwrap();

        let err = arbitrator
            .invoke("bob", BackendKind::Emm, "status", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::OwnershipConflict { ref holder, .. } if holder == "alice"));
        assert_eq!(arbitrator.lease(), Some(&before));
        assert!(arbitrator.active_kind().is_none());
    }

    #[tokio::test]
    async fn test_force_evict_by_anyone() {
        let mut arbitrator = arbitrator();
        let _ = arbitrator.invoke("alice", BackendKind::Emm, "status", &[]).await;

        arbitrator.dispatch("bob", "force_client", &[]).await.unwrap();
        assert!(arbitrator.lease().is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_backend_is_local() {
        let mut arbitrator = arbitrator();
        let err = arbitrator
            .invoke("alice", BackendKind::Solstis, "status", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::BackendUnconfigured(BackendKind::Solstis)));
    }

    #[test]
    fn test_help_lists_prototypes() {
        let help = Arbitrator::help();
        assert!(help.contains("EMM:\n  abort_tune()"));
        assert!(help.contains("set_wavelength(target, timeout=120, wavelength_range='visible')"));
        assert!(help.contains("solstis:\n"));
        assert!(help.contains("lock_wavelength(lock_status='on')"));
    }
}
