//! Bridge process supervision
//!
//! Some EMM operations only work while a helper process relays traffic between
//! the EMM and its SolsTiS. The helper announces itself by printing the EMM host
//! as the first line on stderr once the EMM has connected to it. Anything else on
//! that line is an error report, and the rest of stderr is its detail.

use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{LinkError, LinkResult};
use crate::error_recovery::{FaultSource, RecoveredFault};

/// Supervisor for the bridge process.
#[derive(Debug)]
pub struct BridgeProcess {
    config: BridgeConfig,
    expected_host: String,
    child: Option<Child>,
    launches: u32,
}

impl BridgeProcess {
    /// Supervisor that expects the bridge to report `expected_host`.
    pub fn new(config: BridgeConfig, expected_host: impl Into<String>) -> Self {
        Self {
            config,
            expected_host: expected_host.into(),
            child: None,
            launches: 0,
        }
    }

    /// Whether a launched process is still alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Number of successful launches so far.
    pub fn launches(&self) -> u32 {
        self.launches
    }

    /// Launch the process unless it is already running.
    ///
    /// Returns a recovered fault when a previously launched process had exited
    /// and had to be started again.
    pub async fn ensure_running(&mut self) -> LinkResult<Option<RecoveredFault>> {
        if self.is_running() {
            return Ok(None);
        }

        let exit = match self.child.take() {
            Some(mut child) => Some(
                child
                    .try_wait()
                    .ok()
                    .flatten()
                    .map_or_else(|| "unknown status".to_string(), |s| s.to_string()),
            ),
            None => None,
        };

        self.launch().await?;

        Ok(exit.map(|status| {
            error!(%status, "Had to re-launch bridge process");
            RecoveredFault::new(
                FaultSource::BridgeRelaunch,
                format!("bridge process had exited ({status}) and was relaunched"),
            )
        }))
    }

    async fn launch(&mut self) -> LinkResult<()> {
        info!(program = %self.config.program, "Launching bridge process");
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                LinkError::Bridge(format!("failed to start '{}': {err}", self.config.program))
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LinkError::Bridge("bridge stderr was not captured".to_string()))?;
        let mut lines = BufReader::new(stderr).lines();

        let first = match tokio::time::timeout(self.config.launch_timeout(), lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                return Err(LinkError::Bridge(
                    "bridge process exited without reporting a host".to_string(),
                ))
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                let _ = child.start_kill();
                return Err(LinkError::Bridge(format!(
                    "bridge process reported nothing within {:?}",
                    self.config.launch_timeout()
                )));
            }
        };

        let host = first.trim();
        if host != self.expected_host {
            let mut rest = String::new();
            let mut reader = lines.into_inner();
            let _ = tokio::time::timeout(
                self.config.launch_timeout(),
                reader.read_to_string(&mut rest),
            )
            .await;
            let _ = child.start_kill();
            return Err(LinkError::Bridge(
                format!("{host}\n{rest}").trim_end().replace("\r\n", "\n"),
            ));
        }

        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "solstis_link::bridge", "{line}");
            }
        });

        tokio::time::sleep(self.config.settle()).await;
        info!(%host, "EMM connected through bridge");
        self.child = Some(child);
        self.launches += 1;
        Ok(())
    }

    /// Stop the process.
    ///
    /// A process that had already exited, or that could not be killed, is
    /// reported as a recovered fault.
    pub async fn shutdown(&mut self) -> Option<RecoveredFault> {
        let mut child = self.child.take()?;
        let detail = match child.try_wait() {
            Ok(Some(status)) => format!("bridge process had already exited ({status})"),
            Ok(None) => match child.kill().await {
                Ok(()) => {
                    info!("Killed bridge process");
                    return None;
                }
                Err(err) => format!("failed to kill bridge process: {err}"),
            },
            Err(err) => format!("failed to query bridge process: {err}"),
        };
        warn!(%detail, "Bridge shutdown fault");
        Some(RecoveredFault::new(FaultSource::BridgeShutdown, detail))
    }
}
