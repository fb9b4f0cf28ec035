//! Link configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/link.toml` (base configuration)
//! 2. Environment variables prefixed with `SOLSTIS_LINK_`, nested keys separated by `__`
//!
//! ```text
//! SOLSTIS_LINK_APPLICATION__LOG_LEVEL=debug
//! SOLSTIS_LINK_LINK__CLIENT_ADDRESS=192.168.1.20
//! SOLSTIS_LINK_BACKENDS__SOLSTIS__ADDRESS=192.168.1.223:39933
//! ```
//!
//! # Example
//!
//! ```no_run
//! use solstis_link::config::LinkConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LinkConfig::load()?;
//!     println!("Client address: {}", config.link.client_address);
//!     Ok(())
//! }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::backends::BackendKind;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Session and protocol settings
    pub link: LinkSettings,
    /// Server addresses per backend kind
    #[serde(default)]
    pub backends: BackendsConfig,
    /// Helper process required by some EMM operations
    #[serde(default)]
    pub bridge: Option<BridgeConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (text or json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Session and protocol settings shared by every backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Address this client announces in the `start_link` handshake
    pub client_address: String,
    /// Read deadline for a single response, in milliseconds
    #[serde(default = "default_timeout")]
    pub default_timeout_ms: u64,
    /// TCP connect deadline, in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Mismatched transmission ids tolerated per request
    #[serde(default = "default_max_correlation_attempts")]
    pub max_correlation_attempts: u32,
    /// Handshake attempts before a backend is declared unreachable
    #[serde(default = "default_handshake_attempts")]
    pub handshake_attempts: u32,
}

impl LinkSettings {
    /// Settings with defaults for everything but the client address.
    pub fn new(client_address: impl Into<String>) -> Self {
        Self {
            client_address: client_address.into(),
            default_timeout_ms: default_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            max_correlation_attempts: default_max_correlation_attempts(),
            handshake_attempts: default_handshake_attempts(),
        }
    }

    /// Per-message read deadline.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Connect deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Server endpoints; an absent entry means the backend cannot be used
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// EMM server
    #[serde(default)]
    pub emm: Option<EndpointConfig>,
    /// SolsTiS server
    #[serde(default)]
    pub solstis: Option<EndpointConfig>,
}

impl BackendsConfig {
    /// Configured `host:port` for `kind`.
    pub fn address(&self, kind: BackendKind) -> Option<&str> {
        let endpoint = match kind {
            BackendKind::Emm => self.emm.as_ref(),
            BackendKind::Solstis => self.solstis.as_ref(),
        };
        endpoint.map(|e| e.address.as_str())
    }
}

/// One server endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// `host:port`
    pub address: String,
}

/// Bridge process launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Executable to run
    pub program: String,
    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,
    /// How long to wait for the first stderr line, in milliseconds
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_ms: u64,
    /// Pause after a successful launch, in milliseconds
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

impl BridgeConfig {
    /// Bridge running `program` with default timings.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            launch_timeout_ms: default_launch_timeout(),
            settle_ms: default_settle(),
        }
    }

    /// Deadline for the first stderr line.
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    /// Pause after launch.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Host part of a `host:port` address.
pub fn host_of(address: &str) -> &str {
    address
        .rsplit_once(':')
        .map_or(address, |(host, _)| host)
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "solstis-link".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_timeout() -> u64 {
    2000
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_max_correlation_attempts() -> u32 {
    crate::protocol::DEFAULT_MAX_CORRELATION_ATTEMPTS
}

fn default_handshake_attempts() -> u32 {
    2
}

fn default_launch_timeout() -> u64 {
    30_000
}

fn default_settle() -> u64 {
    1000
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl LinkConfig {
    /// Configuration with defaults and no backends.
    pub fn new(client_address: impl Into<String>) -> Self {
        Self {
            application: ApplicationConfig::default(),
            link: LinkSettings::new(client_address),
            backends: BackendsConfig::default(),
            bridge: None,
        }
    }

    /// Set the address of one backend.
    pub fn with_backend(mut self, kind: BackendKind, address: impl Into<String>) -> Self {
        let endpoint = Some(EndpointConfig {
            address: address.into(),
        });
        match kind {
            BackendKind::Emm => self.backends.emm = endpoint,
            BackendKind::Solstis => self.backends.solstis = endpoint,
        }
        self
    }

    /// Set the bridge process.
    pub fn with_bridge(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Load configuration from `config/link.toml` and environment variables
    ///
    /// Environment variables (`SOLSTIS_LINK_` prefix) take precedence over the file.
    /// After loading, configuration is validated.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/link.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SOLSTIS_LINK_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level and format are valid
    /// - Client address is set and timeouts are non-zero
    /// - Attempt bounds are at least one
    /// - At least one backend is configured, each as `host:port`
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.link.client_address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "'link.client_address' cannot be empty".to_string(),
            ));
        }

        if self.link.default_timeout_ms == 0 || self.link.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Link timeouts must be > 0".to_string(),
            ));
        }

        if self.link.max_correlation_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "'link.max_correlation_attempts' must be >= 1".to_string(),
            ));
        }

        if self.link.handshake_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "'link.handshake_attempts' must be >= 1".to_string(),
            ));
        }

        let mut configured = 0;
        for kind in BackendKind::ALL {
            if let Some(address) = self.backends.address(kind) {
                validate_address(kind, address)?;
                configured += 1;
            }
        }
        if configured == 0 {
            return Err(ConfigError::ValidationError(
                "No backends configured; set [backends.emm] and/or [backends.solstis]".to_string(),
            ));
        }

        if let Some(bridge) = &self.bridge {
            if bridge.program.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "'bridge.program' cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn validate_address(kind: BackendKind, address: &str) -> Result<(), ConfigError> {
    let valid = match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "Backend '{kind}' address '{address}' must be of the form host:port"
        )))
    }
}
