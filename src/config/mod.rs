//! Link configuration
//!
//! Configuration is loaded with Figment from (in order of precedence):
//! 1. Environment variables prefixed with `SOLSTIS_LINK_` (`__` separates nested keys)
//! 2. TOML configuration file (default: `config/link.toml`)
//!
//! A backend without an `address` entry cannot be activated; dispatching to it
//! fails before any network I/O.

pub mod link_config;

pub use link_config::{
    host_of, ApplicationConfig, BackendsConfig, BridgeConfig, ConfigError, EndpointConfig,
    LinkConfig, LinkSettings,
};
