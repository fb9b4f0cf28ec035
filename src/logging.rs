//! Tracing subscriber setup for the binary.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::config::ApplicationConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured `log_level` applies.
pub fn init_tracing(application: &ApplicationConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&application.log_level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match application.log_format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    }
    .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}
