//! `solstis-link` command-line tool.
//!
//! Runs single requests against the laser servers through the arbitrator, lists
//! the available operations, or checks a configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::warn;

use solstis_link::config::LinkConfig;
use solstis_link::logging::init_tracing;
use solstis_link::Arbitrator;

#[derive(Debug, Parser)]
#[command(
    name = "solstis-link",
    about = "Client for M Squared EMM/SolsTiS laser servers"
)]
struct Args {
    /// Configuration file.
    #[arg(long, default_value = "config/link.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print every backend's operations.
    Capabilities,
    /// Run one request, e.g. `call --client lab-pc set_wavelength EMM 780`.
    Call {
        /// Identity used for the lease.
        #[arg(long)]
        client: String,
        /// Operation, or `force_client` / `close`.
        function: String,
        /// Backend name first, then the operation's arguments. Parsed as JSON,
        /// falling back to plain strings.
        args: Vec<String>,
    },
    /// Validate the configuration and print it resolved.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Capabilities => {
            println!("{}", Arbitrator::help());
            Ok(())
        }
        Command::CheckConfig => {
            let config = load(&args.config)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Call {
            client,
            function,
            args: raw,
        } => {
            let config = load(&args.config)?;
            init_tracing(&config.application)?;

            let call_args: Vec<Value> = raw.iter().map(String::as_str).map(parse_arg).collect();
            let mut arbitrator = Arbitrator::new(config);
            let result = arbitrator.dispatch(&client, &function, &call_args).await;
            arbitrator.shutdown().await;

            for fault in arbitrator.take_recovered_faults() {
                warn!(%fault, "Recovered fault");
            }

            let reply = result.with_context(|| format!("'{function}' failed"))?;
            println!("{}", serde_json::to_string_pretty(&reply.into_value())?);
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<LinkConfig> {
    LinkConfig::load_from(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
