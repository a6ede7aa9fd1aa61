//! # Stratus
//!
//! Entry point of the `stratus` binary.
//!
//! 1. **Configuration** - defaults, the optional TOML file, `STRATUS_*`
//!    environment overrides
//! 2. **Tracing** - `RUST_LOG` when set, otherwise the configured filter
//! 3. **Command** - `simulate` runs the controllers over a manifest file;
//!    `config` prints the effective configuration

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stratus::config::StratusConfig;
use stratus::simulate::{parse_manifests, simulate};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            manifests,
            config,
            timeout,
        } => {
            let config = load_config(config.as_deref())?;
            init_tracing(&config.log_filter);
            run_simulation(&manifests, &config, Duration::from_secs(timeout)).await
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<StratusConfig> {
    StratusConfig::load(path).context("Failed to load configuration")
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(fallback: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_simulation(manifests: &Path, config: &StratusConfig, timeout: Duration) -> Result<()> {
    let text = std::fs::read_to_string(manifests)
        .with_context(|| format!("Failed to read manifests from {}", manifests.display()))?;
    let manifests = parse_manifests(&text).context("Invalid manifests")?;
    info!(objects = manifests.len(), "Starting simulation");

    let report = simulate(manifests, config, timeout)
        .await
        .context("Simulation failed")?;
    print!("{}", report.to_yaml().context("Failed to render objects")?);

    if !report.converged {
        bail!(
            "{} object(s) did not become available: {}",
            report.pending.len(),
            report.pending.join(", ")
        );
    }
    Ok(())
}
