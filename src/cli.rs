//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Stratus - declarative cloud resource reconciliation
#[derive(Parser, Debug)]
#[command(name = "stratus")]
#[command(version)]
#[command(about = "Reconciles declared cloud resources against their live remote state")]
#[command(
    long_about = "Stratus drives declared resources (ports, trunks, projects) towards their remote state, tracking dependencies between them and guarding referenced objects from deletion."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile manifests against an in-memory cluster and fake network
    Simulate {
        /// Multi-document YAML of Secret, Project, Port and Trunk objects
        #[arg(short, long)]
        manifests: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seconds to wait for every managed object to become available
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,
    },

    /// Print the effective configuration
    Config {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_simulate_defaults_timeout() {
        let cli = Cli::try_parse_from(["stratus", "simulate", "--manifests", "net.yaml"]);
        assert!(matches!(
            cli.map(|c| c.command),
            Ok(Commands::Simulate { timeout: 30, config: None, .. })
        ));
    }
}
