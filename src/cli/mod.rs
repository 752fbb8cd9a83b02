//! CLI command implementations

pub mod error;
pub mod platforms;
pub mod run;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;

use crate::ingest::config::MAX_RETRIES;

pub use error::CliError;
pub use platforms::PlatformsCommand;
pub use run::{RunCommand, RunMode};

/// Perpetual-futures market data ingestion
#[derive(Parser, Debug)]
#[command(name = "perp-data-ingestor", version, about, long_about = None)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Maximum number of retries for a failed request (range: 0-20)
    #[arg(
        long,
        global = true,
        env = "INGEST_MAX_RETRIES",
        default_value_t = MAX_RETRIES,
        value_parser = clap::value_parser!(u32).range(0..=20)
    )]
    pub max_retries: u32,

    /// Address for the Prometheus scrape endpoint (disabled when unset)
    #[arg(long, global = true, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an ingestion for one platform
    Run(RunCommand),

    /// List platform profiles
    Platforms(PlatformsCommand),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Platform;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "perp-data-ingestor",
            "run",
            "--platform",
            "okx",
            "--mode",
            "incremental",
            "--lookback-days",
            "3",
        ])
        .unwrap();

        let Commands::Run(run) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(run.platform, Platform::Okx);
        assert_eq!(run.mode, RunMode::Incremental);
        assert_eq!(run.lookback_days, 3);
        assert!(!run.events_json);
    }

    #[test]
    fn test_rejects_unknown_platform_and_retry_ceiling() {
        assert!(Cli::try_parse_from(["perp-data-ingestor", "run", "--platform", "ftx"]).is_err());
        assert!(Cli::try_parse_from([
            "perp-data-ingestor",
            "platforms",
            "--max-retries",
            "50"
        ])
        .is_err());
    }
}
