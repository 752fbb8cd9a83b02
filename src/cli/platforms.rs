//! CLI command for listing platform profiles

use clap::{Args, ValueEnum};
use serde_json::json;

use crate::fetcher::exchange_config::exchange_config;
use crate::registry::{PlatformProfile, PlatformRegistry};
use crate::Dataset;

use super::CliError;

/// Output format for the platforms command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// Platforms subcommand
#[derive(Debug, Args)]
pub struct PlatformsCommand {
    /// Output format
    #[arg(long, value_enum, default_value = "human")]
    pub format: OutputFormat,
}

fn supported_datasets(profile: &PlatformProfile) -> Vec<&'static str> {
    let config = exchange_config(profile.platform);
    Dataset::ALL
        .iter()
        .filter(|d| config.endpoint(**d).is_some())
        .map(|d| d.as_str())
        .collect()
}

impl PlatformsCommand {
    /// Execute the platforms command
    pub fn execute(&self) -> Result<(), CliError> {
        let registry = PlatformRegistry::load().map_err(Clone::clone)?;
        let profiles = registry.profiles();

        match self.format {
            OutputFormat::Json => {
                let rendered: Vec<_> = profiles
                    .iter()
                    .map(|p| {
                        json!({
                            "platform": p.platform,
                            "description": p.description,
                            "fundingInterval": p.funding_interval.to_string(),
                            "resampled": p.needs_resampling(),
                            "rateLimit": p.rate_limit,
                            "concurrency": p.concurrency,
                            "datasets": supported_datasets(p),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rendered)?);
            }
            OutputFormat::Human => {
                println!("{} platforms:\n", profiles.len());
                for p in profiles {
                    println!(
                        "{:<12} funding={:<3} budget={}/{}ms concurrency={} | {}",
                        p.platform.as_str(),
                        p.funding_interval.to_string(),
                        p.rate_limit.capacity,
                        p.rate_limit.refill_interval_ms,
                        p.concurrency,
                        supported_datasets(p).join(", ")
                    );
                }
            }
        }
        Ok(())
    }
}
