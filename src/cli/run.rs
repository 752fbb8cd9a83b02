//! Run command: one ingestion for one platform against the in-memory store

use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::ingest::config::DEFAULT_LOOKBACK_DAYS;
use crate::ingest::{
    IngestConfig, IngestError, IngestionRegistry, ProgressEvent, ProgressMessage, RetryPolicy,
    RunKind, RunSummary,
};
use crate::storage::memory::MemoryStores;
use crate::Platform;

use super::{Cli, CliError};

/// Ingestion mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Discover assets and fetch history back to the lookback horizon
    Initial,
    /// Fetch only points newer than what is stored
    Incremental,
}

impl From<RunMode> for RunKind {
    fn from(mode: RunMode) -> Self {
        match mode {
            RunMode::Initial => RunKind::Initial,
            RunMode::Incremental => RunKind::Incremental,
        }
    }
}

/// Run command arguments
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Platform to ingest (binance, bybit, okx, hyperliquid, dydx, aster)
    #[arg(long)]
    pub platform: Platform,

    /// Ingestion mode
    #[arg(long, value_enum, default_value = "initial")]
    pub mode: RunMode,

    /// History horizon for initial runs, in days
    #[arg(long, env = "INGEST_LOOKBACK_DAYS", default_value_t = DEFAULT_LOOKBACK_DAYS)]
    pub lookback_days: u32,

    /// Print raw progress events as JSON lines instead of a progress bar
    #[arg(long, default_value_t = false)]
    pub events_json: bool,

    /// Skip aggregation of hourly funding into 8h buckets
    #[arg(long, default_value_t = false)]
    pub no_resample: bool,
}

impl RunCommand {
    fn config(&self, cli: &Cli) -> Result<IngestConfig, CliError> {
        if self.lookback_days == 0 {
            return Err(CliError::ConfigurationError(
                "lookback must be at least one day".to_string(),
            ));
        }
        let retry = RetryPolicy {
            max_retries: cli.max_retries,
            ..RetryPolicy::default()
        };
        Ok(IngestConfig::default()
            .with_lookback_days(self.lookback_days)
            .with_retry(retry)
            .with_resample(!self.no_resample))
    }

    /// Execute the run command
    ///
    /// The in-memory store lives only as long as the process, so an
    /// incremental run on an empty store is preceded by an initial run that
    /// seeds the asset registry.
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let stores = MemoryStores::new();
        let registry = IngestionRegistry::with_rest_clients(stores.stores(), self.config(cli)?)?;
        let platform = self.platform;

        let summary = match self.mode {
            RunMode::Initial => self.run_once(&registry, RunKind::Initial).await?,
            RunMode::Incremental => match self.run_once(&registry, RunKind::Incremental).await {
                Err(CliError::IngestError(IngestError::NoAssets(_))) => {
                    info!(%platform, "No stored assets, seeding with an initial run");
                    self.run_once(&registry, RunKind::Initial).await?;
                    self.run_once(&registry, RunKind::Incremental).await?
                }
                other => other?,
            },
        };

        self.print_summary(&summary)
    }

    async fn run_once(
        &self,
        registry: &IngestionRegistry,
        kind: RunKind,
    ) -> Result<RunSummary, CliError> {
        let events = registry.subscribe(self.platform)?;
        let handle: JoinHandle<RunSummary> = match kind {
            RunKind::Initial => registry.start_initial(self.platform).await?,
            RunKind::Incremental => registry.start_incremental(self.platform).await?,
        };

        if self.events_json {
            print_events(events).await?;
        } else {
            render_progress(events).await;
        }

        Ok(handle.await?)
    }

    fn print_summary(&self, summary: &RunSummary) -> Result<(), CliError> {
        if self.events_json {
            println!("{}", serde_json::to_string(summary)?);
            return Ok(());
        }

        let counts = summary.counts;
        println!(
            "{} {} run {} in {:.1}s ({} assets)",
            summary.platform,
            summary.kind,
            summary.status.as_str(),
            summary.elapsed_ms as f64 / 1000.0,
            summary.total_assets
        );
        println!("  funding:        {}", counts.funding);
        println!("  candles:        {}", counts.ohlcv);
        println!("  open interest:  {}", counts.open_interest);
        println!("  long/short:     {}", counts.ratio);
        if counts.resampled_assets > 0 {
            println!(
                "  resampled:      {} buckets over {} assets",
                counts.resampled_records, counts.resampled_assets
            );
        }
        if !summary.errors.is_empty() {
            println!("  errors ({}):", summary.errors.len());
            for error in &summary.errors {
                println!("    {error}");
            }
        }
        Ok(())
    }
}

async fn print_events(mut events: mpsc::Receiver<ProgressMessage>) -> Result<(), CliError> {
    while let Some(message) = events.recv().await {
        println!("{}", message.to_json()?);
        if message.is_done() {
            break;
        }
    }
    Ok(())
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
    {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => tracing::debug!(error = %e, "Falling back to default progress style"),
    }
    pb
}

fn progress_message(event: &ProgressEvent) -> String {
    let stage = event
        .stage
        .and_then(|key| event.stages.iter().find(|s| s.key == key));
    match (stage, &event.current_asset) {
        (Some(stage), Some(asset)) => format!("{} ({asset})", stage.label),
        (Some(stage), None) => stage.label.to_string(),
        (None, _) => event.message.clone().unwrap_or_default(),
    }
}

async fn render_progress(mut events: mpsc::Receiver<ProgressMessage>) {
    let pb = create_progress_bar();
    while let Some(message) = events.recv().await {
        match message {
            ProgressMessage::Event(event) => {
                pb.set_position(u64::from(event.percentage));
                if event.kind.is_terminal() {
                    pb.finish_with_message(event.message.clone().unwrap_or_default());
                } else {
                    pb.set_message(progress_message(&event));
                }
            }
            ProgressMessage::Done => break,
        }
    }
    if !pb.is_finished() {
        pb.abandon();
    }
}
