//! Ingestion pipeline
//!
//! This module turns exchange clients into stored, deduplicated time series:
//!
//! 1. **Rate limiting**: one weighted [`rate_limit::TokenBucketLimiter`] per platform
//! 2. **Fan-out**: [`pool::run_pool`] runs per-symbol work under a concurrency ceiling
//! 3. **Runs**: [`orchestrator::IngestionOrchestrator`] executes initial and
//!    incremental runs, one at a time per platform
//! 4. **Progress**: [`progress::StageProgressTracker`] counters rendered as
//!    [`events::ProgressEvent`]s on bounded subscriber channels
//! 5. **Resampling**: hourly funding aggregated into 8h buckets by [`resample`]
//!
//! # Quick Start
//!
//! ```no_run
//! use perp_data_ingestor::ingest::{IngestConfig, IngestionRegistry};
//! use perp_data_ingestor::storage::memory::MemoryStores;
//! use perp_data_ingestor::Platform;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::default().with_lookback_days(7);
//! let registry = IngestionRegistry::with_rest_clients(MemoryStores::new().into_stores(), config)?;
//! let summary = registry.start_initial(Platform::Okx).await?.await?;
//! println!("{} errors", summary.errors.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Only preconditions surface as [`IngestError`]: a run already active, no
//! registered assets for an incremental run, an unknown platform. Everything
//! that goes wrong inside a run is recorded in the run's error list and
//! reflected in its final [`run::RunStatus`].

pub mod config;
pub mod events;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod rate_limit;
pub mod registry;
pub mod resample;
pub mod run;

pub use config::{IngestConfig, RetryPolicy};
pub use events::{EventKind, ProgressEvent, ProgressMessage};
pub use orchestrator::IngestionOrchestrator;
pub use progress::{StageKey, StageStatus};
pub use rate_limit::{RateLimitError, TokenBucketLimiter};
pub use registry::IngestionRegistry;
pub use run::{RunKind, RunStatus, RunSummary};

use crate::fetcher::FetcherError;
use crate::registry::RegistryError;
use crate::storage::StorageError;
use crate::Platform;

/// Ingestion errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A run is already active for the platform
    #[error("an ingestion run is already active for {0}")]
    AlreadyRunning(Platform),

    /// Incremental run requested before any asset was registered
    #[error("no registered assets for {0}, run an initial ingestion first")]
    NoAssets(Platform),

    /// No orchestrator is registered for the platform
    #[error("no orchestrator registered for {0}")]
    UnknownPlatform(Platform),

    /// Platform profile error
    #[error("platform profile error: {0}")]
    Registry(#[from] RegistryError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    Fetcher(#[from] FetcherError),
}
