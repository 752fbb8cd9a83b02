//! Platform → orchestrator lookup
//!
//! The registry is built once at start-up and handed to whatever drives
//! ingestion (the CLI, a scheduler). Orchestrators are created eagerly, one per
//! platform, so their run state and subscribers live as long as the registry.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::fetcher::RestExchangeClient;
use crate::ingest::events::{ProgressEvent, ProgressMessage};
use crate::ingest::orchestrator::IngestionOrchestrator;
use crate::ingest::run::{RunKind, RunSummary};
use crate::ingest::{IngestConfig, IngestError};
use crate::registry::PlatformRegistry;
use crate::storage::Stores;
use crate::Platform;

/// One orchestrator per platform
#[derive(Debug, Default)]
pub struct IngestionRegistry {
    orchestrators: HashMap<Platform, Arc<IngestionOrchestrator>>,
}

impl IngestionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build orchestrators for every profiled platform, each talking to the live REST API
    pub fn with_rest_clients(stores: Stores, config: IngestConfig) -> Result<Self, IngestError> {
        let profiles = PlatformRegistry::load().map_err(Clone::clone)?;
        let mut registry = Self::new();
        for profile in profiles.profiles() {
            let client = Arc::new(RestExchangeClient::new(profile, &config));
            registry.insert(IngestionOrchestrator::new(
                profile.clone(),
                client,
                stores.clone(),
                config.clone(),
            ));
        }
        info!(platforms = registry.orchestrators.len(), "Ingestion registry ready");
        Ok(registry)
    }

    /// Register an orchestrator, replacing any previous one for its platform
    pub fn insert(&mut self, orchestrator: IngestionOrchestrator) -> Arc<IngestionOrchestrator> {
        let orchestrator = Arc::new(orchestrator);
        self.orchestrators
            .insert(orchestrator.platform(), Arc::clone(&orchestrator));
        orchestrator
    }

    /// Orchestrator of a platform
    pub fn orchestrator(&self, platform: Platform) -> Result<&Arc<IngestionOrchestrator>, IngestError> {
        self.orchestrators
            .get(&platform)
            .ok_or(IngestError::UnknownPlatform(platform))
    }

    /// Registered platforms in canonical order
    pub fn platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .iter()
            .copied()
            .filter(|p| self.orchestrators.contains_key(p))
            .collect()
    }

    /// Start an initial run in the background
    pub async fn start_initial(&self, platform: Platform) -> Result<JoinHandle<RunSummary>, IngestError> {
        self.orchestrator(platform)?.start(RunKind::Initial).await
    }

    /// Start an incremental run in the background
    pub async fn start_incremental(
        &self,
        platform: Platform,
    ) -> Result<JoinHandle<RunSummary>, IngestError> {
        self.orchestrator(platform)?.start(RunKind::Incremental).await
    }

    /// Whether a platform has an active run; unknown platforms are never running
    pub fn is_running(&self, platform: Platform) -> bool {
        self.orchestrators
            .get(&platform)
            .is_some_and(|o| o.is_running())
    }

    /// Snapshot of a platform's active run
    pub fn current_progress(&self, platform: Platform) -> Option<ProgressEvent> {
        self.orchestrators
            .get(&platform)
            .and_then(|o| o.current_progress())
    }

    /// Subscribe to a platform's progress events
    pub fn subscribe(&self, platform: Platform) -> Result<mpsc::Receiver<ProgressMessage>, IngestError> {
        Ok(self.orchestrator(platform)?.subscribe())
    }
}
