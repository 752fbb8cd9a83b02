//! Per-platform ingestion runs
//!
//! An [`IngestionOrchestrator`] owns at most one run at a time. A run moves
//! through asset discovery, the dataset pipelines (joined, each fanning out
//! over symbols through its own worker pool) and, for hourly-funding
//! platforms, resampling. Every counter change is published as a
//! [`ProgressEvent`]; the terminal event is always followed by
//! [`ProgressMessage::Done`].

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::fetcher::batch::{BatchFetcher, BatchProgress, FetchDataset, SymbolJob};
use crate::fetcher::{ExchangeClient, FetchWindow, FetcherResult};
use crate::ingest::events::{EventHub, EventKind, ProgressEvent, ProgressMessage};
use crate::ingest::pool::PoolOptions;
use crate::ingest::progress::{StageKey, StageStatus, StageUpdate};
use crate::ingest::resample::resample_asset;
use crate::ingest::run::{FetchRun, RecordCounts, RunKind, RunStatus, RunSummary};
use crate::ingest::{IngestConfig, IngestError};
use crate::metrics::IngestMetrics;
use crate::registry::PlatformProfile;
use crate::storage::{PointRepository, Stores};
use crate::{
    Asset, AssetId, CandlePoint, Dataset, FundingPoint, Interval, OpenInterestPoint, Platform,
    RatioPoint, TimeSeriesPoint,
};

/// Keep only points strictly newer than the stored maximum
pub fn filter_newer<T: TimeSeriesPoint>(points: Vec<T>, latest: Option<i64>) -> Vec<T> {
    match latest {
        Some(latest) => points
            .into_iter()
            .filter(|p| p.timestamp() > latest)
            .collect(),
        None => points,
    }
}

/// Clears the active-run state when the run ends, however it ends
struct RunGuard {
    orchestrator: Arc<IngestionOrchestrator>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *self.orchestrator.lock_run() = None;
        self.orchestrator.running.store(false, Ordering::SeqCst);
    }
}

/// Time bounds shared by every pipeline of a run
#[derive(Debug, Clone, Copy)]
struct RunWindow {
    kind: RunKind,
    now: i64,
    horizon: i64,
}

/// One dataset's fetch → store wiring
struct Pipeline<T: TimeSeriesPoint> {
    fetch_stage: StageKey,
    store_stage: StageKey,
    interval: Interval,
    repo: Arc<dyn PointRepository<T>>,
    count: fn(&mut RecordCounts) -> &mut u64,
}

/// Fetch/store stage pairs in pipeline order
const PIPELINE_STAGES: [(Dataset, StageKey, StageKey); 4] = [
    (Dataset::Funding, StageKey::FundingFetch, StageKey::FundingStore),
    (Dataset::Candles, StageKey::OhlcvFetch, StageKey::OhlcvStore),
    (Dataset::OpenInterest, StageKey::OiFetch, StageKey::OiStore),
    (Dataset::LongShortRatio, StageKey::RatioFetch, StageKey::RatioStore),
];

/// Runs ingestion for one platform
pub struct IngestionOrchestrator {
    profile: PlatformProfile,
    client: Arc<dyn ExchangeClient>,
    stores: Stores,
    config: IngestConfig,
    running: AtomicBool,
    current: Mutex<Option<FetchRun>>,
    events: EventHub,
    metrics: IngestMetrics,
}

impl std::fmt::Debug for IngestionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionOrchestrator")
            .field("platform", &self.profile.platform)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl IngestionOrchestrator {
    /// Create an idle orchestrator
    pub fn new(
        profile: PlatformProfile,
        client: Arc<dyn ExchangeClient>,
        stores: Stores,
        config: IngestConfig,
    ) -> Self {
        Self {
            events: EventHub::new(config.event_buffer),
            metrics: IngestMetrics::new(profile.platform),
            profile,
            client,
            stores,
            config,
            running: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    /// Platform served
    pub fn platform(&self) -> Platform {
        self.profile.platform
    }

    /// Profile the orchestrator was built from
    pub fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    /// Whether a run is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a progress subscriber
    pub fn subscribe(&self) -> mpsc::Receiver<ProgressMessage> {
        self.events.subscribe()
    }

    /// Snapshot of the active run, `None` when idle
    pub fn current_progress(&self) -> Option<ProgressEvent> {
        let current = self.lock_run();
        current.as_ref().map(|run| {
            ProgressEvent::from_run(
                EventKind::Progress,
                self.platform(),
                run,
                run.tracker.active_stage(),
            )
        })
    }

    /// Run to completion on the current task
    ///
    /// # Errors
    /// Only precondition failures: [`IngestError::AlreadyRunning`], and
    /// [`IngestError::NoAssets`] or a storage error for incremental runs.
    pub async fn run(self: &Arc<Self>, kind: RunKind) -> Result<RunSummary, IngestError> {
        let (guard, assets) = self.prepare(kind).await?;
        Ok(self.execute(guard, kind, assets).await)
    }

    /// Check preconditions, then run on a spawned task
    pub async fn start(
        self: &Arc<Self>,
        kind: RunKind,
    ) -> Result<JoinHandle<RunSummary>, IngestError> {
        let (guard, assets) = self.prepare(kind).await?;
        let orchestrator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            orchestrator.execute(guard, kind, assets).await
        }))
    }

    fn lock_run(&self) -> MutexGuard<'_, Option<FetchRun>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_begin(self: &Arc<Self>, kind: RunKind) -> Result<RunGuard, IngestError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IngestError::AlreadyRunning(self.platform()));
        }
        // A ban only holds for the run that received it
        self.client.reset_ban();
        *self.lock_run() = Some(FetchRun::new(kind));
        Ok(RunGuard {
            orchestrator: Arc::clone(self),
        })
    }

    async fn prepare(
        self: &Arc<Self>,
        kind: RunKind,
    ) -> Result<(RunGuard, Option<Vec<Asset>>), IngestError> {
        let guard = self.try_begin(kind)?;
        match kind {
            RunKind::Initial => Ok((guard, None)),
            RunKind::Incremental => {
                let assets: Vec<Asset> = self
                    .stores
                    .assets
                    .find_by_platform(self.platform())
                    .await?
                    .into_iter()
                    .filter(|asset| asset.is_active)
                    .collect();
                if assets.is_empty() {
                    return Err(IngestError::NoAssets(self.platform()));
                }
                Ok((guard, Some(assets)))
            }
        }
    }

    async fn execute(
        &self,
        guard: RunGuard,
        kind: RunKind,
        assets: Option<Vec<Asset>>,
    ) -> RunSummary {
        let span = info_span!("ingest_run", platform = %self.platform(), kind = %kind);
        let summary = self.execute_stages(kind, assets).instrument(span).await;
        drop(guard);
        summary
    }

    /// Apply `update` to the active run and publish the resulting progress event
    ///
    /// Publishing happens under the run lock so subscribers see events in
    /// mutation order; `publish` never blocks.
    fn progress(&self, stage: Option<StageKey>, update: impl FnOnce(&mut FetchRun)) {
        let mut current = self.lock_run();
        let Some(run) = current.as_mut() else {
            return;
        };
        update(run);
        self.events.publish(ProgressEvent::from_run(
            EventKind::Progress,
            self.platform(),
            run,
            stage,
        ));
    }

    fn stage_order(&self) -> Vec<StageKey> {
        let mut order = vec![StageKey::AssetDiscovery];
        for (dataset, fetch, store) in PIPELINE_STAGES {
            if self.client.supports(dataset) {
                order.push(fetch);
                order.push(store);
            }
        }
        if self.config.resample && self.profile.needs_resampling() {
            order.push(StageKey::Resample);
        }
        order
    }

    async fn execute_stages(&self, kind: RunKind, preloaded: Option<Vec<Asset>>) -> RunSummary {
        let platform = self.platform();
        let stages = self.stage_order();
        info!(stages = stages.len(), "Starting ingestion run");

        let start_event = {
            let mut current = self.lock_run();
            current.as_mut().map(|run| {
                run.tracker
                    .init_stages(&stages, &[(StageKey::AssetDiscovery, 1)]);
                run.tracker.update_stage(
                    StageKey::AssetDiscovery,
                    StageUpdate::status(StageStatus::Active),
                );
                ProgressEvent::from_run(
                    EventKind::Start,
                    platform,
                    run,
                    Some(StageKey::AssetDiscovery),
                )
                .with_message(format!("{kind} ingestion started for {platform}"))
            })
        };
        if let Some(event) = start_event {
            self.events.publish(event);
        }

        let assets = match self.discover_assets(preloaded).await {
            Ok(assets) => assets,
            Err(e) => {
                error!(error = %e, "Asset discovery failed");
                self.progress(Some(StageKey::AssetDiscovery), |run| {
                    run.systemic_failure = true;
                    run.record_error(platform.as_str(), &e);
                });
                return self.finalize(kind).await;
            }
        };

        let total = assets.len() as u64;
        self.progress(Some(StageKey::AssetDiscovery), |run| {
            run.total_assets = assets.len();
            run.tracker.update_stage(
                StageKey::AssetDiscovery,
                StageUpdate::status(StageStatus::Complete).with_completed(1),
            );
            for stage in stages.iter().filter(|s| **s != StageKey::AssetDiscovery) {
                run.tracker
                    .update_stage(*stage, StageUpdate::default().with_total(total));
            }
        });
        info!(assets = assets.len(), "Assets ready");

        let now = Utc::now().timestamp_millis();
        let window = RunWindow {
            kind,
            now,
            horizon: now - self.config.lookback_ms(),
        };

        tokio::join!(
            self.run_pipeline(&assets, window, self.funding_pipeline()),
            self.run_pipeline(&assets, window, self.candle_pipeline()),
            self.run_pipeline(&assets, window, self.open_interest_pipeline()),
            self.run_pipeline(&assets, window, self.ratio_pipeline()),
        );

        if self.client.is_banned() {
            warn!("Exchange ban received during run, remaining symbols were skipped");
            self.progress(None, |run| {
                run.record_error(
                    platform.as_str(),
                    "exchange ban received, remaining symbols skipped",
                );
            });
        }

        if stages.contains(&StageKey::Resample) {
            self.resample(&assets).await;
        }

        self.finalize(kind).await
    }

    /// Initial runs discover and register assets; incremental runs use the preloaded registry
    async fn discover_assets(&self, preloaded: Option<Vec<Asset>>) -> Result<Vec<Asset>, IngestError> {
        if let Some(assets) = preloaded {
            debug!(assets = assets.len(), "Using registered assets");
            return Ok(assets);
        }

        let discovered = self.client.list_assets().await?;
        let registered = self.stores.assets.bulk_upsert(&discovered).await?;
        let symbols: Vec<String> = registered.iter().map(|a| a.symbol.clone()).collect();
        let deactivated = self
            .stores
            .assets
            .deactivate_missing(self.platform(), &symbols)
            .await?;
        if deactivated > 0 {
            info!(deactivated, "Deactivated delisted assets");
        }
        Ok(registered)
    }

    fn funding_pipeline(&self) -> Pipeline<FundingPoint> {
        Pipeline {
            fetch_stage: StageKey::FundingFetch,
            store_stage: StageKey::FundingStore,
            interval: self.profile.funding_interval,
            repo: Arc::clone(&self.stores.funding),
            count: |counts| &mut counts.funding,
        }
    }

    fn candle_pipeline(&self) -> Pipeline<CandlePoint> {
        Pipeline {
            fetch_stage: StageKey::OhlcvFetch,
            store_stage: StageKey::OhlcvStore,
            interval: self.profile.ohlcv_interval,
            repo: Arc::clone(&self.stores.candles),
            count: |counts| &mut counts.ohlcv,
        }
    }

    fn open_interest_pipeline(&self) -> Pipeline<OpenInterestPoint> {
        Pipeline {
            fetch_stage: StageKey::OiFetch,
            store_stage: StageKey::OiStore,
            interval: self.profile.oi_interval,
            repo: Arc::clone(&self.stores.open_interest),
            count: |counts| &mut counts.open_interest,
        }
    }

    fn ratio_pipeline(&self) -> Pipeline<RatioPoint> {
        Pipeline {
            fetch_stage: StageKey::RatioFetch,
            store_stage: StageKey::RatioStore,
            interval: self.profile.ratio_interval,
            repo: Arc::clone(&self.stores.ratios),
            count: |counts| &mut counts.ratio,
        }
    }

    async fn run_pipeline<T: FetchDataset>(
        &self,
        assets: &[Asset],
        window: RunWindow,
        pipeline: Pipeline<T>,
    ) {
        if !self.client.supports(T::DATASET) {
            return;
        }
        let span = info_span!("pipeline", dataset = %T::DATASET);
        self.run_supported_pipeline(assets, window, pipeline)
            .instrument(span)
            .await;
    }

    async fn run_supported_pipeline<T: FetchDataset>(
        &self,
        assets: &[Asset],
        window: RunWindow,
        pipeline: Pipeline<T>,
    ) {
        self.progress(Some(pipeline.fetch_stage), |run| {
            run.tracker
                .update_stage(pipeline.fetch_stage, StageUpdate::status(StageStatus::Active));
            run.tracker
                .update_stage(pipeline.store_stage, StageUpdate::status(StageStatus::Active));
        });

        let latest: HashMap<AssetId, i64> = match window.kind {
            RunKind::Initial => HashMap::new(),
            RunKind::Incremental => {
                match pipeline
                    .repo
                    .find_latest_timestamps(assets, pipeline.interval)
                    .await
                {
                    Ok(latest) => latest,
                    Err(e) => {
                        warn!(error = %e, "Latest timestamp lookup failed, skipping pipeline");
                        self.progress(Some(pipeline.store_stage), |run| {
                            run.record_error(T::DATASET.as_str(), &e);
                        });
                        self.complete_pipeline(&pipeline);
                        return;
                    }
                }
            }
        };

        let jobs: Vec<SymbolJob> = assets
            .iter()
            .map(|asset| SymbolJob {
                asset: asset.clone(),
                window: FetchWindow::new(
                    latest.get(&asset.id).copied().unwrap_or(window.horizon),
                    window.now,
                ),
            })
            .collect();
        info!(symbols = jobs.len(), "Starting pipeline");

        let fetcher = BatchFetcher::new(
            Arc::clone(&self.client),
            PoolOptions::new(self.profile.concurrency).with_delay(self.profile.item_delay()),
        );
        let latest = &latest;
        let pipeline_ref = &pipeline;

        let report = fetcher
            .fetch_all::<T, _, _, _>(
                jobs,
                pipeline.interval,
                |progress: BatchProgress| {
                    self.progress(Some(pipeline_ref.fetch_stage), |run| {
                        run.current_asset = Some(progress.symbol.clone());
                        run.tracker.update_stage(
                            pipeline_ref.fetch_stage,
                            StageUpdate::default().with_current_item(progress.symbol),
                        );
                    });
                },
                move |job, result| async move {
                    let latest = latest.get(&job.asset.id).copied();
                    self.store_result(pipeline_ref, latest, job, result).await;
                },
            )
            .await;

        self.complete_pipeline(&pipeline);
        info!(
            invoked = report.invoked,
            aborted_workers = report.aborted_workers,
            "Pipeline finished"
        );
    }

    async fn store_result<T: FetchDataset>(
        &self,
        pipeline: &Pipeline<T>,
        latest: Option<i64>,
        job: SymbolJob,
        result: FetcherResult<Vec<T>>,
    ) {
        let symbol = job.asset.symbol.as_str();
        let dataset = T::DATASET;

        self.progress(Some(pipeline.fetch_stage), |run| {
            run.tracker.increment(pipeline.fetch_stage, 1);
        });

        let outcome: Result<usize, String> = match result {
            Ok(points) => {
                let (valid, invalid): (Vec<T>, Vec<T>) = filter_newer(points, latest)
                    .into_iter()
                    .partition(|p| p.validate().is_ok());
                if !invalid.is_empty() {
                    warn!(symbol, dropped = invalid.len(), "Dropping invalid points");
                    self.metrics.record_symbol_failure(dataset.as_str());
                    self.progress(Some(pipeline.store_stage), |run| {
                        run.record_error(
                            symbol,
                            format!("{} invalid {dataset} points dropped", invalid.len()),
                        );
                    });
                }
                if valid.is_empty() {
                    Ok(0)
                } else {
                    pipeline
                        .repo
                        .bulk_upsert(&job.asset, &valid)
                        .await
                        .map_err(|e| e.to_string())
                }
            }
            Err(e) => Err(e.to_string()),
        };

        match &outcome {
            Ok(stored) => {
                debug!(symbol, stored, "Stored points");
                self.metrics.record_stored(dataset.as_str(), *stored);
            }
            Err(e) => {
                warn!(symbol, error = %e, "Symbol failed");
                self.metrics.record_symbol_failure(dataset.as_str());
            }
        }

        self.progress(Some(pipeline.store_stage), |run| {
            run.tracker.increment(pipeline.store_stage, 1);
            run.current_asset = Some(symbol.to_string());
            match outcome {
                Ok(stored) => {
                    *(pipeline.count)(&mut run.counts) += stored as u64;
                    run.succeeded_items += 1;
                }
                Err(e) => run.record_error(symbol, e),
            }
        });
    }

    fn complete_pipeline<T: TimeSeriesPoint>(&self, pipeline: &Pipeline<T>) {
        let done = StageUpdate {
            current_item: Some(None),
            ..StageUpdate::status(StageStatus::Complete)
        };
        self.progress(Some(pipeline.store_stage), |run| {
            run.tracker.update_stage(pipeline.fetch_stage, done.clone());
            run.tracker.update_stage(pipeline.store_stage, done);
        });
    }

    async fn resample(&self, assets: &[Asset]) {
        self.progress(Some(StageKey::Resample), |run| {
            run.tracker
                .update_stage(StageKey::Resample, StageUpdate::status(StageStatus::Active));
        });

        for asset in assets {
            let outcome = resample_asset(self.stores.funding.as_ref(), asset).await;
            if let Err(e) = &outcome {
                warn!(symbol = %asset.symbol, error = %e, "Resampling failed");
            }
            self.progress(Some(StageKey::Resample), |run| {
                run.tracker.update_stage(
                    StageKey::Resample,
                    StageUpdate::default().with_current_item(asset.symbol.clone()),
                );
                run.tracker.increment(StageKey::Resample, 1);
                match outcome {
                    Ok(created) => {
                        run.counts.resampled_records += created as u64;
                        run.counts.resampled_assets += 1;
                        run.succeeded_items += 1;
                    }
                    Err(e) => run.record_error(&asset.symbol, format!("resample: {e}")),
                }
            });
        }

        self.progress(Some(StageKey::Resample), |run| {
            run.tracker.update_stage(
                StageKey::Resample,
                StageUpdate {
                    current_item: Some(None),
                    ..StageUpdate::status(StageStatus::Complete)
                },
            );
        });
    }

    async fn finalize(&self, kind: RunKind) -> RunSummary {
        let platform = self.platform();
        let finished = {
            let mut current = self.lock_run();
            current.as_mut().map(|run| {
                run.tracker.complete_all();
                run.current_asset = None;
                let summary = run.summary(platform);
                let event_kind = match summary.status {
                    RunStatus::Failed => EventKind::Error,
                    RunStatus::Success | RunStatus::Partial => EventKind::Complete,
                };
                let counts = summary.counts;
                let event = ProgressEvent::from_run(event_kind, platform, run, None).with_message(
                    format!(
                        "{kind} ingestion {}: {} funding, {} candles, {} open interest, {} ratio points, {} errors",
                        summary.status.as_str(),
                        counts.funding,
                        counts.ohlcv,
                        counts.open_interest,
                        counts.ratio,
                        summary.errors.len()
                    ),
                );
                (summary, event)
            })
        };

        let (summary, event) = finished.unwrap_or_else(|| {
            let mut run = FetchRun::new(kind);
            run.systemic_failure = true;
            run.record_error(platform.as_str(), "run state lost");
            let event = ProgressEvent::from_run(EventKind::Error, platform, &run, None);
            (run.summary(platform), event)
        });

        self.metrics.record_run(
            kind.as_str(),
            summary.status.as_str(),
            std::time::Duration::from_millis(summary.elapsed_ms),
        );
        info!(
            status = summary.status.as_str(),
            errors = summary.errors.len(),
            elapsed_ms = summary.elapsed_ms,
            "Ingestion run finished"
        );

        self.events.finish(event).await;
        summary
    }
}
