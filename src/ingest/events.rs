//! Progress events and per-subscriber delivery
//!
//! The orchestrator is the only publisher. Every subscriber owns a bounded
//! channel: intermediate progress events are dropped for a subscriber whose
//! buffer is full, while terminal events and the trailing [`ProgressMessage::Done`]
//! wait for room (bounded by [`TERMINAL_SEND_TIMEOUT`]).

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ingest::config::TERMINAL_SEND_TIMEOUT;
use crate::ingest::progress::{StageKey, StageSnapshot};
use crate::ingest::run::{FetchRun, RunKind};
use crate::Platform;

/// Event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Run started
    Start,
    /// Stage update
    Progress,
    /// Run finished (success or partial)
    Complete,
    /// Run failed
    Error,
}

impl EventKind {
    /// Whether the event ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Complete | EventKind::Error)
    }
}

/// Progress event emitted on every stage update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Event type
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Platform of the run
    pub platform: Platform,
    /// Run kind
    pub phase: RunKind,
    /// Stage that triggered the event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageKey>,
    /// Snapshots of all stages
    pub stages: Vec<StageSnapshot>,
    /// Symbols in the run
    pub total_assets: usize,
    /// Symbols whose funding has been stored
    pub processed_assets: u64,
    /// Symbol most recently touched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_asset: Option<String>,
    /// Funding points stored
    pub records_fetched: u64,
    /// Candles stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ohlcv_records_fetched: Option<u64>,
    /// Open interest points stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oi_records_fetched: Option<u64>,
    /// Long/short ratio points stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio_records_fetched: Option<u64>,
    /// 8h buckets created by resampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resample_records_created: Option<u64>,
    /// Assets visited by resampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resample_assets_processed: Option<u64>,
    /// Live error list
    pub errors: Vec<String>,
    /// Overall weighted percentage
    pub percentage: u8,
    /// Free-form message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    /// Build an event from the current run state
    pub fn from_run(
        kind: EventKind,
        platform: Platform,
        run: &FetchRun,
        stage: Option<StageKey>,
    ) -> Self {
        let processed_assets = run
            .tracker
            .snapshot(StageKey::FundingStore)
            .map(|s| s.completed)
            .unwrap_or(0);
        let has_stage = |key: StageKey| run.tracker.snapshot(key).is_some();
        let counts = run.counts;

        Self {
            kind,
            platform,
            phase: run.kind,
            stage,
            stages: run.tracker.snapshot_all(),
            total_assets: run.total_assets,
            processed_assets,
            current_asset: run.current_asset.clone(),
            records_fetched: counts.funding,
            ohlcv_records_fetched: has_stage(StageKey::OhlcvStore).then_some(counts.ohlcv),
            oi_records_fetched: has_stage(StageKey::OiStore).then_some(counts.open_interest),
            ratio_records_fetched: has_stage(StageKey::RatioStore).then_some(counts.ratio),
            resample_records_created: has_stage(StageKey::Resample)
                .then_some(counts.resampled_records),
            resample_assets_processed: has_stage(StageKey::Resample)
                .then_some(counts.resampled_assets),
            errors: run.errors.clone(),
            percentage: run.tracker.overall_percentage(),
            message: None,
        }
    }

    /// Attach a message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Item delivered on a subscriber channel
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressMessage {
    /// A progress event
    Event(ProgressEvent),
    /// Sentinel sent after the terminal event; the channel closes next
    Done,
}

impl ProgressMessage {
    /// Whether this is the end-of-run sentinel
    pub fn is_done(&self) -> bool {
        matches!(self, ProgressMessage::Done)
    }

    /// JSON rendering, `{"type":"done"}` for the sentinel
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            ProgressMessage::Event(event) => serde_json::to_string(event),
            ProgressMessage::Done => Ok(r#"{"type":"done"}"#.to_string()),
        }
    }
}

/// Fan-out of progress messages to bounded subscriber channels
#[derive(Debug)]
pub struct EventHub {
    capacity: usize,
    subscribers: Mutex<Vec<mpsc::Sender<ProgressMessage>>>,
}

impl EventHub {
    /// Create a hub whose subscriber channels hold `capacity` messages
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::Sender<ProgressMessage>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber
    pub fn subscribe(&self) -> mpsc::Receiver<ProgressMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lock().push(tx);
        rx
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock().iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Deliver a non-terminal event, dropping it for subscribers that are full
    pub fn publish(&self, event: ProgressEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| match tx.try_send(ProgressMessage::Event(event.clone())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Subscriber buffer full, dropping progress event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Deliver the terminal event followed by `Done`, then release all subscribers
    pub async fn finish(&self, event: ProgressEvent) {
        let subscribers = std::mem::take(&mut *self.lock());
        let deliveries = subscribers.into_iter().map(|tx| {
            let event = event.clone();
            async move {
                for message in [ProgressMessage::Event(event), ProgressMessage::Done] {
                    match tokio::time::timeout(TERMINAL_SEND_TIMEOUT, tx.send(message)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => return,
                        Err(_) => {
                            warn!("Timed out delivering terminal progress message");
                            return;
                        }
                    }
                }
            }
        });
        futures::future::join_all(deliveries).await;
    }
}
