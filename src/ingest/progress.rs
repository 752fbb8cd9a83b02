//! Stage-based progress tracking for ingestion runs.
//!
//! A run is a fixed, ordered list of stages (asset discovery, one fetch and one
//! store stage per dataset, resampling). Each stage carries its own counters;
//! the tracker derives per-stage and overall weighted percentages. The tracker
//! is a plain state container: status transitions are driven by the caller.

use serde::Serialize;

/// Named phase of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKey {
    /// Discover or load the platform's assets
    AssetDiscovery,
    /// Fetch funding history
    FundingFetch,
    /// Store funding history
    FundingStore,
    /// Fetch candles
    OhlcvFetch,
    /// Store candles
    OhlcvStore,
    /// Fetch open interest
    OiFetch,
    /// Store open interest
    OiStore,
    /// Fetch long/short ratio
    RatioFetch,
    /// Store long/short ratio
    RatioStore,
    /// Aggregate hourly funding into 8h buckets
    Resample,
}

impl StageKey {
    /// Stable kebab-case identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::AssetDiscovery => "asset-discovery",
            StageKey::FundingFetch => "funding-fetch",
            StageKey::FundingStore => "funding-store",
            StageKey::OhlcvFetch => "ohlcv-fetch",
            StageKey::OhlcvStore => "ohlcv-store",
            StageKey::OiFetch => "oi-fetch",
            StageKey::OiStore => "oi-store",
            StageKey::RatioFetch => "ratio-fetch",
            StageKey::RatioStore => "ratio-store",
            StageKey::Resample => "resample",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            StageKey::AssetDiscovery => "Discovering assets",
            StageKey::FundingFetch => "Fetching funding rates",
            StageKey::FundingStore => "Storing funding rates",
            StageKey::OhlcvFetch => "Fetching candles",
            StageKey::OhlcvStore => "Storing candles",
            StageKey::OiFetch => "Fetching open interest",
            StageKey::OiStore => "Storing open interest",
            StageKey::RatioFetch => "Fetching long/short ratio",
            StageKey::RatioStore => "Storing long/short ratio",
            StageKey::Resample => "Resampling funding",
        }
    }
}

impl std::fmt::Display for StageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Not started
    Pending,
    /// In progress
    Active,
    /// Finished
    Complete,
}

/// Partial update applied to one stage; unset fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageUpdate {
    /// New status
    pub status: Option<StageStatus>,
    /// New completed count (clamped to `[0, total]`)
    pub completed: Option<i64>,
    /// New total
    pub total: Option<u64>,
    /// Current item label; `Some(None)` clears it
    pub current_item: Option<Option<String>>,
}

impl StageUpdate {
    /// Update that only sets the status
    pub fn status(status: StageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Set the completed count
    pub fn with_completed(mut self, completed: i64) -> Self {
        self.completed = Some(completed);
        self
    }

    /// Set the total
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Set the current item label
    pub fn with_current_item(mut self, item: impl Into<String>) -> Self {
        self.current_item = Some(Some(item.into()));
        self
    }
}

/// Serializable view of one stage
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSnapshot {
    /// Stage key
    pub key: StageKey,
    /// Human-readable label
    pub label: &'static str,
    /// Lifecycle status
    pub status: StageStatus,
    /// Completed units
    pub completed: u64,
    /// Total units
    pub total: u64,
    /// Derived percentage (0-100)
    pub percentage: u8,
    /// Item currently being processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
}

#[derive(Debug, Clone)]
struct Stage {
    key: StageKey,
    status: StageStatus,
    completed: u64,
    total: u64,
    current_item: Option<String>,
}

impl Stage {
    fn percentage(&self) -> u8 {
        if self.total == 0 {
            return if self.status == StageStatus::Complete { 100 } else { 0 };
        }
        let pct = (self.completed as f64 / self.total as f64 * 100.0).round();
        pct.min(100.0) as u8
    }

    fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            key: self.key,
            label: self.key.label(),
            status: self.status,
            completed: self.completed,
            total: self.total,
            percentage: self.percentage(),
            current_item: self.current_item.clone(),
        }
    }
}

/// Ordered stage list of a single run
#[derive(Debug, Clone, Default)]
pub struct StageProgressTracker {
    stages: Vec<Stage>,
}

impl StageProgressTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all stages with `order`, every stage pending
    ///
    /// Stages missing from `totals` start with a total of 0.
    pub fn init_stages(&mut self, order: &[StageKey], totals: &[(StageKey, u64)]) {
        self.stages = order
            .iter()
            .map(|key| Stage {
                key: *key,
                status: StageStatus::Pending,
                completed: 0,
                total: totals
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, total)| *total)
                    .unwrap_or(0),
                current_item: None,
            })
            .collect();
    }

    /// Apply a partial update and return the stage's new snapshot
    ///
    /// Returns `None` for a key that is not part of this run.
    pub fn update_stage(&mut self, key: StageKey, update: StageUpdate) -> Option<StageSnapshot> {
        let stage = self.stages.iter_mut().find(|s| s.key == key)?;

        if let Some(total) = update.total {
            stage.total = total;
        }
        if let Some(status) = update.status {
            stage.status = status;
        }
        if let Some(completed) = update.completed {
            stage.completed = completed.clamp(0, stage.total as i64) as u64;
        } else if stage.completed > stage.total {
            stage.completed = stage.total;
        }
        if let Some(current_item) = update.current_item {
            stage.current_item = current_item;
        }

        Some(stage.snapshot())
    }

    /// Advance a stage's completed counter by `delta`
    pub fn increment(&mut self, key: StageKey, delta: u64) -> Option<StageSnapshot> {
        let completed = self.stages.iter().find(|s| s.key == key)?.completed;
        self.update_stage(
            key,
            StageUpdate {
                completed: Some(completed.saturating_add(delta) as i64),
                ..StageUpdate::default()
            },
        )
    }

    /// Mark every stage complete with `completed = total`
    pub fn complete_all(&mut self) {
        for stage in &mut self.stages {
            stage.status = StageStatus::Complete;
            stage.completed = stage.total;
            stage.current_item = None;
        }
    }

    /// Total-weighted average of all stage percentages
    pub fn overall_percentage(&self) -> u8 {
        if self.stages.is_empty() {
            return 0;
        }

        let (weighted, weight) = self.stages.iter().fold((0.0, 0.0), |(sum, w), stage| {
            let stage_weight = if stage.total == 0 { 1.0 } else { stage.total as f64 };
            (sum + f64::from(stage.percentage()) * stage_weight, w + stage_weight)
        });

        (weighted / weight).round().min(100.0) as u8
    }

    /// Snapshot of one stage
    pub fn snapshot(&self, key: StageKey) -> Option<StageSnapshot> {
        self.stages.iter().find(|s| s.key == key).map(Stage::snapshot)
    }

    /// Snapshots of all stages in run order
    pub fn snapshot_all(&self) -> Vec<StageSnapshot> {
        self.stages.iter().map(Stage::snapshot).collect()
    }

    /// Key of the first stage that is active, if any
    pub fn active_stage(&self) -> Option<StageKey> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Active)
            .map(|s| s.key)
    }
}
