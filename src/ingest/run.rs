//! In-flight run state and the summary returned when a run ends

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::ingest::progress::StageProgressTracker;
use crate::Platform;

/// Kind of ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// Full history back to the lookback horizon
    Initial,
    /// Only points newer than the stored maximum
    Incremental,
}

impl RunKind {
    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Initial => "initial",
            RunKind::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// No errors
    Success,
    /// Some per-symbol errors alongside some successes
    Partial,
    /// Systemic failure, or errors with nothing fetched and stored
    Failed,
}

impl RunStatus {
    /// Derive the status from the run outcome
    pub fn from_outcome(systemic_failure: bool, error_count: usize, succeeded: usize) -> Self {
        if systemic_failure {
            RunStatus::Failed
        } else if error_count == 0 {
            RunStatus::Success
        } else if succeeded == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }

    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

/// Records written per dataset during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCounts {
    /// Funding points stored
    pub funding: u64,
    /// Candles stored
    pub ohlcv: u64,
    /// Open interest points stored
    pub open_interest: u64,
    /// Long/short ratio points stored
    pub ratio: u64,
    /// 8h buckets created by resampling
    pub resampled_records: u64,
    /// Assets visited by resampling
    pub resampled_assets: u64,
}

/// One in-flight ingestion
#[derive(Debug, Clone)]
pub struct FetchRun {
    /// Run kind
    pub kind: RunKind,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    started: Instant,
    /// Stage counters
    pub tracker: StageProgressTracker,
    /// Stored record counts
    pub counts: RecordCounts,
    /// Accumulated `"<symbol>: <error>"` strings
    pub errors: Vec<String>,
    /// Symbols in the run
    pub total_assets: usize,
    /// Most recent symbol touched by any pipeline
    pub current_asset: Option<String>,
    /// Symbol results fetched and stored without error, across every stage
    pub succeeded_items: usize,
    /// Set when the run failed before any useful work
    pub systemic_failure: bool,
}

impl FetchRun {
    /// Start a new run
    pub fn new(kind: RunKind) -> Self {
        Self {
            kind,
            started_at: Utc::now(),
            started: Instant::now(),
            tracker: StageProgressTracker::new(),
            counts: RecordCounts::default(),
            errors: Vec::new(),
            total_assets: 0,
            current_asset: None,
            succeeded_items: 0,
            systemic_failure: false,
        }
    }

    /// Time since the run started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record a per-symbol failure
    pub fn record_error(&mut self, symbol: &str, error: impl std::fmt::Display) {
        self.errors.push(format!("{symbol}: {error}"));
    }

    /// Status derived from what happened so far
    pub fn status(&self) -> RunStatus {
        RunStatus::from_outcome(self.systemic_failure, self.errors.len(), self.succeeded_items)
    }

    /// Summary of the finished run
    pub fn summary(&self, platform: Platform) -> RunSummary {
        RunSummary {
            platform,
            kind: self.kind,
            status: self.status(),
            started_at: self.started_at,
            elapsed_ms: self.elapsed().as_millis() as u64,
            total_assets: self.total_assets,
            counts: self.counts,
            errors: self.errors.clone(),
        }
    }
}

/// Outcome of a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Platform
    pub platform: Platform,
    /// Run kind
    pub kind: RunKind,
    /// Final status
    pub status: RunStatus,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Run duration in milliseconds
    pub elapsed_ms: u64,
    /// Symbols in the run
    pub total_assets: usize,
    /// Stored record counts
    pub counts: RecordCounts,
    /// Per-symbol errors
    pub errors: Vec<String>,
}
