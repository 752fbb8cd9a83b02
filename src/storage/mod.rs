//! Storage interfaces
//!
//! The relational store lives outside this crate; ingestion talks to it only
//! through [`PointRepository`] and [`AssetRegistry`]. Implementations must be
//! idempotent: re-inserting a record with an existing key never creates a
//! second row.

use crate::{
    Asset, AssetId, CandlePoint, FundingPoint, Interval, OpenInterestPoint, Platform,
    RatioPoint, TimeSeriesPoint,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub mod memory;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The store refused the records
    #[error("storage rejected records: {0}")]
    Rejected(String),

    /// Backend failure (connection, query)
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Idempotent time-series repository for one point type
#[async_trait]
pub trait PointRepository<T: TimeSeriesPoint>: Send + Sync {
    /// Insert or replace records, returning how many keys were new
    async fn bulk_upsert(&self, asset: &Asset, records: &[T]) -> StorageResult<usize>;

    /// Insert records whose key is not yet stored, returning how many were inserted
    async fn insert_if_absent(&self, asset: &Asset, records: &[T]) -> StorageResult<usize>;

    /// Latest stored timestamp for an asset at an interval
    async fn find_latest_timestamp(
        &self,
        asset: &Asset,
        interval: Interval,
    ) -> StorageResult<Option<i64>>;

    /// Latest stored timestamps for many assets in one lookup
    ///
    /// Assets without stored points are absent from the map.
    async fn find_latest_timestamps(
        &self,
        assets: &[Asset],
        interval: Interval,
    ) -> StorageResult<HashMap<AssetId, i64>>;

    /// Stored points for an asset at an interval, ascending, from `since` inclusive
    async fn find_points(
        &self,
        asset: &Asset,
        interval: Interval,
        since: Option<i64>,
    ) -> StorageResult<Vec<T>>;
}

/// Registry of known assets per platform
#[async_trait]
pub trait AssetRegistry: Send + Sync {
    /// Insert or refresh assets, returning them with registry ids assigned
    async fn bulk_upsert(&self, assets: &[Asset]) -> StorageResult<Vec<Asset>>;

    /// Deactivate every asset of `platform` not in `active_symbols`, returning how many changed
    async fn deactivate_missing(
        &self,
        platform: Platform,
        active_symbols: &[String],
    ) -> StorageResult<usize>;

    /// All assets of a platform, active or not
    async fn find_by_platform(&self, platform: Platform) -> StorageResult<Vec<Asset>>;
}

/// The set of repositories an orchestrator writes to
#[derive(Clone)]
pub struct Stores {
    /// Asset registry
    pub assets: Arc<dyn AssetRegistry>,
    /// Funding history (native and resampled)
    pub funding: Arc<dyn PointRepository<FundingPoint>>,
    /// Candles
    pub candles: Arc<dyn PointRepository<CandlePoint>>,
    /// Open interest
    pub open_interest: Arc<dyn PointRepository<OpenInterestPoint>>,
    /// Long/short ratio
    pub ratios: Arc<dyn PointRepository<RatioPoint>>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
