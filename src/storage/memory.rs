//! In-memory storage backend
//!
//! Rows are kept in ordered maps keyed by [`PointKey`], which gives the same
//! uniqueness and latest-timestamp semantics as the relational store's
//! `(platform, symbol, interval, timestamp)` unique index.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::storage::{AssetRegistry, PointRepository, StorageError, StorageResult, Stores};
use crate::{
    Asset, AssetId, CandlePoint, FundingPoint, Interval, OpenInterestPoint, Platform, PointKey,
    RatioPoint, TimeSeriesPoint,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key_range(asset: &Asset, interval: Interval, since: i64) -> (Bound<PointKey>, Bound<PointKey>) {
    let key = |timestamp| PointKey {
        platform: asset.platform,
        symbol: asset.symbol.clone(),
        interval,
        timestamp,
    };
    (Bound::Included(key(since)), Bound::Included(key(i64::MAX)))
}

/// Point repository backed by a `BTreeMap`
#[derive(Debug)]
pub struct MemoryRepository<T> {
    rows: Mutex<BTreeMap<PointKey, T>>,
    rejected_symbols: Mutex<HashSet<String>>,
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            rejected_symbols: Mutex::new(HashSet::new()),
        }
    }
}

impl<T: TimeSeriesPoint> MemoryRepository<T> {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows
    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    /// Whether the repository is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rows in key order
    pub fn all(&self) -> Vec<T> {
        lock(&self.rows).values().cloned().collect()
    }

    /// Make every write for `symbol` fail with [`StorageError::Rejected`]
    pub fn reject_symbol(&self, symbol: impl Into<String>) {
        lock(&self.rejected_symbols).insert(symbol.into());
    }

    fn check_accepts(&self, asset: &Asset) -> StorageResult<()> {
        if lock(&self.rejected_symbols).contains(&asset.symbol) {
            return Err(StorageError::Rejected(format!(
                "writes for {} are rejected",
                asset.symbol
            )));
        }
        Ok(())
    }

    fn latest(&self, asset: &Asset, interval: Interval) -> Option<i64> {
        lock(&self.rows)
            .range(key_range(asset, interval, i64::MIN))
            .next_back()
            .map(|(key, _)| key.timestamp)
    }
}

#[async_trait]
impl<T: TimeSeriesPoint> PointRepository<T> for MemoryRepository<T> {
    async fn bulk_upsert(&self, asset: &Asset, records: &[T]) -> StorageResult<usize> {
        self.check_accepts(asset)?;
        let mut rows = lock(&self.rows);
        let inserted = records
            .iter()
            .filter(|record| rows.insert(record.key(), (*record).clone()).is_none())
            .count();
        Ok(inserted)
    }

    async fn insert_if_absent(&self, asset: &Asset, records: &[T]) -> StorageResult<usize> {
        self.check_accepts(asset)?;
        let mut rows = lock(&self.rows);
        let mut inserted = 0;
        for record in records {
            let key = record.key();
            if !rows.contains_key(&key) {
                rows.insert(key, record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn find_latest_timestamp(
        &self,
        asset: &Asset,
        interval: Interval,
    ) -> StorageResult<Option<i64>> {
        Ok(self.latest(asset, interval))
    }

    async fn find_latest_timestamps(
        &self,
        assets: &[Asset],
        interval: Interval,
    ) -> StorageResult<HashMap<AssetId, i64>> {
        Ok(assets
            .iter()
            .filter_map(|asset| self.latest(asset, interval).map(|ts| (asset.id, ts)))
            .collect())
    }

    async fn find_points(
        &self,
        asset: &Asset,
        interval: Interval,
        since: Option<i64>,
    ) -> StorageResult<Vec<T>> {
        Ok(lock(&self.rows)
            .range(key_range(asset, interval, since.unwrap_or(i64::MIN)))
            .map(|(_, point)| point.clone())
            .collect())
    }
}

#[derive(Debug, Default)]
struct AssetTable {
    next_id: AssetId,
    rows: BTreeMap<(Platform, String), Asset>,
}

/// Asset registry backed by a `BTreeMap`
#[derive(Debug, Default)]
pub struct MemoryAssetRegistry {
    table: Mutex<AssetTable>,
}

impl MemoryAssetRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssetRegistry for MemoryAssetRegistry {
    async fn bulk_upsert(&self, assets: &[Asset]) -> StorageResult<Vec<Asset>> {
        let mut table = lock(&self.table);
        let mut stored = Vec::with_capacity(assets.len());

        for asset in assets {
            asset.validate().map_err(StorageError::Rejected)?;
            let key = (asset.platform, asset.symbol.clone());
            let id = match table.rows.get(&key) {
                Some(existing) => existing.id,
                None => {
                    table.next_id += 1;
                    table.next_id
                }
            };
            let row = Asset {
                id,
                is_active: true,
                ..asset.clone()
            };
            table.rows.insert(key, row.clone());
            stored.push(row);
        }

        Ok(stored)
    }

    async fn deactivate_missing(
        &self,
        platform: Platform,
        active_symbols: &[String],
    ) -> StorageResult<usize> {
        let active: HashSet<&str> = active_symbols.iter().map(String::as_str).collect();
        let mut table = lock(&self.table);
        let mut changed = 0;

        for asset in table.rows.values_mut() {
            if asset.platform == platform && asset.is_active && !active.contains(asset.symbol.as_str())
            {
                asset.is_active = false;
                changed += 1;
            }
        }

        Ok(changed)
    }

    async fn find_by_platform(&self, platform: Platform) -> StorageResult<Vec<Asset>> {
        Ok(lock(&self.table)
            .rows
            .values()
            .filter(|asset| asset.platform == platform)
            .cloned()
            .collect())
    }
}

/// Typed handles to a full set of in-memory repositories
#[derive(Debug, Clone, Default)]
pub struct MemoryStores {
    /// Asset registry
    pub assets: Arc<MemoryAssetRegistry>,
    /// Funding history
    pub funding: Arc<MemoryRepository<FundingPoint>>,
    /// Candles
    pub candles: Arc<MemoryRepository<CandlePoint>>,
    /// Open interest
    pub open_interest: Arc<MemoryRepository<OpenInterestPoint>>,
    /// Long/short ratio
    pub ratios: Arc<MemoryRepository<RatioPoint>>,
}

impl MemoryStores {
    /// Create empty repositories
    pub fn new() -> Self {
        Self::default()
    }

    /// Trait-object view sharing the same repositories
    pub fn stores(&self) -> Stores {
        Stores {
            assets: self.assets.clone(),
            funding: self.funding.clone(),
            candles: self.candles.clone(),
            open_interest: self.open_interest.clone(),
            ratios: self.ratios.clone(),
        }
    }

    /// Convert into the trait-object view
    pub fn into_stores(self) -> Stores {
        self.stores()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn funding(symbol: &str, timestamp: i64, interval: Interval) -> FundingPoint {
        FundingPoint {
            platform: Platform::Dydx,
            symbol: symbol.to_string(),
            timestamp,
            funding_rate: Decimal::new(1, 5),
            interval,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let repo = MemoryRepository::new();
        let asset = Asset::new(Platform::Dydx, "BTC-USD", "BTC", "USD");
        let points = vec![
            funding("BTC-USD", 1_000, Interval::OneHour),
            funding("BTC-USD", 2_000, Interval::OneHour),
        ];

        assert_eq!(repo.bulk_upsert(&asset, &points).await.unwrap(), 2);
        assert_eq!(repo.bulk_upsert(&asset, &points).await.unwrap(), 0);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_latest_timestamp_respects_symbol_and_interval() {
        let repo = MemoryRepository::new();
        let btc = Asset {
            id: 1,
            ..Asset::new(Platform::Dydx, "BTC-USD", "BTC", "USD")
        };
        let eth = Asset {
            id: 2,
            ..Asset::new(Platform::Dydx, "ETH-USD", "ETH", "USD")
        };
        let sol = Asset {
            id: 3,
            ..Asset::new(Platform::Dydx, "SOL-USD", "SOL", "USD")
        };

        repo.bulk_upsert(
            &btc,
            &[
                funding("BTC-USD", 1_000, Interval::OneHour),
                funding("BTC-USD", 5_000, Interval::EightHours),
            ],
        )
        .await
        .unwrap();
        repo.bulk_upsert(&eth, &[funding("ETH-USD", 3_000, Interval::OneHour)])
            .await
            .unwrap();

        let latest = repo
            .find_latest_timestamps(&[btc.clone(), eth, sol], Interval::OneHour)
            .await
            .unwrap();
        assert_eq!(latest.get(&1), Some(&1_000));
        assert_eq!(latest.get(&2), Some(&3_000));
        assert!(!latest.contains_key(&3));

        assert_eq!(
            repo.find_latest_timestamp(&btc, Interval::EightHours)
                .await
                .unwrap(),
            Some(5_000)
        );
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_existing() {
        let repo = MemoryRepository::new();
        let asset = Asset::new(Platform::Dydx, "BTC-USD", "BTC", "USD");
        let original = funding("BTC-USD", 1_000, Interval::EightHours);
        repo.bulk_upsert(&asset, &[original.clone()]).await.unwrap();

        let replacement = FundingPoint {
            funding_rate: Decimal::new(9, 1),
            ..original.clone()
        };
        assert_eq!(repo.insert_if_absent(&asset, &[replacement]).await.unwrap(), 0);
        assert_eq!(repo.all(), vec![original]);
    }

    #[tokio::test]
    async fn test_asset_registry_deactivates_missing() {
        let registry = MemoryAssetRegistry::new();
        let stored = registry
            .bulk_upsert(&[
                Asset::new(Platform::Okx, "BTC-USDT-SWAP", "BTC", "USDT"),
                Asset::new(Platform::Okx, "ETH-USDT-SWAP", "ETH", "USDT"),
            ])
            .await
            .unwrap();
        assert_eq!(stored[0].id, 1);
        assert_eq!(stored[1].id, 2);

        let changed = registry
            .deactivate_missing(Platform::Okx, &["BTC-USDT-SWAP".to_string()])
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let assets = registry.find_by_platform(Platform::Okx).await.unwrap();
        let eth = assets.iter().find(|a| a.symbol == "ETH-USDT-SWAP").unwrap();
        assert!(!eth.is_active);

        // Re-listing reactivates and keeps the id.
        let again = registry
            .bulk_upsert(&[Asset::new(Platform::Okx, "ETH-USDT-SWAP", "ETH", "USDT")])
            .await
            .unwrap();
        assert_eq!(again[0].id, 2);
        assert!(again[0].is_active);
    }
}
