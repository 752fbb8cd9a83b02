//! Funding resampling into canonical 8-hour buckets
//!
//! Buckets are aligned to 00:00, 08:00 and 16:00 UTC. A bucket is only
//! materialized when all 8 of its hourly points are stored, and its rate is the
//! sum of the hourly rates. Buckets already stored are never overwritten.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

use crate::storage::{PointRepository, StorageResult};
use crate::{Asset, FundingPoint, Interval, HOUR_MS};

const BUCKET_MS: i64 = 8 * HOUR_MS;
const POINTS_PER_BUCKET: usize = 8;

/// Start of the 8h bucket containing `timestamp`
pub fn bucket_start(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(BUCKET_MS)
}

/// Aggregate hourly points of one symbol into complete 8h buckets
///
/// Points that are not hourly, not on an hour boundary, or that leave a bucket
/// incomplete contribute nothing. Output is ordered by bucket start.
pub fn resample_to_eight_hours(points: &[FundingPoint]) -> Vec<FundingPoint> {
    let mut buckets: BTreeMap<i64, BTreeMap<i64, &FundingPoint>> = BTreeMap::new();
    for point in points {
        if point.interval != Interval::OneHour || point.timestamp.rem_euclid(HOUR_MS) != 0 {
            continue;
        }
        buckets
            .entry(bucket_start(point.timestamp))
            .or_default()
            .insert(point.timestamp, point);
    }

    buckets
        .into_iter()
        .filter_map(|(start, hours)| {
            if hours.len() != POINTS_PER_BUCKET {
                return None;
            }
            let contiguous = hours
                .keys()
                .enumerate()
                .all(|(i, ts)| *ts == start + i as i64 * HOUR_MS);
            if !contiguous {
                return None;
            }

            let first = hours.values().next()?;
            let funding_rate = hours.values().map(|p| p.funding_rate).sum::<Decimal>();
            Some(FundingPoint {
                platform: first.platform,
                symbol: first.symbol.clone(),
                timestamp: start,
                funding_rate,
                interval: Interval::EightHours,
            })
        })
        .collect()
}

/// Resample one asset's stored hourly funding, returning the buckets created
///
/// Only hours at or after the bucket following the latest stored 8h point are
/// read, so repeated runs do not rescan the full history.
pub async fn resample_asset(
    repo: &dyn PointRepository<FundingPoint>,
    asset: &Asset,
) -> StorageResult<usize> {
    let since = repo
        .find_latest_timestamp(asset, Interval::EightHours)
        .await?
        .map(|latest| latest + BUCKET_MS);

    let hourly = repo.find_points(asset, Interval::OneHour, since).await?;
    let buckets = resample_to_eight_hours(&hourly);
    if buckets.is_empty() {
        return Ok(0);
    }

    let created = repo.insert_if_absent(asset, &buckets).await?;
    debug!(
        symbol = %asset.symbol,
        hourly = hourly.len(),
        created,
        "Resampled funding"
    );
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryRepository;
    use crate::Platform;

    // 2024-01-01T00:00:00Z
    const DAY_START: i64 = 1_704_067_200_000;

    fn hourly(offset_hours: i64, rate: i64) -> FundingPoint {
        FundingPoint {
            platform: Platform::Hyperliquid,
            symbol: "BTC".to_string(),
            timestamp: DAY_START + offset_hours * HOUR_MS,
            funding_rate: Decimal::new(rate, 6),
            interval: Interval::OneHour,
        }
    }

    #[test]
    fn test_full_bucket_sums_rates() {
        let points: Vec<_> = (0..8).map(|h| hourly(h, h + 1)).collect();
        let buckets = resample_to_eight_hours(&points);

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].timestamp, DAY_START);
        assert_eq!(buckets[0].interval, Interval::EightHours);
        // 1+2+...+8 = 36
        assert_eq!(buckets[0].funding_rate, Decimal::new(36, 6));
    }

    #[test]
    fn test_seven_points_emit_nothing() {
        let points: Vec<_> = (0..7).map(|h| hourly(h, 1)).collect();
        assert!(resample_to_eight_hours(&points).is_empty());
    }

    #[test]
    fn test_misaligned_run_emits_nothing() {
        // 9 contiguous hours starting at 03:00 straddle two buckets.
        let points: Vec<_> = (3..12).map(|h| hourly(h, 1)).collect();
        assert!(resample_to_eight_hours(&points).is_empty());
    }

    #[test]
    fn test_gap_inside_bucket_emits_nothing() {
        let mut points: Vec<_> = (0..8).map(|h| hourly(h, 1)).collect();
        points[3].timestamp += 30 * 60 * 1000;
        assert!(resample_to_eight_hours(&points).is_empty());
    }

    #[test]
    fn test_multiple_buckets_only_complete_ones() {
        let points: Vec<_> = (0..20).map(|h| hourly(h, 1)).collect();
        let buckets = resample_to_eight_hours(&points);
        let starts: Vec<_> = buckets.iter().map(|b| b.timestamp).collect();
        assert_eq!(starts, vec![DAY_START, DAY_START + 8 * HOUR_MS]);
    }

    #[tokio::test]
    async fn test_resample_asset_is_insert_if_absent() {
        let repo = MemoryRepository::new();
        let asset = Asset::new(Platform::Hyperliquid, "BTC", "BTC", "USD");
        let points: Vec<_> = (0..16).map(|h| hourly(h, 1)).collect();
        repo.bulk_upsert(&asset, &points).await.unwrap();

        assert_eq!(resample_asset(&repo, &asset).await.unwrap(), 2);
        assert_eq!(resample_asset(&repo, &asset).await.unwrap(), 0);
        assert_eq!(repo.len(), 18);
    }
}
