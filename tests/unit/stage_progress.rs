//! Stage tracker behavior over a realistic run layout

use perp_data_ingestor::ingest::progress::{StageProgressTracker, StageStatus, StageUpdate};
use perp_data_ingestor::ingest::run::{FetchRun, RunKind};
use perp_data_ingestor::ingest::{EventKind, ProgressEvent, StageKey};
use perp_data_ingestor::Platform;

const HOURLY_RUN: [StageKey; 6] = [
    StageKey::AssetDiscovery,
    StageKey::FundingFetch,
    StageKey::FundingStore,
    StageKey::OhlcvFetch,
    StageKey::OhlcvStore,
    StageKey::Resample,
];

fn hourly_tracker(assets: u64) -> StageProgressTracker {
    let mut tracker = StageProgressTracker::new();
    tracker.init_stages(&HOURLY_RUN, &[(StageKey::AssetDiscovery, 1)]);
    tracker.update_stage(
        StageKey::AssetDiscovery,
        StageUpdate::status(StageStatus::Complete).with_completed(1),
    );
    for key in &HOURLY_RUN[1..] {
        tracker.update_stage(*key, StageUpdate::default().with_total(assets));
    }
    tracker
}

#[test]
fn test_overall_progress_weights_by_symbol_count() {
    let mut tracker = hourly_tracker(10);

    // discovery: 100 * 1; everything else pending at 0 over 5 * 10
    assert_eq!(tracker.overall_percentage(), 2);

    tracker.increment(StageKey::FundingFetch, 10);
    tracker.increment(StageKey::FundingStore, 10);
    // (100 + 1000 + 1000) / 51
    assert_eq!(tracker.overall_percentage(), 41);

    tracker.complete_all();
    assert_eq!(tracker.overall_percentage(), 100);
}

#[test]
fn test_active_stage_tracks_first_active() {
    let mut tracker = hourly_tracker(3);
    assert_eq!(tracker.active_stage(), None);

    tracker.update_stage(StageKey::OhlcvFetch, StageUpdate::status(StageStatus::Active));
    tracker.update_stage(StageKey::FundingFetch, StageUpdate::status(StageStatus::Active));
    assert_eq!(tracker.active_stage(), Some(StageKey::FundingFetch));

    tracker.update_stage(StageKey::FundingFetch, StageUpdate::status(StageStatus::Complete));
    assert_eq!(tracker.active_stage(), Some(StageKey::OhlcvFetch));
}

#[test]
fn test_event_reports_only_present_datasets() {
    let mut run = FetchRun::new(RunKind::Incremental);
    run.tracker = hourly_tracker(2);
    run.total_assets = 2;
    run.counts.funding = 48;
    run.counts.resampled_records = 6;
    run.counts.resampled_assets = 2;
    run.tracker.increment(StageKey::FundingStore, 2);

    let event = ProgressEvent::from_run(EventKind::Progress, Platform::Hyperliquid, &run, None);
    assert_eq!(event.processed_assets, 2);
    assert_eq!(event.records_fetched, 48);
    assert_eq!(event.ohlcv_records_fetched, Some(0));
    assert_eq!(event.oi_records_fetched, None);
    assert_eq!(event.resample_records_created, Some(6));

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["phase"], "incremental");
    assert_eq!(json["platform"], "hyperliquid");
    assert!(json.get("ratioRecordsFetched").is_none());
}
