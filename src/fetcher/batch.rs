//! Batch fetching over many symbols
//!
//! [`BatchFetcher`] fans one dataset out over a list of symbol jobs through the
//! bounded worker pool. Each symbol's result is handed to a completion callback
//! as soon as it arrives, so callers store page results while other symbols are
//! still being fetched instead of buffering the whole batch.
//!
//! A ban ends the batch: the slot that observed it stops, and every other slot
//! stops before claiming its next symbol.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::fetcher::{ExchangeClient, FetchWindow, FetcherError, FetcherResult};
use crate::ingest::pool::{run_pool, PoolOptions, PoolReport};
use crate::{
    Asset, CandlePoint, Dataset, FundingPoint, Interval, OpenInterestPoint, RatioPoint,
    TimeSeriesPoint,
};

/// Point type that can be fetched through an [`ExchangeClient`]
#[async_trait]
pub trait FetchDataset: TimeSeriesPoint {
    /// Dataset this point type belongs to
    const DATASET: Dataset;

    /// Fetch one symbol's history
    async fn fetch(
        client: &dyn ExchangeClient,
        symbol: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> FetcherResult<Vec<Self>>;
}

#[async_trait]
impl FetchDataset for FundingPoint {
    const DATASET: Dataset = Dataset::Funding;

    // The funding interval is the platform's native one, not a request parameter
    async fn fetch(
        client: &dyn ExchangeClient,
        symbol: &str,
        _interval: Interval,
        window: FetchWindow,
    ) -> FetcherResult<Vec<Self>> {
        client.fetch_funding_history(symbol, window).await
    }
}

#[async_trait]
impl FetchDataset for CandlePoint {
    const DATASET: Dataset = Dataset::Candles;

    async fn fetch(
        client: &dyn ExchangeClient,
        symbol: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> FetcherResult<Vec<Self>> {
        client.fetch_candles(symbol, interval, window).await
    }
}

#[async_trait]
impl FetchDataset for OpenInterestPoint {
    const DATASET: Dataset = Dataset::OpenInterest;

    async fn fetch(
        client: &dyn ExchangeClient,
        symbol: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> FetcherResult<Vec<Self>> {
        client.fetch_open_interest(symbol, interval, window).await
    }
}

#[async_trait]
impl FetchDataset for RatioPoint {
    const DATASET: Dataset = Dataset::LongShortRatio;

    async fn fetch(
        client: &dyn ExchangeClient,
        symbol: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> FetcherResult<Vec<Self>> {
        client.fetch_long_short_ratio(symbol, interval, window).await
    }
}

/// One symbol to fetch
#[derive(Debug, Clone)]
pub struct SymbolJob {
    /// Registered asset
    pub asset: Asset,
    /// History window to fetch
    pub window: FetchWindow,
}

/// Progress of a batch, reported when a symbol is claimed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    /// Symbols whose fetch has started, including this one
    pub started: usize,
    /// Symbols in the batch
    pub total: usize,
    /// Symbol being fetched
    pub symbol: String,
}

/// Fan-out fetcher for one platform
#[derive(Clone)]
pub struct BatchFetcher {
    client: Arc<dyn ExchangeClient>,
    options: PoolOptions,
}

impl BatchFetcher {
    /// Create a batch fetcher running `options.concurrency` symbols at a time
    pub fn new(client: Arc<dyn ExchangeClient>, options: PoolOptions) -> Self {
        Self { client, options }
    }

    /// Client used for every fetch
    pub fn client(&self) -> &Arc<dyn ExchangeClient> {
        &self.client
    }

    /// Fetch `T` for every job
    ///
    /// `on_progress` runs when a symbol is claimed; `on_item` runs with each
    /// symbol's result, success or failure, before the slot claims its next
    /// symbol. Returns the pool report; a banned client yields aborted workers.
    pub async fn fetch_all<T, P, S, SFut>(
        &self,
        jobs: Vec<SymbolJob>,
        interval: Interval,
        on_progress: P,
        on_item: S,
    ) -> PoolReport
    where
        T: FetchDataset,
        P: Fn(BatchProgress),
        S: Fn(SymbolJob, FetcherResult<Vec<T>>) -> SFut,
        SFut: Future<Output = ()>,
    {
        let total = jobs.len();
        let started = AtomicUsize::new(0);
        let platform = self.client.platform();

        let report = run_pool(jobs, self.options.clone(), |job: SymbolJob| {
            let started = &started;
            let on_progress = &on_progress;
            let on_item = &on_item;
            async move {
                if self.client.is_banned() {
                    return Err(FetcherError::ApiError(format!(
                        "{platform} client is banned, not fetching {}",
                        job.asset.symbol
                    )));
                }

                on_progress(BatchProgress {
                    started: started.fetch_add(1, Ordering::SeqCst) + 1,
                    total,
                    symbol: job.asset.symbol.clone(),
                });

                let result = T::fetch(self.client.as_ref(), &job.asset.symbol, interval, job.window).await;
                let ban_status = match &result {
                    Err(FetcherError::Banned { status }) => Some(*status),
                    _ => None,
                };

                on_item(job, result).await;

                match ban_status {
                    Some(status) => Err(FetcherError::Banned { status }),
                    None => Ok(()),
                }
            }
        })
        .await;

        if report.aborted_workers > 0 {
            warn!(
                %platform,
                dataset = %T::DATASET,
                aborted = report.aborted_workers,
                "Batch stopped early"
            );
        }
        debug!(%platform, dataset = %T::DATASET, ?report, "Batch finished");
        report
    }
}
