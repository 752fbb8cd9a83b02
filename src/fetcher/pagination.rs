//! Generic pagination engine for exchange history endpoints
//!
//! Two walking patterns cover all supported exchanges:
//! - [`PaginationStyle::Window`]: one `[start, end]` request per page, ascending.
//!   A page at the ceiling is followed up only when the endpoint supports a
//!   forward cursor (`start = newest + 1`); otherwise the rest is an accepted gap.
//! - [`PaginationStyle::CursorBackward`]: newest-first pages walked backward with a
//!   "before" cursor set to the oldest timestamp of the previous page.
//!
//! Includes safety mechanisms:
//! - Maximum page count to prevent infinite loops
//! - Non-decreasing cursor detection
//! - A fixed courtesy delay between page requests

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::fetcher::{FetchWindow, FetcherError, FetcherResult};
use crate::ingest::config::MAX_PAGES;
use crate::TimeSeriesPoint;

/// How an endpoint exposes history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// Explicit start/end window with a page limit
    Window {
        /// Whether a full page can be continued by moving `start` past its newest point
        forward_cursor: bool,
    },
    /// Newest-first pages walked backward with a "before" cursor
    CursorBackward,
}

/// Parameters for one page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Oldest timestamp wanted on this page
    pub start: i64,
    /// Newest timestamp wanted on this page
    pub end: i64,
    /// Exclusive "before" cursor for backward walks (`None` on the first page)
    pub cursor: Option<i64>,
    /// Page size limit
    pub limit: usize,
}

impl PageRequest {
    /// Newest timestamp this page may contain: `cursor - 1` when walking backward
    pub fn upper_bound(&self) -> i64 {
        match self.cursor {
            Some(cursor) => (cursor - 1).min(self.end),
            None => self.end,
        }
    }
}

/// Page walker for one endpoint
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    style: PaginationStyle,
    limit: usize,
    inter_page_delay: Duration,
    max_pages: usize,
}

impl Paginator {
    /// Create a paginator
    pub fn new(style: PaginationStyle, limit: usize, inter_page_delay: Duration) -> Self {
        Self {
            style,
            limit: limit.max(1),
            inter_page_delay,
            max_pages: MAX_PAGES,
        }
    }

    /// Override the page cap
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Walk all pages of `window`, returning points ascending and deduplicated by timestamp
    ///
    /// # Errors
    /// Propagates the first page error, and fails when the page cap is exceeded.
    pub async fn collect<T, F, Fut>(
        &self,
        symbol: &str,
        window: FetchWindow,
        fetch_page: F,
    ) -> FetcherResult<Vec<T>>
    where
        T: TimeSeriesPoint,
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = FetcherResult<Vec<T>>>,
    {
        let mut points = match self.style {
            PaginationStyle::Window { forward_cursor } => {
                self.walk_window(symbol, window, forward_cursor, fetch_page)
                    .await?
            }
            PaginationStyle::CursorBackward => {
                self.walk_backward(symbol, window, fetch_page).await?
            }
        };

        points.sort_by_key(|p| p.timestamp());
        points.dedup_by_key(|p| p.timestamp());
        Ok(points)
    }

    async fn pause(&self, page: usize) {
        if page > 0 && !self.inter_page_delay.is_zero() {
            tokio::time::sleep(self.inter_page_delay).await;
        }
    }

    fn check_page_cap(&self, symbol: &str, page: usize) -> FetcherResult<()> {
        if page >= self.max_pages {
            return Err(FetcherError::ApiError(format!(
                "Max pages ({}) exceeded for symbol {symbol} - possible infinite loop",
                self.max_pages
            )));
        }
        Ok(())
    }

    async fn walk_window<T, F, Fut>(
        &self,
        symbol: &str,
        window: FetchWindow,
        forward_cursor: bool,
        mut fetch_page: F,
    ) -> FetcherResult<Vec<T>>
    where
        T: TimeSeriesPoint,
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = FetcherResult<Vec<T>>>,
    {
        let mut all = Vec::new();
        let mut start = window.start;
        let mut page = 0;

        while start <= window.end {
            self.check_page_cap(symbol, page)?;
            self.pause(page).await;

            let batch = fetch_page(PageRequest {
                start,
                end: window.end,
                cursor: None,
                limit: self.limit,
            })
            .await?;
            page += 1;

            let received = batch.len();
            let newest = batch.iter().map(TimeSeriesPoint::timestamp).max();
            all.extend(batch.into_iter().filter(|p| window.contains(p.timestamp())));

            debug!(symbol, page, received, "Window page received");

            if received < self.limit {
                break;
            }
            if !forward_cursor {
                debug!(
                    symbol,
                    limit = self.limit,
                    "Page at ceiling without a forward cursor, accepting gap"
                );
                break;
            }
            match newest {
                Some(newest) if newest >= start => start = newest + 1,
                _ => {
                    warn!(symbol, start, "Window cursor did not advance, stopping pagination");
                    break;
                }
            }
        }

        debug!(symbol, pages = page, points = all.len(), "Window pagination complete");
        Ok(all)
    }

    async fn walk_backward<T, F, Fut>(
        &self,
        symbol: &str,
        window: FetchWindow,
        mut fetch_page: F,
    ) -> FetcherResult<Vec<T>>
    where
        T: TimeSeriesPoint,
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = FetcherResult<Vec<T>>>,
    {
        let mut all = Vec::new();
        let mut cursor: Option<i64> = None;
        let mut page = 0;

        loop {
            self.check_page_cap(symbol, page)?;
            self.pause(page).await;

            let batch = fetch_page(PageRequest {
                start: window.start,
                end: window.end,
                cursor,
                limit: self.limit,
            })
            .await?;
            page += 1;

            let received = batch.len();
            let oldest = batch.iter().map(TimeSeriesPoint::timestamp).min();
            all.extend(batch.into_iter().filter(|p| window.contains(p.timestamp())));

            debug!(symbol, page, received, ?cursor, "Cursor page received");

            if received < self.limit {
                break;
            }
            let Some(oldest) = oldest else {
                break;
            };
            if oldest <= window.start {
                break;
            }
            if let Some(previous) = cursor {
                if oldest >= previous {
                    warn!(
                        symbol,
                        previous_cursor = previous,
                        oldest,
                        "Pagination cursor did not decrease, aborting walk"
                    );
                    break;
                }
            }
            cursor = Some(oldest);
        }

        debug!(symbol, pages = page, points = all.len(), "Cursor pagination complete");
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FundingPoint, Interval, Platform, HOUR_MS};
    use rust_decimal::Decimal;
    use std::cell::Cell;

    fn point(timestamp: i64) -> FundingPoint {
        FundingPoint {
            platform: Platform::Okx,
            symbol: "BTC-USDT-SWAP".to_string(),
            timestamp,
            funding_rate: Decimal::ZERO,
            interval: Interval::EightHours,
        }
    }

    #[tokio::test]
    async fn test_backward_walk_stops_at_horizon_with_full_pages() {
        let window = FetchWindow::new(100 * HOUR_MS, 200 * HOUR_MS);
        let calls = Cell::new(0);
        let paginator = Paginator::new(PaginationStyle::CursorBackward, 10, Duration::ZERO);

        let points = paginator
            .collect("BTC-USDT-SWAP", window, |req| {
                calls.set(calls.get() + 1);
                // Always a full page of hourly points just below the bound.
                let top = req.upper_bound();
                let page: Vec<_> = (0..10).map(|i| point(top - i * HOUR_MS)).collect();
                async move { Ok(page) }
            })
            .await
            .unwrap();

        assert_eq!(calls.get(), 11);
        assert_eq!(points.first().unwrap().timestamp, 100 * HOUR_MS);
        assert_eq!(points.last().unwrap().timestamp, 200 * HOUR_MS);
        assert_eq!(points.len(), 101);
    }

    #[tokio::test]
    async fn test_backward_walk_aborts_on_stuck_cursor() {
        let window = FetchWindow::new(0, 1_000 * HOUR_MS);
        let calls = Cell::new(0);
        let paginator = Paginator::new(PaginationStyle::CursorBackward, 3, Duration::ZERO);

        let points = paginator
            .collect("X", window, |_| {
                calls.set(calls.get() + 1);
                async { Ok(vec![point(500 * HOUR_MS), point(501 * HOUR_MS), point(502 * HOUR_MS)]) }
            })
            .await
            .unwrap();

        assert_eq!(calls.get(), 2);
        assert_eq!(points.len(), 3);
    }

    #[tokio::test]
    async fn test_window_full_page_without_cursor_is_gap() {
        let window = FetchWindow::new(0, 100 * HOUR_MS);
        let calls = Cell::new(0);
        let paginator = Paginator::new(
            PaginationStyle::Window { forward_cursor: false },
            5,
            Duration::ZERO,
        );

        let points = paginator
            .collect("BTC", window, |req| {
                calls.set(calls.get() + 1);
                let page: Vec<_> = (0..5).map(|i| point(req.start + i * HOUR_MS)).collect();
                async move { Ok(page) }
            })
            .await
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(points.len(), 5);
    }

    #[tokio::test]
    async fn test_window_forward_cursor_walks_to_end() {
        let window = FetchWindow::new(0, 23 * HOUR_MS);
        let paginator = Paginator::new(
            PaginationStyle::Window { forward_cursor: true },
            10,
            Duration::ZERO,
        );

        let points = paginator
            .collect("BTCUSDT", window, |req| {
                let page: Vec<_> = (0..10)
                    .map(|i| req.start + i * HOUR_MS)
                    .filter(|ts| *ts <= req.end)
                    .map(point)
                    .collect();
                async move { Ok(page) }
            })
            .await
            .unwrap();

        assert_eq!(points.len(), 24);
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_page_cap_is_an_error() {
        let window = FetchWindow::new(0, i64::MAX / 2);
        let paginator = Paginator::new(
            PaginationStyle::Window { forward_cursor: true },
            1,
            Duration::ZERO,
        )
        .with_max_pages(3);

        let result = paginator
            .collect("BTCUSDT", window, |req| async move { Ok(vec![point(req.start)]) })
            .await;
        assert!(matches!(result, Err(FetcherError::ApiError(_))));
    }

    #[tokio::test]
    async fn test_page_error_propagates() {
        let paginator = Paginator::new(PaginationStyle::CursorBackward, 10, Duration::ZERO);
        let result: FetcherResult<Vec<FundingPoint>> = paginator
            .collect("X", FetchWindow::new(0, 10), |_| async {
                Err(FetcherError::Banned { status: 418 })
            })
            .await;
        assert!(result.unwrap_err().is_ban());
    }
}
