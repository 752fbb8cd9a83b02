//! REST implementation of [`ExchangeClient`]
//!
//! One client type serves all six platforms: the platform's [`ExchangeConfig`]
//! decides page sizes, weights and pagination style, its [`Dialect`] builds
//! requests and parses responses, and [`ExchangeHttpClient`] handles the rate
//! budget, retries and the ban flag.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::fetcher::dialect::{dialect_for, Dialect};
use crate::fetcher::exchange_config::{exchange_config, EndpointConfig, ExchangeConfig};
use crate::fetcher::http::{ApiRequest, ExchangeHttpClient};
use crate::fetcher::pagination::Paginator;
use crate::fetcher::shared_resources::{global_http_client, platform_rate_limiter};
use crate::fetcher::{ExchangeClient, FetchWindow, FetcherError, FetcherResult};
use crate::ingest::config::IngestConfig;
use crate::ingest::rate_limit::TokenBucketLimiter;
use crate::registry::PlatformProfile;
use crate::{
    Asset, CandlePoint, Dataset, FundingPoint, Interval, OpenInterestPoint, Platform, RatioPoint,
};

/// Exchange client speaking one platform's REST API
pub struct RestExchangeClient {
    http: ExchangeHttpClient,
    config: &'static ExchangeConfig,
    dialect: Box<dyn Dialect>,
    funding_interval: Interval,
    inter_page_delay: Duration,
}

impl RestExchangeClient {
    /// Create a client using the global HTTP client and the platform's shared limiter
    pub fn new(profile: &PlatformProfile, settings: &IngestConfig) -> Self {
        let config = exchange_config(profile.platform);
        Self::with_base_url(
            profile,
            settings,
            global_http_client(),
            config.base_url,
            platform_rate_limiter(profile),
        )
    }

    /// Create with custom base URL and limiter (for testing against a local server)
    pub fn with_base_url(
        profile: &PlatformProfile,
        settings: &IngestConfig,
        client: Arc<Client>,
        base_url: impl Into<String>,
        limiter: TokenBucketLimiter,
    ) -> Self {
        let platform = profile.platform;
        Self {
            http: ExchangeHttpClient::new(platform, client, base_url, limiter, settings.retry),
            config: exchange_config(platform),
            dialect: dialect_for(platform),
            funding_interval: profile.funding_interval,
            inter_page_delay: settings.inter_page_delay,
        }
    }

    fn endpoint(&self, dataset: Dataset) -> FetcherResult<EndpointConfig> {
        self.config
            .endpoint(dataset)
            .copied()
            .ok_or(FetcherError::Unsupported {
                platform: self.config.platform,
                dataset,
            })
    }

    fn paginator(&self, endpoint: &EndpointConfig) -> Paginator {
        Paginator::new(endpoint.style, endpoint.page_limit, self.inter_page_delay)
    }

    async fn fetch_json(&self, request: ApiRequest) -> FetcherResult<Value> {
        self.http.execute::<Value>(&request).await
    }
}

#[async_trait]
impl ExchangeClient for RestExchangeClient {
    fn platform(&self) -> Platform {
        self.config.platform
    }

    async fn list_assets(&self) -> FetcherResult<Vec<Asset>> {
        let request = self.dialect.assets_request().weight(self.config.assets_weight);
        let body = self.fetch_json(request).await?;
        let parsed = self.dialect.parse_assets(&body)?;

        let total = parsed.len();
        let assets: Vec<Asset> = parsed
            .into_iter()
            .filter(|asset| match asset.validate() {
                Ok(()) => true,
                Err(reason) => {
                    warn!(platform = %self.config.platform, %reason, "Skipping invalid asset");
                    false
                }
            })
            .collect();

        info!(
            platform = %self.config.platform,
            assets = assets.len(),
            skipped = total - assets.len(),
            "Discovered perpetual assets"
        );
        Ok(assets)
    }

    async fn fetch_funding_history(
        &self,
        symbol: &str,
        window: FetchWindow,
    ) -> FetcherResult<Vec<FundingPoint>> {
        let endpoint = self.endpoint(Dataset::Funding)?;
        let interval = self.funding_interval;

        let points = self
            .paginator(&endpoint)
            .collect(symbol, window, move |page| async move {
                let request = self.dialect.funding_request(symbol, &page).weight(endpoint.weight);
                let body = self.fetch_json(request).await?;
                self.dialect.parse_funding(symbol, interval, &body)
            })
            .await?;

        debug!(platform = %self.config.platform, symbol, points = points.len(), "Fetched funding history");
        Ok(points)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> FetcherResult<Vec<CandlePoint>> {
        let endpoint = self.endpoint(Dataset::Candles)?;

        let points = self
            .paginator(&endpoint)
            .collect(symbol, window, move |page| async move {
                let request = self
                    .dialect
                    .candles_request(symbol, interval, &page)
                    .weight(endpoint.weight);
                let body = self.fetch_json(request).await?;
                self.dialect.parse_candles(symbol, interval, &body)
            })
            .await?;

        debug!(platform = %self.config.platform, symbol, points = points.len(), "Fetched candles");
        Ok(points)
    }

    async fn fetch_open_interest(
        &self,
        symbol: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> FetcherResult<Vec<OpenInterestPoint>> {
        let endpoint = self.endpoint(Dataset::OpenInterest)?;

        let points = self
            .paginator(&endpoint)
            .collect(symbol, window, move |page| async move {
                let request = self
                    .dialect
                    .open_interest_request(symbol, interval, &page)?
                    .weight(endpoint.weight);
                let body = self.fetch_json(request).await?;
                self.dialect.parse_open_interest(symbol, interval, &body)
            })
            .await?;

        debug!(platform = %self.config.platform, symbol, points = points.len(), "Fetched open interest");
        Ok(points)
    }

    async fn fetch_long_short_ratio(
        &self,
        symbol: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> FetcherResult<Vec<RatioPoint>> {
        let endpoint = self.endpoint(Dataset::LongShortRatio)?;

        let points = self
            .paginator(&endpoint)
            .collect(symbol, window, move |page| async move {
                let request = self
                    .dialect
                    .ratio_request(symbol, interval, &page)?
                    .weight(endpoint.weight);
                let body = self.fetch_json(request).await?;
                self.dialect.parse_ratio(symbol, interval, &body)
            })
            .await?;

        debug!(platform = %self.config.platform, symbol, points = points.len(), "Fetched long/short ratio");
        Ok(points)
    }

    fn supports(&self, dataset: Dataset) -> bool {
        self.config.endpoint(dataset).is_some()
    }

    fn is_banned(&self) -> bool {
        self.http.is_banned()
    }

    fn reset_ban(&self) {
        self.http.reset_ban();
    }
}
