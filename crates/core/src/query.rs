use crate::config::env_u64;
use crate::domain::stock::{
    Candles, DataKind, Granularity, NewsItem, StockDetails, StockMetrics, StockOverview,
};
use crate::pricing::{self, HORIZON_7D_SECS};
use crate::storage::Store;
use crate::tracked::TrackedSet;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Bounded polling used while a just-tracked symbol has not finished its first fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Some(n) = env_u64("OVERVIEW_RETRY_ATTEMPTS") {
            out.max_attempts = u32::try_from(n).unwrap_or(u32::MAX).max(1);
        }
        if let Some(ms) = env_u64("OVERVIEW_RETRY_BACKOFF_MS") {
            out.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("OVERVIEW_RETRY_MAX_BACKOFF_MS") {
            out.max_backoff = Duration::from_millis(ms);
        }

        out
    }

    /// Delay before attempt `attempt` (0-based). The first attempt never waits.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff.max(self.initial_backoff))
    }
}

#[derive(Debug)]
pub enum ReadError {
    NotFound(&'static str),
    Internal(anyhow::Error),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::NotFound(msg) => f.write_str(msg),
            ReadError::Internal(err) => write!(f, "store read failed: {err:#}"),
        }
    }
}

impl std::error::Error for ReadError {}

impl From<anyhow::Error> for ReadError {
    fn from(err: anyhow::Error) -> Self {
        ReadError::Internal(err)
    }
}

pub const MISSING_CATEGORY: &str = "Missing category";
pub const STOCK_NOT_FOUND: &str = "Stock could not be found";
pub const NO_CANDLES: &str = "No candles found";
pub const NO_NEWS: &str = "No news found";

/// Read operations served purely from the store. Nothing here calls upstream.
#[derive(Clone)]
pub struct StockReader {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl StockReader {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Overview rows for a tracked category, in category order. Symbols are polled
    /// concurrently; those still incomplete after the retry budget are left out.
    pub async fn overview(
        &self,
        tracked: &TrackedSet,
        category: &str,
    ) -> Result<Vec<StockOverview>, ReadError> {
        let symbols = tracked
            .group(category)
            .ok_or(ReadError::NotFound(MISSING_CATEGORY))?;

        let mut tasks = JoinSet::new();
        for (idx, symbol) in symbols.iter().enumerate() {
            let reader = self.clone();
            let symbol = symbol.clone();
            tasks.spawn(async move { (idx, reader.poll_overview_row(&symbol).await) });
        }

        let mut rows: Vec<Option<StockOverview>> = vec![None; symbols.len()];
        while let Some(joined) = tasks.join_next().await {
            let (idx, polled) = joined.context("overview poll task aborted")?;
            match polled? {
                Some(row) => rows[idx] = Some(row),
                None => {
                    tracing::debug!(symbol = %symbols[idx], attempts = self.retry.max_attempts, "symbol incomplete; omitted from overview");
                }
            }
        }
        Ok(rows.into_iter().flatten().collect())
    }

    async fn poll_overview_row(&self, symbol: &str) -> anyhow::Result<Option<StockOverview>> {
        for attempt in 0..self.retry.max_attempts {
            let delay = self.retry.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if let Some(row) = self.overview_row(symbol).await? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    async fn overview_row(&self, symbol: &str) -> anyhow::Result<Option<StockOverview>> {
        if !self.store.is_complete(symbol).await? {
            return Ok(None);
        }
        let (Some(name), Some(price), Some(metrics)) = (
            self.name(symbol).await?,
            self.price(symbol).await?,
            self.metrics(symbol).await?,
        ) else {
            return Ok(None);
        };

        Ok(Some(StockOverview {
            name,
            symbol: symbol.to_string(),
            price,
            last24h: metrics.changes.last24h,
            last7d: metrics.changes.last7d,
            last30d: metrics.changes.last30d,
        }))
    }

    pub async fn detail(&self, symbol: &str) -> Result<StockDetails, ReadError> {
        let name = self.name(symbol).await?;
        let price = self.price(symbol).await?;
        let metrics = self.metrics(symbol).await?;
        let trends = self
            .store
            .get(symbol, DataKind::Trends)
            .await?
            .and_then(|r| r.into_trends());

        match (name, price, metrics, trends) {
            (Some(name), Some(price), Some(metrics), Some(trends)) => Ok(StockDetails {
                name,
                symbol: symbol.to_string(),
                price,
                metrics,
                trends,
            }),
            _ => Err(ReadError::NotFound(STOCK_NOT_FOUND)),
        }
    }

    pub async fn candles(&self, symbol: &str, granularity: Granularity) -> Result<Candles, ReadError> {
        self.series(symbol, granularity)
            .await?
            .ok_or(ReadError::NotFound(NO_CANDLES))
    }

    /// Intraday closes from the last 7 days, computed at request time.
    pub async fn close_7d(&self, symbol: &str, now: DateTime<Utc>) -> Result<Vec<f64>, ReadError> {
        let intraday = self.candles(symbol, Granularity::Intraday).await?;
        Ok(pricing::closes_since(&intraday, now, HORIZON_7D_SECS))
    }

    pub async fn news(&self, symbol: &str) -> Result<Vec<NewsItem>, ReadError> {
        self.store
            .get(symbol, DataKind::News)
            .await?
            .and_then(|r| r.into_news())
            .ok_or(ReadError::NotFound(NO_NEWS))
    }

    async fn name(&self, symbol: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .store
            .get(symbol, DataKind::Name)
            .await?
            .and_then(|r| r.into_name()))
    }

    /// Current price: close of the most recent intraday candle.
    async fn price(&self, symbol: &str) -> anyhow::Result<Option<f64>> {
        Ok(self
            .series(symbol, Granularity::Intraday)
            .await?
            .and_then(|c| c.last_close()))
    }

    async fn metrics(&self, symbol: &str) -> anyhow::Result<Option<StockMetrics>> {
        Ok(self
            .store
            .get(symbol, DataKind::Metrics)
            .await?
            .and_then(|r| r.into_metrics()))
    }

    async fn series(&self, symbol: &str, granularity: Granularity) -> anyhow::Result<Option<Candles>> {
        Ok(self
            .store
            .get(symbol, granularity.kind())
            .await?
            .and_then(|r| r.into_candles()))
    }
}
