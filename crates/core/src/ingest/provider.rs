use crate::config::Settings;
use crate::domain::stock::{CandleWindow, Candles, NewsItem, Trends};
use crate::ingest::error::ProviderError;
use crate::ingest::types::{
    CandlesResponse, MetricsResponse, ProfileResponse, RawNewsItem, RecommendationEntry,
    UpstreamMetrics,
};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const NEWS_LOOKBACK_DAYS: i64 = 7;
pub const MAX_NEWS_ITEMS: usize = 5;

#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_name(&self, symbol: &str) -> Result<String, ProviderError>;

    async fn fetch_candles(
        &self,
        symbol: &str,
        window: CandleWindow,
    ) -> Result<Candles, ProviderError>;

    async fn fetch_metrics(&self, symbol: &str) -> Result<UpstreamMetrics, ProviderError>;

    async fn fetch_trends(&self, symbol: &str) -> Result<Trends, ProviderError>;

    async fn fetch_news(&self, symbol: &str) -> Result<Vec<NewsItem>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct FinnhubProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FinnhubProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.data_provider_base_url.clone();
        let api_key = settings.require_data_provider_api_key()?.to_string();

        let timeout_secs = std::env::var("DATA_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build data provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(&self.api_key)
            .map_err(|e| ProviderError::Unreachable(format!("invalid api key header: {e}")))?;
        headers.insert("X-Finnhub-Token", token);
        Ok(headers)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let res = self
            .http
            .get(self.url(endpoint))
            .headers(self.headers()?)
            .query(params)
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

        let status = res.status();
        if let Some(err) = status_error(status) {
            return Err(err);
        }

        let text = res
            .text()
            .await
            .map_err(|e| ProviderError::Unreachable(format!("failed to read body: {e}")))?;

        serde_json::from_str::<T>(&text)
            .map_err(|e| ProviderError::Malformed(format!("{endpoint}: {e}")))
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for FinnhubProvider {
    fn provider_name(&self) -> &'static str {
        "finnhub"
    }

    async fn fetch_name(&self, symbol: &str) -> Result<String, ProviderError> {
        let profile: ProfileResponse = self
            .get_json("stock/profile2", &[("symbol", symbol.to_string())])
            .await?;
        profile
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or(ProviderError::NotFound)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        window: CandleWindow,
    ) -> Result<Candles, ProviderError> {
        let to = Utc::now();
        let from = to - ChronoDuration::days(window.lookback_days);

        let raw: CandlesResponse = self
            .get_json(
                "stock/candle",
                &[
                    ("symbol", symbol.to_string()),
                    ("resolution", window.resolution.to_string()),
                    ("from", from.timestamp().to_string()),
                    ("to", to.timestamp().to_string()),
                ],
            )
            .await?;
        validate_candles(raw)
    }

    async fn fetch_metrics(&self, symbol: &str) -> Result<UpstreamMetrics, ProviderError> {
        let res: MetricsResponse = self
            .get_json(
                "stock/metric",
                &[("symbol", symbol.to_string()), ("metric", "all".to_string())],
            )
            .await?;
        res.metric
            .ok_or_else(|| ProviderError::Malformed("stock/metric: missing `metric`".to_string()))
    }

    async fn fetch_trends(&self, symbol: &str) -> Result<Trends, ProviderError> {
        let history: Vec<RecommendationEntry> = self
            .get_json("stock/recommendation", &[("symbol", symbol.to_string())])
            .await?;
        Ok(latest_trends(&history))
    }

    async fn fetch_news(&self, symbol: &str) -> Result<Vec<NewsItem>, ProviderError> {
        let today = Utc::now().date_naive();
        let from = today - ChronoDuration::days(NEWS_LOOKBACK_DAYS);

        let raw: Vec<RawNewsItem> = self
            .get_json(
                "company-news",
                &[
                    ("symbol", symbol.to_string()),
                    ("from", from.to_string()),
                    ("to", today.to_string()),
                ],
            )
            .await?;
        Ok(select_news(raw))
    }
}

fn status_error(status: StatusCode) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        StatusCode::NOT_FOUND => ProviderError::NotFound,
        _ => ProviderError::Unreachable(format!("HTTP {status}")),
    })
}

/// All five arrays must be present with equal length; partial series are rejected.
pub fn validate_candles(raw: CandlesResponse) -> Result<Candles, ProviderError> {
    let missing = |key: &str| ProviderError::Malformed(format!("candles: missing `{key}`"));

    let t = raw.t.ok_or_else(|| missing("t"))?;
    let o = raw.o.ok_or_else(|| missing("o"))?;
    let h = raw.h.ok_or_else(|| missing("h"))?;
    let l = raw.l.ok_or_else(|| missing("l"))?;
    let c = raw.c.ok_or_else(|| missing("c"))?;

    Candles::try_new(t, o, h, l, c).map_err(|e| ProviderError::Malformed(format!("candles: {e}")))
}

/// Latest analyst recommendation; no coverage at all is reported as all zeros.
pub fn latest_trends(history: &[RecommendationEntry]) -> Trends {
    let Some(latest) = history.first() else {
        return Trends::default();
    };
    Trends {
        strong_buy: latest.strong_buy,
        buy: latest.buy,
        hold: latest.hold,
        sell: latest.sell,
        strong_sell: latest.strong_sell,
    }
}

/// Keeps complete items only, newest first, at most [`MAX_NEWS_ITEMS`].
pub fn select_news(raw: Vec<RawNewsItem>) -> Vec<NewsItem> {
    let mut items: Vec<NewsItem> = raw
        .into_iter()
        .map(|r| NewsItem {
            datetime: r.datetime,
            headline: r.headline,
            summary: r.summary,
            image_url: r.image,
            source: r.source,
            url: r.url,
        })
        .filter(NewsItem::is_complete)
        .collect();

    items.sort_by(|a, b| b.datetime.cmp(&a.datetime));
    items.truncate(MAX_NEWS_ITEMS);
    items
}
