use anyhow::ensure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Name,
    DailyCandles,
    IntradayCandles,
    Metrics,
    Trends,
    News,
}

impl DataKind {
    pub const ALL: [DataKind; 6] = [
        DataKind::Name,
        DataKind::DailyCandles,
        DataKind::IntradayCandles,
        DataKind::Metrics,
        DataKind::Trends,
        DataKind::News,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::Name => "name",
            DataKind::DailyCandles => "daily_candles",
            DataKind::IntradayCandles => "intraday_candles",
            DataKind::Metrics => "metrics",
            DataKind::Trends => "trends",
            DataKind::News => "news",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown data kind: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Daily,
    Intraday,
}

impl Granularity {
    pub fn kind(self) -> DataKind {
        match self {
            Granularity::Daily => DataKind::DailyCandles,
            Granularity::Intraday => DataKind::IntradayCandles,
        }
    }

    /// Upstream resolution and history length requested for this series.
    pub fn window(self) -> CandleWindow {
        match self {
            Granularity::Daily => CandleWindow {
                resolution: "D",
                lookback_days: 90,
            },
            Granularity::Intraday => CandleWindow {
                resolution: "1",
                lookback_days: 30,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandleWindow {
    pub resolution: &'static str,
    pub lookback_days: i64,
}

/// Parallel OHLC arrays keyed by unix-second timestamps.
///
/// Only [`Candles::try_new`] and deserialization through it build a value, so every
/// instance has equal-length arrays and non-decreasing timestamps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawCandleArrays")]
pub struct Candles {
    #[serde(rename = "t")]
    timestamps: Vec<i64>,
    #[serde(rename = "o")]
    open: Vec<f64>,
    #[serde(rename = "h")]
    high: Vec<f64>,
    #[serde(rename = "l")]
    low: Vec<f64>,
    #[serde(rename = "c")]
    close: Vec<f64>,
}

#[derive(Deserialize)]
struct RawCandleArrays {
    t: Vec<i64>,
    o: Vec<f64>,
    h: Vec<f64>,
    l: Vec<f64>,
    c: Vec<f64>,
}

impl TryFrom<RawCandleArrays> for Candles {
    type Error = anyhow::Error;

    fn try_from(raw: RawCandleArrays) -> anyhow::Result<Self> {
        Candles::try_new(raw.t, raw.o, raw.h, raw.l, raw.c)
    }
}

impl Candles {
    pub fn try_new(
        timestamps: Vec<i64>,
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
    ) -> anyhow::Result<Self> {
        let n = timestamps.len();
        ensure!(
            open.len() == n && high.len() == n && low.len() == n && close.len() == n,
            "candle arrays must have equal length (t={n}, o={}, h={}, l={}, c={})",
            open.len(),
            high.len(),
            low.len(),
            close.len()
        );
        ensure!(
            timestamps.windows(2).all(|w| w[0] <= w[1]),
            "candle timestamps must be non-decreasing"
        );

        Ok(Self {
            timestamps,
            open,
            high,
            low,
            close,
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn open(&self) -> &[f64] {
        &self.open
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn close(&self) -> &[f64] {
        &self.close
    }

    pub fn last_close(&self) -> Option<f64> {
        self.close.last().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceChanges {
    pub last24h: f64,
    pub last7d: f64,
    pub last30d: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMetrics {
    #[serde(flatten)]
    pub changes: PriceChanges,
    pub low_price_weekly: Option<f64>,
    pub low_date_weekly: Option<String>,
    pub high_price_weekly: Option<f64>,
    pub high_date_weekly: Option<String>,
    pub low_price_yearly: Option<f64>,
    pub low_date_yearly: Option<String>,
    pub high_price_yearly: Option<f64>,
    pub high_date_yearly: Option<String>,
    #[serde(rename = "priceRelativeToSP500Yearly")]
    pub price_relative_to_sp500_yearly: Option<f64>,
    pub market_cap: Option<f64>,
    pub dividend_per_share_yearly: Option<f64>,
    pub revenue_per_share_yearly: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trends {
    pub strong_buy: u32,
    pub buy: u32,
    pub hold: u32,
    pub sell: u32,
    pub strong_sell: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub datetime: i64,
    pub headline: String,
    pub summary: String,
    #[serde(rename = "image")]
    pub image_url: String,
    pub source: String,
    pub url: String,
}

impl NewsItem {
    pub fn is_complete(&self) -> bool {
        self.datetime > 0
            && [
                &self.headline,
                &self.summary,
                &self.image_url,
                &self.source,
                &self.url,
            ]
            .iter()
            .all(|s| !s.trim().is_empty())
    }
}

/// Stored payload; the variant decides which per-kind collection a record lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Name(String),
    DailyCandles(Candles),
    IntradayCandles(Candles),
    Metrics(StockMetrics),
    Trends(Trends),
    News(Vec<NewsItem>),
}

impl Payload {
    pub fn kind(&self) -> DataKind {
        match self {
            Payload::Name(_) => DataKind::Name,
            Payload::DailyCandles(_) => DataKind::DailyCandles,
            Payload::IntradayCandles(_) => DataKind::IntradayCandles,
            Payload::Metrics(_) => DataKind::Metrics,
            Payload::Trends(_) => DataKind::Trends,
            Payload::News(_) => DataKind::News,
        }
    }

    pub fn candles(granularity: Granularity, candles: Candles) -> Self {
        match granularity {
            Granularity::Daily => Payload::DailyCandles(candles),
            Granularity::Intraday => Payload::IntradayCandles(candles),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub symbol: String,
    pub last_update: DateTime<Utc>,
    pub payload: Payload,
}

impl Record {
    pub fn kind(&self) -> DataKind {
        self.payload.kind()
    }

    pub fn into_name(self) -> Option<String> {
        match self.payload {
            Payload::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn into_candles(self) -> Option<Candles> {
        match self.payload {
            Payload::DailyCandles(c) | Payload::IntradayCandles(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_metrics(self) -> Option<StockMetrics> {
        match self.payload {
            Payload::Metrics(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_trends(self) -> Option<Trends> {
        match self.payload {
            Payload::Trends(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_news(self) -> Option<Vec<NewsItem>> {
        match self.payload {
            Payload::News(items) => Some(items),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockOverview {
    pub name: String,
    pub symbol: String,
    pub price: f64,
    pub last24h: f64,
    pub last7d: f64,
    pub last30d: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockDetails {
    pub name: String,
    pub symbol: String,
    pub price: f64,
    #[serde(flatten)]
    pub metrics: StockMetrics,
    pub trends: Trends,
}
