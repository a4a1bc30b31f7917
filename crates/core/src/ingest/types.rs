use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    #[serde(default)]
    pub name: Option<String>,
}

/// Candle payload as returned upstream. Keys are optional so a missing array can be
/// reported as a shape error rather than a generic parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandlesResponse {
    pub t: Option<Vec<i64>>,
    pub o: Option<Vec<f64>>,
    pub h: Option<Vec<f64>>,
    pub l: Option<Vec<f64>>,
    pub c: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsResponse {
    pub metric: Option<UpstreamMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpstreamMetrics {
    #[serde(rename = "52WeekLow", default)]
    pub week52_low: Option<f64>,
    #[serde(rename = "52WeekLowDate", default)]
    pub week52_low_date: Option<String>,
    #[serde(rename = "52WeekHigh", default)]
    pub week52_high: Option<f64>,
    #[serde(rename = "52WeekHighDate", default)]
    pub week52_high_date: Option<String>,
    #[serde(rename = "priceRelativeToS&P50052Week", default)]
    pub price_relative_to_sp500_52week: Option<f64>,
    #[serde(rename = "marketCapitalization", default)]
    pub market_capitalization: Option<f64>,
    #[serde(rename = "dividendPerShareAnnual", default)]
    pub dividend_per_share_annual: Option<f64>,
    #[serde(rename = "revenuePerShareAnnual", default)]
    pub revenue_per_share_annual: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationEntry {
    #[serde(default)]
    pub strong_buy: u32,
    #[serde(default)]
    pub buy: u32,
    #[serde(default)]
    pub hold: u32,
    #[serde(default)]
    pub sell: u32,
    #[serde(default)]
    pub strong_sell: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNewsItem {
    #[serde(default)]
    pub datetime: i64,
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub url: String,
}
