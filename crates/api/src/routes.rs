use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use stockdash_core::domain::stock::{
    Candles, Granularity, NewsItem, StockDetails, StockOverview,
};
use stockdash_core::query::{ReadError, StockReader, MISSING_CATEGORY};
use stockdash_core::tracked::{TrackedSet, TrackedSource};

#[derive(Clone)]
pub struct AppState {
    reader: StockReader,
    tracked: TrackedSource,
    last_tracked: Arc<RwLock<Option<TrackedSet>>>,
}

impl AppState {
    pub fn new(reader: StockReader, tracked: TrackedSource) -> Self {
        Self {
            reader,
            tracked,
            last_tracked: Arc::new(RwLock::new(None)),
        }
    }

    /// Current tracked set. A failed reload falls back to the last set that loaded.
    async fn tracked_set(&self) -> Result<TrackedSet, ApiError> {
        match self.tracked.load().await {
            Ok(set) => {
                *self.last_tracked.write().await = Some(set.clone());
                Ok(set)
            }
            Err(err) => match self.last_tracked.read().await.clone() {
                Some(set) => {
                    tracing::warn!(error = %format!("{err:#}"), "tracked set reload failed; using last good set");
                    Ok(set)
                }
                None => {
                    tracing::error!(error = %format!("{err:#}"), "tracked set unavailable");
                    Err(ApiError::NotFound(MISSING_CATEGORY))
                }
            },
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stocks-overview", get(get_overview))
        .route("/stock-details", get(get_details))
        .route("/candles", get(get_candles))
        .route("/close7d", get(get_close_7d))
        .route("/company-news", get(get_news))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Every body, success or error, is wrapped as `{"message": ...}`.
#[derive(Debug, Serialize)]
struct Envelope<T> {
    message: T,
}

fn ok<T: Serialize>(message: T) -> Json<Envelope<T>> {
    Json(Envelope { message })
}

#[derive(Debug)]
enum ApiError {
    NotFound(&'static str),
    Internal(anyhow::Error),
}

impl From<ReadError> for ApiError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::NotFound(msg) => ApiError::NotFound(msg),
            ReadError::Internal(err) => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, ok(msg)).into_response(),
            ApiError::Internal(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %format!("{err:#}"), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, ok("internal error")).into_response()
            }
        }
    }
}

const MISSING_SYMBOL: &str = "Missing symbol";

#[derive(Debug, Deserialize)]
struct CategoryQuery {
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SymbolQuery {
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandlesQuery {
    symbol: Option<String>,
    #[serde(default)]
    granularity: Granularity,
}

fn require_symbol(raw: Option<String>) -> Result<String, ApiError> {
    let symbol = raw.unwrap_or_default().trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(ApiError::NotFound(MISSING_SYMBOL));
    }
    Ok(symbol)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_overview(
    State(state): State<AppState>,
    Query(q): Query<CategoryQuery>,
) -> Result<Json<Envelope<Vec<StockOverview>>>, ApiError> {
    let category = q.category.unwrap_or_default();
    let tracked = state.tracked_set().await?;
    let rows = state.reader.overview(&tracked, category.trim()).await?;
    Ok(ok(rows))
}

async fn get_details(
    State(state): State<AppState>,
    Query(q): Query<SymbolQuery>,
) -> Result<Json<Envelope<StockDetails>>, ApiError> {
    let symbol = require_symbol(q.symbol)?;
    Ok(ok(state.reader.detail(&symbol).await?))
}

async fn get_candles(
    State(state): State<AppState>,
    Query(q): Query<CandlesQuery>,
) -> Result<Json<Envelope<Candles>>, ApiError> {
    let symbol = require_symbol(q.symbol)?;
    Ok(ok(state.reader.candles(&symbol, q.granularity).await?))
}

async fn get_close_7d(
    State(state): State<AppState>,
    Query(q): Query<SymbolQuery>,
) -> Result<Json<Envelope<Vec<f64>>>, ApiError> {
    let symbol = require_symbol(q.symbol)?;
    Ok(ok(state.reader.close_7d(&symbol, Utc::now()).await?))
}

async fn get_news(
    State(state): State<AppState>,
    Query(q): Query<SymbolQuery>,
) -> Result<Json<Envelope<Vec<NewsItem>>>, ApiError> {
    let symbol = require_symbol(q.symbol)?;
    Ok(ok(state.reader.news(&symbol).await?))
}
