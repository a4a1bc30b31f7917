use crate::config::env_u64;
use crate::domain::stock::{DataKind, Granularity, Payload};
use crate::ingest::error::ProviderError;
use crate::ingest::provider::MarketDataProvider;
use crate::pricing;
use crate::storage::Store;
use crate::tracked::TrackedSource;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Maximum age per kind before a record is refetched. Names have no entry: a stored
/// name is never refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshIntervals {
    pub daily_candles: Duration,
    pub intraday_candles: Duration,
    pub news: Duration,
    pub metrics: Duration,
    pub trends: Duration,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            daily_candles: Duration::from_secs(60),
            intraday_candles: Duration::from_secs(60),
            news: Duration::from_secs(2 * 60),
            metrics: Duration::from_secs(5 * 60),
            trends: Duration::from_secs(15 * 60),
        }
    }
}

impl RefreshIntervals {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        let read = |key: &str, slot: &mut Duration| {
            if let Some(secs) = env_u64(key) {
                *slot = Duration::from_secs(secs);
            }
        };

        read("REFRESH_DAILY_CANDLES_SECS", &mut out.daily_candles);
        read("REFRESH_INTRADAY_CANDLES_SECS", &mut out.intraday_candles);
        read("REFRESH_NEWS_SECS", &mut out.news);
        read("REFRESH_METRICS_SECS", &mut out.metrics);
        read("REFRESH_TRENDS_SECS", &mut out.trends);
        out
    }

    pub fn interval(&self, kind: DataKind) -> Option<Duration> {
        match kind {
            DataKind::Name => None,
            DataKind::DailyCandles => Some(self.daily_candles),
            DataKind::IntradayCandles => Some(self.intraday_candles),
            DataKind::News => Some(self.news),
            DataKind::Metrics => Some(self.metrics),
            DataKind::Trends => Some(self.trends),
        }
    }
}

pub const DEFAULT_TICK: Duration = Duration::from_secs(10);

pub fn tick_from_env() -> Duration {
    env_u64("REFRESH_TICK_SECS")
        .filter(|&s| s > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TICK)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Fresh,
    Updated,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolReport {
    pub symbol: String,
    pub outcomes: Vec<(DataKind, Outcome)>,
}

impl SymbolReport {
    pub fn outcome(&self, kind: DataKind) -> Option<Outcome> {
        self.outcomes.iter().find(|(k, _)| *k == kind).map(|(_, o)| *o)
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub symbols: usize,
    pub updated: usize,
    pub failed: usize,
    pub panicked: usize,
}

pub struct Refresher {
    store: Arc<dyn Store>,
    provider: Arc<dyn MarketDataProvider>,
    intervals: RefreshIntervals,
}

impl Refresher {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn MarketDataProvider>,
        intervals: RefreshIntervals,
    ) -> Self {
        Self {
            store,
            provider,
            intervals,
        }
    }

    /// Runs forever on a fixed period. Ticks never overlap; a slow tick delays the next.
    pub async fn run(self: Arc<Self>, tracked: TrackedSource, period: Duration) {
        tracing::info!(
            provider = self.provider.provider_name(),
            store = self.store.backend_name(),
            ?period,
            "refresh loop started"
        );

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut state = LoopState::default();

        loop {
            ticker.tick().await;
            self.tick(&tracked, &mut state).await;
        }
    }

    /// A single tick, for one-shot runs.
    pub async fn run_once(self: Arc<Self>, tracked: &TrackedSource) -> TickReport {
        let mut state = LoopState::default();
        self.tick(tracked, &mut state).await
    }

    async fn tick(self: &Arc<Self>, tracked: &TrackedSource, state: &mut LoopState) -> TickReport {
        let symbols = match tracked.load().await {
            Ok(set) => set.symbols(),
            Err(err) => match &state.last_symbols {
                Some(prev) => {
                    tracing::warn!(error = %format!("{err:#}"), "tracked set reload failed; reusing previous set");
                    prev.clone()
                }
                None => {
                    tracing::error!(error = %format!("{err:#}"), "tracked set unavailable; skipping tick");
                    return TickReport::default();
                }
            },
        };
        state.last_symbols = Some(symbols.clone());

        if state.pruned_for.as_ref() != Some(&symbols) {
            match self.store.prune(&symbols).await {
                Ok(removed) => {
                    tracing::info!(active = symbols.len(), removed, "pruned store to tracked set");
                    state.pruned_for = Some(symbols.clone());
                }
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "store prune failed; will retry next tick");
                }
            }
        }

        self.refresh_all(symbols).await
    }

    /// Refreshes every symbol as an isolated task and waits for all of them.
    pub async fn refresh_all(self: &Arc<Self>, symbols: BTreeSet<String>) -> TickReport {
        let t0 = std::time::Instant::now();
        let mut report = TickReport {
            symbols: symbols.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for symbol in symbols {
            let this = Arc::clone(self);
            tasks.spawn(async move { this.refresh_symbol(&symbol).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(symbol_report) => {
                    report.updated += symbol_report.count(Outcome::Updated);
                    report.failed += symbol_report.count(Outcome::Failed);
                }
                Err(err) => {
                    report.panicked += 1;
                    tracing::error!(error = %err, "symbol refresh task aborted");
                }
            }
        }

        tracing::info!(
            symbols = report.symbols,
            updated = report.updated,
            failed = report.failed,
            panicked = report.panicked,
            elapsed_ms = t0.elapsed().as_millis(),
            "refresh tick finished"
        );
        report
    }

    /// Refreshes all kinds of one symbol. Metrics wait for both candle series, since
    /// they are derived from the stored candles.
    pub async fn refresh_symbol(&self, symbol: &str) -> SymbolReport {
        let now = Utc::now();

        let candles_then_metrics = async {
            let (daily, intraday) = tokio::join!(
                self.refresh_candles(symbol, Granularity::Daily, now),
                self.refresh_candles(symbol, Granularity::Intraday, now),
            );
            let metrics = self.refresh_metrics(symbol, now).await;
            (daily, intraday, metrics)
        };

        let ((daily, intraday, metrics), name, trends, news) = tokio::join!(
            candles_then_metrics,
            self.refresh_name(symbol),
            self.refresh_trends(symbol, now),
            self.refresh_news(symbol, now),
        );

        SymbolReport {
            symbol: symbol.to_string(),
            outcomes: vec![
                (DataKind::Name, name),
                (DataKind::DailyCandles, daily),
                (DataKind::IntradayCandles, intraday),
                (DataKind::Metrics, metrics),
                (DataKind::Trends, trends),
                (DataKind::News, news),
            ],
        }
    }

    async fn refresh_name(&self, symbol: &str) -> Outcome {
        self.refresh_kind(symbol, DataKind::Name, Utc::now(), || async move {
            let name = self.provider.fetch_name(symbol).await?;
            anyhow::Ok(Payload::Name(name))
        })
        .await
    }

    async fn refresh_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> Outcome {
        self.refresh_kind(symbol, granularity.kind(), now, || async move {
            let candles = self
                .provider
                .fetch_candles(symbol, granularity.window())
                .await?;
            anyhow::Ok(Payload::candles(granularity, candles))
        })
        .await
    }

    async fn refresh_metrics(&self, symbol: &str, now: DateTime<Utc>) -> Outcome {
        self.refresh_kind(symbol, DataKind::Metrics, now, || async move {
            let upstream = self.provider.fetch_metrics(symbol).await?;

            let intraday = self
                .store
                .get(symbol, DataKind::IntradayCandles)
                .await?
                .and_then(|r| r.into_candles());
            let daily = self
                .store
                .get(symbol, DataKind::DailyCandles)
                .await?
                .and_then(|r| r.into_candles());

            let metrics =
                pricing::assemble_metrics(upstream, intraday.as_ref(), daily.as_ref(), Utc::now());
            anyhow::Ok(Payload::Metrics(metrics))
        })
        .await
    }

    async fn refresh_trends(&self, symbol: &str, now: DateTime<Utc>) -> Outcome {
        self.refresh_kind(symbol, DataKind::Trends, now, || async move {
            anyhow::Ok(Payload::Trends(self.provider.fetch_trends(symbol).await?))
        })
        .await
    }

    async fn refresh_news(&self, symbol: &str, now: DateTime<Utc>) -> Outcome {
        self.refresh_kind(symbol, DataKind::News, now, || async move {
            anyhow::Ok(Payload::News(self.provider.fetch_news(symbol).await?))
        })
        .await
    }

    /// Staleness gate, fetch and upsert for one (symbol, kind). Every failure is logged
    /// and absorbed; the previous record stays in place for the next qualifying tick.
    async fn refresh_kind<F, Fut>(
        &self,
        symbol: &str,
        kind: DataKind,
        now: DateTime<Utc>,
        fetch: F,
    ) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Payload>>,
    {
        match self.is_due(symbol, kind, now).await {
            Ok(false) => return Outcome::Fresh,
            Ok(true) => {}
            Err(err) => {
                tracing::warn!(%symbol, %kind, error = %format!("{err:#}"), "staleness check failed");
                return Outcome::Failed;
            }
        }

        let payload = match fetch().await {
            Ok(p) => p,
            Err(err) => {
                let error_kind = err
                    .downcast_ref::<ProviderError>()
                    .map_or("store", ProviderError::label);
                tracing::warn!(%symbol, %kind, error_kind, error = %format!("{err:#}"), "fetch failed; keeping previous record");
                return Outcome::Failed;
            }
        };

        match self
            .store
            .upsert(symbol, payload)
            .await
            .with_context(|| format!("store upsert failed for {symbol}/{kind}"))
        {
            Ok(_) => {
                tracing::debug!(%symbol, %kind, "record updated");
                Outcome::Updated
            }
            Err(err) => {
                tracing::warn!(%symbol, %kind, error = %format!("{err:#}"), "upsert failed");
                Outcome::Failed
            }
        }
    }

    async fn is_due(&self, symbol: &str, kind: DataKind, now: DateTime<Utc>) -> anyhow::Result<bool> {
        match self.intervals.interval(kind) {
            Some(interval) => self.store.is_stale(symbol, kind, interval, now).await,
            None => Ok(!self.store.contains(symbol, kind).await?),
        }
    }
}

#[derive(Debug, Default)]
struct LoopState {
    last_symbols: Option<BTreeSet<String>>,
    pruned_for: Option<BTreeSet<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stock::{CandleWindow, Candles, NewsItem, Record, Trends};
    use crate::ingest::types::UpstreamMetrics;
    use crate::storage::MemoryStore;
    use crate::tracked::TrackedSet;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const DAY: i64 = 24 * 60 * 60;

    /// Deterministic provider that counts calls and can be told to fail per kind.
    #[derive(Default)]
    struct ScriptedProvider {
        calls: AtomicUsize,
        failing: Mutex<BTreeSet<DataKind>>,
        rate_limited_symbols: Mutex<BTreeSet<String>>,
        panicking_symbols: Mutex<BTreeSet<String>>,
    }

    impl ScriptedProvider {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail(&self, kind: DataKind) {
            self.failing.lock().unwrap().insert(kind);
        }

        fn rate_limit(&self, symbol: &str) {
            self.rate_limited_symbols.lock().unwrap().insert(symbol.to_string());
        }

        fn panic_on(&self, symbol: &str) {
            self.panicking_symbols.lock().unwrap().insert(symbol.to_string());
        }

        fn check(&self, symbol: &str, kind: DataKind) -> Result<(), ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let panics = self.panicking_symbols.lock().unwrap().contains(symbol);
            if panics {
                panic!("scripted panic for {symbol}");
            }
            if self.rate_limited_symbols.lock().unwrap().contains(symbol) {
                return Err(ProviderError::RateLimited);
            }
            if self.failing.lock().unwrap().contains(&kind) {
                return Err(ProviderError::Unreachable("connection refused".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl MarketDataProvider for ScriptedProvider {
        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_name(&self, symbol: &str) -> Result<String, ProviderError> {
            self.check(symbol, DataKind::Name)?;
            Ok(format!("{symbol} Inc"))
        }

        async fn fetch_candles(
            &self,
            symbol: &str,
            window: CandleWindow,
        ) -> Result<Candles, ProviderError> {
            let kind = if window.resolution == "D" {
                DataKind::DailyCandles
            } else {
                DataKind::IntradayCandles
            };
            self.check(symbol, kind)?;

            let t = Utc::now().timestamp();
            Candles::try_new(
                vec![t - 9 * DAY, t - 2 * DAY, t],
                vec![100.0, 105.0, 110.0],
                vec![101.0, 106.0, 122.0],
                vec![99.0, 104.0, 109.0],
                vec![100.0, 106.0, 121.0],
            )
            .map_err(|e| ProviderError::Malformed(e.to_string()))
        }

        async fn fetch_metrics(&self, symbol: &str) -> Result<UpstreamMetrics, ProviderError> {
            self.check(symbol, DataKind::Metrics)?;
            Ok(UpstreamMetrics {
                market_capitalization: Some(1000.0),
                ..Default::default()
            })
        }

        async fn fetch_trends(&self, symbol: &str) -> Result<Trends, ProviderError> {
            self.check(symbol, DataKind::Trends)?;
            Ok(Trends {
                buy: 2,
                ..Default::default()
            })
        }

        async fn fetch_news(&self, symbol: &str) -> Result<Vec<NewsItem>, ProviderError> {
            self.check(symbol, DataKind::News)?;
            Ok(Vec::new())
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ScriptedProvider>, Arc<Refresher>) {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(ScriptedProvider::default());
        let refresher = Arc::new(Refresher::new(
            store.clone(),
            provider.clone(),
            RefreshIntervals::default(),
        ));
        (store, provider, refresher)
    }

    fn tracked(symbols: &[&str]) -> TrackedSource {
        let mut groups = BTreeMap::new();
        groups.insert(
            "topStocks".to_string(),
            symbols.iter().map(|s| s.to_string()).collect(),
        );
        TrackedSource::Static(TrackedSet::new(groups))
    }

    #[tokio::test]
    async fn first_refresh_fills_every_kind() {
        let (store, provider, refresher) = setup();

        let report = refresher.refresh_symbol("AAPL").await;
        assert!(report.outcomes.iter().all(|(_, o)| *o == Outcome::Updated));
        assert_eq!(provider.calls(), DataKind::ALL.len());
        assert!(store.is_complete("AAPL").await.unwrap());
    }

    #[tokio::test]
    async fn metrics_are_computed_from_candles_fetched_in_the_same_pass() {
        let (store, _provider, refresher) = setup();

        refresher.refresh_symbol("AAPL").await;
        let metrics = store
            .get("AAPL", DataKind::Metrics)
            .await
            .unwrap()
            .and_then(|r| r.into_metrics())
            .unwrap();

        assert_eq!(metrics.changes.last7d, 15.24);
        assert_eq!(metrics.low_price_weekly, Some(99.0));
        assert_eq!(metrics.high_price_weekly, Some(122.0));
        assert_eq!(metrics.market_cap, Some(1000.0));
    }

    #[tokio::test]
    async fn second_pass_before_intervals_elapse_makes_no_upstream_calls() {
        let (_store, provider, refresher) = setup();

        refresher.refresh_symbol("AAPL").await;
        let after_first = provider.calls();

        let report = refresher.refresh_symbol("AAPL").await;
        assert_eq!(provider.calls(), after_first);
        assert!(report.outcomes.iter().all(|(_, o)| *o == Outcome::Fresh));
    }

    #[tokio::test]
    async fn failed_kind_keeps_previous_state_and_others_proceed() {
        let (store, provider, refresher) = setup();
        provider.fail(DataKind::Trends);

        let report = refresher.refresh_symbol("AAPL").await;
        assert_eq!(report.outcome(DataKind::Trends), Some(Outcome::Failed));
        assert_eq!(report.outcome(DataKind::News), Some(Outcome::Updated));
        assert!(store.get("AAPL", DataKind::Trends).await.unwrap().is_none());

        // Absent record is still stale, so the next pass retries it.
        provider.failing.lock().unwrap().clear();
        let report = refresher.refresh_symbol("AAPL").await;
        assert_eq!(report.outcome(DataKind::Trends), Some(Outcome::Updated));
        assert_eq!(report.outcome(DataKind::News), Some(Outcome::Fresh));
    }

    #[tokio::test]
    async fn rate_limited_symbol_does_not_block_other_symbols() {
        let (store, provider, refresher) = setup();
        provider.rate_limit("GME");

        let report = refresher
            .refresh_all(["AAPL", "GME"].into_iter().map(String::from).collect())
            .await;

        assert_eq!(report.symbols, 2);
        assert_eq!(report.failed, DataKind::ALL.len());
        assert!(store.is_complete("AAPL").await.unwrap());
        assert!(store.kinds_present("GME").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tick_prunes_symbols_dropped_from_tracked_set() {
        let (store, _provider, refresher) = setup();

        refresher.clone().run_once(&tracked(&["AAPL", "MSFT"])).await;
        assert!(store.is_complete("MSFT").await.unwrap());

        refresher.run_once(&tracked(&["AAPL"])).await;
        assert!(store.kinds_present("MSFT").await.unwrap().is_empty());
        assert!(store.is_complete("AAPL").await.unwrap());
    }

    /// Delegates to a `MemoryStore` but fails the first `prune_failures` prunes.
    struct FlakyPruneStore {
        inner: MemoryStore,
        prune_failures: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Store for FlakyPruneStore {
        fn backend_name(&self) -> &'static str {
            "flaky"
        }

        async fn get(&self, symbol: &str, kind: DataKind) -> anyhow::Result<Option<Record>> {
            self.inner.get(symbol, kind).await
        }

        async fn upsert(&self, symbol: &str, payload: Payload) -> anyhow::Result<Record> {
            self.inner.upsert(symbol, payload).await
        }

        async fn prune(&self, active: &BTreeSet<String>) -> anyhow::Result<u64> {
            let left = self.prune_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.prune_failures.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("connection reset");
            }
            self.inner.prune(active).await
        }

        async fn kinds_present(&self, symbol: &str) -> anyhow::Result<BTreeSet<DataKind>> {
            self.inner.kinds_present(symbol).await
        }
    }

    #[tokio::test]
    async fn tick_reuses_last_good_set_when_reload_fails() {
        let (store, _provider, refresher) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracked.json");
        std::fs::write(&path, r#"{"topStocks": ["AAPL", "MSFT"]}"#).unwrap();
        let source = TrackedSource::File(path.clone());
        let mut state = LoopState::default();

        let first = refresher.tick(&source, &mut state).await;
        assert_eq!(first.symbols, 2);

        std::fs::remove_file(&path).unwrap();
        let second = refresher.tick(&source, &mut state).await;
        assert_eq!(second.symbols, 2);
        assert!(store.is_complete("MSFT").await.unwrap());
        let kept: Vec<String> = state.last_symbols.clone().unwrap().into_iter().collect();
        assert_eq!(kept, ["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn tick_is_skipped_when_no_set_was_ever_loaded() {
        let (store, provider, refresher) = setup();
        let dir = tempfile::tempdir().unwrap();
        let source = TrackedSource::File(dir.path().join("missing.json"));
        let mut state = LoopState::default();

        let report = refresher.tick(&source, &mut state).await;
        assert_eq!(report, TickReport::default());
        assert_eq!(provider.calls(), 0);
        assert!(state.last_symbols.is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn failed_prune_is_retried_on_the_next_tick() {
        let store = Arc::new(FlakyPruneStore {
            inner: MemoryStore::new(),
            prune_failures: AtomicUsize::new(1),
        });
        store.upsert("GME", Payload::Name("GameStop".into())).await.unwrap();
        let refresher = Arc::new(Refresher::new(
            store.clone(),
            Arc::new(ScriptedProvider::default()),
            RefreshIntervals::default(),
        ));
        let source = tracked(&["AAPL"]);
        let mut state = LoopState::default();

        refresher.tick(&source, &mut state).await;
        assert!(state.pruned_for.is_none());
        assert!(store.contains("GME", DataKind::Name).await.unwrap());
        assert!(store.is_complete("AAPL").await.unwrap());

        refresher.tick(&source, &mut state).await;
        assert!(state.pruned_for.is_some());
        assert!(!store.contains("GME", DataKind::Name).await.unwrap());
        assert!(store.is_complete("AAPL").await.unwrap());
    }

    #[tokio::test]
    async fn panicking_symbol_task_does_not_affect_others() {
        let (store, provider, refresher) = setup();
        provider.panic_on("BOOM");

        let report = refresher
            .refresh_all(["AAPL", "BOOM"].into_iter().map(String::from).collect())
            .await;

        assert_eq!(report.symbols, 2);
        assert_eq!(report.panicked, 1);
        assert_eq!(report.updated, DataKind::ALL.len());
        assert!(store.is_complete("AAPL").await.unwrap());
    }

    #[test]
    fn names_have_no_interval() {
        let intervals = RefreshIntervals::default();
        assert_eq!(intervals.interval(DataKind::Name), None);
        assert_eq!(
            intervals.interval(DataKind::Trends),
            Some(Duration::from_secs(900))
        );
    }
}
