use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockdash_core::ingest::provider::FinnhubProvider;
use stockdash_core::query::{RetryPolicy, StockReader};
use stockdash_core::refresh::{self, RefreshIntervals, Refresher};
use stockdash_core::storage::{MemoryStore, PgStore, Store};
use stockdash_core::tracked::TrackedSource;

mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = stockdash_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let store = connect_store(&settings).await;
    let tracked = TrackedSource::File(settings.tracked_symbols_path.clone());

    match tracked.load().await {
        Ok(set) => match store.prune(&set.symbols()).await {
            Ok(removed) => tracing::info!(removed, "startup prune complete"),
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "startup prune failed"),
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %format!("{e:#}"), "tracked symbols unavailable at startup");
        }
    }

    if settings.refresh_enabled {
        match FinnhubProvider::from_settings(&settings) {
            Ok(provider) => {
                let refresher = Arc::new(Refresher::new(
                    store.clone(),
                    Arc::new(provider),
                    RefreshIntervals::from_env(),
                ));
                tokio::spawn(refresher.run(tracked.clone(), refresh::tick_from_env()));
            }
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %format!("{e:#}"), "data provider unavailable; serving without refresh");
            }
        }
    } else {
        tracing::info!("in-process refresh disabled");
    }

    let state = routes::AppState::new(StockReader::new(store, RetryPolicy::from_env()), tracked);
    let app = routes::router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5173);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Postgres when reachable; otherwise an in-memory store so the API still serves
/// whatever the in-process refresher fills.
async fn connect_store(settings: &stockdash_core::config::Settings) -> Arc<dyn Store> {
    let db_url = match settings.require_database_url() {
        Ok(url) => url,
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            return Arc::new(MemoryStore::new());
        }
    };

    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            let err = anyhow::Error::new(e);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
            return Arc::new(MemoryStore::new());
        }
    };

    match stockdash_core::storage::migrate(&pool).await {
        Ok(()) => Arc::new(PgStore::new(pool)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
            Arc::new(MemoryStore::new())
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &stockdash_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
