use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockdash_core::ingest::provider::FinnhubProvider;
use stockdash_core::refresh::{self, RefreshIntervals, Refresher};
use stockdash_core::storage::PgStore;
use stockdash_core::tracked::TrackedSource;

#[derive(Debug, Parser)]
#[command(name = "stockdash_worker")]
struct Args {
    /// Run a single refresh tick and exit.
    #[arg(long)]
    once: bool,

    /// Seconds between ticks. Overrides REFRESH_TICK_SECS.
    #[arg(long)]
    tick_secs: Option<u64>,

    /// Tracked symbols file. Overrides TRACKED_SYMBOLS_PATH.
    #[arg(long)]
    tracked_symbols: Option<PathBuf>,
}

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

    let args = Args::parse();

    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    stockdash_core::storage::migrate(&pool).await?;

    let provider = FinnhubProvider::from_settings(&settings)?;
    let refresher = Arc::new(Refresher::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(provider),
        RefreshIntervals::from_env(),
    ));

    let tracked = TrackedSource::File(
        args.tracked_symbols
            .unwrap_or_else(|| settings.tracked_symbols_path.clone()),
    );

    if args.once {
        let report = refresher.run_once(&tracked).await;
        tracing::info!(
            symbols = report.symbols,
            updated = report.updated,
            failed = report.failed,
            panicked = report.panicked,
            "refresh run complete"
        );
        if report.panicked > 0 {
            anyhow::bail!("{} symbol task(s) panicked", report.panicked);
        }
        return Ok(());
    }

    let period = args
        .tick_secs
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(refresh::tick_from_env);

    tokio::select! {
        _ = refresher.run(tracked, period) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    Ok(())
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
