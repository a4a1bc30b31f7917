use crate::domain::stock::{DataKind, Payload, Record};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Per-kind, per-symbol record keeper shared by the refresh loop and the read API.
///
/// Upserts replace a whole record at once; a concurrent `get` observes either the old or
/// the new record. There is no cross-kind transaction.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn get(&self, symbol: &str, kind: DataKind) -> anyhow::Result<Option<Record>>;

    /// Stores `payload` under its kind with `last_update` set to now.
    async fn upsert(&self, symbol: &str, payload: Payload) -> anyhow::Result<Record>;

    /// Deletes every record, of every kind, whose symbol is not in `active`.
    async fn prune(&self, active: &BTreeSet<String>) -> anyhow::Result<u64>;

    async fn kinds_present(&self, symbol: &str) -> anyhow::Result<BTreeSet<DataKind>>;

    async fn contains(&self, symbol: &str, kind: DataKind) -> anyhow::Result<bool> {
        Ok(self.get(symbol, kind).await?.is_some())
    }

    async fn is_stale(
        &self,
        symbol: &str,
        kind: DataKind,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let Some(record) = self.get(symbol, kind).await? else {
            return Ok(true);
        };
        let interval = chrono::Duration::from_std(interval)
            .with_context(|| format!("refresh interval for {kind} is out of range"))?;
        Ok(now.signed_duration_since(record.last_update) >= interval)
    }

    async fn is_complete(&self, symbol: &str) -> anyhow::Result<bool> {
        let present = self.kinds_present(symbol).await?;
        Ok(DataKind::ALL.iter().all(|k| present.contains(k)))
    }
}
