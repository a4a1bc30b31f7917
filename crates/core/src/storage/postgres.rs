use crate::domain::stock::{DataKind, Payload, Record};
use crate::storage::Store;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;

/// Postgres-backed store. Every kind is a logical collection inside `stock_records`,
/// keyed by symbol.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn get(&self, symbol: &str, kind: DataKind) -> anyhow::Result<Option<Record>> {
        let row = sqlx::query_as::<_, (DateTime<Utc>, Value)>(
            "SELECT last_update, payload FROM stock_records \
             WHERE kind = $1 AND symbol = $2",
        )
        .persistent(false)
        .bind(kind.as_str())
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("select stock_records failed (kind={kind}, symbol={symbol})"))?;

        let Some((last_update, raw)) = row else {
            return Ok(None);
        };

        let payload = decode_payload(kind, raw)
            .with_context(|| format!("corrupt stock_records row (kind={kind}, symbol={symbol})"))?;

        Ok(Some(Record {
            symbol: symbol.to_string(),
            last_update,
            payload,
        }))
    }

    async fn upsert(&self, symbol: &str, payload: Payload) -> anyhow::Result<Record> {
        let kind = payload.kind();
        let last_update = Utc::now();
        let raw = serde_json::to_value(&payload).context("payload serialize failed")?;

        // Single statement: the row is replaced atomically and no other symbol's row is
        // touched.
        sqlx::query(
            "INSERT INTO stock_records (kind, symbol, last_update, payload) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (kind, symbol) DO UPDATE \
               SET last_update = EXCLUDED.last_update, payload = EXCLUDED.payload",
        )
        .persistent(false)
        .bind(kind.as_str())
        .bind(symbol)
        .bind(last_update)
        .bind(raw)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert stock_records failed (kind={kind}, symbol={symbol})"))?;

        Ok(Record {
            symbol: symbol.to_string(),
            last_update,
            payload,
        })
    }

    async fn prune(&self, active: &BTreeSet<String>) -> anyhow::Result<u64> {
        let active: Vec<String> = active.iter().cloned().collect();

        let res = sqlx::query("DELETE FROM stock_records WHERE symbol <> ALL($1)")
            .persistent(false)
            .bind(active)
            .execute(&self.pool)
            .await
            .context("prune stock_records failed")?;

        Ok(res.rows_affected())
    }

    async fn kinds_present(&self, symbol: &str) -> anyhow::Result<BTreeSet<DataKind>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT kind FROM stock_records WHERE symbol = $1",
        )
        .persistent(false)
        .bind(symbol)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("select kinds failed (symbol={symbol})"))?;

        let mut out = BTreeSet::new();
        for kind in rows {
            match kind.parse::<DataKind>() {
                Ok(k) => {
                    out.insert(k);
                }
                Err(err) => {
                    tracing::warn!(%symbol, error = %err, "ignoring unknown kind in stock_records");
                }
            }
        }
        Ok(out)
    }
}

fn decode_payload(kind: DataKind, raw: Value) -> anyhow::Result<Payload> {
    let payload: Payload = serde_json::from_value(raw).context("payload deserialize failed")?;
    anyhow::ensure!(
        payload.kind() == kind,
        "payload kind {} stored under {kind}",
        payload.kind()
    );
    Ok(payload)
}
