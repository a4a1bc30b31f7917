use crate::domain::stock::{DataKind, Payload, Record};
use crate::storage::Store;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

/// In-process store. Not durable: used by tests and by the API when no database is
/// configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<(DataKind, String), Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, symbol: &str, kind: DataKind) -> anyhow::Result<Option<Record>> {
        let records = self.records.read().await;
        Ok(records.get(&(kind, symbol.to_string())).cloned())
    }

    async fn upsert(&self, symbol: &str, payload: Payload) -> anyhow::Result<Record> {
        let record = Record {
            symbol: symbol.to_string(),
            last_update: Utc::now(),
            payload,
        };
        let mut records = self.records.write().await;
        records.insert((record.kind(), symbol.to_string()), record.clone());
        Ok(record)
    }

    async fn prune(&self, active: &BTreeSet<String>) -> anyhow::Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(_, symbol), _| active.contains(symbol));
        Ok((before - records.len()) as u64)
    }

    async fn kinds_present(&self, symbol: &str) -> anyhow::Result<BTreeSet<DataKind>> {
        let records = self.records.read().await;
        Ok(records
            .keys()
            .filter(|(_, s)| s == symbol)
            .map(|(k, _)| *k)
            .collect())
    }
}
