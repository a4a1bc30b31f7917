use anyhow::Context;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Named groups of symbols, e.g. `{"topStocks": ["AAPL", "MSFT"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackedSet {
    groups: BTreeMap<String, Vec<String>>,
}

impl TrackedSet {
    pub fn new(groups: BTreeMap<String, Vec<String>>) -> Self {
        let groups = groups
            .into_iter()
            .map(|(name, symbols)| (name, normalize_symbols(symbols)))
            .collect();
        Self { groups }
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let groups: BTreeMap<String, Vec<String>> =
            serde_json::from_str(text).context("tracked symbols must be a map of group -> [symbol]")?;
        Ok(Self::new(groups))
    }

    pub fn group(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    /// Union of every group; the set of symbols eligible for refresh and serving.
    pub fn symbols(&self) -> BTreeSet<String> {
        self.groups.values().flatten().cloned().collect()
    }
}

fn normalize_symbols(symbols: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    symbols
        .into_iter()
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Where the tracked set comes from. File sources are re-read on every load so edits
/// are picked up without a restart.
#[derive(Debug, Clone)]
pub enum TrackedSource {
    File(PathBuf),
    Static(TrackedSet),
}

impl TrackedSource {
    pub async fn load(&self) -> anyhow::Result<TrackedSet> {
        match self {
            TrackedSource::File(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read tracked symbols from {}", path.display()))?;
                TrackedSet::from_json(&text)
                    .with_context(|| format!("invalid tracked symbols file {}", path.display()))
            }
            TrackedSource::Static(set) => Ok(set.clone()),
        }
    }
}
