pub mod domain;
pub mod ingest;
pub mod pricing;
pub mod query;
pub mod refresh;
pub mod storage;
pub mod tracked;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;

    pub const DEFAULT_DATA_PROVIDER_BASE_URL: &str = "https://finnhub.io/api/v1";
    pub const DEFAULT_TRACKED_SYMBOLS_PATH: &str = "tracked_symbols.json";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub data_provider_base_url: String,
        pub data_provider_api_key: Option<String>,
        pub tracked_symbols_path: PathBuf,
        pub refresh_enabled: bool,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let refresh_enabled = match std::env::var("REFRESH_ENABLED") {
                Ok(v) => parse_bool(&v)
                    .with_context(|| format!("REFRESH_ENABLED must be true/false (got {v})"))?,
                Err(_) => true,
            };

            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                data_provider_base_url: std::env::var("DATA_PROVIDER_BASE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_DATA_PROVIDER_BASE_URL.to_string()),
                data_provider_api_key: std::env::var("DATA_PROVIDER_API_KEY").ok(),
                tracked_symbols_path: std::env::var("TRACKED_SYMBOLS_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_TRACKED_SYMBOLS_PATH)),
                refresh_enabled,
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_data_provider_api_key(&self) -> anyhow::Result<&str> {
            self.data_provider_api_key
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .context("DATA_PROVIDER_API_KEY is required")
        }
    }

    fn parse_bool(s: &str) -> Option<bool> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    pub(crate) fn env_u64(key: &str) -> Option<u64> {
        std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok())
    }

}
