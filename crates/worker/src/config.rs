// Worker configuration
//
// Connection settings and API credentials, read from the environment after
// `.env` has been loaded. Engine tuning lives in scout_durable::EngineConfig.

use std::time::Duration;

use scout_directory::DEFAULT_TIMEOUT;

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// PostgreSQL connection string; the in-memory store is used when unset
    pub database_url: Option<String>,
    pub github_token: Option<String>,
    pub google_api_key: Option<String>,
    pub google_engine_id: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub http_timeout: Duration,
    /// Database pool size
    pub max_connections: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            github_token: None,
            google_api_key: None,
            google_engine_id: None,
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            http_timeout: DEFAULT_TIMEOUT,
            max_connections: 5,
        }
    }
}

impl WorkerConfig {
    /// Environment variables:
    /// - `DATABASE_URL`
    /// - `GITHUB_TOKEN`
    /// - `GOOGLE_API_KEY`, `GOOGLE_LINKEDIN_ENGINE_ID`
    /// - `OPENAI_API_KEY`, `OPENAI_MODEL` (default: "gpt-4o")
    /// - `HTTP_TIMEOUT_SECS` (default: 30)
    /// - `DATABASE_MAX_CONNECTIONS` (default: 5)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            database_url: set("DATABASE_URL"),
            github_token: set("GITHUB_TOKEN"),
            google_api_key: set("GOOGLE_API_KEY"),
            google_engine_id: set("GOOGLE_LINKEDIN_ENGINE_ID"),
            openai_api_key: set("OPENAI_API_KEY"),
            openai_model: set("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            http_timeout: set("HTTP_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            max_connections: set("DATABASE_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_connections),
        }
    }
}
