//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::DispatcherConfig;
use crate::reliability::RetryPolicy;
use crate::task::{ContributorsMatchConfig, ProfilesMatchConfig};

/// Actor every query is billed to until callers carry their own identity
pub const SYSTEM_ACTOR: &str = "system";

/// Configuration of the task engine
///
/// One dispatcher per external service family, each with its own per-actor
/// concurrency cap, plus the default task configurations new queries start
/// with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Actor new queries are enqueued under
    pub actor: String,

    /// Code-hosting directory calls
    pub directory: DispatcherConfig,

    /// Profile search calls
    pub search: DispatcherConfig,

    /// Summarizer calls
    pub summarizer: DispatcherConfig,

    /// Defaults for contributor-match tasks
    pub contributors: ContributorsMatchConfig,

    /// Defaults for profile-search tasks
    pub profiles: ProfilesMatchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            actor: SYSTEM_ACTOR.to_string(),
            directory: DispatcherConfig::new("directory").with_max_concurrent(100),
            search: DispatcherConfig::new("search").with_max_concurrent(10),
            summarizer: DispatcherConfig::new("summarizer").with_max_concurrent(10),
            contributors: ContributorsMatchConfig::default(),
            profiles: ProfilesMatchConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables fall back to the defaults:
    /// - `SCOUT_ACTOR` (`system`)
    /// - `DIRECTORY_MAX_CONCURRENT` (100)
    /// - `SEARCH_MAX_CONCURRENT` (10)
    /// - `SUMMARIZER_MAX_CONCURRENT` (10)
    /// - `DISPATCH_RETRY_PAUSE_MS` (1000)
    /// - `DISPATCH_MAX_RETRIES` (3)
    /// - `CONTRIBUTORS_BATCH_SIZE` (20)
    /// - `CONTRIBUTORS_HALT_COUNT` (150)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let defaults = Self::default();

        let pause = parsed::<u64>(&lookup, "DISPATCH_RETRY_PAUSE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.directory.retry.interval);
        let retries = parsed::<u32>(&lookup, "DISPATCH_MAX_RETRIES")
            .unwrap_or(defaults.directory.retry.max_attempts - 1);
        let retry = RetryPolicy::fixed(pause, retries.saturating_add(1));

        let directory_max = parsed(&lookup, "DIRECTORY_MAX_CONCURRENT")
            .unwrap_or(defaults.directory.max_concurrent);
        let search_max =
            parsed(&lookup, "SEARCH_MAX_CONCURRENT").unwrap_or(defaults.search.max_concurrent);
        let summarizer_max = parsed(&lookup, "SUMMARIZER_MAX_CONCURRENT")
            .unwrap_or(defaults.summarizer.max_concurrent);

        let mut contributors = defaults.contributors;
        if let Some(batch_size) = parsed(&lookup, "CONTRIBUTORS_BATCH_SIZE") {
            contributors.batch_size = batch_size;
        }
        if let Some(halt) = parsed(&lookup, "CONTRIBUTORS_HALT_COUNT") {
            contributors.halt_on_contributors_count = halt;
        }

        Self {
            actor: lookup("SCOUT_ACTOR")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.actor),
            directory: defaults
                .directory
                .with_max_concurrent(directory_max)
                .with_retry(retry.clone()),
            search: defaults
                .search
                .with_max_concurrent(search_max)
                .with_retry(retry.clone()),
            summarizer: defaults
                .summarizer
                .with_max_concurrent(summarizer_max)
                .with_retry(retry),
            contributors,
            profiles: defaults.profiles,
        }
    }

    /// Set the actor new queries are enqueued under
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Use the same retry policy for every dispatcher
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.directory.retry = retry.clone();
        self.search.retry = retry.clone();
        self.summarizer.retry = retry;
        self
    }
}
