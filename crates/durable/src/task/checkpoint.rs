//! Checkpoint types
//!
//! A checkpoint is everything a task needs to resume: its immutable
//! configuration, cursor positions and accumulated matches. It is persisted
//! as a tagged JSON document after every step.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::directory::{NetworkProfile, ProfileSnapshot, RepositorySummary};

/// Resumable state of a task, one variant per task kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Checkpoint {
    ContributorsMatch(ContributorsMatchCheckpoint),
    ProfilesMatch(ProfilesMatchCheckpoint),
}

impl Checkpoint {
    /// Task kind tag as persisted
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContributorsMatch(_) => "contributors_match",
            Self::ProfilesMatch(_) => "profiles_match",
        }
    }

    /// Number of distinct matches found so far
    pub fn indexed_count(&self) -> usize {
        match self {
            Self::ContributorsMatch(state) => state.matches.len(),
            Self::ProfilesMatch(state) => state.profiles.len(),
        }
    }
}

/// Configuration of a contributor-match task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorsMatchConfig {
    /// Work units a single step may start
    pub batch_size: u32,

    /// Contributors below this many contributions to a source are ignored
    pub min_contributions: u64,

    /// Contributors sampled per source, after filtering
    pub max_contributors: usize,

    /// Matches returned to callers
    pub max_results: usize,

    /// Stop once this many distinct contributors have been matched
    pub halt_on_contributors_count: usize,
}

impl Default for ContributorsMatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            min_contributions: 10,
            max_contributors: 3,
            max_results: 50,
            halt_on_contributors_count: 150,
        }
    }
}

/// Forward-only cursor over contributor-listing locators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCursor {
    pub locators: Vec<String>,
    pub index: usize,
}

impl SourceCursor {
    pub fn new(locators: Vec<String>) -> Self {
        Self { locators, index: 0 }
    }

    pub fn is_exhausted(&self) -> bool {
        self.index >= self.locators.len()
    }

    pub fn current(&self) -> Option<&str> {
        self.locators.get(self.index).map(String::as_str)
    }

    pub fn advance(&mut self) {
        if !self.is_exhausted() {
            self.index += 1;
        }
    }
}

/// A matched contributor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorMatch {
    pub profile: ProfileSnapshot,
    /// Sum of contributions over every source the contributor was seen in
    pub total_contributions: u64,
    pub repositories: Vec<RepositorySummary>,
}

/// State of a contributor-match task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorsMatchCheckpoint {
    pub config: ContributorsMatchConfig,
    pub sources: SourceCursor,
    /// Keyed by contributor login
    pub matches: HashMap<String, ContributorMatch>,
}

impl ContributorsMatchCheckpoint {
    pub fn new(config: ContributorsMatchConfig, locators: Vec<String>) -> Self {
        Self {
            config,
            sources: SourceCursor::new(locators),
            matches: HashMap::new(),
        }
    }

    pub fn halt_reached(&self) -> bool {
        self.matches.len() >= self.config.halt_on_contributors_count
    }
}

/// Configuration of a profile-search task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilesMatchConfig {
    pub max_profiles: usize,
    pub max_companies: usize,
}

impl Default for ProfilesMatchConfig {
    fn default() -> Self {
        Self {
            max_profiles: 50,
            max_companies: 20,
        }
    }
}

/// Discovered company links and a forward-only index into them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyCursor {
    pub links: Vec<String>,
    pub index: usize,
}

/// State of a profile-search task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilesMatchCheckpoint {
    pub config: ProfilesMatchConfig,
    pub query: String,
    /// Last page processed (0 before the first step)
    pub page: u32,
    /// Keyed by profile id
    pub profiles: HashMap<String, NetworkProfile>,
    pub companies: CompanyCursor,
}

impl ProfilesMatchCheckpoint {
    pub fn new(config: ProfilesMatchConfig, query: impl Into<String>) -> Self {
        Self {
            config,
            query: query.into(),
            page: 0,
            profiles: HashMap::new(),
            companies: CompanyCursor::default(),
        }
    }

    /// Append company links not seen before, up to the configured cap
    pub fn add_companies(&mut self, links: impl IntoIterator<Item = String>) {
        for link in links {
            if self.companies.links.len() >= self.config.max_companies {
                break;
            }
            if !self.companies.links.contains(&link) {
                self.companies.links.push(link);
            }
        }
    }
}
