//! External service contracts
//!
//! The engine never talks HTTP itself. Every third-party call goes through
//! one of these traits, wrapped in a [`RequestDispatcher`] call.
//!
//! [`RequestDispatcher`]: crate::dispatch::RequestDispatcher

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type for external service calls
///
/// Every variant is treated as transient by the dispatcher: retried with
/// a fixed pause, then skipped.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// Request could not be sent or the connection failed
    #[error("request failed: {0}")]
    Request(String),

    /// Service answered with a non-success status
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response did not have the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Service rejected the call because of its rate limit
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
}

impl ServiceError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }
}

/// Normalized parameters for a contributor search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Keywords matched against repository name, description, readme and topics
    pub keywords: Vec<String>,

    /// Roles the query is looking for
    #[serde(default)]
    pub role: Vec<String>,

    /// Programming languages to restrict the search to
    #[serde(default)]
    pub language: Vec<String>,

    /// Locations of interest
    #[serde(default)]
    pub location: Vec<String>,
}

/// One entry of a contributor listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorEntry {
    pub login: String,
    pub contributions: u64,
}

/// Public profile of a contributor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub login: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub html_url: String,
    pub avatar_url: String,
}

/// A repository owned by a contributor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub name: String,
    pub description: Option<String>,
    pub html_url: String,
    pub language: Option<String>,
    pub contributors_url: String,
    pub created_at: String,
}

/// A profile found by a professional-network search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub id: String,
    pub full_name: String,
    pub description: String,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
    pub html_url: String,
}

/// One page of profile search results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileSearchPage {
    pub profiles: Vec<NetworkProfile>,
    pub company_links: Vec<String>,
    /// Pages left after this one
    pub remaining_pages: u32,
}

/// What the summarizer is told about a match
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SummaryContext {
    Contributor {
        profile: ProfileSnapshot,
        repositories: Vec<RepositorySummary>,
    },
    Profile(NetworkProfile),
}

/// Summary of a match against a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    pub rating: f64,
}

/// Code-hosting directory: repository search and contributor graph reads
#[async_trait]
pub trait ContributorDirectory: Send + Sync + 'static {
    /// Search repositories and return their contributor-listing locators
    async fn search_sources(&self, params: &SearchParams) -> Result<Vec<String>, ServiceError>;

    /// List the contributors behind a locator, in the directory's own order
    async fn contributors(&self, locator: &str) -> Result<Vec<ContributorEntry>, ServiceError>;

    /// Read a contributor's public profile
    async fn profile(&self, login: &str) -> Result<ProfileSnapshot, ServiceError>;

    /// List a contributor's repositories
    async fn repositories(&self, login: &str) -> Result<Vec<RepositorySummary>, ServiceError>;
}

/// Paginated professional-network profile search
#[async_trait]
pub trait ProfileSearch: Send + Sync + 'static {
    /// Fetch one page of results. Pages are 1-based.
    async fn search(&self, query: &str, page: u32) -> Result<ProfileSearchPage, ServiceError>;
}

/// Rates and summarizes one match against the original query
#[async_trait]
pub trait Summarizer: Send + Sync + 'static {
    async fn summarize(
        &self,
        query: &str,
        context: &SummaryContext,
    ) -> Result<Summary, ServiceError>;
}

/// Turns a free-text query into what each directory searches with
#[async_trait]
pub trait QueryNormalizer: Send + Sync + 'static {
    /// Keywords, roles and languages for a repository search
    async fn contributor_params(&self, query: &str) -> Result<SearchParams, ServiceError>;

    /// A one-line web search string for professional-network profiles
    async fn profile_query(&self, query: &str) -> Result<String, ServiceError>;
}
