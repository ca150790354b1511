// GitHub REST client
//
// Repository search, contributor listings, user profiles and user
// repositories. Every response's rate-limit headers feed a shared gate that
// holds the next request until the budget resets once it runs low.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use scout_durable::directory::{
    ContributorDirectory, ContributorEntry, ProfileSnapshot, RepositorySummary, SearchParams,
    ServiceError,
};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::http::{build_client, read_json, request_error, DEFAULT_TIMEOUT};

const GITHUB_API_URL: &str = "https://api.github.com";

/// Repositories requested per search
const SEARCH_PAGE_SIZE: u32 = 50;

/// Fields a keyword is matched against
const SEARCH_SCOPES: [&str; 4] = ["name", "description", "readme", "topics"];

/// GitHub rate-limit bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateBucket {
    Core,
    Search,
}

impl RateBucket {
    /// Requests to keep in reserve before waiting for the reset
    fn reserve(self) -> u64 {
        match self {
            Self::Core => 50,
            Self::Search => 2,
        }
    }

    fn from_resource(name: &str) -> Option<Self> {
        match name {
            "core" => Some(Self::Core),
            "search" => Some(Self::Search),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    remaining: u64,
    /// Unix seconds
    reset: i64,
}

/// Remaining request budget per bucket, as last reported by GitHub
#[derive(Debug, Default)]
pub struct RateLimitGate {
    budgets: Mutex<HashMap<RateBucket, Budget>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the budget reported by a response
    pub fn observe(&self, bucket: RateBucket, headers: &HeaderMap) {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let bucket = header("x-ratelimit-resource")
            .and_then(RateBucket::from_resource)
            .unwrap_or(bucket);
        let remaining = header("x-ratelimit-remaining").and_then(|v| v.parse().ok());
        let reset = header("x-ratelimit-reset").and_then(|v| v.parse().ok());

        if let (Some(remaining), Some(reset)) = (remaining, reset) {
            self.budgets
                .lock()
                .insert(bucket, Budget { remaining, reset });
        }
    }

    /// How long a request must wait at `now` (unix seconds)
    pub fn delay(&self, bucket: RateBucket, now: i64) -> Option<Duration> {
        let budget = *self.budgets.lock().get(&bucket)?;
        if budget.remaining >= bucket.reserve() || budget.reset <= now {
            return None;
        }
        Some(Duration::from_secs((budget.reset - now) as u64))
    }

    /// Sleep until the bucket has budget again
    pub async fn wait(&self, bucket: RateBucket) {
        if let Some(delay) = self.delay(bucket, Utc::now().timestamp()) {
            info!(?bucket, delay_secs = delay.as_secs(), "github rate limit low, waiting for reset");
            tokio::time::sleep(delay).await;
            self.budgets.lock().remove(&bucket);
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<RepositorySummary>,
}

/// GitHub client authenticated with a bearer token
pub struct GitHubClient {
    client: Client,
    token: String,
    base_url: Url,
    gate: RateLimitGate,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>) -> Result<Self, ServiceError> {
        Self::with_timeout(token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(token: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(timeout)?,
            token: token.into(),
            base_url: Url::parse(GITHUB_API_URL).map_err(|e| ServiceError::Request(e.to_string()))?,
            gate: RateLimitGate::new(),
        })
    }

    /// Point the client at another API root (GitHub Enterprise, test servers)
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn gate(&self) -> &RateLimitGate {
        &self.gate
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(path)
            .map_err(|e| ServiceError::Request(format!("invalid endpoint {path}: {e}")))
    }

    async fn get(
        &self,
        bucket: RateBucket,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<Response, ServiceError> {
        self.gate.wait(bucket).await;

        debug!(%url, "github request");
        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(request_error)?;

        self.gate.observe(bucket, response.headers());
        Ok(response)
    }
}

/// Build the repository search expression
pub fn search_query(params: &SearchParams) -> String {
    let mut parts: Vec<String> = params
        .keywords
        .iter()
        .map(|keyword| format!("\"{keyword}\""))
        .collect();
    parts.extend(params.language.iter().map(|lang| format!("language:{lang}")));
    if !params.keywords.is_empty() {
        parts.extend(SEARCH_SCOPES.iter().map(|scope| format!("in:{scope}")));
    }
    parts.join(" ")
}

#[async_trait]
impl ContributorDirectory for GitHubClient {
    async fn search_sources(&self, params: &SearchParams) -> Result<Vec<String>, ServiceError> {
        let query = [
            ("q", search_query(params)),
            ("sort", "created".to_string()),
            ("order", "desc".to_string()),
            ("per_page", SEARCH_PAGE_SIZE.to_string()),
        ];
        let response = self
            .get(RateBucket::Search, self.endpoint("search/repositories")?, &query)
            .await?;
        let found: SearchResponse = read_json(response).await?;

        Ok(found
            .items
            .into_iter()
            .map(|repo| repo.contributors_url)
            .collect())
    }

    async fn contributors(&self, locator: &str) -> Result<Vec<ContributorEntry>, ServiceError> {
        let url = Url::parse(locator)
            .map_err(|e| ServiceError::invalid_response(format!("bad locator {locator}: {e}")))?;
        let response = self.get(RateBucket::Core, url, &[]).await?;

        // Empty repositories answer 204 with no body
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        read_json(response).await
    }

    async fn profile(&self, login: &str) -> Result<ProfileSnapshot, ServiceError> {
        let url = self.endpoint(&format!("users/{login}"))?;
        read_json(self.get(RateBucket::Core, url, &[]).await?).await
    }

    async fn repositories(&self, login: &str) -> Result<Vec<RepositorySummary>, ServiceError> {
        let url = self.endpoint(&format!("users/{login}/repos"))?;
        read_json(self.get(RateBucket::Core, url, &[]).await?).await
    }
}
