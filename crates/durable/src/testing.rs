//! In-process fakes of the external services, shared by unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::directory::*;
use crate::persistence::{
    InMemoryTaskStore, MatchRecord, NewTask, QueryParams, QueryRecord, StoreError, TaskRecord,
    TaskStatus, TaskStore,
};
use crate::reliability::RetryPolicy;
use crate::task::{
    Checkpoint, ContributorsMatchCheckpoint, ContributorsMatchConfig, ProfilesMatchCheckpoint,
    ProfilesMatchConfig, QueryTask, TaskContext,
};

pub(crate) fn entry(login: &str, contributions: u64) -> ContributorEntry {
    ContributorEntry {
        login: login.to_string(),
        contributions,
    }
}

pub(crate) fn network_profile(id: &str) -> NetworkProfile {
    NetworkProfile {
        id: id.to_string(),
        full_name: format!("Person {id}"),
        description: format!("Engineer {id}"),
        location: None,
        avatar_url: None,
        html_url: format!("https://www.linkedin.com/in/{id}"),
    }
}

pub(crate) fn profile_page(ids: &[&str], companies: &[&str], remaining: u32) -> ProfileSearchPage {
    ProfileSearchPage {
        profiles: ids.iter().map(|id| network_profile(id)).collect(),
        company_links: companies
            .iter()
            .map(|c| format!("https://www.linkedin.com/company/{c}"))
            .collect(),
        remaining_pages: remaining,
    }
}

/// Contributor directory backed by fixed listings
pub(crate) struct FakeDirectory {
    store: Arc<InMemoryTaskStore>,
    sources: Mutex<Vec<String>>,
    listings: Mutex<HashMap<String, Vec<ContributorEntry>>>,
    failing_sources: Mutex<HashSet<String>>,
    failing_profiles: Mutex<HashSet<String>>,
    emails: Mutex<HashSet<String>>,
    cancel_on_profile: Mutex<Option<String>>,
    search_fails: AtomicBool,
    contributor_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    repository_calls: AtomicUsize,
}

impl FakeDirectory {
    fn new(store: Arc<InMemoryTaskStore>) -> Self {
        Self {
            store,
            sources: Mutex::default(),
            listings: Mutex::default(),
            failing_sources: Mutex::default(),
            failing_profiles: Mutex::default(),
            emails: Mutex::default(),
            cancel_on_profile: Mutex::default(),
            search_fails: AtomicBool::new(false),
            contributor_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            repository_calls: AtomicUsize::new(0),
        }
    }

    pub fn add_source(&self, locator: &str, listing: &[(&str, u64)]) {
        self.sources.lock().push(locator.to_string());
        self.listings.lock().insert(
            locator.to_string(),
            listing.iter().map(|(l, c)| entry(l, *c)).collect(),
        );
    }

    pub fn fail_source(&self, locator: &str) {
        self.sources.lock().push(locator.to_string());
        self.failing_sources.lock().insert(locator.to_string());
    }

    pub fn fail_profile(&self, login: &str) {
        self.failing_profiles.lock().insert(login.to_string());
    }

    pub fn fail_search(&self) {
        self.search_fails.store(true, Ordering::SeqCst);
    }

    pub fn with_email(&self, login: &str) {
        self.emails.lock().insert(login.to_string());
    }

    /// Cancel every active task when this login's profile is requested
    pub fn cancel_on_profile(&self, login: &str) {
        *self.cancel_on_profile.lock() = Some(login.to_string());
    }

    pub fn contributor_calls(&self) -> usize {
        self.contributor_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.contributor_calls()
            + self.profile_calls.load(Ordering::SeqCst)
            + self.repository_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContributorDirectory for FakeDirectory {
    async fn search_sources(&self, _params: &SearchParams) -> Result<Vec<String>, ServiceError> {
        if self.search_fails.load(Ordering::SeqCst) {
            return Err(ServiceError::Request("search unavailable".into()));
        }
        Ok(self.sources.lock().clone())
    }

    async fn contributors(&self, locator: &str) -> Result<Vec<ContributorEntry>, ServiceError> {
        self.contributor_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_sources.lock().contains(locator) {
            return Err(ServiceError::Request("connection reset".into()));
        }
        self.listings
            .lock()
            .get(locator)
            .cloned()
            .ok_or_else(|| ServiceError::Status {
                status: 404,
                body: "not found".into(),
            })
    }

    async fn profile(&self, login: &str) -> Result<ProfileSnapshot, ServiceError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);

        let cancel = self.cancel_on_profile.lock().as_deref() == Some(login);
        if cancel {
            for task in self.store.list_active_tasks().await.unwrap() {
                self.store.cancel_task(task.id).await.unwrap();
            }
            return Err(ServiceError::Request("interrupted".into()));
        }
        if self.failing_profiles.lock().contains(login) {
            return Err(ServiceError::invalid_response("missing login"));
        }

        let email = self
            .emails
            .lock()
            .contains(login)
            .then(|| format!("{login}@example.com"));
        Ok(ProfileSnapshot {
            login: login.to_string(),
            name: Some(login.to_uppercase()),
            location: None,
            email,
            html_url: format!("https://github.com/{login}"),
            avatar_url: format!("https://avatars.example.com/{login}"),
        })
    }

    async fn repositories(&self, login: &str) -> Result<Vec<RepositorySummary>, ServiceError> {
        self.repository_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![RepositorySummary {
            name: format!("{login}-tool"),
            description: Some("A tool".into()),
            html_url: format!("https://github.com/{login}/{login}-tool"),
            language: Some("Rust".into()),
            contributors_url: format!(
                "https://api.github.com/repos/{login}/{login}-tool/contributors"
            ),
            created_at: "2024-01-01T00:00:00Z".into(),
        }])
    }
}

/// Profile search serving pages from a list, shared by every query
#[derive(Default)]
pub(crate) struct FakeProfileSearch {
    pages: Mutex<Vec<ProfileSearchPage>>,
    requests: Mutex<Vec<(String, u32)>>,
    failing: AtomicBool,
    panic_on: Mutex<Option<String>>,
}

impl FakeProfileSearch {
    pub fn push_page(&self, page: ProfileSearchPage) {
        self.pages.lock().push(page);
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn panic_on(&self, query: &str) {
        *self.panic_on.lock() = Some(query.to_string());
    }

    pub fn requests(&self) -> Vec<(String, u32)> {
        self.requests.lock().clone()
    }

    pub fn requested_pages(&self) -> Vec<u32> {
        self.requests().into_iter().map(|(_, page)| page).collect()
    }
}

#[async_trait]
impl ProfileSearch for FakeProfileSearch {
    async fn search(&self, query: &str, page: u32) -> Result<ProfileSearchPage, ServiceError> {
        if self.panic_on.lock().as_deref() == Some(query) {
            panic!("search blew up for {query}");
        }
        self.requests.lock().push((query.to_string(), page));
        tokio::task::yield_now().await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::RateLimited { retry_after: None });
        }
        self.pages
            .lock()
            .get(page as usize - 1)
            .cloned()
            .ok_or_else(|| ServiceError::invalid_response(format!("no page {page}")))
    }
}

/// Summarizer answering from the subject's identity
pub(crate) struct FakeSummarizer {
    store: Arc<InMemoryTaskStore>,
    calls: AtomicUsize,
    failures: AtomicUsize,
    cancel_during_call: AtomicBool,
}

impl FakeSummarizer {
    fn new(store: Arc<InMemoryTaskStore>) -> Self {
        Self {
            store,
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            cancel_during_call: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` calls
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Cancel every active task while a summary is being produced
    pub fn cancel_during_call(&self) {
        self.cancel_during_call.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(
        &self,
        query: &str,
        context: &SummaryContext,
    ) -> Result<Summary, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failures) {
            return Err(ServiceError::Status {
                status: 503,
                body: "overloaded".into(),
            });
        }
        if self.cancel_during_call.load(Ordering::SeqCst) {
            for task in self.store.list_active_tasks().await.unwrap() {
                self.store.cancel_task(task.id).await.unwrap();
            }
        }

        let subject = match context {
            SummaryContext::Contributor { profile, .. } => profile.login.clone(),
            SummaryContext::Profile(profile) => profile.id.clone(),
        };
        Ok(Summary {
            summary: format!("{subject} fits {query}"),
            rating: 8.0,
        })
    }
}

/// Normalizer that keeps the words of the query
#[derive(Default)]
pub(crate) struct FakeNormalizer {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl FakeNormalizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn call(&self) -> Result<(), ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::Request("model unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueryNormalizer for FakeNormalizer {
    async fn contributor_params(&self, query: &str) -> Result<SearchParams, ServiceError> {
        self.call()?;
        Ok(SearchParams {
            keywords: query.split_whitespace().map(str::to_string).collect(),
            role: vec!["backend".into()],
            language: vec!["go".into()],
            location: Vec::new(),
        })
    }

    async fn profile_query(&self, query: &str) -> Result<String, ServiceError> {
        self.call()?;
        Ok(format!("\"{}\"", query.trim()))
    }
}

/// Decrement `counter` if it is positive; returns whether it was
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory store whose cancellation checks can be made to fail
pub(crate) struct FlakyStore {
    inner: Arc<InMemoryTaskStore>,
    passing_checks: AtomicUsize,
    failing_checks: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryTaskStore>) -> Self {
        Self {
            inner,
            passing_checks: AtomicUsize::new(0),
            failing_checks: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` cancellation checks with a database error
    pub fn fail_checks(&self, n: usize) {
        self.fail_checks_after(0, n);
    }

    /// Answer `pass` cancellation checks, then fail the following `fail`
    pub fn fail_checks_after(&self, pass: usize, fail: usize) {
        self.passing_checks.store(pass, Ordering::SeqCst);
        self.failing_checks.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn create_query(&self, query: &QueryRecord) -> Result<(), StoreError> {
        self.inner.create_query(query).await
    }

    async fn get_query(&self, query_id: Uuid) -> Result<QueryRecord, StoreError> {
        self.inner.get_query(query_id).await
    }

    async fn create_task(&self, task: NewTask) -> Result<(), StoreError> {
        self.inner.create_task(task).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<TaskRecord, StoreError> {
        self.inner.get_task(task_id).await
    }

    async fn task_status(&self, task_id: Uuid) -> Result<TaskStatus, StoreError> {
        self.inner.task_status(task_id).await
    }

    async fn save_checkpoint(
        &self,
        task_id: Uuid,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        self.inner.save_checkpoint(task_id, checkpoint).await
    }

    async fn transition(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<(), StoreError> {
        self.inner.transition(task_id, from, to).await
    }

    async fn list_active_tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.list_active_tasks().await
    }

    async fn is_not_cancelled(&self, task_id: Uuid) -> Result<bool, StoreError> {
        if !take_one(&self.passing_checks) && take_one(&self.failing_checks) {
            return Err(StoreError::Database("connection reset".into()));
        }
        self.inner.is_not_cancelled(task_id).await
    }

    async fn claim_match(&self, task_id: Uuid, subject: &str) -> Result<bool, StoreError> {
        self.inner.claim_match(task_id, subject).await
    }

    async fn release_match(&self, task_id: Uuid, subject: &str) -> Result<(), StoreError> {
        self.inner.release_match(task_id, subject).await
    }

    async fn update_match(
        &self,
        task_id: Uuid,
        subject: &str,
        summary: &str,
        rating: f64,
    ) -> Result<(), StoreError> {
        self.inner
            .update_match(task_id, subject, summary, rating)
            .await
    }

    async fn list_matches(
        &self,
        task_id: Uuid,
        subjects: &[String],
    ) -> Result<Vec<MatchRecord>, StoreError> {
        self.inner.list_matches(task_id, subjects).await
    }
}

/// Fakes wired into a task context over an in-memory store
///
/// The context reaches the store through [`FlakyStore`]; `store` is the
/// store behind it, for direct reads and writes.
pub(crate) struct Harness {
    pub store: Arc<InMemoryTaskStore>,
    pub flaky: Arc<FlakyStore>,
    pub directory: Arc<FakeDirectory>,
    pub search: Arc<FakeProfileSearch>,
    pub summarizer: Arc<FakeSummarizer>,
    pub normalizer: Arc<FakeNormalizer>,
    pub ctx: Arc<TaskContext>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryTaskStore::new());
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        let directory = Arc::new(FakeDirectory::new(store.clone()));
        let search = Arc::new(FakeProfileSearch::default());
        let summarizer = Arc::new(FakeSummarizer::new(store.clone()));
        let normalizer = Arc::new(FakeNormalizer::default());
        let ctx = Arc::new(TaskContext::new(
            &Self::config(),
            flaky.clone(),
            directory.clone(),
            search.clone(),
            summarizer.clone(),
            normalizer.clone(),
        ));
        Self {
            store,
            flaky,
            directory,
            search,
            summarizer,
            normalizer,
            ctx,
        }
    }

    /// Engine defaults with instant retries
    pub fn config() -> EngineConfig {
        EngineConfig::default().with_retry(RetryPolicy::fixed(Duration::ZERO, 2))
    }
}

async fn seed_task(
    harness: &Harness,
    actor: &str,
    params: QueryParams,
    checkpoint: Checkpoint,
) -> QueryTask {
    let query = QueryRecord::new("rust engineer", params);
    harness.store.create_query(&query).await.unwrap();

    let id = Uuid::now_v7();
    harness
        .store
        .create_task(NewTask {
            id,
            query_id: query.id,
            actor_id: actor.to_string(),
            status: TaskStatus::Pending,
            checkpoint: checkpoint.clone(),
        })
        .await
        .unwrap();
    QueryTask::new(id, actor, checkpoint, harness.ctx.clone())
}

pub(crate) async fn seed_contributors_task(
    harness: &Harness,
    locators: &[&str],
    config: ContributorsMatchConfig,
) -> QueryTask {
    let checkpoint = Checkpoint::ContributorsMatch(ContributorsMatchCheckpoint::new(
        config,
        locators.iter().map(|l| l.to_string()).collect(),
    ));
    seed_task(
        harness,
        "system",
        QueryParams::Contributors(SearchParams::default()),
        checkpoint,
    )
    .await
}

pub(crate) async fn seed_profiles_task(
    harness: &Harness,
    config: ProfilesMatchConfig,
) -> QueryTask {
    seed_profiles_task_for(harness, "system", "rust engineer", config).await
}

pub(crate) async fn seed_profiles_task_for(
    harness: &Harness,
    actor: &str,
    query: &str,
    config: ProfilesMatchConfig,
) -> QueryTask {
    let checkpoint = Checkpoint::ProfilesMatch(ProfilesMatchCheckpoint::new(config, query));
    seed_task(
        harness,
        actor,
        QueryParams::Profiles {
            query: query.to_string(),
        },
        checkpoint,
    )
    .await
}
