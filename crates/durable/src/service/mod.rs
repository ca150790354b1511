//! Caller-facing query operations
//!
//! Starting a query creates its task and hands it to the scheduler; the call
//! returns before any step ran. State reads and match listings only look at
//! what the last step persisted.

mod summarize;

use std::cmp::Reverse;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::directory::{NetworkProfile, SearchParams, SummaryContext};
use crate::dispatch::DispatchError;
use crate::persistence::{MatchRecord, NewTask, QueryParams, QueryRecord, StoreError, TaskStatus};
use crate::scheduler::TaskScheduler;
use crate::task::{
    Checkpoint, ContributorMatch, ContributorsMatchCheckpoint, ContributorsMatchConfig,
    ProfilesMatchCheckpoint, ProfilesMatchConfig, QueryTask, TaskContext,
};

/// Error type for query service operations
#[derive(Debug, thiserror::Error)]
pub enum QueryServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An external call needed to start or summarize a query failed
    #[error("external call failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Progress derived from a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskProgress {
    ContributorsMatch {
        sources_done: usize,
        sources_total: usize,
    },
    ProfilesMatch {
        page: u32,
        companies: usize,
    },
}

/// Read-only view of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: Uuid,
    pub query_id: Uuid,
    pub kind: &'static str,
    pub status: TaskStatus,
    /// Distinct matches found so far
    pub indexed_count: usize,
    pub progress: TaskProgress,
}

/// What a ranked match refers to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchDetail {
    Contributor(ContributorMatch),
    Profile(NetworkProfile),
}

/// A top contender with its summary, once summarization has landed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    pub subject: String,
    pub detail: MatchDetail,
    pub summary: Option<String>,
    pub rating: Option<f64>,
}

/// Start, inspect and cancel query tasks
#[derive(Clone)]
pub struct QueryService {
    scheduler: TaskScheduler,
}

impl QueryService {
    pub fn new(scheduler: TaskScheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    fn ctx(&self) -> &Arc<TaskContext> {
        self.scheduler.context()
    }

    /// Start matching contributors of repositories found for `text`
    ///
    /// Without keywords in `hints` the text is normalized into search
    /// parameters first, and the roles, languages and locations of `hints`
    /// are added to the result. When the repository search finds nothing the
    /// task is created already completed, with no matches. Nothing is
    /// persisted when normalization or the search fails.
    #[instrument(skip(self, text, hints, config))]
    pub async fn start_contributors_match(
        &self,
        actor: &str,
        text: &str,
        hints: SearchParams,
        config: ContributorsMatchConfig,
    ) -> Result<Uuid, QueryServiceError> {
        let ctx = self.ctx();
        let params = if hints.keywords.is_empty() {
            let normalized = ctx
                .summarizer_dispatcher
                .dispatch(actor, None, || ctx.normalizer.contributor_params(text))
                .await?;
            merge_hints(normalized, hints)
        } else {
            hints
        };
        debug!(keywords = ?params.keywords, language = ?params.language, "repository search");

        let locators = ctx
            .directory_dispatcher
            .dispatch(actor, None, || ctx.directory.search_sources(&params))
            .await?;

        let query = QueryRecord::new(text, QueryParams::Contributors(params));
        ctx.store.create_query(&query).await?;

        let status = if locators.is_empty() {
            TaskStatus::Completed
        } else {
            TaskStatus::Pending
        };
        let checkpoint =
            Checkpoint::ContributorsMatch(ContributorsMatchCheckpoint::new(config, locators));

        let task_id = self.create_task(actor, &query, status, checkpoint).await?;
        info!(%task_id, query_id = %query.id, actor, %status, "started contributors match");
        Ok(task_id)
    }

    /// Start a paginated profile search for `text`
    ///
    /// The text is normalized into a web search string first; an empty
    /// normalization falls back to the text itself.
    #[instrument(skip(self, text, config))]
    pub async fn start_profiles_match(
        &self,
        actor: &str,
        text: &str,
        config: ProfilesMatchConfig,
    ) -> Result<Uuid, QueryServiceError> {
        let ctx = self.ctx();
        let normalized = ctx
            .summarizer_dispatcher
            .dispatch(actor, None, || ctx.normalizer.profile_query(text))
            .await?;
        let search = match normalized.trim() {
            "" => text.trim().to_string(),
            search => search.to_string(),
        };
        debug!(search, "profile search");

        let query = QueryRecord::new(
            text,
            QueryParams::Profiles {
                query: search.clone(),
            },
        );
        ctx.store.create_query(&query).await?;

        let checkpoint = Checkpoint::ProfilesMatch(ProfilesMatchCheckpoint::new(config, search));
        let task_id = self
            .create_task(actor, &query, TaskStatus::Pending, checkpoint)
            .await?;
        info!(%task_id, query_id = %query.id, actor, "started profiles match");
        Ok(task_id)
    }

    async fn create_task(
        &self,
        actor: &str,
        query: &QueryRecord,
        status: TaskStatus,
        checkpoint: Checkpoint,
    ) -> Result<Uuid, QueryServiceError> {
        let ctx = self.ctx();
        let task_id = Uuid::now_v7();
        ctx.store
            .create_task(NewTask {
                id: task_id,
                query_id: query.id,
                actor_id: actor.to_string(),
                status,
                checkpoint: checkpoint.clone(),
            })
            .await?;

        if status == TaskStatus::Pending {
            self.scheduler
                .enqueue(QueryTask::new(task_id, actor, checkpoint, ctx.clone()));
        }
        Ok(task_id)
    }

    /// Snapshot of the last persisted state of a task
    #[instrument(skip(self))]
    pub async fn task_state(&self, task_id: Uuid) -> Result<TaskSnapshot, QueryServiceError> {
        let record = self.ctx().store.get_task(task_id).await?;

        let progress = match &record.checkpoint {
            Checkpoint::ContributorsMatch(state) => TaskProgress::ContributorsMatch {
                sources_done: state.sources.index,
                sources_total: state.sources.locators.len(),
            },
            Checkpoint::ProfilesMatch(state) => TaskProgress::ProfilesMatch {
                page: state.page,
                companies: state.companies.links.len(),
            },
        };

        Ok(TaskSnapshot {
            task_id,
            query_id: record.query_id,
            kind: record.checkpoint.kind(),
            status: record.status,
            indexed_count: record.checkpoint.indexed_count(),
            progress,
        })
    }

    /// Cancel a task; returns the resulting status
    ///
    /// Idempotent. A task that already finished keeps its status.
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<TaskStatus, QueryServiceError> {
        let status = self.ctx().store.cancel_task(task_id).await?;
        info!(%task_id, %status, "cancel requested");
        Ok(status)
    }

    /// Top contenders of a task with their summaries
    ///
    /// Contenders without a summary record get one summarization started in
    /// the background; later calls pick the result up.
    #[instrument(skip(self))]
    pub async fn matches(&self, task_id: Uuid) -> Result<Vec<RankedMatch>, QueryServiceError> {
        let ctx = self.ctx();
        let record = ctx.store.get_task(task_id).await?;
        let query = ctx.store.get_query(record.query_id).await?;

        let contenders = top_contenders(&record.checkpoint);
        let subjects: Vec<String> = contenders.iter().map(|(s, _)| s.clone()).collect();
        let stored: std::collections::HashMap<String, MatchRecord> = ctx
            .store
            .list_matches(task_id, &subjects)
            .await?
            .into_iter()
            .map(|m| (m.subject.clone(), m))
            .collect();

        let mut ranked = Vec::with_capacity(contenders.len());
        for (subject, detail) in contenders {
            let summary = stored.get(&subject).filter(|m| m.is_summarized());
            if !stored.contains_key(&subject) && record.status != TaskStatus::Cancelled {
                summarize::spawn(
                    ctx.clone(),
                    record.actor_id.clone(),
                    task_id,
                    query.text.clone(),
                    subject.clone(),
                    summary_context(&detail),
                );
            }
            ranked.push(RankedMatch {
                summary: summary.map(|m| m.summary.clone()),
                rating: summary.map(|m| m.rating),
                subject,
                detail,
            });
        }
        Ok(ranked)
    }
}

/// Add hinted roles, languages and locations the normalization left out
fn merge_hints(mut params: SearchParams, hints: SearchParams) -> SearchParams {
    for (target, extra) in [
        (&mut params.role, hints.role),
        (&mut params.language, hints.language),
        (&mut params.location, hints.location),
    ] {
        for value in extra {
            if !target.contains(&value) {
                target.push(value);
            }
        }
    }
    params
}

/// Contributors with a public email first, then by total contributions;
/// profiles in identity order
fn top_contenders(checkpoint: &Checkpoint) -> Vec<(String, MatchDetail)> {
    match checkpoint {
        Checkpoint::ContributorsMatch(state) => {
            let mut found: Vec<(&String, &ContributorMatch)> = state.matches.iter().collect();
            found.sort_by_key(|(login, m)| {
                (
                    m.profile.email.is_none(),
                    Reverse(m.total_contributions),
                    login.to_string(),
                )
            });
            found
                .into_iter()
                .take(state.config.max_results)
                .map(|(login, m)| (login.clone(), MatchDetail::Contributor(m.clone())))
                .collect()
        }
        Checkpoint::ProfilesMatch(state) => {
            let mut found: Vec<&NetworkProfile> = state.profiles.values().collect();
            found.sort_by(|a, b| a.id.cmp(&b.id));
            found
                .into_iter()
                .take(state.config.max_profiles)
                .map(|p| (p.id.clone(), MatchDetail::Profile(p.clone())))
                .collect()
        }
    }
}

fn summary_context(detail: &MatchDetail) -> SummaryContext {
    match detail {
        MatchDetail::Contributor(m) => SummaryContext::Contributor {
            profile: m.profile.clone(),
            repositories: m.repositories.clone(),
        },
        MatchDetail::Profile(p) => SummaryContext::Profile(p.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::persistence::TaskStore;
    use crate::testing::{profile_page, seed_profiles_task, Harness};

    fn service(harness: &Harness) -> QueryService {
        QueryService::new(TaskScheduler::new(harness.ctx.clone()))
    }

    async fn idle(service: &QueryService) {
        tokio::time::timeout(Duration::from_secs(5), service.scheduler().wait_idle())
            .await
            .expect("scheduler did not drain");
    }

    /// Poll until every contender carries a summary
    async fn summarized(service: &QueryService, task_id: Uuid) -> Vec<RankedMatch> {
        for _ in 0..200 {
            let ranked = service.matches(task_id).await.unwrap();
            if ranked.iter().all(|m| m.summary.is_some()) {
                return ranked;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("summaries never landed");
    }

    fn params() -> SearchParams {
        SearchParams {
            keywords: vec!["tokio".into()],
            language: vec!["rust".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_contributors_match_end_to_end() {
        let harness = Harness::new();
        harness.directory.add_source("s1", &[("ann", 40), ("bob", 90)]);
        harness.directory.add_source("s2", &[("ann", 70), ("cyd", 20)]);
        harness.directory.with_email("cyd");
        let service = service(&harness);

        let config = ContributorsMatchConfig {
            max_results: 2,
            ..Default::default()
        };
        let task_id = service
            .start_contributors_match("system", "async rust people", params(), config)
            .await
            .unwrap();
        idle(&service).await;

        let state = service.task_state(task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.kind, "contributors_match");
        assert_eq!(state.indexed_count, 3);
        assert_eq!(
            state.progress,
            TaskProgress::ContributorsMatch {
                sources_done: 2,
                sources_total: 2
            }
        );

        let ranked = summarized(&service, task_id).await;
        let subjects: Vec<_> = ranked.iter().map(|m| m.subject.as_str()).collect();
        // email first, then ann (110) ahead of bob (90)
        assert_eq!(subjects, vec!["cyd", "ann"]);
        assert_eq!(
            ranked[1].summary.as_deref(),
            Some("ann fits async rust people")
        );
        assert_eq!(ranked[1].rating, Some(8.0));

        // Summaries are requested once per subject
        service.matches(task_id).await.unwrap();
        assert_eq!(harness.summarizer.calls(), 2);
        // Explicit keywords skip normalization
        assert_eq!(harness.normalizer.calls(), 0);

        let query = harness.store.get_query(state.query_id).await.unwrap();
        assert_eq!(query.task_id, Some(task_id));
    }

    #[tokio::test]
    async fn test_empty_search_completes_immediately() {
        let harness = Harness::new();
        let service = service(&harness);

        let task_id = service
            .start_contributors_match("system", "nobody", params(), Default::default())
            .await
            .unwrap();

        let state = service.task_state(task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.indexed_count, 0);
        assert!(service.scheduler().active_actors().is_empty());
        assert!(service.matches(task_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_search_is_reported() {
        let harness = Harness::new();
        harness.directory.fail_search();
        let service = service(&harness);

        let result = service
            .start_contributors_match("system", "q", params(), Default::default())
            .await;
        assert!(matches!(
            result,
            Err(QueryServiceError::Dispatch(DispatchError::Exhausted { .. }))
        ));
        assert_eq!(harness.store.query_count(), 0);
        assert_eq!(harness.store.task_count(), 0);
    }

    #[tokio::test]
    async fn test_free_text_is_normalized_into_search_params() {
        let harness = Harness::new();
        harness.directory.add_source("s1", &[("ann", 40)]);
        let service = service(&harness);

        let hints = SearchParams {
            language: vec!["rust".into(), "go".into()],
            location: vec!["Berlin".into()],
            ..Default::default()
        };
        let task_id = service
            .start_contributors_match("system", "payments backend", hints, Default::default())
            .await
            .unwrap();
        idle(&service).await;
        assert_eq!(harness.normalizer.calls(), 1);

        let state = service.task_state(task_id).await.unwrap();
        let query = harness.store.get_query(state.query_id).await.unwrap();
        assert_eq!(query.text, "payments backend");
        assert_eq!(
            query.params,
            QueryParams::Contributors(SearchParams {
                keywords: vec!["payments".into(), "backend".into()],
                role: vec!["backend".into()],
                language: vec!["go".into(), "rust".into()],
                location: vec!["Berlin".into()],
            })
        );
    }

    #[tokio::test]
    async fn test_profile_search_uses_normalized_query() {
        let harness = Harness::new();
        harness.search.push_page(profile_page(&["p1"], &[], 0));
        let service = service(&harness);

        let task_id = service
            .start_profiles_match("system", " rust engineer ", Default::default())
            .await
            .unwrap();
        idle(&service).await;

        assert_eq!(
            harness.search.requests(),
            vec![("\"rust engineer\"".to_string(), 1)]
        );
        let state = service.task_state(task_id).await.unwrap();
        let query = harness.store.get_query(state.query_id).await.unwrap();
        assert_eq!(query.text, " rust engineer ");
    }

    #[tokio::test]
    async fn test_failed_normalization_creates_nothing() {
        let harness = Harness::new();
        harness.normalizer.fail();
        let service = service(&harness);

        let result = service
            .start_profiles_match("system", "rust engineer", Default::default())
            .await;
        assert!(matches!(
            result,
            Err(QueryServiceError::Dispatch(DispatchError::Exhausted { .. }))
        ));
        let result = service
            .start_contributors_match("system", "rust", SearchParams::default(), Default::default())
            .await;
        assert!(result.is_err());
        assert_eq!(harness.store.query_count(), 0);
        assert!(harness.search.requests().is_empty());
    }

    #[tokio::test]
    async fn test_profiles_match_and_cancel() {
        let harness = Harness::new();
        for page in 1..=20u32 {
            let id = format!("p{page}");
            harness.search.push_page(profile_page(&[&id], &["acme"], 20 - page));
        }
        let service = service(&harness);

        let task_id = service
            .start_profiles_match("system", "rust engineer berlin", Default::default())
            .await
            .unwrap();
        assert_eq!(service.task_state(task_id).await.unwrap().status, TaskStatus::Pending);

        assert_eq!(
            service.cancel_task(task_id).await.unwrap(),
            TaskStatus::Cancelled
        );
        assert_eq!(
            service.cancel_task(task_id).await.unwrap(),
            TaskStatus::Cancelled
        );
        idle(&service).await;

        let state = service.task_state(task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Cancelled);
        assert!(harness.search.requested_pages().len() <= 1);

        // No summaries are started for a cancelled task
        service.matches(task_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(harness.summarizer.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let harness = Harness::new();
        harness.search.push_page(profile_page(&["p1", "p2"], &[], 0));
        let service = service(&harness);

        let task_id = service
            .start_profiles_match("system", "q", Default::default())
            .await
            .unwrap();
        idle(&service).await;

        assert_eq!(
            service.cancel_task(task_id).await.unwrap(),
            TaskStatus::Completed
        );
        let ranked = summarized(&service, task_id).await;
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].subject, "p1");
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let harness = Harness::new();
        let service = service(&harness);
        let result = service.task_state(Uuid::now_v7()).await;
        assert!(matches!(
            result,
            Err(QueryServiceError::Store(StoreError::TaskNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_during_summary_discards_it() {
        let harness = Harness::new();
        let mut task = seed_profiles_task(&harness, Default::default()).await;
        harness.search.push_page(profile_page(&["p1"], &[], 3));
        assert_eq!(task.step().await.status, TaskStatus::Pending);
        harness.summarizer.cancel_during_call();
        let service = service(&harness);

        let ranked = service.matches(task.id()).await.unwrap();
        assert_eq!(ranked.len(), 1);
        for _ in 0..200 {
            if harness.summarizer.calls() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            harness.store.task_status(task.id()).await.unwrap(),
            TaskStatus::Cancelled
        );
        let records = harness
            .store
            .list_matches(task.id(), &["p1".to_string()])
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_summarized());

        let ranked = service.matches(task.id()).await.unwrap();
        assert_eq!(ranked[0].summary, None);
        assert_eq!(harness.summarizer.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_summary_is_retried_by_a_later_listing() {
        let harness = Harness::new();
        harness.search.push_page(profile_page(&["p1"], &[], 0));
        // Both attempts of the first summarization fail
        harness.summarizer.fail_next(2);
        let service = service(&harness);

        let task_id = service
            .start_profiles_match("system", "q", Default::default())
            .await
            .unwrap();
        idle(&service).await;

        let ranked = summarized(&service, task_id).await;
        assert_eq!(ranked[0].summary.as_deref(), Some("p1 fits q"));
        assert_eq!(harness.summarizer.calls(), 3);
    }
}
