//! Resumable query tasks
//!
//! A [`QueryTask`] owns one checkpoint and advances it by one bounded step
//! at a time. Every step persists its checkpoint before returning, so a task
//! rebuilt from the store continues exactly where the last step left off.
//!
//! Failures never leave a step: external call failures are skipped inside the
//! step, and store failures are logged and surface only as a status.

mod checkpoint;
mod contributors;
mod profiles;

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub use checkpoint::{
    Checkpoint, CompanyCursor, ContributorMatch, ContributorsMatchCheckpoint,
    ContributorsMatchConfig, ProfilesMatchCheckpoint, ProfilesMatchConfig, SourceCursor,
};

use crate::config::EngineConfig;
use crate::directory::{ContributorDirectory, ProfileSearch, QueryNormalizer, Summarizer};
use crate::dispatch::RequestDispatcher;
use crate::persistence::{StoreError, TaskRecord, TaskStatus, TaskStore};

/// Collaborators shared by every task of the process
pub struct TaskContext {
    pub store: Arc<dyn TaskStore>,
    pub directory: Arc<dyn ContributorDirectory>,
    pub profile_search: Arc<dyn ProfileSearch>,
    pub summarizer: Arc<dyn Summarizer>,
    pub normalizer: Arc<dyn QueryNormalizer>,
    pub directory_dispatcher: RequestDispatcher,
    pub search_dispatcher: RequestDispatcher,
    pub summarizer_dispatcher: RequestDispatcher,
}

impl TaskContext {
    /// Wire the collaborators, one dispatcher per service family
    ///
    /// Normalization shares the summarizer's dispatcher: both reach the same
    /// language model.
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn TaskStore>,
        directory: Arc<dyn ContributorDirectory>,
        profile_search: Arc<dyn ProfileSearch>,
        summarizer: Arc<dyn Summarizer>,
        normalizer: Arc<dyn QueryNormalizer>,
    ) -> Self {
        Self {
            directory_dispatcher: RequestDispatcher::new(config.directory.clone(), store.clone()),
            search_dispatcher: RequestDispatcher::new(config.search.clone(), store.clone()),
            summarizer_dispatcher: RequestDispatcher::new(
                config.summarizer.clone(),
                store.clone(),
            ),
            store,
            directory,
            profile_search,
            summarizer,
            normalizer,
        }
    }
}

/// Result of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// Budget units spent by the step
    pub units_consumed: u32,
    pub status: TaskStatus,
}

impl StepOutcome {
    pub fn pending(units_consumed: u32) -> Self {
        Self {
            units_consumed,
            status: TaskStatus::Pending,
        }
    }

    pub fn cancelled(units_consumed: u32) -> Self {
        Self {
            units_consumed,
            status: TaskStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// In-memory handle of a task, driven by the scheduler
pub struct QueryTask {
    id: Uuid,
    actor: String,
    checkpoint: Checkpoint,
    ctx: Arc<TaskContext>,
}

impl std::fmt::Debug for QueryTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTask")
            .field("id", &self.id)
            .field("actor", &self.actor)
            .field("kind", &self.checkpoint.kind())
            .finish()
    }
}

impl QueryTask {
    pub fn new(
        id: Uuid,
        actor: impl Into<String>,
        checkpoint: Checkpoint,
        ctx: Arc<TaskContext>,
    ) -> Self {
        Self {
            id,
            actor: actor.into(),
            checkpoint,
            ctx,
        }
    }

    /// Rebuild a task from its persisted record
    pub fn from_record(record: TaskRecord, ctx: Arc<TaskContext>) -> Self {
        Self::new(record.id, record.actor_id, record.checkpoint, ctx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Perform one bounded unit of progress
    ///
    /// Safe to call repeatedly. A task that is no longer pending in the store
    /// reports its stored status without doing any work; a task that vanished
    /// reports `Cancelled`.
    #[instrument(skip(self), fields(task_id = %self.id, actor = %self.actor, kind = self.checkpoint.kind()))]
    pub async fn step(&mut self) -> StepOutcome {
        match self.ctx.store.task_status(self.id).await {
            Ok(TaskStatus::Pending) => {}
            Ok(status) => {
                return StepOutcome {
                    units_consumed: 0,
                    status,
                }
            }
            Err(StoreError::TaskNotFound(_)) => {
                warn!("task no longer exists");
                return StepOutcome::cancelled(0);
            }
            Err(e) => {
                error!(error = %e, "failed to read task status");
                return StepOutcome::pending(0);
            }
        }

        let ctx = &*self.ctx;
        let result = match &mut self.checkpoint {
            Checkpoint::ContributorsMatch(state) => {
                contributors::step(ctx, self.id, &self.actor, state).await
            }
            Checkpoint::ProfilesMatch(state) => {
                profiles::step(ctx, self.id, &self.actor, state).await
            }
        };

        match result {
            Ok(outcome) => {
                debug!(
                    units = outcome.units_consumed,
                    status = %outcome.status,
                    indexed = self.checkpoint.indexed_count(),
                    "step finished"
                );
                outcome
            }
            Err(StoreError::TaskNotFound(_)) => {
                warn!("task removed during step");
                StepOutcome::cancelled(0)
            }
            Err(e) => {
                error!(error = %e, "store failure during step, will retry next turn");
                StepOutcome::pending(0)
            }
        }
    }
}

async fn persist(
    ctx: &TaskContext,
    task_id: Uuid,
    checkpoint: Checkpoint,
) -> Result<(), StoreError> {
    ctx.store.save_checkpoint(task_id, &checkpoint).await
}

/// Conditionally mark the task completed
///
/// Losing to a concurrent cancellation reports the stored terminal status.
async fn complete(
    ctx: &TaskContext,
    task_id: Uuid,
    units_consumed: u32,
) -> Result<StepOutcome, StoreError> {
    match ctx
        .store
        .transition(task_id, TaskStatus::Pending, TaskStatus::Completed)
        .await
    {
        Ok(()) => {
            info!(%task_id, "task completed");
            Ok(StepOutcome {
                units_consumed,
                status: TaskStatus::Completed,
            })
        }
        Err(StoreError::InvalidTransition { actual, .. }) => {
            debug!(%task_id, %actual, "task finished elsewhere");
            Ok(StepOutcome {
                units_consumed,
                status: actual,
            })
        }
        Err(e) => Err(e),
    }
}
