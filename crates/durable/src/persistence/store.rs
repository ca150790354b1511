//! TaskStore trait definition

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::SearchParams;
use crate::task::Checkpoint;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Query not found
    #[error("query not found: {0}")]
    QueryNotFound(Uuid),

    /// Conditional status update lost (task was not in the expected state)
    #[error("task {id} is {actual}, cannot transition from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        actual: TaskStatus,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Task status
///
/// `Pending` is the only non-terminal state. Transitions are monotonic:
/// `Pending -> Completed` or `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// More work remains
    Pending,

    /// Stopping condition met
    Completed,

    /// Cancelled by a caller or by an unrecoverable page fetch failure
    Cancelled,
}

impl TaskStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Check if this state allows transitioning to another state
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Completed) | (Self::Pending, Self::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::Serialization(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

/// Normalized search parameters a query was created with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum QueryParams {
    /// Code-hosting contributor search
    Contributors(SearchParams),

    /// Professional-network profile search
    Profiles { query: String },
}

/// A free-text query. Immutable once created, apart from the one-time
/// attachment of its task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: Uuid,
    pub text: String,
    pub params: QueryParams,
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl QueryRecord {
    pub fn new(text: impl Into<String>, params: QueryParams) -> Self {
        Self {
            id: Uuid::now_v7(),
            text: text.into(),
            params,
            task_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Definition of a task to be created
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: Uuid,
    pub query_id: Uuid,
    pub actor_id: String,
    pub status: TaskStatus,
    pub checkpoint: Checkpoint,
}

/// A task as stored
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: Uuid,
    pub query_id: Uuid,
    pub actor_id: String,
    pub status: TaskStatus,
    pub checkpoint: Checkpoint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Summary and rating attached to one matched subject
///
/// Kept apart from the checkpoint so that summarization never rewrites task
/// progress. An empty summary marks a claimed record whose summarization is
/// still in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub task_id: Uuid,
    pub subject: String,
    pub summary: String,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn is_summarized(&self) -> bool {
        !self.summary.is_empty()
    }
}

/// Durable store for queries, tasks and match summaries
///
/// Implementations must be thread-safe. Every operation is an atomic
/// read or update of a single record; the engine needs no multi-row
/// transactions.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    // =========================================================================
    // Query Operations
    // =========================================================================

    /// Persist a new query
    async fn create_query(&self, query: &QueryRecord) -> Result<(), StoreError>;

    /// Get a query by id
    async fn get_query(&self, query_id: Uuid) -> Result<QueryRecord, StoreError>;

    // =========================================================================
    // Task Operations
    // =========================================================================

    /// Create a task and attach it to its query
    async fn create_task(&self, task: NewTask) -> Result<(), StoreError>;

    /// Get a task by id
    async fn get_task(&self, task_id: Uuid) -> Result<TaskRecord, StoreError>;

    /// Get only the status of a task
    async fn task_status(&self, task_id: Uuid) -> Result<TaskStatus, StoreError>;

    /// Overwrite a task's checkpoint. Status is left untouched.
    async fn save_checkpoint(
        &self,
        task_id: Uuid,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError>;

    /// Atomically move a task from `from` to `to`
    ///
    /// Fails with [`StoreError::InvalidTransition`] when the task is not in
    /// `from` or the transition is not allowed.
    async fn transition(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<(), StoreError>;

    /// Load every task that is not in a terminal state
    async fn list_active_tasks(&self) -> Result<Vec<TaskRecord>, StoreError>;

    /// Whether work tagged with this task may still be dispatched
    ///
    /// A missing task counts as cancelled.
    async fn is_not_cancelled(&self, task_id: Uuid) -> Result<bool, StoreError> {
        match self.task_status(task_id).await {
            Ok(status) => Ok(status != TaskStatus::Cancelled),
            Err(StoreError::TaskNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Cancel a task if it is still pending
    ///
    /// Idempotent: returns the resulting status, which is the existing
    /// terminal status when the task had already finished.
    async fn cancel_task(&self, task_id: Uuid) -> Result<TaskStatus, StoreError> {
        let status = self.task_status(task_id).await?;
        if status.is_terminal() {
            return Ok(status);
        }
        match self
            .transition(task_id, TaskStatus::Pending, TaskStatus::Cancelled)
            .await
        {
            Ok(()) => Ok(TaskStatus::Cancelled),
            Err(StoreError::InvalidTransition { actual, .. }) => Ok(actual),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Match Operations
    // =========================================================================

    /// Create an empty match record if none exists
    ///
    /// Returns `true` when this call created the record, i.e. the caller now
    /// owns summarization for the subject.
    async fn claim_match(&self, task_id: Uuid, subject: &str) -> Result<bool, StoreError>;

    /// Drop a claim whose summarization never landed
    ///
    /// Summarized records are kept. A later [`claim_match`](Self::claim_match)
    /// for the subject succeeds again.
    async fn release_match(&self, task_id: Uuid, subject: &str) -> Result<(), StoreError>;

    /// Write the summary and rating of a match record
    async fn update_match(
        &self,
        task_id: Uuid,
        subject: &str,
        summary: &str,
        rating: f64,
    ) -> Result<(), StoreError>;

    /// List match records of a task, restricted to the given subjects
    async fn list_matches(
        &self,
        task_id: Uuid,
        subjects: &[String],
    ) -> Result<Vec<MatchRecord>, StoreError>;
}
