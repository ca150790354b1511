//! In-memory implementation of TaskStore

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::task::Checkpoint;

/// In-memory implementation of TaskStore
///
/// Used by tests and by the worker when no database is configured. It
/// provides the same semantics as the PostgreSQL implementation, but nothing
/// survives a restart.
///
/// # Example
///
/// ```
/// use scout_durable::InMemoryTaskStore;
///
/// let store = InMemoryTaskStore::new();
/// assert_eq!(store.task_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryTaskStore {
    queries: RwLock<HashMap<Uuid, QueryRecord>>,
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
    matches: RwLock<HashMap<(Uuid, String), MatchRecord>>,
}

impl InMemoryTaskStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of tasks
    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    /// Get the number of queries
    pub fn query_count(&self) -> usize {
        self.queries.read().len()
    }

    /// Remove a task outright, as if its row had been deleted
    pub fn remove_task(&self, task_id: Uuid) -> bool {
        self.tasks.write().remove(&task_id).is_some()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    // =========================================================================
    // Query Operations
    // =========================================================================

    async fn create_query(&self, query: &QueryRecord) -> Result<(), StoreError> {
        self.queries.write().insert(query.id, query.clone());
        Ok(())
    }

    async fn get_query(&self, query_id: Uuid) -> Result<QueryRecord, StoreError> {
        self.queries
            .read()
            .get(&query_id)
            .cloned()
            .ok_or(StoreError::QueryNotFound(query_id))
    }

    // =========================================================================
    // Task Operations
    // =========================================================================

    async fn create_task(&self, task: NewTask) -> Result<(), StoreError> {
        {
            let mut queries = self.queries.write();
            let query = queries
                .get_mut(&task.query_id)
                .ok_or(StoreError::QueryNotFound(task.query_id))?;
            query.task_id = Some(task.id);
        }

        let now = Utc::now();
        self.tasks.write().insert(
            task.id,
            TaskRecord {
                id: task.id,
                query_id: task.query_id,
                actor_id: task.actor_id,
                status: task.status,
                checkpoint: task.checkpoint,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<TaskRecord, StoreError> {
        self.tasks
            .read()
            .get(&task_id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    async fn task_status(&self, task_id: Uuid) -> Result<TaskStatus, StoreError> {
        self.tasks
            .read()
            .get(&task_id)
            .map(|t| t.status)
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    async fn save_checkpoint(
        &self,
        task_id: Uuid,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        task.checkpoint = checkpoint.clone();
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn transition(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;

        if task.status != from || !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                id: task_id,
                actual: task.status,
                from,
                to,
            });
        }

        task.status = to;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn list_active_tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let mut active: Vec<TaskRecord> = self
            .tasks
            .read()
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|t| t.created_at);
        Ok(active)
    }

    // =========================================================================
    // Match Operations
    // =========================================================================

    async fn claim_match(&self, task_id: Uuid, subject: &str) -> Result<bool, StoreError> {
        let key = (task_id, subject.to_string());
        let mut matches = self.matches.write();
        if matches.contains_key(&key) {
            return Ok(false);
        }

        let now = Utc::now();
        matches.insert(
            key,
            MatchRecord {
                task_id,
                subject: subject.to_string(),
                summary: String::new(),
                rating: 0.0,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(true)
    }

    async fn release_match(&self, task_id: Uuid, subject: &str) -> Result<(), StoreError> {
        let key = (task_id, subject.to_string());
        let mut matches = self.matches.write();
        if matches.get(&key).is_some_and(|m| !m.is_summarized()) {
            matches.remove(&key);
        }
        Ok(())
    }

    async fn update_match(
        &self,
        task_id: Uuid,
        subject: &str,
        summary: &str,
        rating: f64,
    ) -> Result<(), StoreError> {
        let key = (task_id, subject.to_string());
        let mut matches = self.matches.write();
        let now = Utc::now();
        let record = matches.entry(key).or_insert_with(|| MatchRecord {
            task_id,
            subject: subject.to_string(),
            summary: String::new(),
            rating: 0.0,
            created_at: now,
            updated_at: now,
        });
        record.summary = summary.to_string();
        record.rating = rating;
        record.updated_at = now;
        Ok(())
    }

    async fn list_matches(
        &self,
        task_id: Uuid,
        subjects: &[String],
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let matches = self.matches.read();
        Ok(subjects
            .iter()
            .filter_map(|s| matches.get(&(task_id, s.clone())).cloned())
            .collect())
    }
}
