//! PostgreSQL implementation of TaskStore
//!
//! Production persistence using PostgreSQL with:
//! - Checkpoints stored as JSONB, overwritten after every step
//! - Conditional status transitions in a single `UPDATE ... WHERE status = $from`
//! - Match claims via `INSERT ... ON CONFLICT DO NOTHING`

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::task::Checkpoint;

/// PostgreSQL implementation of TaskStore
///
/// # Example
///
/// ```ignore
/// use scout_durable::PostgresTaskStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/scout").await?;
/// let store = PostgresTaskStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                StoreError::Database(e.to_string())
            })
    }
}

fn db_error(context: &str, e: sqlx::Error) -> StoreError {
    error!("Failed to {}: {}", context, e);
    StoreError::Database(e.to_string())
}

fn task_from_row(row: &PgRow) -> Result<TaskRecord, StoreError> {
    let status: String = row.get("status");
    let checkpoint: Json<Checkpoint> = row
        .try_get("checkpoint")
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(TaskRecord {
        id: row.get("id"),
        query_id: row.get("query_id"),
        actor_id: row.get("actor_id"),
        status: status.parse()?,
        checkpoint: checkpoint.0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn match_from_row(row: &PgRow) -> MatchRecord {
    MatchRecord {
        task_id: row.get("task_id"),
        subject: row.get("subject"),
        summary: row.get("summary"),
        rating: row.get("rating"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    // =========================================================================
    // Query Operations
    // =========================================================================

    #[instrument(skip(self, query), fields(query_id = %query.id))]
    async fn create_query(&self, query: &QueryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scout_queries (id, text, params, task_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(query.id)
        .bind(&query.text)
        .bind(Json(&query.params))
        .bind(query.task_id)
        .bind(query.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("create query", e))?;

        debug!(query_id = %query.id, "created query");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_query(&self, query_id: Uuid) -> Result<QueryRecord, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, text, params, task_id, created_at
            FROM scout_queries
            WHERE id = $1
            "#,
        )
        .bind(query_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get query", e))?
        .ok_or(StoreError::QueryNotFound(query_id))?;

        let params: Json<QueryParams> = row
            .try_get("params")
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(QueryRecord {
            id: row.get("id"),
            text: row.get("text"),
            params: params.0,
            task_id: row.get("task_id"),
            created_at: row.get("created_at"),
        })
    }

    // =========================================================================
    // Task Operations
    // =========================================================================

    #[instrument(skip(self, task), fields(task_id = %task.id, query_id = %task.query_id))]
    async fn create_task(&self, task: NewTask) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO scout_tasks (id, query_id, actor_id, status, checkpoint)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(task.id)
        .bind(task.query_id)
        .bind(&task.actor_id)
        .bind(task.status.as_str())
        .bind(Json(&task.checkpoint))
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("create task", e))?;

        let attached = sqlx::query(
            r#"
            UPDATE scout_queries SET task_id = $2 WHERE id = $1
            "#,
        )
        .bind(task.query_id)
        .bind(task.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("attach task to query", e))?;

        if attached.rows_affected() == 0 {
            return Err(StoreError::QueryNotFound(task.query_id));
        }

        tx.commit()
            .await
            .map_err(|e| db_error("commit task creation", e))?;

        debug!(task_id = %task.id, kind = task.checkpoint.kind(), "created task");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_task(&self, task_id: Uuid) -> Result<TaskRecord, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, query_id, actor_id, status, checkpoint, created_at, updated_at
            FROM scout_tasks
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get task", e))?
        .ok_or(StoreError::TaskNotFound(task_id))?;

        task_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn task_status(&self, task_id: Uuid) -> Result<TaskStatus, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT status FROM scout_tasks WHERE id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get task status", e))?
        .ok_or(StoreError::TaskNotFound(task_id))?;

        let status: String = row.get("status");
        status.parse()
    }

    #[instrument(skip(self, checkpoint))]
    async fn save_checkpoint(
        &self,
        task_id: Uuid,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scout_tasks
            SET checkpoint = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(Json(checkpoint))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("save checkpoint", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn transition(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<(), StoreError> {
        if from.can_transition_to(to) {
            let updated = sqlx::query(
                r#"
                UPDATE scout_tasks
                SET status = $3, updated_at = NOW()
                WHERE id = $1 AND status = $2
                RETURNING id
                "#,
            )
            .bind(task_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("transition task", e))?;

            if updated.is_some() {
                debug!(%task_id, %from, %to, "transitioned task");
                return Ok(());
            }
        }

        let actual = self.task_status(task_id).await?;
        Err(StoreError::InvalidTransition {
            id: task_id,
            actual,
            from,
            to,
        })
    }

    #[instrument(skip(self))]
    async fn list_active_tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, query_id, actor_id, status, checkpoint, created_at, updated_at
            FROM scout_tasks
            WHERE status = 'pending'
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list active tasks", e))?;

        rows.iter().map(task_from_row).collect()
    }

    // =========================================================================
    // Match Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn claim_match(&self, task_id: Uuid, subject: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO scout_matches (task_id, subject, summary, rating)
            VALUES ($1, $2, '', 0)
            ON CONFLICT (task_id, subject) DO NOTHING
            "#,
        )
        .bind(task_id)
        .bind(subject)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("claim match", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn release_match(&self, task_id: Uuid, subject: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM scout_matches
            WHERE task_id = $1 AND subject = $2 AND summary = ''
            "#,
        )
        .bind(task_id)
        .bind(subject)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("release match", e))?;

        Ok(())
    }

    #[instrument(skip(self, summary))]
    async fn update_match(
        &self,
        task_id: Uuid,
        subject: &str,
        summary: &str,
        rating: f64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scout_matches (task_id, subject, summary, rating)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (task_id, subject)
            DO UPDATE SET summary = EXCLUDED.summary, rating = EXCLUDED.rating, updated_at = NOW()
            "#,
        )
        .bind(task_id)
        .bind(subject)
        .bind(summary)
        .bind(rating)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("update match", e))?;

        Ok(())
    }

    #[instrument(skip(self, subjects), fields(subjects = subjects.len()))]
    async fn list_matches(
        &self,
        task_id: Uuid,
        subjects: &[String],
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, subject, summary, rating, created_at, updated_at
            FROM scout_matches
            WHERE task_id = $1 AND subject = ANY($2)
            "#,
        )
        .bind(task_id)
        .bind(subjects)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list matches", e))?;

        Ok(rows.iter().map(match_from_row).collect())
    }
}
