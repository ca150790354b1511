//! # Durable Task Engine
//!
//! Resumable candidate-matching tasks that survive process restarts.
//!
//! ## Features
//!
//! - **Checkpointed tasks**: every step ends with a persisted checkpoint, so a restarted process resumes where the last step left off
//! - **Per-actor fairness**: each actor has its own FIFO queue, stepped one bounded step at a time in round-robin order
//! - **Rate-limited dispatch**: outbound calls go through per-actor concurrency slots with retries
//! - **Cooperative cancellation**: a cancelled task stops at the next step or the next dispatched call
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       QueryService                          │
//! │  (creates queries and tasks, snapshots, cancel, matches)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TaskScheduler                          │
//! │  (per-actor queues, one runner per actor, round-robin)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              QueryTask ──► RequestDispatcher                │
//! │  (bounded steps, checkpoint after each; per-actor slots)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TaskStore                            │
//! │  (PostgreSQL: scout_queries, scout_tasks, scout_matches)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use scout_durable::prelude::*;
//!
//! let store = Arc::new(InMemoryTaskStore::new());
//! let ctx = Arc::new(TaskContext::new(
//!     &EngineConfig::from_env(),
//!     store,
//!     directory,
//!     search,
//!     openai.clone(),
//!     openai,
//! ));
//! let scheduler = TaskScheduler::new(ctx);
//! scheduler.resume_all().await?;
//!
//! let service = QueryService::new(scheduler);
//! let task_id = service
//!     .start_profiles_match(SYSTEM_ACTOR, "rust engineer berlin", Default::default())
//!     .await?;
//! ```

pub mod config;
pub mod directory;
pub mod dispatch;
pub mod persistence;
pub mod reliability;
pub mod scheduler;
pub mod service;
pub mod task;

#[cfg(test)]
mod testing;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{EngineConfig, SYSTEM_ACTOR};
    pub use crate::directory::{
        ContributorDirectory, ProfileSearch, QueryNormalizer, SearchParams, ServiceError,
        Summarizer,
    };
    pub use crate::dispatch::{DispatchError, DispatcherConfig, RequestDispatcher};
    pub use crate::persistence::{
        InMemoryTaskStore, PostgresTaskStore, StoreError, TaskStatus, TaskStore,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::scheduler::TaskScheduler;
    pub use crate::service::{QueryService, QueryServiceError, RankedMatch, TaskSnapshot};
    pub use crate::task::{ContributorsMatchConfig, ProfilesMatchConfig, QueryTask, TaskContext};
}

// Re-export key types at crate root
pub use config::{EngineConfig, SYSTEM_ACTOR};
pub use dispatch::{ActorLoad, DispatchError, DispatcherConfig, RequestDispatcher};
pub use persistence::{
    InMemoryTaskStore, PostgresTaskStore, StoreError, TaskRecord, TaskStatus, TaskStore,
};
pub use reliability::RetryPolicy;
pub use scheduler::TaskScheduler;
pub use service::{
    MatchDetail, QueryService, QueryServiceError, RankedMatch, TaskProgress, TaskSnapshot,
};
pub use task::{Checkpoint, QueryTask, StepOutcome, TaskContext};
