//! Persistence layer for the task engine
//!
//! This module provides:
//! - [`TaskStore`] trait for query, task and match persistence
//! - [`InMemoryTaskStore`] for tests and database-less runs
//! - [`PostgresTaskStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;
pub use store::{
    MatchRecord, NewTask, QueryParams, QueryRecord, StoreError, TaskRecord, TaskStatus, TaskStore,
};
