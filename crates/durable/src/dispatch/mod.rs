//! Rate-limited request dispatch
//!
//! This module provides:
//! - [`RequestDispatcher`] - per-actor concurrency gate with retries and cancellation checks
//! - [`DispatcherConfig`] - concurrency cap and retry policy of one service family
//! - [`ActorLoad`] - in-flight and waiting counters for an actor

mod dispatcher;
mod load;

pub use dispatcher::{DispatchError, DispatcherConfig, RequestDispatcher};
pub use load::ActorLoad;
