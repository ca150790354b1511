//! Reliability patterns for outbound calls
//!
//! This module provides:
//! - [`RetryPolicy`] - Fixed pause between dispatch attempts

mod retry;

pub use retry::RetryPolicy;
