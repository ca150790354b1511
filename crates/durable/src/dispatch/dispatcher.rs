//! Rate-limited request dispatcher

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

use super::load::{ActorLoad, ActorSlots};
use crate::directory::ServiceError;
use crate::persistence::{StoreError, TaskStore};
use crate::reliability::RetryPolicy;

/// Dispatcher configuration
///
/// # Example
///
/// ```
/// use scout_durable::dispatch::DispatcherConfig;
///
/// let config = DispatcherConfig::new("github").with_max_concurrent(100);
/// assert_eq!(config.retry.max_attempts, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatcherConfig {
    /// Service family name, used in logs
    pub name: String,

    /// Maximum in-flight calls per actor
    pub max_concurrent: usize,

    /// Pause and attempt count between failed calls
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_concurrent: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set maximum in-flight calls per actor
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Why a dispatch produced no result
///
/// `Cancelled` and `Exhausted` mean "skip this unit of work". A store that
/// could not answer the cancellation check says nothing about the task, so
/// callers surface `StoreUnavailable` as a store failure instead.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The owning task is cancelled or no longer exists
    #[error("owning task is cancelled")]
    Cancelled,

    /// The cancellation check itself failed
    #[error("cancellation check failed: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Every attempt failed
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: ServiceError,
    },
}

/// Gate in front of one external service family
///
/// Every outbound call passes through [`dispatch`](Self::dispatch), which
/// bounds in-flight calls per actor, queues overflow in FIFO order, retries
/// failures with the configured pause, and refuses to run work that belongs to
/// a cancelled task.
pub struct RequestDispatcher {
    config: DispatcherConfig,
    store: Arc<dyn TaskStore>,
    actors: DashMap<String, Arc<ActorSlots>>,
}

/// Held while an operation runs; frees the slot on drop, including unwinding
struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    slots: Arc<ActorSlots>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.finish();
    }
}

impl RequestDispatcher {
    /// Create a dispatcher checking cancellation against `store`
    pub fn new(config: DispatcherConfig, store: Arc<dyn TaskStore>) -> Self {
        Self {
            config,
            store,
            actors: DashMap::new(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Current in-flight and waiting counts for an actor
    pub fn load(&self, actor: &str) -> ActorLoad {
        self.actors
            .get(actor)
            .map(|slots| slots.load())
            .unwrap_or_default()
    }

    fn slots(&self, actor: &str) -> Arc<ActorSlots> {
        self.actors
            .entry(actor.to_string())
            .or_insert_with(|| Arc::new(ActorSlots::new(self.config.max_concurrent)))
            .clone()
    }

    async fn acquire(&self, slots: &Arc<ActorSlots>) -> Result<SlotGuard, DispatchError> {
        let semaphore: Arc<Semaphore> = slots.semaphore();
        let waiting = slots.wait();
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Cancelled)?;
        drop(waiting);
        slots.start();
        Ok(SlotGuard {
            _permit: permit,
            slots: slots.clone(),
        })
    }

    /// Whether the owning task still accepts work
    async fn may_dispatch(&self, task_id: Uuid) -> Result<bool, DispatchError> {
        self.store.is_not_cancelled(task_id).await.map_err(|e| {
            warn!(
                dispatcher = %self.config.name,
                %task_id,
                error = %e,
                "cancellation check failed, not dispatching"
            );
            DispatchError::StoreUnavailable(e)
        })
    }

    /// Run `operation` under the actor's concurrency cap
    ///
    /// When `task_id` is set, the owning task is checked before every attempt
    /// and a cancelled or missing task yields [`DispatchError::Cancelled`]
    /// without invoking the operation. A failed check yields
    /// [`DispatchError::StoreUnavailable`], also without invoking it.
    pub async fn dispatch<T, F, Fut>(
        &self,
        actor: &str,
        task_id: Option<Uuid>,
        mut operation: F,
    ) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let slots = self.slots(actor);
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = {
                let _slot = self.acquire(&slots).await?;
                if let Some(task_id) = task_id {
                    if !self.may_dispatch(task_id).await? {
                        debug!(
                            dispatcher = %self.config.name,
                            %task_id,
                            "task cancelled, dropping call"
                        );
                        return Err(DispatchError::Cancelled);
                    }
                }
                operation().await
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if retry.has_attempts_remaining(attempt) => {
                    let delay = retry.delay_for_attempt(attempt + 1);
                    warn!(
                        dispatcher = %self.config.name,
                        actor,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        dispatcher = %self.config.name,
                        actor,
                        attempts = attempt,
                        error = %e,
                        "call failed, giving up"
                    );
                    return Err(DispatchError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }
    }
}
