//! Per-actor task scheduling
//!
//! Every actor owns a FIFO queue of tasks and at most one runner. The runner
//! is a plain loop: pop the head task, step it, put it back at the tail while
//! it is still pending, repeat until the queue is empty. Actors progress
//! independently of each other.
//!
//! ```text
//! enqueue ──▶ ┌──────── actor queue ────────┐
//!             │ t1 │ t2 │ t3 │ ...          │ ◀── re-append while Pending
//!             └─────────────────────────────┘
//!                │
//!                ▼
//!          runner (one per actor): step() in its own tokio task
//! ```

mod queue;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument};

use crate::persistence::StoreError;
use crate::task::{QueryTask, TaskContext};
use queue::ActorQueue;

/// Registry of actor queues
///
/// Cheap to clone; every clone drives the same queues. Starts empty and is
/// populated by [`enqueue`](Self::enqueue) and [`resume_all`](Self::resume_all).
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    ctx: Arc<TaskContext>,
    queues: Mutex<HashMap<String, ActorQueue>>,
    idle: Notify,
}

impl TaskScheduler {
    pub fn new(ctx: Arc<TaskContext>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                ctx,
                queues: Mutex::new(HashMap::new()),
                idle: Notify::new(),
            }),
        }
    }

    /// Collaborators handed to every task this scheduler rebuilds
    pub fn context(&self) -> &Arc<TaskContext> {
        &self.inner.ctx
    }

    /// Append a task to its actor's queue, starting a runner if none is active
    pub fn enqueue(&self, task: QueryTask) {
        let actor = task.actor().to_string();
        let start = {
            let mut queues = self.inner.queues.lock();
            let queue = queues.entry(actor.clone()).or_default();
            debug!(task_id = %task.id(), actor = %actor, queued = queue.len() + 1, "enqueued task");
            queue.push(task);
            queue.claim()
        };
        if start {
            self.spawn_runner(actor);
        }
    }

    /// Drive an actor's queue until it is empty
    ///
    /// Returns immediately when the actor has no queue or another runner
    /// already owns it.
    pub async fn run_actor_queue(&self, actor: &str) {
        let claimed = self
            .inner
            .queues
            .lock()
            .get_mut(actor)
            .map(ActorQueue::claim)
            .unwrap_or(false);
        if claimed {
            self.drive(actor).await;
        }
    }

    /// Re-admit every non-terminal task from the store
    ///
    /// The only recovery path after a restart. Tasks already held in memory
    /// are not admitted twice. Returns the number of tasks admitted.
    #[instrument(skip(self))]
    pub async fn resume_all(&self) -> Result<usize, StoreError> {
        let records = self.inner.ctx.store.list_active_tasks().await?;

        let mut by_actor: HashMap<String, Vec<QueryTask>> = HashMap::new();
        for record in records {
            by_actor
                .entry(record.actor_id.clone())
                .or_default()
                .push(QueryTask::from_record(record, self.inner.ctx.clone()));
        }

        let mut admitted = 0;
        let mut to_start = Vec::new();
        {
            let mut queues = self.inner.queues.lock();
            for (actor, tasks) in by_actor {
                let queue = queues.entry(actor.clone()).or_default();
                for task in tasks {
                    if !queue.holds(task.id()) {
                        queue.push(task);
                        admitted += 1;
                    }
                }
                if queue.is_empty() && !queue.is_ongoing() {
                    queues.remove(&actor);
                } else if queue.claim() {
                    to_start.push(actor);
                }
            }
        }

        info!(admitted, actors = to_start.len(), "resumed tasks");
        for actor in to_start {
            self.spawn_runner(actor);
        }
        Ok(admitted)
    }

    /// Whether a runner currently owns the actor's queue
    pub fn is_running(&self, actor: &str) -> bool {
        self.inner
            .queues
            .lock()
            .get(actor)
            .map(ActorQueue::is_ongoing)
            .unwrap_or(false)
    }

    /// Tasks held for an actor, including the one being stepped
    pub fn queued(&self, actor: &str) -> usize {
        self.inner
            .queues
            .lock()
            .get(actor)
            .map(ActorQueue::len)
            .unwrap_or(0)
    }

    /// Actors that currently have a queue, sorted
    pub fn active_actors(&self) -> Vec<String> {
        let mut actors: Vec<String> = self.inner.queues.lock().keys().cloned().collect();
        actors.sort();
        actors
    }

    /// Wait until every actor queue has drained
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.queues.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn spawn_runner(&self, actor: String) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.drive(&actor).await;
        });
    }

    /// Runner loop; the caller must have claimed the queue
    async fn drive(&self, actor: &str) {
        debug!(actor, "runner started");
        loop {
            let task = {
                let mut queues = self.inner.queues.lock();
                match queues.get_mut(actor).and_then(ActorQueue::start_next) {
                    Some(task) => task,
                    None => {
                        queues.remove(actor);
                        if queues.is_empty() {
                            self.inner.idle.notify_waiters();
                        }
                        debug!(actor, "runner finished, queue drained");
                        return;
                    }
                }
            };

            let task_id = task.id();
            // A panicking step only takes its own task down
            let stepped = tokio::spawn(async move {
                let mut task = task;
                let outcome = task.step().await;
                (task, outcome)
            })
            .await;

            let mut queues = self.inner.queues.lock();
            let queue = queues.entry(actor.to_string()).or_default();
            queue.finish_current();
            match stepped {
                Ok((task, outcome)) if !outcome.is_terminal() => queue.push(task),
                Ok((_, outcome)) => {
                    info!(%task_id, actor, status = %outcome.status, "task finished");
                }
                Err(e) => {
                    error!(
                        %task_id,
                        actor,
                        error = %e,
                        "step panicked, task dropped until the next resume"
                    );
                }
            }
        }
    }
}
