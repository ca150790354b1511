//! Detached summarization of matches
//!
//! Runs outside the task's steps and writes only the match record, never the
//! checkpoint. A claim record is created first so a subject is summarized at
//! most once per task; a summarizer that gives up releases the claim again.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::QueryServiceError;
use crate::directory::SummaryContext;
use crate::dispatch::DispatchError;
use crate::task::TaskContext;

pub(super) fn spawn(
    ctx: Arc<TaskContext>,
    actor: String,
    task_id: Uuid,
    query: String,
    subject: String,
    context: SummaryContext,
) {
    tokio::spawn(async move {
        match summarize(&ctx, &actor, task_id, &query, &subject, &context).await {
            Ok(true) => debug!(%task_id, subject, "match summarized"),
            Ok(false) => debug!(%task_id, subject, "summary skipped"),
            Err(e) => warn!(%task_id, subject, error = %e, "summarization failed"),
        }
    });
}

/// Returns whether a summary was written
async fn summarize(
    ctx: &TaskContext,
    actor: &str,
    task_id: Uuid,
    query: &str,
    subject: &str,
    context: &SummaryContext,
) -> Result<bool, QueryServiceError> {
    if !ctx.store.claim_match(task_id, subject).await? {
        return Ok(false);
    }

    let summary = match ctx
        .summarizer_dispatcher
        .dispatch(actor, Some(task_id), move || {
            ctx.summarizer.summarize(query, context)
        })
        .await
    {
        Ok(summary) => summary,
        Err(DispatchError::Cancelled) => return Ok(false),
        Err(e) => {
            // Free the subject so a later listing starts a new attempt
            if let Err(release) = ctx.store.release_match(task_id, subject).await {
                warn!(%task_id, subject, error = %release, "failed to release match claim");
            }
            return Err(e.into());
        }
    };

    // The task may have been cancelled while the summarizer was busy
    if !ctx.store.is_not_cancelled(task_id).await? {
        return Ok(false);
    }

    ctx.store
        .update_match(task_id, subject, &summary.summary, summary.rating)
        .await?;
    Ok(true)
}
