//! Profile-search step: one result page per step

use tracing::{debug, warn};
use uuid::Uuid;

use super::checkpoint::{Checkpoint, ProfilesMatchCheckpoint};
use super::{complete, persist, StepOutcome, TaskContext};
use crate::dispatch::DispatchError;
use crate::persistence::{StoreError, TaskStatus};

const PAGE_COST: u32 = 1;

pub(super) async fn step(
    ctx: &TaskContext,
    task_id: Uuid,
    actor: &str,
    state: &mut ProfilesMatchCheckpoint,
) -> Result<StepOutcome, StoreError> {
    let page = state.page + 1;
    let query = state.query.as_str();

    let results = match ctx
        .search_dispatcher
        .dispatch(actor, Some(task_id), move || {
            ctx.profile_search.search(query, page)
        })
        .await
    {
        Ok(results) => results,
        Err(DispatchError::Cancelled) => return Ok(StepOutcome::cancelled(PAGE_COST)),
        Err(DispatchError::StoreUnavailable(e)) => return Err(e),
        Err(e) => {
            // A page is the smallest unit this search can recover; give up on the task
            warn!(%task_id, page, error = %e, "page fetch failed, cancelling task");
            return match ctx
                .store
                .transition(task_id, TaskStatus::Pending, TaskStatus::Cancelled)
                .await
            {
                Ok(()) => Ok(StepOutcome::cancelled(PAGE_COST)),
                Err(StoreError::InvalidTransition { actual, .. }) => Ok(StepOutcome {
                    units_consumed: PAGE_COST,
                    status: actual,
                }),
                Err(e) => Err(e),
            };
        }
    };

    let remaining_pages = results.remaining_pages;
    for profile in results.profiles {
        state.profiles.insert(profile.id.clone(), profile);
    }
    state.add_companies(results.company_links);
    state.page = page;

    persist(ctx, task_id, Checkpoint::ProfilesMatch(state.clone())).await?;

    debug!(
        %task_id,
        page,
        remaining_pages,
        profiles = state.profiles.len(),
        "processed page"
    );

    if remaining_pages == 0 || state.profiles.len() >= state.config.max_profiles {
        return complete(ctx, task_id, PAGE_COST).await;
    }
    Ok(StepOutcome::pending(PAGE_COST))
}
