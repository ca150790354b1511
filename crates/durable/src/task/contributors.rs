//! Contributor-match step
//!
//! Walks the contributor listings of the searched repositories, one source at
//! a time, until the step budget is spent. A new contributor costs a profile
//! and a repository fetch; a contributor seen in an earlier source only has
//! their contributions added.

use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

use super::checkpoint::{Checkpoint, ContributorMatch, ContributorsMatchCheckpoint};
use super::{complete, persist, StepOutcome, TaskContext};
use crate::directory::ContributorEntry;
use crate::dispatch::DispatchError;
use crate::persistence::StoreError;

const SOURCE_COST: u32 = 1;
const NEW_CONTRIBUTOR_COST: u32 = 2;

/// Changes produced by one source, applied only once the source is done
#[derive(Default)]
struct SourceHarvest {
    units: u32,
    new_matches: Vec<(String, ContributorMatch)>,
    known: Vec<(String, u64)>,
}

pub(super) async fn step(
    ctx: &TaskContext,
    task_id: Uuid,
    actor: &str,
    state: &mut ContributorsMatchCheckpoint,
) -> Result<StepOutcome, StoreError> {
    let budget = state.config.batch_size.max(1);
    let mut units = 0;

    while units < budget {
        let locator = match state.sources.current() {
            Some(locator) if !state.halt_reached() => locator.to_string(),
            _ => {
                debug!(
                    %task_id,
                    matches = state.matches.len(),
                    sources = state.sources.index,
                    "stopping condition met"
                );
                persist(ctx, task_id, Checkpoint::ContributorsMatch(state.clone())).await?;
                return complete(ctx, task_id, units).await;
            }
        };

        let Some(harvest) = harvest_source(ctx, task_id, actor, state, &locator).await? else {
            return Ok(StepOutcome::cancelled(units));
        };
        units += harvest.units;

        for (login, found) in harvest.new_matches {
            state.matches.entry(login).or_insert(found);
        }
        for (login, contributions) in harvest.known {
            if let Some(found) = state.matches.get_mut(&login) {
                found.total_contributions += contributions;
            }
        }

        state.sources.advance();
        persist(ctx, task_id, Checkpoint::ContributorsMatch(state.clone())).await?;
    }

    Ok(StepOutcome::pending(units))
}

/// Process one source without touching the checkpoint
///
/// Returns `None` when the task was cancelled mid-source. A store that cannot
/// answer the cancellation check aborts the source; it is redone next step.
async fn harvest_source(
    ctx: &TaskContext,
    task_id: Uuid,
    actor: &str,
    state: &ContributorsMatchCheckpoint,
    locator: &str,
) -> Result<Option<SourceHarvest>, StoreError> {
    let mut harvest = SourceHarvest {
        units: SOURCE_COST,
        ..Default::default()
    };

    let entries = match ctx
        .directory_dispatcher
        .dispatch(actor, Some(task_id), move || {
            ctx.directory.contributors(locator)
        })
        .await
    {
        Ok(entries) => entries,
        Err(DispatchError::Cancelled) => return Ok(None),
        Err(DispatchError::StoreUnavailable(e)) => return Err(e),
        Err(e) => {
            warn!(%task_id, locator, error = %e, "skipping source");
            return Ok(Some(harvest));
        }
    };

    let config = &state.config;
    for entry in select(entries, config.min_contributions, config.max_contributors) {
        if state.matches.contains_key(&entry.login) {
            harvest.known.push((entry.login, entry.contributions));
            continue;
        }

        harvest.units += NEW_CONTRIBUTOR_COST;
        let login = entry.login.as_str();

        let profile = match ctx
            .directory_dispatcher
            .dispatch(actor, Some(task_id), move || ctx.directory.profile(login))
            .await
        {
            Ok(profile) => profile,
            Err(DispatchError::Cancelled) => return Ok(None),
            Err(DispatchError::StoreUnavailable(e)) => return Err(e),
            Err(e) => {
                warn!(%task_id, login, error = %e, "profile unavailable, skipping contributor");
                continue;
            }
        };

        let repositories = match ctx
            .directory_dispatcher
            .dispatch(actor, Some(task_id), move || {
                ctx.directory.repositories(login)
            })
            .await
        {
            Ok(repositories) => repositories,
            Err(DispatchError::Cancelled) => return Ok(None),
            Err(DispatchError::StoreUnavailable(e)) => return Err(e),
            Err(e) => {
                warn!(%task_id, login, error = %e, "repositories unavailable, skipping");
                continue;
            }
        };

        harvest.new_matches.push((
            entry.login,
            ContributorMatch {
                profile,
                total_contributions: entry.contributions,
                repositories,
            },
        ));
    }

    Ok(Some(harvest))
}

/// Keep contributors above the threshold, in the source's own order, up to
/// the per-source cap. Repeated logins within one listing count once.
fn select(
    entries: Vec<ContributorEntry>,
    min_contributions: u64,
    max_contributors: usize,
) -> Vec<ContributorEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| e.contributions >= min_contributions)
        .filter(|e| seen.insert(e.login.clone()))
        .take(max_contributors)
        .collect()
}
