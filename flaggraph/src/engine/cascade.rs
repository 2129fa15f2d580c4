//! Cascade disable.
//!
//! Disabling a flag switches off every enabled flag that depends on it,
//! directly or transitively. The root disable has already committed when the
//! cascade starts; each dependent is then switched off in a transaction of its
//! own, so one unreachable row cannot undo the rest.

use super::outcome::TransitionWarning;
use crate::core::{retry_with_policy, AuditEvent, FlagId, FlagStatus, RetryPolicy};
use crate::storage::{AuditRecorder, FlagStore, LockMode, Result as StorageResult};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub(super) struct CascadeOutcome {
    pub disabled: Vec<FlagId>,
    pub warnings: Vec<TransitionWarning>,
}

/// Walks dependents breadth-first starting from `seed`, the direct
/// dependents of the already-disabled `root`.
///
/// The worklist holds `(trigger, dependent)` pairs; `trigger` is the flag
/// whose disable caused the visit and ends up in the audit reason. Every flag
/// is visited at most once, `root` included, so diamonds and any cycle that
/// slipped into the store cannot loop.
pub(super) async fn cascade_disable(
    store: &dyn FlagStore,
    audit: &dyn AuditRecorder,
    policy: RetryPolicy,
    root: FlagId,
    seed: Vec<FlagId>,
) -> CascadeOutcome {
    let mut outcome = CascadeOutcome::default();
    let mut visited: HashSet<FlagId> = HashSet::from([root]);
    let mut queue: VecDeque<(FlagId, FlagId)> =
        seed.into_iter().map(|dependent| (root, dependent)).collect();

    while let Some((trigger, dependent)) = queue.pop_front() {
        if !visited.insert(dependent) {
            continue;
        }

        let step = retry_with_policy(policy, |attempt| {
            debug!(flag_id = %dependent, trigger = %trigger, attempt, "Cascade step");
            disable_dependent(store, dependent)
        })
        .await;

        match step {
            Ok(Some(next)) => {
                info!(flag_id = %dependent, trigger = %trigger, root = %root, "Flag disabled by cascade");
                outcome.disabled.push(dependent);

                let event = AuditEvent::cascade_disable(dependent, trigger);
                if let Err(e) = audit.append(&event).await {
                    error!(flag_id = %dependent, error = %e, "Failed to record cascade audit entry");
                    outcome.warnings.push(TransitionWarning::AuditWriteFailed {
                        flag_id: dependent,
                        action: event.action,
                        error: e.to_string(),
                    });
                }

                queue.extend(
                    next.into_iter()
                        .filter(|id| !visited.contains(id))
                        .map(|id| (dependent, id)),
                );
            }
            Ok(None) => {
                debug!(flag_id = %dependent, "Dependent already disabled");
            }
            Err((e, attempts)) => {
                warn!(
                    flag_id = %dependent,
                    trigger = %trigger,
                    attempts,
                    error = %e,
                    "Cascade step failed; dependent may still be enabled"
                );
                outcome.warnings.push(TransitionWarning::CascadeIncomplete {
                    trigger,
                    dependent,
                    attempts,
                    error: e.to_string(),
                });
            }
        }
    }

    outcome
}

/// Disables one dependent. Returns its direct dependents when it was
/// switched off, or `None` when it was already disabled.
async fn disable_dependent(store: &dyn FlagStore, id: FlagId) -> StorageResult<Option<Vec<FlagId>>> {
    let mut tx = store.begin().await?;
    let flag = tx.lock_flag(id, LockMode::Exclusive).await?;
    if flag.is_disabled() {
        tx.rollback().await?;
        return Ok(None);
    }

    tx.set_status(id, FlagStatus::Disabled).await?;
    let dependents = tx.direct_dependents(id).await?;
    tx.commit().await?;
    Ok(Some(dependents))
}
