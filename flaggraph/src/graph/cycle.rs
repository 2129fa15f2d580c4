//! Cycle detection for proposed depends-on edges.

use super::DependencyLookup;
use crate::core::FlagId;
use crate::storage::Result;
use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// Returns the first proposed prerequisite that would close a cycle if
/// `candidate` were made to depend on it.
///
/// A prerequisite `p` closes a cycle when `p == candidate` or when
/// `candidate` is reachable from `p` along depends-on edges. The walk is
/// breadth-first and has no depth bound; one visited set is shared across all
/// proposals, since a flag that could not reach `candidate` from one
/// prerequisite cannot reach it from another either.
///
/// When `candidate` is `None` (the dependent does not exist yet, so nothing
/// can depend on it) no proposed edge can close a cycle.
pub async fn closing_prerequisite<L>(
    lookup: &mut L,
    candidate: Option<FlagId>,
    proposed: &[FlagId],
) -> Result<Option<FlagId>>
where
    L: DependencyLookup + ?Sized,
{
    let Some(candidate) = candidate else {
        return Ok(None);
    };

    let mut visited: HashSet<FlagId> = HashSet::new();

    for &prerequisite in proposed {
        if prerequisite == candidate {
            return Ok(Some(prerequisite));
        }

        let mut queue = VecDeque::from([prerequisite]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }

            for next in lookup.prerequisites_of(current).await? {
                if next == candidate {
                    trace!(
                        candidate = %candidate,
                        prerequisite = %prerequisite,
                        visited = visited.len(),
                        "Proposed edge closes a cycle"
                    );
                    return Ok(Some(prerequisite));
                }
                if !visited.contains(&next) {
                    queue.push_back(next);
                }
            }
        }
    }

    Ok(None)
}

/// Reports whether making `candidate` depend on any of `proposed` would
/// create a cycle.
pub async fn would_create_cycle<L>(
    lookup: &mut L,
    candidate: Option<FlagId>,
    proposed: &[FlagId],
) -> Result<bool>
where
    L: DependencyLookup + ?Sized,
{
    Ok(closing_prerequisite(lookup, candidate, proposed)
        .await?
        .is_some())
}
