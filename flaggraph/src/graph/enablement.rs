//! Guard for switching a flag on.

use super::DependencyLookup;
use crate::core::FlagId;
use crate::storage::Result;

/// Names of the flags in `dependencies` that are currently disabled, in the
/// order given. Enabling the dependent is allowed iff the result is empty.
///
/// Only direct dependencies are inspected. A disable always cascades to
/// enabled dependents, so an enabled direct dependency implies its own
/// prerequisites are enabled too.
pub async fn missing_active_dependencies<L>(
    lookup: &mut L,
    dependencies: &[FlagId],
) -> Result<Vec<String>>
where
    L: DependencyLookup + ?Sized,
{
    let mut missing = Vec::new();
    for &id in dependencies {
        let flag = lookup.lookup_flag(id).await?;
        if flag.is_disabled() {
            missing.push(flag.name().to_string());
        }
    }
    Ok(missing)
}
