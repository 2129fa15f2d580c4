//! Dependency graph algorithms
//!
//! This module provides the graph logic behind flag transitions:
//!
//! - Cycle detection for proposed depends-on edges ([`would_create_cycle`])
//! - The enablement guard ([`missing_active_dependencies`])
//! - An in-memory snapshot for integrity checks ([`DependencyGraph`])
//!
//! # Design Principles
//!
//! The algorithms are written once against [`DependencyLookup`], which hides
//! where edges come from. Inside the engine they run over an open
//! [`FlagTransaction`], so every edge they read belongs to the same
//! transaction that will write the result. Offline they run over a
//! [`DependencyGraph`] snapshot.

mod cycle;
mod enablement;
mod snapshot;

pub use cycle::{closing_prerequisite, would_create_cycle};
pub use enablement::missing_active_dependencies;
pub use snapshot::DependencyGraph;

use crate::core::{Flag, FlagId};
use crate::storage::{FlagTransaction, LockMode, Result};
use async_trait::async_trait;

/// Read access to the depends-on relation.
#[async_trait]
pub trait DependencyLookup: Send {
    /// Direct prerequisites of `id`, ascending. Unknown ids have none.
    async fn prerequisites_of(&mut self, id: FlagId) -> Result<Vec<FlagId>>;

    /// The flag record for `id`.
    async fn lookup_flag(&mut self, id: FlagId) -> Result<Flag>;
}

#[async_trait]
impl DependencyLookup for dyn FlagTransaction {
    async fn prerequisites_of(&mut self, id: FlagId) -> Result<Vec<FlagId>> {
        self.direct_dependencies(id).await
    }

    /// Reads under a shared lock, so the status cannot change before the
    /// transaction ends.
    async fn lookup_flag(&mut self, id: FlagId) -> Result<Flag> {
        self.lock_flag(id, LockMode::Shared).await
    }
}
