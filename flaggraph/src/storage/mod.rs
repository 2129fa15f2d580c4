//! Storage layer for flags, dependency edges and the audit trail.
//!
//! This module provides trait-based interfaces for persistence with multiple
//! backend implementations:
//!
//! - [`InMemoryFlagStore`]: in-process storage for tests and development
//! - [`SqliteFlagStore`]: persistent SQLite storage with connection pooling
//! - [`PostgresFlagStore`]: Postgres storage with row-level locking
//!
//! Every read-then-write sequence goes through a [`FlagTransaction`] obtained
//! from [`FlagStore::begin`]. Nothing a transaction writes is visible to other
//! callers until [`FlagTransaction::commit`]; dropping a transaction without
//! committing discards its writes.
//!
//! # Example
//!
//! ```no_run
//! use flaggraph::storage::{FlagStore, InMemoryFlagStore};
//! use flaggraph::FlagStatus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryFlagStore::new();
//! let mut tx = store.begin().await?;
//! let id = tx.create_flag("auth", FlagStatus::Disabled).await?;
//! tx.commit().await?;
//!
//! assert_eq!(store.get_flag(id).await?.name(), "auth");
//! # Ok(())
//! # }
//! ```

use crate::core::{AuditEvent, AuditLogEntry, Flag, FlagId, FlagStatus};
use async_trait::async_trait;

mod error;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
mod pool;

pub use error::{Result, StorageError};
pub use memory::InMemoryFlagStore;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub use pool::PoolConfig;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteFlagStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresFlagStore;

/// Row lock requested when reading a flag inside a transaction.
///
/// Backends that serialize all writers may treat both modes as a plain read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Other transactions may read but not change the flag.
    Shared,
    /// The flag is about to change; other writers wait.
    Exclusive,
}

/// A unit of work against the flag store.
#[async_trait]
pub trait FlagTransaction: Send {
    /// Inserts a new flag. Fails with [`StorageError::NameTaken`] if the
    /// name is already in use.
    async fn create_flag(&mut self, name: &str, status: FlagStatus) -> Result<FlagId>;

    /// Reads a flag with its direct dependencies.
    async fn get_flag(&mut self, id: FlagId) -> Result<Flag>;

    /// Reads a flag with its direct dependencies and holds a row lock on it
    /// until the transaction ends.
    async fn lock_flag(&mut self, id: FlagId, mode: LockMode) -> Result<Flag>;

    async fn get_flag_by_name(&mut self, name: &str) -> Result<Flag>;

    /// All flags ordered by name, dependencies populated.
    async fn list_flags(&mut self) -> Result<Vec<Flag>>;

    /// Sets the status and bumps `updated_at`. Succeeds when unchanged.
    async fn set_status(&mut self, id: FlagId, status: FlagStatus) -> Result<()>;

    /// Records that `dependent` requires `prerequisite`. Idempotent.
    async fn add_edge(&mut self, dependent: FlagId, prerequisite: FlagId) -> Result<()>;

    /// Prerequisites of `id`, ascending.
    async fn direct_dependencies(&mut self, id: FlagId) -> Result<Vec<FlagId>>;

    /// Flags requiring `id`, ascending.
    async fn direct_dependents(&mut self, id: FlagId) -> Result<Vec<FlagId>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Durable record of flags and their dependency edges.
///
/// Implementations must be thread-safe.
#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Starts a transaction.
    async fn begin(&self) -> Result<Box<dyn FlagTransaction>>;

    async fn get_flag(&self, id: FlagId) -> Result<Flag>;

    async fn get_flag_by_name(&self, name: &str) -> Result<Flag>;

    /// All flags ordered by name, dependencies populated.
    async fn list_flags(&self) -> Result<Vec<Flag>>;

    /// Releases connections held by the store.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Append-only log of state changes.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<AuditLogEntry>;

    /// Entries for one flag, newest first.
    async fn entries_for_flag(&self, flag_id: FlagId) -> Result<Vec<AuditLogEntry>>;

    /// Entries for all flags, newest first.
    async fn recent_entries(&self, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>>;
}
