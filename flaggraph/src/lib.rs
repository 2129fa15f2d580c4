//! Flaggraph: Feature Flags with Dependency Graphs
//!
//! `flaggraph` manages named on/off flags where a flag may require other flags
//! to be switched on first. The engine keeps the dependency graph acyclic,
//! refuses to enable a flag while any of its prerequisites is off, and when a
//! flag is switched off it switches off everything that depends on it.
//!
//! # Features
//!
//! - **Acyclic dependencies**: cycle-closing edges are rejected, however deep
//! - **Guarded enablement**: errors name every prerequisite that is still off
//! - **Cascading disable**: dependents are switched off breadth-first
//! - **Audit trail**: every committed change is recorded with actor and reason
//! - **Pluggable storage**: in-memory, SQLite and Postgres backends
//!
//! # Quick Start
//!
//! ```
//! use flaggraph::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), EngineError> {
//! let engine = FlagEngine::new(Arc::new(InMemoryFlagStore::new()));
//!
//! let auth = engine.create_flag(CreateFlagRequest::new("auth"), "alice").await?.flag;
//! let profile = engine.create_flag(CreateFlagRequest::new("profile"), "alice").await?.flag;
//! let checkout = engine
//!     .create_flag(
//!         CreateFlagRequest::new("checkout").with_dependencies([auth.id(), profile.id()]),
//!         "alice",
//!     )
//!     .await?
//!     .flag;
//!
//! match engine.enable(checkout.id(), "alice", "launch").await {
//!     Err(EngineError::MissingActiveDependencies(names)) => {
//!         assert_eq!(names, vec!["auth", "profile"]);
//!     }
//!     other => panic!("unexpected: {:?}", other),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! Each module hides a design decision that is likely to change:
//!
//! - [`core`]: domain types, request validation and retry policy
//! - [`storage`]: persistence (hides database choice and schema)
//! - [`graph`]: cycle detection, enablement guard and graph snapshots
//! - [`engine`]: the transition engine (hides transaction and cascade strategy)
//! - [`config`]: settings and backend selection

pub mod config;
pub mod core;
pub mod engine;
pub mod graph;
pub mod storage;

// Re-export commonly used types for convenience
pub use crate::core::{
    AuditAction, AuditEvent, AuditLogEntry, CreateFlagRequest, FieldError, Flag, FlagId,
    FlagStatus, RetryPolicy, Retryable, ToggleRequest, ValidationErrors, CREATE_REASON,
    SYSTEM_ACTOR,
};

pub use config::{open_engine, ConfigError, EngineConfig, Settings};

pub use engine::{
    Created, EngineError, ErrorBody, FlagEngine, IntegrityReport, IntegrityViolation,
    ReconcileReport, Result as EngineResult, Transition, TransitionWarning,
};

pub use graph::{DependencyGraph, DependencyLookup};

pub use storage::{
    AuditRecorder, FlagStore, FlagTransaction, InMemoryFlagStore, LockMode,
    Result as StorageResult, StorageError,
};

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub use storage::PoolConfig;

#[cfg(feature = "sqlite")]
pub use storage::SqliteFlagStore;

#[cfg(feature = "postgres")]
pub use storage::PostgresFlagStore;

// Re-export dependencies used in public API
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient glob imports
///
/// # Example
///
/// ```
/// use flaggraph::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{
        AuditAction, AuditLogEntry, CreateFlagRequest, Flag, FlagId, FlagStatus, RetryPolicy,
        Retryable, ToggleRequest,
    };

    pub use crate::config::{open_engine, EngineConfig, Settings};

    pub use crate::engine::{
        EngineError, FlagEngine, IntegrityReport, Transition, TransitionWarning,
    };

    pub use crate::storage::{AuditRecorder, FlagStore, InMemoryFlagStore, StorageError};

    #[cfg(feature = "sqlite")]
    pub use crate::storage::SqliteFlagStore;

    #[cfg(feature = "postgres")]
    pub use crate::storage::PostgresFlagStore;

    // Re-export commonly used external types
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}
