//! Transition engine.
//!
//! [`FlagEngine`] is the only component that mutates flags. It combines the
//! store, the audit recorder and the graph algorithms:
//!
//! - **Create** validates the request, checks dependencies exist and stay
//!   acyclic, and writes the flag with its edges in one transaction.
//! - **Enable** succeeds only when every direct dependency is enabled.
//! - **Disable** switches the flag off, then cascades to enabled dependents.
//! - **Maintenance** ([`FlagEngine::verify_integrity`],
//!   [`FlagEngine::reconcile`]) finds and repairs what a partial cascade left
//!   behind.
//!
//! # Error Handling
//!
//! Operations return [`EngineError`]. Problems that arise after the primary
//! change committed are not errors; they are returned as
//! [`TransitionWarning`]s alongside the result.

mod cascade;
mod error;
mod flag_engine;
mod integrity;
mod outcome;

pub use error::{EngineError, ErrorBody, Result};
pub use flag_engine::FlagEngine;
pub use outcome::{
    Created, IntegrityReport, IntegrityViolation, ReconcileReport, Transition, TransitionWarning,
};
