//! Results of engine operations.
//!
//! A mutating operation that returns `Ok` has committed its primary change.
//! Anything that went wrong afterwards (a cascade step that could not be
//! applied, an audit entry that could not be written) rides along as a
//! [`TransitionWarning`].

use crate::core::{AuditAction, Flag, FlagId, FlagStatus};
use serde::Serialize;
use std::fmt;

/// A non-fatal problem that occurred after the primary change committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionWarning {
    /// A dependent could not be disabled during a cascade. It may still be
    /// enabled; [`FlagEngine::reconcile`](super::FlagEngine::reconcile)
    /// retries it.
    CascadeIncomplete {
        trigger: FlagId,
        dependent: FlagId,
        attempts: u32,
        error: String,
    },
    /// The change committed but its audit entry was not written.
    AuditWriteFailed {
        flag_id: FlagId,
        action: AuditAction,
        error: String,
    },
}

impl fmt::Display for TransitionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionWarning::CascadeIncomplete {
                trigger,
                dependent,
                attempts,
                error,
            } => write!(
                f,
                "cascade from flag {} could not disable flag {} after {} attempt(s): {}",
                trigger, dependent, attempts, error
            ),
            TransitionWarning::AuditWriteFailed {
                flag_id,
                action,
                error,
            } => write!(
                f,
                "audit entry '{}' for flag {} was not recorded: {}",
                action, flag_id, error
            ),
        }
    }
}

/// A newly created flag.
#[derive(Debug, Clone, Serialize)]
pub struct Created {
    /// The flag with dependencies in the order the caller declared them.
    pub flag: Flag,
    pub warnings: Vec<TransitionWarning>,
}

/// The effect of an enable, disable, toggle or dependency update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub flag_id: FlagId,
    /// Status after the operation.
    pub status: FlagStatus,
    /// False when the flag was already in the requested state.
    pub changed: bool,
    /// Dependents switched off by the cascade, in the order they were visited.
    pub cascade_disabled: Vec<FlagId>,
    pub warnings: Vec<TransitionWarning>,
}

impl Transition {
    pub(crate) fn unchanged(flag_id: FlagId, status: FlagStatus) -> Self {
        Self {
            flag_id,
            status,
            changed: false,
            cascade_disabled: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn changed(flag_id: FlagId, status: FlagStatus) -> Self {
        Self {
            changed: true,
            ..Self::unchanged(flag_id, status)
        }
    }

    /// True when nothing was left undone.
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// A broken graph invariant found by
/// [`FlagEngine::verify_integrity`](super::FlagEngine::verify_integrity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityViolation {
    /// The depends-on relation contains a cycle. `path` starts and ends with
    /// the same flag.
    Cycle { path: Vec<FlagId> },
    /// An edge points at a flag that does not exist.
    DanglingDependency { flag: FlagId, dependency: FlagId },
    /// An enabled flag has a disabled direct dependency.
    EnabledWithDisabledDependency { flag: FlagId, dependency: FlagId },
}

/// Outcome of an integrity check over the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub flags_checked: usize,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Outcome of a reconcile run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Disabled flags that still had enabled dependents, in the order the
    /// cascades were restarted from.
    pub restarted_from: Vec<FlagId>,
    /// Flags switched off by the restarted cascades.
    pub disabled: Vec<FlagId>,
    pub warnings: Vec<TransitionWarning>,
    /// Violations reconcile cannot repair: cycles and dangling edges.
    pub unresolved: Vec<IntegrityViolation>,
}
