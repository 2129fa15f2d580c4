//! Core types shared by every layer.
//!
//! # Domain Model
//! - [`Flag`], [`FlagId`], [`FlagStatus`]: the flag record and its identity
//! - [`AuditEvent`], [`AuditLogEntry`], [`AuditAction`]: the audit trail
//!
//! # Validation
//! - [`validation`]: pure request checks returning field-level errors
//!
//! # Retry Behavior
//! - [`RetryPolicy`] and [`Retryable`]: transient-failure handling used by
//!   cascade steps and by callers deciding whether to resubmit

mod audit;
mod flag;
pub mod retry;
pub mod validation;

pub use audit::{AuditAction, AuditEvent, AuditLogEntry, CREATE_REASON, SYSTEM_ACTOR};
pub use flag::{Flag, FlagId, FlagStatus};
pub use retry::{retry_with_policy, RetryPolicy, Retryable};
pub use validation::{CreateFlagRequest, FieldError, ToggleRequest, ValidationErrors};
