//! Audit trail records.
//!
//! An [`AuditEvent`] is what the engine produces when a transition commits;
//! an [`AuditLogEntry`] is what a recorder hands back after persisting it.

use super::FlagId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Actor recorded for actions the engine performs on its own behalf.
pub const SYSTEM_ACTOR: &str = "system";

/// Reason recorded for the `create` action.
pub const CREATE_REASON: &str = "Flag created";

/// Kind of state change recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Enable,
    Disable,
    /// Disabled automatically because a prerequisite was disabled.
    CascadeDisable,
    /// Dependencies were added to an existing flag.
    Update,
}

impl AuditAction {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Enable => "enable",
            AuditAction::Disable => "disable",
            AuditAction::CascadeDisable => "cascade_disable",
            AuditAction::Update => "update",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "enable" => Ok(AuditAction::Enable),
            "disable" => Ok(AuditAction::Disable),
            "cascade_disable" => Ok(AuditAction::CascadeDisable),
            "update" => Ok(AuditAction::Update),
            _ => Err(format!("unknown audit action: {}", s)),
        }
    }
}

/// A state change waiting to be appended to the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub flag_id: FlagId,
    pub action: AuditAction,
    pub actor: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        flag_id: FlagId,
        action: AuditAction,
        actor: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            flag_id,
            action,
            actor: actor.into(),
            reason: reason.into(),
            occurred_at: Utc::now(),
        }
    }

    /// Entry for a flag switched off because `trigger` was switched off.
    pub fn cascade_disable(flag_id: FlagId, trigger: FlagId) -> Self {
        Self::new(
            flag_id,
            AuditAction::CascadeDisable,
            SYSTEM_ACTOR,
            format!(
                "Automatically disabled due to dependency flag {} being disabled",
                trigger
            ),
        )
    }
}

/// A persisted audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Store-assigned, increasing with insertion order.
    pub id: i64,
    pub flag_id: FlagId,
    pub action: AuditAction,
    pub actor: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn from_event(id: i64, event: &AuditEvent) -> Self {
        Self {
            id,
            flag_id: event.flag_id,
            action: event.action,
            actor: event.actor.clone(),
            reason: event.reason.clone(),
            created_at: event.occurred_at,
        }
    }

    pub fn is_cascade(&self) -> bool {
        self.action == AuditAction::CascadeDisable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_event_is_attributed_to_system() {
        let event = AuditEvent::cascade_disable(FlagId::new(5), FlagId::new(2));
        assert_eq!(event.actor, SYSTEM_ACTOR);
        assert_eq!(event.action, AuditAction::CascadeDisable);
        assert!(event.reason.contains("flag 2"));

        let entry = AuditLogEntry::from_event(10, &event);
        assert!(entry.is_cascade());
        assert_eq!(entry.flag_id, FlagId::new(5));
    }

    #[test]
    fn test_action_strings_are_stable() {
        for action in [
            AuditAction::Create,
            AuditAction::Enable,
            AuditAction::Disable,
            AuditAction::CascadeDisable,
            AuditAction::Update,
        ] {
            assert_eq!(action.as_str().parse::<AuditAction>(), Ok(action));
        }
        assert_eq!(
            serde_json::to_value(AuditAction::CascadeDisable).unwrap(),
            "cascade_disable"
        );
    }
}
