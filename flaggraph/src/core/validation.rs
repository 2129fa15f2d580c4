//! Request validation.
//!
//! Every check is a plain function over the request value. Failures are
//! collected per field so the request layer can report all of them at once.

use super::{FlagId, SYSTEM_ACTOR};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NAME_MIN_LEN: usize = 3;
pub const NAME_MAX_LEN: usize = 100;
pub const REASON_MIN_LEN: usize = 3;
pub const REASON_MAX_LEN: usize = 500;
pub const ACTOR_MAX_LEN: usize = 100;

/// Payload for creating a flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFlagRequest {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<FlagId>,
}

impl CreateFlagRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = FlagId>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self
    }
}

/// Payload for switching a flag on or off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleRequest {
    pub enable: bool,
    pub reason: String,
}

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// All failed checks for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError::new(field, message)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns true if any error concerns `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    fn merge(&mut self, other: Result<(), ValidationErrors>) {
        if let Err(other) = other {
            self.errors.extend(other.errors);
        }
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.errors {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Checks the name format: ASCII alphanumerics, `_` and `-`, not starting or
/// ending with `_` or `-`, 3 to 100 characters.
pub fn validate_flag_name(name: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if name.is_empty() {
        errors.push("name", "This field is required");
        return errors.into_result();
    }

    let len = name.chars().count();
    if len < NAME_MIN_LEN {
        errors.push(
            "name",
            format!("Must be at least {} characters long", NAME_MIN_LEN),
        );
    }
    if len > NAME_MAX_LEN {
        errors.push(
            "name",
            format!("Must be at most {} characters long", NAME_MAX_LEN),
        );
    }

    let allowed = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    let edge = |c: char| c == '_' || c == '-';
    let bad_edges = name.starts_with(edge) || name.ends_with(edge);
    if !allowed || bad_edges {
        errors.push(
            "name",
            "Flag name must contain only alphanumeric characters, underscores, and hyphens, \
             and cannot start or end with underscore or hyphen",
        );
    }

    errors.into_result()
}

/// Flag ids handed in by callers must be positive.
pub fn validate_flag_id(id: FlagId) -> Result<(), ValidationErrors> {
    if id.get() <= 0 {
        return Err(ValidationErrors::single("id", "Must be greater than 0"));
    }
    Ok(())
}

pub fn validate_dependencies(dependencies: &[FlagId]) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    for (index, dep) in dependencies.iter().enumerate() {
        if dep.get() <= 0 {
            errors.push(&format!("dependencies[{}]", index), "Must be greater than 0");
        }
    }
    errors.into_result()
}

pub fn validate_actor(actor: &str) -> Result<(), ValidationErrors> {
    if actor.trim().is_empty() {
        return Err(ValidationErrors::single("actor", "This field is required"));
    }
    if actor.chars().count() > ACTOR_MAX_LEN {
        return Err(ValidationErrors::single(
            "actor",
            format!("Must be at most {} characters long", ACTOR_MAX_LEN),
        ));
    }
    // Reserved for entries the engine writes on its own behalf.
    if actor.trim().eq_ignore_ascii_case(SYSTEM_ACTOR) {
        return Err(ValidationErrors::single(
            "actor",
            format!("\"{}\" is reserved", SYSTEM_ACTOR),
        ));
    }
    Ok(())
}

pub fn validate_reason(reason: &str) -> Result<(), ValidationErrors> {
    let len = reason.trim().chars().count();
    if len == 0 {
        return Err(ValidationErrors::single("reason", "This field is required"));
    }
    if len < REASON_MIN_LEN {
        return Err(ValidationErrors::single(
            "reason",
            format!("Must be at least {} characters long", REASON_MIN_LEN),
        ));
    }
    if reason.chars().count() > REASON_MAX_LEN {
        return Err(ValidationErrors::single(
            "reason",
            format!("Must be at most {} characters long", REASON_MAX_LEN),
        ));
    }
    Ok(())
}

pub fn validate_create_request(request: &CreateFlagRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    errors.merge(validate_flag_name(&request.name));
    errors.merge(validate_dependencies(&request.dependencies));
    errors.into_result()
}

pub fn validate_toggle_request(request: &ToggleRequest) -> Result<(), ValidationErrors> {
    validate_reason(&request.reason)
}
