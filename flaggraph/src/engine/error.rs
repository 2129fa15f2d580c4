use crate::core::{FlagId, Retryable, ValidationErrors};
use crate::storage::StorageError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Error type for flag transitions and queries.
///
/// Caller mistakes (`Validation`, `NotFound`, `AlreadyExists`,
/// `CircularDependency`, `MissingActiveDependencies`) are permanent; resending
/// the same request fails the same way. `StoreUnavailable`, `Cancelled` and
/// `TimedOut` say nothing about the request and may be retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The request failed field-level validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// No flag with this id.
    #[error("flag not found: id={0}")]
    NotFound(FlagId),

    /// No flag with this name.
    #[error("flag not found: name={0}")]
    FlagNameNotFound(String),

    /// Another flag already uses this name.
    #[error("flag with name '{0}' already exists")]
    AlreadyExists(String),

    /// The requested edges would make the dependency graph cyclic.
    #[error("circular dependency detected: adding dependency on flag {prerequisite} would create a cycle")]
    CircularDependency {
        /// The flag that was to gain the edge; `None` for a flag being created.
        dependent: Option<FlagId>,
        /// The prerequisite that closes the cycle.
        prerequisite: FlagId,
    },

    /// Enabling requires these dependencies to be enabled first.
    #[error("missing active dependencies: {}", .0.join(", "))]
    MissingActiveDependencies(Vec<String>),

    /// The store failed for reasons unrelated to the request.
    #[error("store unavailable")]
    StoreUnavailable(#[source] StorageError),

    /// The operation was cancelled before it finished.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation did not finish within the configured timeout.
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::FlagNotFound(id) => EngineError::NotFound(id),
            StorageError::FlagNameNotFound(name) => EngineError::FlagNameNotFound(name),
            StorageError::NameTaken(name) => EngineError::AlreadyExists(name),
            other => EngineError::StoreUnavailable(other),
        }
    }
}

impl Retryable for EngineError {
    fn is_retryable(&self) -> bool {
        match self {
            EngineError::StoreUnavailable(source) => source.is_retryable(),
            EngineError::Cancelled | EngineError::TimedOut(_) => true,
            EngineError::Validation(_)
            | EngineError::NotFound(_)
            | EngineError::FlagNameNotFound(_)
            | EngineError::AlreadyExists(_)
            | EngineError::CircularDependency { .. }
            | EngineError::MissingActiveDependencies(_) => false,
        }
    }
}

impl EngineError {
    /// Renders the error as a response body for callers at a service
    /// boundary.
    pub fn to_body(&self) -> ErrorBody {
        match self {
            EngineError::MissingActiveDependencies(names) => ErrorBody {
                error: "missing active dependencies".to_string(),
                missing_dependencies: Some(names.clone()),
                details: None,
            },
            EngineError::Validation(errors) => ErrorBody {
                error: "Validation failed".to_string(),
                missing_dependencies: None,
                details: Some(errors.to_string()),
            },
            EngineError::StoreUnavailable(_) => ErrorBody {
                error: "Internal server error".to_string(),
                missing_dependencies: None,
                details: None,
            },
            other => ErrorBody {
                error: other.to_string(),
                missing_dependencies: None,
                details: None,
            },
        }
    }
}

/// Serializable error payload.
///
/// Store failures are reported without detail; the cause is logged instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_dependencies: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_onto_engine_kinds() {
        let id = FlagId::new(4);
        assert!(matches!(
            EngineError::from(StorageError::FlagNotFound(id)),
            EngineError::NotFound(found) if found == id
        ));
        assert!(matches!(
            EngineError::from(StorageError::NameTaken("auth".into())),
            EngineError::AlreadyExists(name) if name == "auth"
        ));
        assert!(matches!(
            EngineError::from(StorageError::Connection("refused".into())),
            EngineError::StoreUnavailable(_)
        ));
    }

    #[test]
    fn test_retryability() {
        assert!(EngineError::from(StorageError::Connection("refused".into())).is_retryable());
        assert!(!EngineError::from(StorageError::Corrupt("bad status".into())).is_retryable());
        assert!(EngineError::TimedOut(Duration::from_secs(1)).is_retryable());
        assert!(!EngineError::MissingActiveDependencies(vec!["auth".into()]).is_retryable());
        assert!(!EngineError::NotFound(FlagId::new(1)).is_retryable());
    }

    #[test]
    fn test_missing_dependencies_body() {
        let err = EngineError::MissingActiveDependencies(vec!["auth".into(), "profile".into()]);
        assert_eq!(err.to_string(), "missing active dependencies: auth, profile");

        let body = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "error": "missing active dependencies",
                "missing_dependencies": ["auth", "profile"],
            })
        );
    }

    #[test]
    fn test_store_failures_are_opaque_in_body() {
        let body = EngineError::from(StorageError::Connection("10.0.0.7 refused".into())).to_body();
        assert_eq!(body.error, "Internal server error");
        assert!(body.details.is_none());
    }
}
