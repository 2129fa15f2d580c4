//! Flag identity, status and the flag record itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier of a flag.
///
/// Identifiers are allocated by the store and are always positive. Ordering
/// follows the numeric value, which is also the order stores report
/// dependency and dependent lists in.
///
/// # Examples
///
/// ```
/// use flaggraph::FlagId;
///
/// let id = FlagId::new(7);
/// assert_eq!(id.get(), 7);
/// assert_eq!(id.to_string(), "7");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagId(i64);

impl FlagId {
    /// Wraps a raw identifier.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for FlagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FlagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlagId({})", self.0)
    }
}

impl From<i64> for FlagId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// Whether a flag is currently on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagStatus {
    Enabled,
    Disabled,
}

impl FlagStatus {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagStatus::Enabled => "enabled",
            FlagStatus::Disabled => "disabled",
        }
    }
}

impl Default for FlagStatus {
    /// Flags are created switched off.
    fn default() -> Self {
        FlagStatus::Disabled
    }
}

impl fmt::Display for FlagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlagStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(FlagStatus::Enabled),
            "disabled" => Ok(FlagStatus::Disabled),
            _ => Err(format!("unknown flag status: {}", s)),
        }
    }
}

/// A named boolean toggle together with its direct prerequisites.
///
/// `dependencies` holds the ids of the flags this flag requires to be enabled
/// before it can be enabled itself. Flags read back from a store list them in
/// ascending id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    id: FlagId,
    name: String,
    status: FlagStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<FlagId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Flag {
    /// Assembles a flag record. Used by store backends when reading rows.
    pub fn new(
        id: FlagId,
        name: impl Into<String>,
        status: FlagStatus,
        dependencies: Vec<FlagId>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            status,
            dependencies,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> FlagId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> FlagStatus {
        self.status
    }

    pub fn is_enabled(&self) -> bool {
        self.status == FlagStatus::Enabled
    }

    pub fn is_disabled(&self) -> bool {
        self.status == FlagStatus::Disabled
    }

    /// Direct prerequisites of this flag.
    pub fn dependencies(&self) -> &[FlagId] {
        &self.dependencies
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Replaces the dependency list, keeping everything else.
    pub fn with_dependencies(mut self, dependencies: Vec<FlagId>) -> Self {
        self.dependencies = dependencies;
        self
    }
}
