//! Runtime configuration.
//!
//! [`Settings`] describes a deployment: which backend to open and how the
//! engine behaves. Every field has a default, so an empty environment yields
//! a working in-memory setup. [`EngineConfig`] is the part the engine itself
//! reads.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `FLAGGRAPH_DATABASE_URL` | `memory`, `sqlite://path`, `sqlite::memory:` or `postgres://…` | `memory` |
//! | `FLAGGRAPH_OPERATION_TIMEOUT_MS` | per-operation timeout | `30000` |
//! | `FLAGGRAPH_CASCADE_RETRY_ATTEMPTS` | attempts per cascade step | `3` |
//! | `FLAGGRAPH_CASCADE_RETRY_DELAY_MS` | delay before the first retry | `50` |
//! | `FLAGGRAPH_POOL_MAX_SIZE` | SQL pool size | `10` |
//! | `FLAGGRAPH_POOL_TIMEOUT_MS` | SQL pool acquire timeout | `30000` |

use crate::core::retry::duration_millis;
use crate::core::RetryPolicy;
use crate::engine::FlagEngine;
use crate::storage::{InMemoryFlagStore, StorageError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
use crate::storage::PoolConfig;

/// Default time an engine operation may take, cascade included.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for one engine operation up to its commit. Audit writes
    /// and cascades that follow a commit are not bounded by it.
    #[serde(with = "duration_millis")]
    pub operation_timeout: Duration,
    /// Retry policy for each cascade step.
    pub cascade_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            cascade_retry: RetryPolicy::STANDARD,
        }
    }
}

/// Deployment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub engine: EngineConfig,
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    pub pool: PoolConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "memory".to_string(),
            engine: EngineConfig::default(),
            #[cfg(any(feature = "sqlite", feature = "postgres"))]
            pool: PoolConfig::default(),
        }
    }
}

/// Configuration error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value for {name}: '{value}'")]
    InvalidVar { name: &'static str, value: String },

    /// The database URL names no known backend.
    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),

    /// The backend exists but this build was compiled without it.
    #[error("backend '{0}' is not enabled in this build")]
    BackendDisabled(&'static str),

    /// The backend could not be opened.
    #[error("failed to open store")]
    Storage(#[from] StorageError),
}

impl Settings {
    /// Reads settings from `FLAGGRAPH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its
    /// value. Unset or empty variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut settings = Settings::default();

        if let Some(url) = get("FLAGGRAPH_DATABASE_URL") {
            settings.database_url = url.trim().to_string();
        }
        if let Some(ms) = parse::<u64>(
            get("FLAGGRAPH_OPERATION_TIMEOUT_MS"),
            "FLAGGRAPH_OPERATION_TIMEOUT_MS",
        )? {
            settings.engine.operation_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse::<u32>(
            get("FLAGGRAPH_CASCADE_RETRY_ATTEMPTS"),
            "FLAGGRAPH_CASCADE_RETRY_ATTEMPTS",
        )? {
            settings.engine.cascade_retry.max_attempts = attempts.max(1);
        }
        if let Some(ms) = parse::<u64>(
            get("FLAGGRAPH_CASCADE_RETRY_DELAY_MS"),
            "FLAGGRAPH_CASCADE_RETRY_DELAY_MS",
        )? {
            settings.engine.cascade_retry.initial_delay = Duration::from_millis(ms);
        }

        #[cfg(any(feature = "sqlite", feature = "postgres"))]
        {
            if let Some(size) =
                parse::<u32>(get("FLAGGRAPH_POOL_MAX_SIZE"), "FLAGGRAPH_POOL_MAX_SIZE")?
            {
                settings.pool.max_size = size;
            }
            if let Some(ms) =
                parse::<u64>(get("FLAGGRAPH_POOL_TIMEOUT_MS"), "FLAGGRAPH_POOL_TIMEOUT_MS")?
            {
                settings.pool.connection_timeout = Duration::from_millis(ms);
            }
        }

        Ok(settings)
    }
}

fn parse<T: FromStr>(value: Option<String>, name: &'static str) -> Result<Option<T>, ConfigError> {
    value
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidVar { name, value: raw })
        })
        .transpose()
}

/// Opens the backend named by `settings.database_url` and wraps it in an
/// engine.
pub async fn open_engine(settings: &Settings) -> Result<FlagEngine, ConfigError> {
    let url = settings.database_url.as_str();

    if url == "memory" {
        info!("Using in-memory flag store");
        return Ok(FlagEngine::with_config(
            Arc::new(InMemoryFlagStore::new()),
            settings.engine,
        ));
    }

    if let Some(path) = url.strip_prefix("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            use crate::storage::SqliteFlagStore;

            let path = path.trim_start_matches("//");
            let store = if path == ":memory:" {
                SqliteFlagStore::in_memory().await?
            } else {
                SqliteFlagStore::with_config(path, settings.pool.clone()).await?
            };
            return Ok(FlagEngine::with_config(Arc::new(store), settings.engine));
        }

        #[cfg(not(feature = "sqlite"))]
        {
            let _ = path;
            return Err(ConfigError::BackendDisabled("sqlite"));
        }
    }

    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        #[cfg(feature = "postgres")]
        {
            use crate::storage::PostgresFlagStore;

            let store = PostgresFlagStore::with_config(url, settings.pool.clone()).await?;
            return Ok(FlagEngine::with_config(Arc::new(store), settings.engine));
        }

        #[cfg(not(feature = "postgres"))]
        {
            return Err(ConfigError::BackendDisabled("postgres"));
        }
    }

    Err(ConfigError::UnsupportedUrl(url.to_string()))
}
