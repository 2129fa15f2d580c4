use super::{
    error::Result, error::StorageError, AuditRecorder, FlagStore, FlagTransaction, LockMode,
    PoolConfig,
};
use crate::core::{AuditAction, AuditEvent, AuditLogEntry, Flag, FlagId, FlagStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// SQLite-based flag store with connection pooling.
///
/// SQLite allows a single writer at a time, and a deferred transaction that
/// reads before it writes can fail when another connection commits in
/// between. Transactions therefore take an in-process writer lock before
/// `BEGIN`, so read-then-write sequences from this process never interleave.
/// Plain reads go straight to the pool.
pub struct SqliteFlagStore {
    pool: SqlitePool,
    db_path: String,
    writer: Arc<Mutex<()>>,
}

impl SqliteFlagStore {
    /// Opens (creating if needed) the database at `db_path` with the default
    /// pool configuration.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(db_path, PoolConfig::default()).await
    }

    /// Opens the database at `db_path` with a custom pool configuration.
    pub async fn with_config(db_path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path_str))
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = Self::build_pool(connect_options, &config).await?;
        let store = Self {
            pool,
            db_path: db_path_str,
            writer: Arc::new(Mutex::new(())),
        };
        store.initialize().await?;

        info!(path = %store.db_path, "Opened SQLite flag store");
        Ok(store)
    }

    /// Creates a store backed by a private in-memory database.
    ///
    /// An in-memory SQLite database lives inside one connection, so the pool
    /// is pinned to exactly one connection that is never recycled.
    pub async fn in_memory() -> Result<Self> {
        let config = PoolConfig {
            max_size: 1,
            min_idle: Some(1),
            max_lifetime: None,
            idle_timeout: None,
            ..PoolConfig::default()
        };

        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Memory)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = Self::build_pool(connect_options, &config).await?;
        let store = Self {
            pool,
            db_path: ":memory:".to_string(),
            writer: Arc::new(Mutex::new(())),
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn build_pool(
        connect_options: SqliteConnectOptions,
        config: &PoolConfig,
    ) -> Result<Pool<Sqlite>> {
        let mut builder = SqlitePoolOptions::new()
            .max_connections(config.max_size)
            .acquire_timeout(config.connection_timeout)
            .max_lifetime(config.max_lifetime)
            .idle_timeout(config.idle_timeout);

        if let Some(min_idle) = config.min_idle {
            builder = builder.min_connections(min_idle);
        }

        let pool = builder
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(pool)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS flags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                status TEXT CHECK( status IN ('enabled','disabled') ) NOT NULL DEFAULT 'disabled',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS flag_dependencies (
                flag_id INTEGER NOT NULL REFERENCES flags(id),
                depends_on_id INTEGER NOT NULL REFERENCES flags(id),
                created_at INTEGER NOT NULL,
                PRIMARY KEY (flag_id, depends_on_id),
                CHECK (flag_id <> depends_on_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        // Dependents lookups scan by prerequisite
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_flag_dependencies_depends_on
             ON flag_dependencies(depends_on_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS audit_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                flag_id INTEGER NOT NULL,
                action TEXT CHECK( action IN ('create','enable','disable','cascade_disable','update') ) NOT NULL,
                actor TEXT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_flag ON audit_logs(flag_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_logs_created ON audit_logs(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Returns the database path.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Returns the current pool size for monitoring.
    pub fn pool_size(&self) -> u32 {
        self.pool.size()
    }

    /// Returns the number of idle connections.
    pub fn idle_connections(&self) -> usize {
        self.pool.num_idle()
    }
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp out of range: {}", millis)))
}

fn row_to_flag(row: &SqliteRow, dependencies: Vec<FlagId>) -> Result<Flag> {
    let id: i64 = row.try_get("id")?;
    let name: String = row.try_get("name")?;
    let status_str: String = row.try_get("status")?;
    let status = FlagStatus::from_str(&status_str).map_err(StorageError::Corrupt)?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;

    Ok(Flag::new(
        FlagId::new(id),
        name,
        status,
        dependencies,
        timestamp(created_at)?,
        timestamp(updated_at)?,
    ))
}

fn row_to_audit_entry(row: &SqliteRow) -> Result<AuditLogEntry> {
    let action_str: String = row.try_get("action")?;
    let action = AuditAction::from_str(&action_str).map_err(StorageError::Corrupt)?;
    let created_at: i64 = row.try_get("created_at")?;

    Ok(AuditLogEntry {
        id: row.try_get("id")?,
        flag_id: FlagId::new(row.try_get("flag_id")?),
        action,
        actor: row.try_get("actor")?,
        reason: row.try_get("reason")?,
        created_at: timestamp(created_at)?,
    })
}

async fn fetch_dependencies(conn: &mut SqliteConnection, id: FlagId) -> Result<Vec<FlagId>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT depends_on_id FROM flag_dependencies WHERE flag_id = ? ORDER BY depends_on_id",
    )
    .bind(id.get())
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(FlagId::new).collect())
}

async fn fetch_dependents(conn: &mut SqliteConnection, id: FlagId) -> Result<Vec<FlagId>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT flag_id FROM flag_dependencies WHERE depends_on_id = ? ORDER BY flag_id",
    )
    .bind(id.get())
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(FlagId::new).collect())
}

async fn fetch_flag(conn: &mut SqliteConnection, id: FlagId) -> Result<Flag> {
    let row = sqlx::query("SELECT id, name, status, created_at, updated_at FROM flags WHERE id = ?")
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StorageError::FlagNotFound(id))?;
    let dependencies = fetch_dependencies(conn, id).await?;
    row_to_flag(&row, dependencies)
}

async fn fetch_flag_by_name(conn: &mut SqliteConnection, name: &str) -> Result<Flag> {
    let row =
        sqlx::query("SELECT id, name, status, created_at, updated_at FROM flags WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StorageError::FlagNameNotFound(name.to_string()))?;
    let id = FlagId::new(row.try_get("id")?);
    let dependencies = fetch_dependencies(conn, id).await?;
    row_to_flag(&row, dependencies)
}

async fn fetch_all_flags(conn: &mut SqliteConnection) -> Result<Vec<Flag>> {
    let rows =
        sqlx::query("SELECT id, name, status, created_at, updated_at FROM flags ORDER BY name")
            .fetch_all(&mut *conn)
            .await?;

    let edges = sqlx::query(
        "SELECT flag_id, depends_on_id FROM flag_dependencies ORDER BY flag_id, depends_on_id",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut dependencies: HashMap<i64, Vec<FlagId>> = HashMap::new();
    for edge in &edges {
        let flag_id: i64 = edge.try_get("flag_id")?;
        let depends_on_id: i64 = edge.try_get("depends_on_id")?;
        dependencies
            .entry(flag_id)
            .or_default()
            .push(FlagId::new(depends_on_id));
    }

    rows.iter()
        .map(|row| {
            let id: i64 = row.try_get("id")?;
            row_to_flag(row, dependencies.remove(&id).unwrap_or_default())
        })
        .collect()
}

async fn flag_exists(conn: &mut SqliteConnection, id: FlagId) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM flags WHERE id = ?")
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

/// Transaction over [`SqliteFlagStore`].
pub struct SqliteTransaction {
    // Declared before the writer guard so the rollback is queued before the
    // lock is released.
    tx: Transaction<'static, Sqlite>,
    _writer: OwnedMutexGuard<()>,
}

#[async_trait]
impl FlagTransaction for SqliteTransaction {
    async fn create_flag(&mut self, name: &str, status: FlagStatus) -> Result<FlagId> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT INTO flags (name, status, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StorageError::NameTaken(name.to_string())
            }
            other => StorageError::Database(other),
        })?;

        let id = FlagId::new(result.last_insert_rowid());
        debug!(flag_id = %id, name, "Inserted flag");
        Ok(id)
    }

    async fn get_flag(&mut self, id: FlagId) -> Result<Flag> {
        fetch_flag(&mut self.tx, id).await
    }

    async fn lock_flag(&mut self, id: FlagId, _mode: LockMode) -> Result<Flag> {
        // The writer lock already serializes every transaction in this process.
        fetch_flag(&mut self.tx, id).await
    }

    async fn get_flag_by_name(&mut self, name: &str) -> Result<Flag> {
        fetch_flag_by_name(&mut self.tx, name).await
    }

    async fn list_flags(&mut self) -> Result<Vec<Flag>> {
        fetch_all_flags(&mut self.tx).await
    }

    async fn set_status(&mut self, id: FlagId, status: FlagStatus) -> Result<()> {
        let result = sqlx::query("UPDATE flags SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(id.get())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::FlagNotFound(id));
        }
        Ok(())
    }

    async fn add_edge(&mut self, dependent: FlagId, prerequisite: FlagId) -> Result<()> {
        for id in [dependent, prerequisite] {
            if !flag_exists(&mut self.tx, id).await? {
                return Err(StorageError::FlagNotFound(id));
            }
        }

        sqlx::query(
            "INSERT OR IGNORE INTO flag_dependencies (flag_id, depends_on_id, created_at)
             VALUES (?, ?, ?)",
        )
        .bind(dependent.get())
        .bind(prerequisite.get())
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn direct_dependencies(&mut self, id: FlagId) -> Result<Vec<FlagId>> {
        fetch_dependencies(&mut self.tx, id).await
    }

    async fn direct_dependents(&mut self, id: FlagId) -> Result<Vec<FlagId>> {
        fetch_dependents(&mut self.tx, id).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let SqliteTransaction { tx, _writer } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let SqliteTransaction { tx, _writer } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl FlagStore for SqliteFlagStore {
    async fn begin(&self) -> Result<Box<dyn FlagTransaction>> {
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction {
            tx,
            _writer: writer,
        }))
    }

    async fn get_flag(&self, id: FlagId) -> Result<Flag> {
        let mut conn = self.pool.acquire().await?;
        fetch_flag(&mut conn, id).await
    }

    async fn get_flag_by_name(&self, name: &str) -> Result<Flag> {
        let mut conn = self.pool.acquire().await?;
        fetch_flag_by_name(&mut conn, name).await
    }

    async fn list_flags(&self) -> Result<Vec<Flag>> {
        let mut conn = self.pool.acquire().await?;
        fetch_all_flags(&mut conn).await
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[async_trait]
impl AuditRecorder for SqliteFlagStore {
    async fn append(&self, event: &AuditEvent) -> Result<AuditLogEntry> {
        let result = sqlx::query(
            "INSERT INTO audit_logs (flag_id, action, actor, reason, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.flag_id.get())
        .bind(event.action.as_str())
        .bind(&event.actor)
        .bind(&event.reason)
        .bind(event.occurred_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!(
            flag_id = %event.flag_id,
            action = %event.action,
            actor = %event.actor,
            "Appended audit entry"
        );
        Ok(AuditLogEntry::from_event(result.last_insert_rowid(), event))
    }

    async fn entries_for_flag(&self, flag_id: FlagId) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, flag_id, action, actor, reason, created_at
             FROM audit_logs
             WHERE flag_id = ?
             ORDER BY created_at DESC, id DESC",
        )
        .bind(flag_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_audit_entry).collect()
    }

    async fn recent_entries(&self, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, flag_id, action, actor, reason, created_at
             FROM audit_logs
             ORDER BY created_at DESC, id DESC
             LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_audit_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_round_trip() {
        let store = SqliteFlagStore::in_memory().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let auth = tx.create_flag("auth", FlagStatus::Disabled).await.unwrap();
        let profile = tx.create_flag("profile", FlagStatus::Disabled).await.unwrap();
        let checkout = tx.create_flag("checkout", FlagStatus::Disabled).await.unwrap();
        tx.add_edge(checkout, profile).await.unwrap();
        tx.add_edge(checkout, auth).await.unwrap();
        tx.add_edge(checkout, auth).await.unwrap();
        tx.set_status(auth, FlagStatus::Enabled).await.unwrap();
        tx.commit().await.unwrap();

        let flag = store.get_flag(checkout).await.unwrap();
        assert_eq!(flag.dependencies(), &[auth, profile]);
        assert!(store.get_flag(auth).await.unwrap().is_enabled());

        let names: Vec<_> = store
            .list_flags()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["auth", "checkout", "profile"]);
    }

    #[tokio::test]
    async fn test_unique_name_maps_to_name_taken() {
        let store = SqliteFlagStore::in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.create_flag("auth", FlagStatus::Disabled).await.unwrap();
        let err = tx.create_flag("auth", FlagStatus::Disabled).await.unwrap_err();
        assert!(matches!(err, StorageError::NameTaken(_)));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = SqliteFlagStore::in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.create_flag("temp", FlagStatus::Disabled).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(matches!(
            store.get_flag_by_name("temp").await,
            Err(StorageError::FlagNameNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_audit_entries_ordering() {
        let store = SqliteFlagStore::in_memory().await.unwrap();
        let id = FlagId::new(1);
        store
            .append(&AuditEvent::new(id, AuditAction::Create, "alice", "Flag created"))
            .await
            .unwrap();
        store
            .append(&AuditEvent::new(id, AuditAction::Enable, "alice", "go live"))
            .await
            .unwrap();

        let entries = store.entries_for_flag(id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Enable);
        assert!(entries[0].id > entries[1].id);

        assert_eq!(store.recent_entries(1, 1).await.unwrap()[0].action, AuditAction::Create);
    }
}
