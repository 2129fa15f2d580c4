use super::{
    error::Result, error::StorageError, AuditRecorder, FlagStore, FlagTransaction, LockMode,
};
use crate::core::{AuditEvent, AuditLogEntry, Flag, FlagId, FlagStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone)]
struct FlagRow {
    name: String,
    status: FlagStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// The whole flag graph. Transactions work on a clone and swap it in on
/// commit.
#[derive(Debug, Clone, Default)]
struct FlagTable {
    next_id: i64,
    rows: BTreeMap<FlagId, FlagRow>,
    names: HashMap<String, FlagId>,
    /// (dependent, prerequisite)
    edges: BTreeSet<(FlagId, FlagId)>,
}

impl FlagTable {
    fn dependencies(&self, id: FlagId) -> Vec<FlagId> {
        self.edges
            .range((id, FlagId::new(i64::MIN))..=(id, FlagId::new(i64::MAX)))
            .map(|(_, prerequisite)| *prerequisite)
            .collect()
    }

    fn dependents(&self, id: FlagId) -> Vec<FlagId> {
        // Edges are keyed by dependent, so the scan yields ascending ids.
        self.edges
            .iter()
            .filter(|(_, prerequisite)| *prerequisite == id)
            .map(|(dependent, _)| *dependent)
            .collect()
    }

    fn flag(&self, id: FlagId) -> Result<Flag> {
        let row = self.rows.get(&id).ok_or(StorageError::FlagNotFound(id))?;
        Ok(Flag::new(
            id,
            row.name.clone(),
            row.status,
            self.dependencies(id),
            row.created_at,
            row.updated_at,
        ))
    }

    fn flag_by_name(&self, name: &str) -> Result<Flag> {
        let id = self
            .names
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::FlagNameNotFound(name.to_string()))?;
        self.flag(id)
    }

    fn list(&self) -> Result<Vec<Flag>> {
        let mut flags = self
            .rows
            .keys()
            .map(|id| self.flag(*id))
            .collect::<Result<Vec<_>>>()?;
        flags.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(flags)
    }
}

/// In-memory flag store.
///
/// Writers are serialized through a single async mutex: a transaction holds
/// the lock from [`FlagStore::begin`] until it commits or is dropped, and
/// works on a private copy of the table so an abandoned transaction leaves
/// nothing behind. Audit entries live in a [`DashMap`] keyed by flag id and
/// are appended without taking the table lock.
///
/// Nothing survives the process; use [`super::SqliteFlagStore`] for
/// durability.
pub struct InMemoryFlagStore {
    table: Arc<Mutex<FlagTable>>,
    audit: DashMap<FlagId, Vec<AuditLogEntry>>,
    audit_seq: AtomicI64,
}

impl InMemoryFlagStore {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(FlagTable {
                next_id: 1,
                ..FlagTable::default()
            })),
            audit: DashMap::new(),
            audit_seq: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryFlagStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction over [`InMemoryFlagStore`].
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<FlagTable>,
    working: FlagTable,
}

#[async_trait]
impl FlagTransaction for InMemoryTransaction {
    async fn create_flag(&mut self, name: &str, status: FlagStatus) -> Result<FlagId> {
        if self.working.names.contains_key(name) {
            return Err(StorageError::NameTaken(name.to_string()));
        }

        let id = FlagId::new(self.working.next_id);
        self.working.next_id += 1;

        let now = Utc::now();
        self.working.rows.insert(
            id,
            FlagRow {
                name: name.to_string(),
                status,
                created_at: now,
                updated_at: now,
            },
        );
        self.working.names.insert(name.to_string(), id);
        Ok(id)
    }

    async fn get_flag(&mut self, id: FlagId) -> Result<Flag> {
        self.working.flag(id)
    }

    async fn lock_flag(&mut self, id: FlagId, _mode: LockMode) -> Result<Flag> {
        // The table lock already excludes every other writer.
        self.working.flag(id)
    }

    async fn get_flag_by_name(&mut self, name: &str) -> Result<Flag> {
        self.working.flag_by_name(name)
    }

    async fn list_flags(&mut self) -> Result<Vec<Flag>> {
        self.working.list()
    }

    async fn set_status(&mut self, id: FlagId, status: FlagStatus) -> Result<()> {
        let row = self
            .working
            .rows
            .get_mut(&id)
            .ok_or(StorageError::FlagNotFound(id))?;
        row.status = status;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn add_edge(&mut self, dependent: FlagId, prerequisite: FlagId) -> Result<()> {
        for id in [dependent, prerequisite] {
            if !self.working.rows.contains_key(&id) {
                return Err(StorageError::FlagNotFound(id));
            }
        }
        self.working.edges.insert((dependent, prerequisite));
        Ok(())
    }

    async fn direct_dependencies(&mut self, id: FlagId) -> Result<Vec<FlagId>> {
        Ok(self.working.dependencies(id))
    }

    async fn direct_dependents(&mut self, id: FlagId) -> Result<Vec<FlagId>> {
        Ok(self.working.dependents(id))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn begin(&self) -> Result<Box<dyn FlagTransaction>> {
        let guard = Arc::clone(&self.table).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }

    async fn get_flag(&self, id: FlagId) -> Result<Flag> {
        self.table.lock().await.flag(id)
    }

    async fn get_flag_by_name(&self, name: &str) -> Result<Flag> {
        self.table.lock().await.flag_by_name(name)
    }

    async fn list_flags(&self) -> Result<Vec<Flag>> {
        self.table.lock().await.list()
    }
}

#[async_trait]
impl AuditRecorder for InMemoryFlagStore {
    async fn append(&self, event: &AuditEvent) -> Result<AuditLogEntry> {
        let id = self.audit_seq.fetch_add(1, Ordering::SeqCst);
        let entry = AuditLogEntry::from_event(id, event);
        self.audit
            .entry(event.flag_id)
            .or_default()
            .push(entry.clone());

        debug!(
            flag_id = %event.flag_id,
            action = %event.action,
            actor = %event.actor,
            "Appended audit entry"
        );
        Ok(entry)
    }

    async fn entries_for_flag(&self, flag_id: FlagId) -> Result<Vec<AuditLogEntry>> {
        let mut entries = self
            .audit
            .get(&flag_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(entries)
    }

    async fn recent_entries(&self, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>> {
        let mut entries: Vec<AuditLogEntry> = self
            .audit
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AuditAction;

    async fn create(store: &InMemoryFlagStore, name: &str, deps: &[FlagId]) -> FlagId {
        let mut tx = store.begin().await.unwrap();
        let id = tx.create_flag(name, FlagStatus::Disabled).await.unwrap();
        for dep in deps {
            tx.add_edge(id, *dep).await.unwrap();
        }
        tx.commit().await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_create_and_get_flag() {
        let store = InMemoryFlagStore::new();
        let auth = create(&store, "auth", &[]).await;
        let profile = create(&store, "profile", &[]).await;
        let checkout = create(&store, "checkout", &[profile, auth]).await;

        let flag = store.get_flag(checkout).await.unwrap();
        assert_eq!(flag.name(), "checkout");
        assert_eq!(flag.status(), FlagStatus::Disabled);
        assert_eq!(flag.dependencies(), &[auth, profile]);

        let by_name = store.get_flag_by_name("auth").await.unwrap();
        assert_eq!(by_name.id(), auth);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let store = InMemoryFlagStore::new();
        create(&store, "auth", &[]).await;

        let mut tx = store.begin().await.unwrap();
        let result = tx.create_flag("auth", FlagStatus::Disabled).await;
        assert!(matches!(result, Err(StorageError::NameTaken(name)) if name == "auth"));
    }

    #[tokio::test]
    async fn test_dropped_transaction_leaves_no_trace() {
        let store = InMemoryFlagStore::new();
        let auth = create(&store, "auth", &[]).await;

        {
            let mut tx = store.begin().await.unwrap();
            let id = tx.create_flag("orphan", FlagStatus::Disabled).await.unwrap();
            tx.add_edge(id, auth).await.unwrap();
            tx.set_status(auth, FlagStatus::Enabled).await.unwrap();
        }

        assert!(store.get_flag_by_name("orphan").await.is_err());
        assert!(store.get_flag(auth).await.unwrap().is_disabled());
        assert_eq!(store.list_flags().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_edges_are_idempotent_and_indexed_both_ways() {
        let store = InMemoryFlagStore::new();
        let a = create(&store, "aaa", &[]).await;
        let b = create(&store, "bbb", &[a]).await;
        let c = create(&store, "ccc", &[a]).await;

        let mut tx = store.begin().await.unwrap();
        tx.add_edge(b, a).await.unwrap();
        assert_eq!(tx.direct_dependencies(b).await.unwrap(), vec![a]);
        assert_eq!(tx.direct_dependents(a).await.unwrap(), vec![b, c]);
        assert!(tx.direct_dependents(c).await.unwrap().is_empty());

        let missing = tx.add_edge(b, FlagId::new(99)).await;
        assert!(matches!(missing, Err(StorageError::FlagNotFound(id)) if id == FlagId::new(99)));
    }

    #[tokio::test]
    async fn test_set_status_unknown_flag() {
        let store = InMemoryFlagStore::new();
        let mut tx = store.begin().await.unwrap();
        let result = tx.set_status(FlagId::new(1), FlagStatus::Enabled).await;
        assert!(matches!(result, Err(StorageError::FlagNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_flags_sorted_by_name() {
        let store = InMemoryFlagStore::new();
        create(&store, "zeta", &[]).await;
        create(&store, "alpha", &[]).await;
        create(&store, "mid", &[]).await;

        let names: Vec<_> = store
            .list_flags()
            .await
            .unwrap()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_audit_entries_newest_first() {
        let store = InMemoryFlagStore::new();
        let id = FlagId::new(1);
        store
            .append(&AuditEvent::new(id, AuditAction::Create, "alice", "Flag created"))
            .await
            .unwrap();
        store
            .append(&AuditEvent::new(id, AuditAction::Enable, "alice", "rollout"))
            .await
            .unwrap();
        store
            .append(&AuditEvent::new(FlagId::new(2), AuditAction::Create, "bob", "Flag created"))
            .await
            .unwrap();

        let entries = store.entries_for_flag(id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Enable);
        assert_eq!(entries[1].action, AuditAction::Create);

        let recent = store.recent_entries(2, 0).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].actor, "bob");
        assert!(store.entries_for_flag(FlagId::new(42)).await.unwrap().is_empty());
    }
}
