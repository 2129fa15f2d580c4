#![allow(dead_code)]

use async_trait::async_trait;
use flaggraph::core::AuditEvent;
use flaggraph::storage::{
    AuditRecorder, FlagStore, FlagTransaction, InMemoryFlagStore, LockMode, Result, StorageError,
};
use flaggraph::{
    AuditLogEntry, CreateFlagRequest, EngineConfig, Flag, FlagEngine, FlagId, FlagStatus,
    RetryPolicy,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Retries fast enough that failing tests do not stall.
pub const FAST_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 2,
    initial_delay: Duration::from_millis(1),
    max_delay: Duration::from_millis(5),
    backoff_multiplier: 2.0,
};

pub fn test_config() -> EngineConfig {
    EngineConfig {
        operation_timeout: Duration::from_secs(5),
        cascade_retry: FAST_RETRY,
    }
}

#[derive(Default)]
struct Faults {
    unreachable: Mutex<HashSet<FlagId>>,
    audit_down: AtomicBool,
    begin_delay: Mutex<Option<Duration>>,
}

impl Faults {
    fn is_unreachable(&self, id: FlagId) -> bool {
        self.unreachable
            .lock()
            .map(|set| set.contains(&id))
            .unwrap_or(false)
    }
}

/// In-memory store that can be told to misbehave.
///
/// Flags marked unreachable fail `lock_flag` and `set_status` inside
/// transactions with a retryable error. Audit appends can be switched off.
/// `begin` can be slowed down.
pub struct FaultyStore {
    inner: InMemoryFlagStore,
    faults: Arc<Faults>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryFlagStore::new(),
            faults: Arc::new(Faults::default()),
        }
    }

    pub fn make_unreachable(&self, id: FlagId) {
        self.faults.unreachable.lock().unwrap().insert(id);
    }

    pub fn heal(&self) {
        self.faults.unreachable.lock().unwrap().clear();
        self.faults.audit_down.store(false, Ordering::SeqCst);
        *self.faults.begin_delay.lock().unwrap() = None;
    }

    pub fn fail_audit(&self) {
        self.faults.audit_down.store(true, Ordering::SeqCst);
    }

    pub fn slow_begin(&self, delay: Duration) {
        *self.faults.begin_delay.lock().unwrap() = Some(delay);
    }
}

fn injected(id: FlagId) -> StorageError {
    StorageError::Connection(format!("injected fault on flag {}", id))
}

struct FaultyTransaction {
    inner: Box<dyn FlagTransaction>,
    faults: Arc<Faults>,
}

#[async_trait]
impl FlagTransaction for FaultyTransaction {
    async fn create_flag(&mut self, name: &str, status: FlagStatus) -> Result<FlagId> {
        self.inner.create_flag(name, status).await
    }

    async fn get_flag(&mut self, id: FlagId) -> Result<Flag> {
        self.inner.get_flag(id).await
    }

    async fn lock_flag(&mut self, id: FlagId, mode: LockMode) -> Result<Flag> {
        if self.faults.is_unreachable(id) {
            return Err(injected(id));
        }
        self.inner.lock_flag(id, mode).await
    }

    async fn get_flag_by_name(&mut self, name: &str) -> Result<Flag> {
        self.inner.get_flag_by_name(name).await
    }

    async fn list_flags(&mut self) -> Result<Vec<Flag>> {
        self.inner.list_flags().await
    }

    async fn set_status(&mut self, id: FlagId, status: FlagStatus) -> Result<()> {
        if self.faults.is_unreachable(id) {
            return Err(injected(id));
        }
        self.inner.set_status(id, status).await
    }

    async fn add_edge(&mut self, dependent: FlagId, prerequisite: FlagId) -> Result<()> {
        self.inner.add_edge(dependent, prerequisite).await
    }

    async fn direct_dependencies(&mut self, id: FlagId) -> Result<Vec<FlagId>> {
        self.inner.direct_dependencies(id).await
    }

    async fn direct_dependents(&mut self, id: FlagId) -> Result<Vec<FlagId>> {
        self.inner.direct_dependents(id).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.inner.rollback().await
    }
}

#[async_trait]
impl FlagStore for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn FlagTransaction>> {
        let delay = *self.faults.begin_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let inner = self.inner.begin().await?;
        Ok(Box::new(FaultyTransaction {
            inner,
            faults: self.faults.clone(),
        }))
    }

    async fn get_flag(&self, id: FlagId) -> Result<Flag> {
        FlagStore::get_flag(&self.inner, id).await
    }

    async fn get_flag_by_name(&self, name: &str) -> Result<Flag> {
        FlagStore::get_flag_by_name(&self.inner, name).await
    }

    async fn list_flags(&self) -> Result<Vec<Flag>> {
        FlagStore::list_flags(&self.inner).await
    }
}

#[async_trait]
impl AuditRecorder for FaultyStore {
    async fn append(&self, event: &AuditEvent) -> Result<AuditLogEntry> {
        if self.faults.audit_down.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("audit log unavailable".into()));
        }
        self.inner.append(event).await
    }

    async fn entries_for_flag(&self, flag_id: FlagId) -> Result<Vec<AuditLogEntry>> {
        self.inner.entries_for_flag(flag_id).await
    }

    async fn recent_entries(&self, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>> {
        self.inner.recent_entries(limit, offset).await
    }
}

/// Audit recorder whose appends take `delay` before reaching the store.
pub struct SlowAudit {
    inner: Arc<InMemoryFlagStore>,
    delay: Duration,
}

impl SlowAudit {
    pub fn new(inner: Arc<InMemoryFlagStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl AuditRecorder for SlowAudit {
    async fn append(&self, event: &AuditEvent) -> Result<AuditLogEntry> {
        tokio::time::sleep(self.delay).await;
        self.inner.append(event).await
    }

    async fn entries_for_flag(&self, flag_id: FlagId) -> Result<Vec<AuditLogEntry>> {
        self.inner.entries_for_flag(flag_id).await
    }

    async fn recent_entries(&self, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>> {
        self.inner.recent_entries(limit, offset).await
    }
}

/// Engine with a 50ms operation timeout whose audit appends take
/// `audit_delay`.
pub fn slow_audit_engine(audit_delay: Duration) -> FlagEngine {
    let store = Arc::new(InMemoryFlagStore::new());
    let audit = Arc::new(SlowAudit::new(store.clone(), audit_delay));
    let config = EngineConfig {
        operation_timeout: Duration::from_millis(50),
        ..test_config()
    };
    FlagEngine::with_parts(store, audit, config)
}

pub fn memory_engine() -> FlagEngine {
    FlagEngine::with_config(Arc::new(InMemoryFlagStore::new()), test_config())
}

pub fn faulty_engine() -> (FlagEngine, Arc<FaultyStore>) {
    let store = Arc::new(FaultyStore::new());
    (FlagEngine::with_config(store.clone(), test_config()), store)
}

pub async fn create(engine: &FlagEngine, name: &str, deps: &[FlagId]) -> FlagId {
    engine
        .create_flag(
            CreateFlagRequest::new(name).with_dependencies(deps.iter().copied()),
            "tester",
        )
        .await
        .expect("create flag")
        .flag
        .id()
}

pub async fn status(engine: &FlagEngine, id: FlagId) -> FlagStatus {
    engine.get_flag(id).await.expect("get flag").status()
}

/// Initializes test logging once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
