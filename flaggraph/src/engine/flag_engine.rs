use super::cascade::cascade_disable;
use super::error::{EngineError, Result};
use super::integrity;
use super::outcome::{
    Created, IntegrityReport, IntegrityViolation, ReconcileReport, Transition, TransitionWarning,
};
use crate::config::EngineConfig;
use crate::core::validation::{
    validate_actor, validate_create_request, validate_dependencies, validate_flag_id,
    validate_reason, validate_toggle_request,
};
use crate::core::{
    AuditAction, AuditEvent, AuditLogEntry, CreateFlagRequest, Flag, FlagId, FlagStatus,
    ToggleRequest, CREATE_REASON,
};
use crate::graph::{closing_prerequisite, missing_active_dependencies, DependencyGraph};
use crate::storage::{AuditRecorder, FlagStore, LockMode};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Applies flag transitions while keeping the dependency graph consistent.
///
/// Every mutating operation validates its input, runs its read-then-write
/// sequence inside one store transaction, and appends audit entries only
/// after that transaction commits. A failed audit write therefore never
/// undoes a transition; it is reported as a [`TransitionWarning`].
///
/// The engine is cheap to clone. Clones share the store, the audit recorder
/// and the cancellation token.
///
/// # Example
///
/// ```
/// use flaggraph::{CreateFlagRequest, FlagEngine};
/// use flaggraph::storage::InMemoryFlagStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), flaggraph::EngineError> {
/// let engine = FlagEngine::new(Arc::new(InMemoryFlagStore::new()));
///
/// let auth = engine.create_flag(CreateFlagRequest::new("auth"), "alice").await?.flag;
/// let checkout = engine
///     .create_flag(CreateFlagRequest::new("checkout").with_dependencies([auth.id()]), "alice")
///     .await?
///     .flag;
///
/// engine.enable(auth.id(), "alice", "launch auth").await?;
/// engine.enable(checkout.id(), "alice", "launch checkout").await?;
///
/// let outcome = engine.disable(auth.id(), "alice", "incident 42").await?;
/// assert_eq!(outcome.cascade_disabled, vec![checkout.id()]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FlagEngine {
    store: Arc<dyn FlagStore>,
    audit: Arc<dyn AuditRecorder>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl FlagEngine {
    /// Creates an engine over a backend that stores both flags and audit
    /// entries, with the default configuration.
    pub fn new<B>(backend: Arc<B>) -> Self
    where
        B: FlagStore + AuditRecorder + 'static,
    {
        Self::with_config(backend, EngineConfig::default())
    }

    /// Creates an engine over a combined backend with a custom configuration.
    pub fn with_config<B>(backend: Arc<B>, config: EngineConfig) -> Self
    where
        B: FlagStore + AuditRecorder + 'static,
    {
        let store: Arc<dyn FlagStore> = backend.clone();
        let audit: Arc<dyn AuditRecorder> = backend;
        Self::with_parts(store, audit, config)
    }

    /// Creates an engine whose audit trail lives apart from the flag store.
    pub fn with_parts(
        store: Arc<dyn FlagStore>,
        audit: Arc<dyn AuditRecorder>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            audit,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a handle whose operations stop with [`EngineError::Cancelled`]
    /// once `token` is cancelled.
    ///
    /// Cancellation only reaches an operation before its transaction
    /// commits; the in-flight transaction is dropped, which rolls it back.
    /// Once a transition has committed, its audit entries and cascade always
    /// run to completion.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    /// Returns the token this handle observes.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `operation` under the cancellation token and the operation
    /// timeout.
    ///
    /// Transitions pass only their transactional phase through here: an
    /// expiry must never drop work that follows a commit.
    async fn guarded<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.config.operation_timeout;
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                debug!("Operation cancelled");
                Err(EngineError::Cancelled)
            }
            result = tokio::time::timeout(timeout, operation) => match result {
                Ok(inner) => inner,
                Err(_) => {
                    warn!(?timeout, "Operation timed out");
                    Err(EngineError::TimedOut(timeout))
                }
            }
        }
    }

    /// Appends `event`, turning a failure into a warning.
    async fn record(&self, event: AuditEvent, warnings: &mut Vec<TransitionWarning>) {
        if let Err(e) = self.audit.append(&event).await {
            error!(
                flag_id = %event.flag_id,
                action = %event.action,
                error = %e,
                "Failed to record audit entry"
            );
            warnings.push(TransitionWarning::AuditWriteFailed {
                flag_id: event.flag_id,
                action: event.action,
                error: e.to_string(),
            });
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Creates a disabled flag together with its dependency edges.
    ///
    /// Every dependency must exist. Duplicate dependency ids collapse into one
    /// edge; the returned flag lists dependencies in the order given.
    #[instrument(skip(self, request), fields(name = %request.name, actor = %actor))]
    pub async fn create_flag(&self, request: CreateFlagRequest, actor: &str) -> Result<Created> {
        validate_create_request(&request)?;
        validate_actor(actor)?;

        let dependencies = dedup_in_order(&request.dependencies);
        let flag = self
            .guarded(self.commit_create(&request.name, &dependencies))
            .await?;
        info!(flag_id = %flag.id(), dependencies = dependencies.len(), "Flag created");

        let mut warnings = Vec::new();
        self.record(
            AuditEvent::new(flag.id(), AuditAction::Create, actor, CREATE_REASON),
            &mut warnings,
        )
        .await;

        Ok(Created {
            flag: flag.with_dependencies(dependencies),
            warnings,
        })
    }

    async fn commit_create(&self, name: &str, dependencies: &[FlagId]) -> Result<Flag> {
        let mut tx = self.store.begin().await?;
        for &dependency in dependencies {
            tx.lock_flag(dependency, LockMode::Shared).await?;
        }

        // The new flag has no id yet, so nothing can depend on it.
        if let Some(prerequisite) = closing_prerequisite(&mut *tx, None, dependencies).await? {
            return Err(EngineError::CircularDependency {
                dependent: None,
                prerequisite,
            });
        }

        let id = tx.create_flag(name, FlagStatus::Disabled).await?;
        for &dependency in dependencies {
            tx.add_edge(id, dependency).await?;
        }
        let flag = tx.get_flag(id).await?;
        tx.commit().await?;
        Ok(flag)
    }

    /// Switches a flag on.
    ///
    /// Fails with [`EngineError::MissingActiveDependencies`] listing every
    /// disabled direct dependency by name. Enabling an enabled flag is a no-op
    /// and writes no audit entry.
    #[instrument(skip(self, reason), fields(flag_id = %id))]
    pub async fn enable(&self, id: FlagId, actor: &str, reason: &str) -> Result<Transition> {
        validate_flag_id(id)?;
        validate_actor(actor)?;
        validate_reason(reason)?;

        if !self.guarded(self.commit_enable(id)).await? {
            return Ok(Transition::unchanged(id, FlagStatus::Enabled));
        }

        let mut transition = Transition::changed(id, FlagStatus::Enabled);
        self.record(
            AuditEvent::new(id, AuditAction::Enable, actor, reason),
            &mut transition.warnings,
        )
        .await;
        Ok(transition)
    }

    /// Returns whether the flag was switched on.
    async fn commit_enable(&self, id: FlagId) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let flag = tx.lock_flag(id, LockMode::Exclusive).await?;
        if flag.is_enabled() {
            tx.rollback().await?;
            debug!("Flag already enabled");
            return Ok(false);
        }

        let missing = missing_active_dependencies(&mut *tx, flag.dependencies()).await?;
        if !missing.is_empty() {
            debug!(missing = ?missing, "Enable rejected");
            return Err(EngineError::MissingActiveDependencies(missing));
        }

        tx.set_status(id, FlagStatus::Enabled).await?;
        tx.commit().await?;
        info!(name = flag.name(), "Flag enabled");
        Ok(true)
    }

    /// Switches a flag off and cascades to every enabled dependent.
    ///
    /// The flag itself is disabled atomically. Dependents are disabled one
    /// transaction at a time; those that cannot be reached after the
    /// configured retries are reported as
    /// [`TransitionWarning::CascadeIncomplete`]. Disabling a disabled flag is
    /// a no-op and does not cascade.
    ///
    /// The timeout and the cancellation token bound the root disable only;
    /// the cascade that follows it is not interrupted.
    #[instrument(skip(self, reason), fields(flag_id = %id))]
    pub async fn disable(&self, id: FlagId, actor: &str, reason: &str) -> Result<Transition> {
        validate_flag_id(id)?;
        validate_actor(actor)?;
        validate_reason(reason)?;

        let Some(dependents) = self.guarded(self.commit_disable(id)).await? else {
            return Ok(Transition::unchanged(id, FlagStatus::Disabled));
        };

        let mut transition = Transition::changed(id, FlagStatus::Disabled);
        self.record(
            AuditEvent::new(id, AuditAction::Disable, actor, reason),
            &mut transition.warnings,
        )
        .await;

        let cascade = cascade_disable(
            self.store.as_ref(),
            self.audit.as_ref(),
            self.config.cascade_retry,
            id,
            dependents,
        )
        .await;
        transition.cascade_disabled = cascade.disabled;
        transition.warnings.extend(cascade.warnings);
        Ok(transition)
    }

    /// Returns the direct dependents of the flag when it was switched off,
    /// or `None` when it was already disabled.
    async fn commit_disable(&self, id: FlagId) -> Result<Option<Vec<FlagId>>> {
        let mut tx = self.store.begin().await?;
        let flag = tx.lock_flag(id, LockMode::Exclusive).await?;
        if flag.is_disabled() {
            tx.rollback().await?;
            debug!("Flag already disabled");
            return Ok(None);
        }

        tx.set_status(id, FlagStatus::Disabled).await?;
        let dependents = tx.direct_dependents(id).await?;
        tx.commit().await?;
        info!(name = flag.name(), dependents = dependents.len(), "Flag disabled");
        Ok(Some(dependents))
    }

    /// Routes to [`Self::enable`] or [`Self::disable`].
    #[instrument(skip(self, request), fields(flag_id = %id, enable = request.enable))]
    pub async fn toggle(&self, id: FlagId, request: ToggleRequest, actor: &str) -> Result<Transition> {
        validate_toggle_request(&request)?;
        if request.enable {
            self.enable(id, actor, &request.reason).await
        } else {
            self.disable(id, actor, &request.reason).await
        }
    }

    /// Adds dependency edges to an existing flag.
    ///
    /// Rejects self-dependencies and edges that would close a cycle with
    /// [`EngineError::CircularDependency`]. An enabled flag may only gain
    /// enabled prerequisites. Edges that already exist are ignored; when
    /// nothing new is added no audit entry is written.
    #[instrument(skip(self, prerequisites), fields(flag_id = %id, actor = %actor))]
    pub async fn add_dependencies(
        &self,
        id: FlagId,
        prerequisites: Vec<FlagId>,
        actor: &str,
    ) -> Result<Transition> {
        validate_flag_id(id)?;
        validate_dependencies(&prerequisites)?;
        validate_actor(actor)?;

        let (status, added) = self
            .guarded(self.commit_dependencies(id, &prerequisites))
            .await?;
        if added.is_empty() {
            return Ok(Transition::unchanged(id, status));
        }

        let reason = format!(
            "Added dependencies: {}",
            added
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut transition = Transition::changed(id, status);
        self.record(
            AuditEvent::new(id, AuditAction::Update, actor, reason),
            &mut transition.warnings,
        )
        .await;
        Ok(transition)
    }

    /// Returns the flag's status and the edges actually added.
    async fn commit_dependencies(
        &self,
        id: FlagId,
        prerequisites: &[FlagId],
    ) -> Result<(FlagStatus, Vec<FlagId>)> {
        let mut tx = self.store.begin().await?;
        let flag = tx.lock_flag(id, LockMode::Exclusive).await?;

        let added: Vec<FlagId> = dedup_in_order(prerequisites)
            .into_iter()
            .filter(|p| !flag.dependencies().contains(p))
            .collect();
        if added.is_empty() {
            tx.rollback().await?;
            return Ok((flag.status(), added));
        }

        for &prerequisite in &added {
            tx.lock_flag(prerequisite, LockMode::Shared).await?;
        }

        if let Some(prerequisite) = closing_prerequisite(&mut *tx, Some(id), &added).await? {
            return Err(EngineError::CircularDependency {
                dependent: Some(id),
                prerequisite,
            });
        }

        if flag.is_enabled() {
            let missing = missing_active_dependencies(&mut *tx, &added).await?;
            if !missing.is_empty() {
                return Err(EngineError::MissingActiveDependencies(missing));
            }
        }

        for &prerequisite in &added {
            tx.add_edge(id, prerequisite).await?;
        }
        tx.commit().await?;
        info!(added = ?added, "Dependencies added");
        Ok((flag.status(), added))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_flag(&self, id: FlagId) -> Result<Flag> {
        validate_flag_id(id)?;
        self.guarded(async { self.store.get_flag(id).await.map_err(EngineError::from) })
            .await
    }

    pub async fn get_flag_by_name(&self, name: &str) -> Result<Flag> {
        self.guarded(async {
            self.store
                .get_flag_by_name(name)
                .await
                .map_err(EngineError::from)
        })
        .await
    }

    /// All flags ordered by name.
    pub async fn list_flags(&self) -> Result<Vec<Flag>> {
        self.guarded(async { self.store.list_flags().await.map_err(EngineError::from) })
            .await
    }

    /// Audit entries of one flag, newest first.
    pub async fn audit_log(&self, flag_id: FlagId) -> Result<Vec<AuditLogEntry>> {
        validate_flag_id(flag_id)?;
        self.guarded(self.audit_log_inner(flag_id)).await
    }

    async fn audit_log_inner(&self, flag_id: FlagId) -> Result<Vec<AuditLogEntry>> {
        self.store.get_flag(flag_id).await?;
        Ok(self.audit.entries_for_flag(flag_id).await?)
    }

    /// Audit entries of all flags, newest first.
    pub async fn list_audit_log(&self, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>> {
        self.guarded(async {
            self.audit
                .recent_entries(limit, offset)
                .await
                .map_err(EngineError::from)
        })
        .await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Checks the stored graph for cycles, dangling edges and enabled flags
    /// with a disabled dependency.
    #[instrument(skip(self))]
    pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
        self.guarded(self.verify_integrity_inner()).await
    }

    async fn verify_integrity_inner(&self) -> Result<IntegrityReport> {
        let flags = self.store.list_flags().await?;
        let graph = DependencyGraph::from_flags(flags);
        let violations = integrity::inspect(&graph);

        if violations.is_empty() {
            debug!(flags = graph.len(), "Dependency graph is consistent");
        } else {
            warn!(
                flags = graph.len(),
                violations = violations.len(),
                "Dependency graph has integrity violations"
            );
        }

        Ok(IntegrityReport {
            flags_checked: graph.len(),
            violations,
        })
    }

    /// Restarts the cascade from every disabled flag that still has an
    /// enabled dependent, typically after a cascade reported
    /// [`TransitionWarning::CascadeIncomplete`].
    ///
    /// Cycles and dangling edges cannot be repaired here and are returned in
    /// [`ReconcileReport::unresolved`]. The timeout and the cancellation
    /// token bound the scan; restarted cascades run to completion.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let integrity = self.guarded(self.verify_integrity_inner()).await?;
        let mut report = ReconcileReport::default();
        let mut roots: Vec<(FlagId, Vec<FlagId>)> = Vec::new();

        for violation in integrity.violations {
            match violation {
                IntegrityViolation::EnabledWithDisabledDependency { flag, dependency } => {
                    match roots.iter_mut().find(|(root, _)| *root == dependency) {
                        Some((_, seed)) => seed.push(flag),
                        None => roots.push((dependency, vec![flag])),
                    }
                }
                other => report.unresolved.push(other),
            }
        }

        for (root, seed) in roots {
            info!(root = %root, dependents = seed.len(), "Restarting cascade");
            let cascade = cascade_disable(
                self.store.as_ref(),
                self.audit.as_ref(),
                self.config.cascade_retry,
                root,
                seed,
            )
            .await;
            report.restarted_from.push(root);
            report.disabled.extend(cascade.disabled);
            report.warnings.extend(cascade.warnings);
        }

        Ok(report)
    }

    /// Releases the store's connections.
    pub async fn close(&self) -> Result<()> {
        Ok(self.store.close().await?)
    }
}

/// Drops repeated ids, keeping the first occurrence of each.
fn dedup_in_order(ids: &[FlagId]) -> Vec<FlagId> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
