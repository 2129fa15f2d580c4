//! Engine behavior over the SQLite backend.
#![cfg(feature = "sqlite")]

mod common;

use common::{create, status, test_config};
use flaggraph::storage::SqliteFlagStore;
use flaggraph::{open_engine, AuditAction, EngineError, FlagEngine, FlagStatus, Settings};
use std::sync::Arc;
use tempfile::TempDir;

async fn engine_at(dir: &TempDir) -> FlagEngine {
    let path = dir.path().join("flags.db");
    let store = SqliteFlagStore::new(&path).await.unwrap();
    FlagEngine::with_config(Arc::new(store), test_config())
}

#[tokio::test]
async fn test_state_and_audit_survive_reopen() {
    let dir = TempDir::new().unwrap();

    let (auth, checkout) = {
        let engine = engine_at(&dir).await;
        let auth = create(&engine, "auth", &[]).await;
        let checkout = create(&engine, "checkout", &[auth]).await;
        engine.enable(auth, "alice", "rollout").await.unwrap();
        engine.enable(checkout, "alice", "rollout").await.unwrap();
        engine.disable(auth, "bob", "incident").await.unwrap();
        engine.close().await.unwrap();
        (auth, checkout)
    };

    let engine = engine_at(&dir).await;
    assert_eq!(status(&engine, auth).await, FlagStatus::Disabled);
    assert_eq!(status(&engine, checkout).await, FlagStatus::Disabled);
    assert_eq!(
        engine.get_flag(checkout).await.unwrap().dependencies(),
        &[auth]
    );

    let actions: Vec<_> = engine
        .audit_log(checkout)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::CascadeDisable,
            AuditAction::Enable,
            AuditAction::Create
        ]
    );
    assert!(engine.verify_integrity().await.unwrap().is_healthy());
}

#[tokio::test]
async fn test_rejections_match_the_in_memory_store() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir).await;

    let a = create(&engine, "flag-a", &[]).await;
    let b = create(&engine, "flag-b", &[a]).await;

    assert!(matches!(
        engine.add_dependencies(a, vec![b], "alice").await,
        Err(EngineError::CircularDependency { .. })
    ));
    assert!(matches!(
        engine.enable(b, "alice", "rollout").await,
        Err(EngineError::MissingActiveDependencies(names)) if names == vec!["flag-a"]
    ));
    assert!(matches!(
        engine
            .create_flag(flaggraph::CreateFlagRequest::new("flag-a"), "alice")
            .await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert_eq!(engine.list_flags().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_open_engine_from_sqlite_url() {
    let settings = Settings {
        database_url: "sqlite::memory:".into(),
        ..Settings::default()
    };
    let engine = open_engine(&settings).await.unwrap();
    let auth = create(&engine, "auth", &[]).await;
    engine.enable(auth, "alice", "rollout").await.unwrap();
    assert_eq!(status(&engine, auth).await, FlagStatus::Enabled);
}
