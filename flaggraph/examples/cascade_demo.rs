//! Cascade Disable Demo
//!
//! This example demonstrates:
//! - Opening an engine from `FLAGGRAPH_*` environment variables
//! - Dependency-guarded enablement with named missing prerequisites
//! - Cascading disable through a chain of dependents
//! - Cycle rejection and the resulting audit trail
//! - Exporting the dependency graph as DOT
//!
//! ## Scenario
//! - `auth` and `profile` are independent flags
//! - `checkout` depends on both, `payment` depends on `checkout`
//! - Enabling `checkout` early is rejected, then succeeds once both are on
//! - Disabling `auth` switches `checkout` and `payment` off
//!
//! ## Run with
//! ```bash
//! cargo run --example cascade_demo
//! FLAGGRAPH_DATABASE_URL=sqlite://flags.db RUST_LOG=flaggraph=debug cargo run --example cascade_demo
//! ```

use flaggraph::graph::DependencyGraph;
use flaggraph::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flaggraph=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    println!("Opening store at {}", settings.database_url);
    let engine = open_engine(&settings).await?;

    let actor = "demo";
    let mut ids = Vec::new();
    for (name, deps) in [
        ("auth", vec![]),
        ("profile", vec![]),
        ("checkout", vec!["auth", "profile"]),
        ("payment", vec!["checkout"]),
    ] {
        let flag = match engine.get_flag_by_name(name).await {
            Ok(existing) => existing,
            Err(EngineError::FlagNameNotFound(_)) => {
                let mut dep_ids = Vec::new();
                for dep in deps {
                    dep_ids.push(engine.get_flag_by_name(dep).await?.id());
                }
                let request = CreateFlagRequest::new(name).with_dependencies(dep_ids);
                engine.create_flag(request, actor).await?.flag
            }
            Err(e) => return Err(e.into()),
        };
        println!("  {:<10} id={} deps={:?}", flag.name(), flag.id(), flag.dependencies());
        ids.push(flag.id());
    }
    let (auth, profile, checkout, payment) = (ids[0], ids[1], ids[2], ids[3]);

    println!("\nEnabling checkout before its prerequisites:");
    match engine.enable(checkout, actor, "early launch").await {
        Err(e @ EngineError::MissingActiveDependencies(_)) => println!("  rejected: {}", e),
        other => println!("  unexpected: {:?}", other),
    }

    println!("\nEnabling in dependency order:");
    for id in [auth, profile, checkout, payment] {
        let t = engine.enable(id, actor, "launch").await?;
        println!("  flag {} -> {} (changed: {})", id, t.status, t.changed);
    }

    println!("\nProposing payment as a prerequisite of auth:");
    match engine.add_dependencies(auth, vec![payment], actor).await {
        Err(e @ EngineError::CircularDependency { .. }) => println!("  rejected: {}", e),
        other => println!("  unexpected: {:?}", other),
    }

    println!("\nDisabling auth:");
    let outcome = engine.disable(auth, actor, "incident 42").await?;
    println!("  cascade disabled: {:?}", outcome.cascade_disabled);
    for warning in &outcome.warnings {
        println!("  warning: {}", warning);
    }

    println!("\nAudit trail (newest first):");
    for entry in engine.list_audit_log(20, 0).await? {
        println!(
            "  #{:<3} flag={:<3} {:<16} by {:<8} {}",
            entry.id,
            entry.flag_id.to_string(),
            entry.action.as_str(),
            entry.actor,
            entry.reason
        );
    }

    let report = engine.verify_integrity().await?;
    println!(
        "\nIntegrity: {} flags checked, healthy: {}",
        report.flags_checked,
        report.is_healthy()
    );

    println!("\nDependency graph (DOT):");
    let graph = DependencyGraph::from_flags(engine.list_flags().await?);
    println!("{}", graph.to_dot());

    engine.close().await?;
    Ok(())
}
