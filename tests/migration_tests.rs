//! End-to-end migration tests
//!
//! Run with: cargo test --test migration_tests

mod common;

use pretty_assertions::assert_eq;

use common::{fast_options, memory, rel, ring_graph, three_entity_scenario, FaultyBackend};
use memorygraph::error::ErrorKind;
use memorygraph::graph::{traverse, TraversalOptions};
use memorygraph::migration::{
    Exporter, MigrationManager, MigrationOptions, MigrationState, MismatchKind, Snapshot,
};
use memorygraph::storage::{open_backend, BackendAdapter, InMemoryBackend};
use memorygraph::types::{Direction, Memory, MemoryType, Relationship, RelationshipType};
use memorygraph::BackendConfig;

fn sorted(snapshot: Snapshot) -> (Vec<Memory>, Vec<Relationship>) {
    let mut entities = snapshot.entities;
    let mut relationships = snapshot.relationships;
    entities.sort_by(|a, b| a.id.cmp(&b.id));
    relationships.sort_by(|a, b| a.id.cmp(&b.id));
    (entities, relationships)
}

fn states(result: &memorygraph::MigrationResult) -> Vec<MigrationState> {
    result.transitions.iter().map(|t| t.to).collect()
}

#[tokio::test]
async fn test_three_entity_scenario() {
    let (memories, rels) = three_entity_scenario();
    let source = InMemoryBackend::with_graph("source", memories, rels);
    let target = InMemoryBackend::new("target");

    let result = MigrationManager::new(MigrationOptions {
        verify: true,
        skip_duplicates: false,
        ..Default::default()
    })
    .migrate(&source, &target)
    .await;

    assert_eq!(result.state, MigrationState::Completed, "{}", result.summary());
    let import = result.import.as_ref().unwrap();
    assert_eq!(import.imported_entities, 3);
    assert_eq!(import.imported_relationships, 2);
    assert!(result.verification.as_ref().unwrap().ok);
    assert_eq!(result.exit_code(), 0);

    let solves = target.get_relationship("r-solves").await.unwrap().unwrap();
    assert_eq!(solves.relationship_type, RelationshipType::Solves);
    assert_eq!(solves.from_memory_id, "B");
}

#[tokio::test]
async fn test_duplicate_skip_is_idempotent() {
    let (memories, rels) = three_entity_scenario();
    let source = InMemoryBackend::with_graph("source", memories, rels);
    let target = InMemoryBackend::new("target");
    let manager = MigrationManager::new(MigrationOptions {
        skip_duplicates: true,
        ..Default::default()
    });

    let first = manager.migrate(&source, &target).await;
    assert_eq!(first.state, MigrationState::Completed);

    let second = manager.migrate(&source, &target).await;
    assert_eq!(second.state, MigrationState::Completed, "{}", second.summary());
    let import = second.import.as_ref().unwrap();
    assert_eq!(import.imported_entities, 0);
    assert_eq!(import.skipped_duplicates, 3);
    assert_eq!(import.imported_relationships, 0);
    assert_eq!(import.skipped_relationships, 2);
    assert_eq!(target.count_entities().await.unwrap(), 3);
    // Non-empty target is a warning, not an error
    assert!(!second.warnings.is_empty());
}

#[tokio::test]
async fn test_dry_run_leaves_target_untouched() {
    let (memories, rels) = ring_graph();
    let source = InMemoryBackend::with_graph("source", memories, rels);
    let target = InMemoryBackend::with_graph("target", vec![memory("pre", MemoryType::Fix)], vec![]);

    let result = MigrationManager::new(MigrationOptions {
        dry_run: true,
        ..Default::default()
    })
    .migrate(&source, &target)
    .await;

    assert_eq!(result.state, MigrationState::Completed);
    assert!(result.dry_run);
    let projected = result.import.as_ref().unwrap();
    assert!(projected.projected);
    assert_eq!(projected.imported_entities, 50);
    assert_eq!(projected.imported_relationships, 120);
    assert!(result.verification.is_none());
    assert!(!states(&result).contains(&MigrationState::Importing));

    assert_eq!(target.count_entities().await.unwrap(), 1);
    assert_eq!(target.count_relationships().await.unwrap(), 0);
}

#[tokio::test]
async fn test_dangling_relationship_aborts_before_import() {
    let (memories, mut rels) = three_entity_scenario();
    rels.push(rel("r-ghost", "ghost", "A", RelationshipType::Causes));
    let source = InMemoryBackend::with_graph("source", memories, rels);
    let target = InMemoryBackend::new("target");

    let result = MigrationManager::default().migrate(&source, &target).await;

    assert_eq!(result.state, MigrationState::Aborted);
    assert_eq!(result.exit_code(), 1);
    assert!(!states(&result).contains(&MigrationState::Importing));
    let validation = result.validation.as_ref().unwrap();
    assert!(!validation.ok);
    assert!(validation.errors.iter().any(|e| e.contains("ghost")));
    let failure = result.error.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::Validation);
    assert_eq!(failure.phase, MigrationState::Validating);
    assert_eq!(target.count_entities().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cycle_safe_traversal_on_fixture() {
    let (memories, rels) = ring_graph();
    let backend = InMemoryBackend::with_graph("ring", memories, rels);

    let result = traverse(
        &backend,
        "e000",
        &TraversalOptions::with_depth(10).direction(Direction::Outgoing),
    )
    .await
    .unwrap();

    let ids = result.related_ids();
    // nodes also holds the start at depth 0
    assert_eq!(ids.len() + 1, result.nodes.len(), "a node was visited twice");
    assert!(!ids.contains("e000"));
    assert!(!ids.contains("e049"));
    assert!(result.stats.revisits_pruned > 0);
}

#[tokio::test]
async fn test_rollback_after_silently_dropped_entity() {
    let (memories, rels) = ring_graph();
    let source = InMemoryBackend::with_graph("source", memories, rels);
    // e049 has no relationships, so losing it only shows up in verification
    let target = FaultyBackend::new(InMemoryBackend::new("target")).dropping("e049");
    let before = target.count_entities().await.unwrap();

    let result = MigrationManager::new(fast_options())
        .migrate(&source, &target)
        .await;

    assert_eq!(result.state, MigrationState::Failed, "{}", result.summary());
    assert_eq!(result.exit_code(), 2);
    let verification = result.verification.as_ref().unwrap();
    assert!(!verification.ok);
    assert!(verification
        .mismatches
        .iter()
        .any(|m| m.kind == MismatchKind::EntityCount));
    assert_eq!(
        result.error.as_ref().unwrap().kind,
        ErrorKind::VerificationMismatch
    );

    let rollback = result.rollback.as_ref().unwrap();
    assert!(rollback.succeeded);
    assert_eq!(rollback.deleted_entities, 49);
    assert_eq!(rollback.deleted_relationships, 120);
    assert_eq!(target.count_entities().await.unwrap(), before);
    assert_eq!(target.count_relationships().await.unwrap(), 0);

    assert!(states(&result).ends_with(&[
        MigrationState::Verifying,
        MigrationState::RollingBack,
        MigrationState::Failed
    ]));
}

#[tokio::test]
async fn test_rollback_spares_preexisting_entities() {
    let (memories, rels) = ring_graph();
    let preexisting = memories[0].clone();
    let source = InMemoryBackend::with_graph("source", memories, rels);
    let target = FaultyBackend::new(InMemoryBackend::with_graph(
        "target",
        vec![preexisting.clone()],
        vec![],
    ))
    .dropping("e049");

    let result = MigrationManager::new(MigrationOptions {
        skip_duplicates: true,
        ..fast_options()
    })
    .migrate(&source, &target)
    .await;

    assert_eq!(result.state, MigrationState::Failed);
    assert_eq!(result.import.as_ref().unwrap().skipped_duplicates, 1);
    assert_eq!(target.count_entities().await.unwrap(), 1);
    assert_eq!(
        target.get_entity(&preexisting.id).await.unwrap(),
        Some(preexisting)
    );
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (memories, rels) = three_entity_scenario();
    let source = InMemoryBackend::with_graph("source", memories, rels);
    let target =
        FaultyBackend::new(InMemoryBackend::new("target")).with_transient_failures(2);

    let result = MigrationManager::new(fast_options())
        .migrate(&source, &target)
        .await;

    assert_eq!(result.state, MigrationState::Completed, "{}", result.summary());
    assert!(result.import.as_ref().unwrap().retries >= 2);
    assert_eq!(target.count_entities().await.unwrap(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_and_roll_back() {
    let (memories, rels) = three_entity_scenario();
    let source = InMemoryBackend::with_graph("source", memories, rels);
    let target =
        FaultyBackend::new(InMemoryBackend::new("target")).with_transient_failures(100);

    let result = MigrationManager::new(fast_options())
        .migrate(&source, &target)
        .await;

    assert_eq!(result.state, MigrationState::Failed);
    let failure = result.error.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::TransientWrite);
    assert_eq!(failure.phase, MigrationState::Importing);
    assert!(result.rollback.as_ref().unwrap().succeeded);
    assert_eq!(target.count_entities().await.unwrap(), 0);
}

#[tokio::test]
async fn test_constraint_rejection_is_fatal() {
    let (memories, rels) = ring_graph();
    let source = InMemoryBackend::with_graph("source", memories, rels);
    let target = FaultyBackend::new(InMemoryBackend::new("target")).rejecting("e030");

    let result = MigrationManager::new(MigrationOptions {
        batch_size: 10,
        ..fast_options()
    })
    .migrate(&source, &target)
    .await;

    assert_eq!(result.state, MigrationState::Failed);
    let failure = result.error.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::Constraint);
    assert!(failure.message.contains("e030"));
    // Nothing retried: the first three batches landed, the fourth failed once
    assert!(result.import.is_none());
    assert!(result.rollback.as_ref().unwrap().succeeded);
    assert_eq!(target.count_entities().await.unwrap(), 0);
}

#[tokio::test]
async fn test_rollback_failure_needs_manual_intervention() {
    let (memories, rels) = ring_graph();
    let source = InMemoryBackend::with_graph("source", memories, rels);
    let target = FaultyBackend::new(InMemoryBackend::new("target"))
        .dropping("e049")
        .failing_deletes();

    let result = MigrationManager::new(fast_options())
        .migrate(&source, &target)
        .await;

    assert_eq!(result.state, MigrationState::Failed);
    assert_eq!(result.exit_code(), 3);
    let failure = result.error.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::Rollback);
    assert!(failure.requires_manual_intervention);
    let rollback = result.rollback.as_ref().unwrap();
    assert!(!rollback.succeeded);
    assert_eq!(rollback.failures.len(), 50 + 120);
}

#[tokio::test]
async fn test_cancel_during_import_rolls_back() {
    let (memories, rels) = three_entity_scenario();
    let source = InMemoryBackend::with_graph("source", memories, rels);
    let target = FaultyBackend::new(InMemoryBackend::new("target"));
    let manager = MigrationManager::new(MigrationOptions {
        batch_size: 1,
        ..fast_options()
    });
    *target.abort_on_write.lock() = Some(manager.abort_handle());

    let result = manager.migrate(&source, &target).await;

    assert_eq!(result.state, MigrationState::Failed);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    assert!(result.rollback.as_ref().unwrap().succeeded);
    assert_eq!(target.count_entities().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unhealthy_target_aborts() {
    let (memories, rels) = three_entity_scenario();
    let source = InMemoryBackend::with_graph("source", memories, rels);
    let target = FaultyBackend::new(InMemoryBackend::new("target"));
    target
        .unhealthy
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let result = MigrationManager::default().migrate(&source, &target).await;

    assert_eq!(result.state, MigrationState::Aborted);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::Connectivity);
    assert_eq!(result.error.as_ref().unwrap().phase, MigrationState::PreFlight);
    assert!(result.rollback.is_none());
}

#[tokio::test]
async fn test_sqlite_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let source_config = BackendConfig::sqlite(dir.path().join("source.db").to_string_lossy());
    let target_config = BackendConfig::sqlite(dir.path().join("target.db").to_string_lossy());

    let (memories, rels) = ring_graph();
    {
        let source = open_backend(&source_config).await.unwrap();
        source.put_entities_batch(&memories).await.unwrap();
        for r in &rels {
            source.put_relationship(r).await.unwrap();
        }
        source.close().await.unwrap();
    }

    let result = MigrationManager::new(MigrationOptions {
        scratch_dir: Some(dir.path().to_path_buf()),
        sample_size: 50,
        ..Default::default()
    })
    .migrate_configs(&source_config, &target_config)
    .await;
    assert_eq!(result.state, MigrationState::Completed, "{}", result.summary());
    assert_eq!(result.verification.as_ref().unwrap().sample_passed, 50);

    // The snapshot artifact is gone once the run returns
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("memorygraph-snapshot-"))
        .collect();
    assert!(leftovers.is_empty());

    let source = open_backend(&source_config).await.unwrap();
    let target = open_backend(&target_config).await.unwrap();
    let original = sorted(Exporter::default().export(source.as_ref()).await.unwrap());
    let copied = sorted(Exporter::default().export(target.as_ref()).await.unwrap());
    assert_eq!(original.0.len(), 50);
    assert_eq!(original.1.len(), 120);
    assert_eq!(original, copied);
}

#[tokio::test]
async fn test_sqlite_dry_run_creates_no_target() {
    let dir = tempfile::tempdir().unwrap();
    let source_config = BackendConfig::sqlite(dir.path().join("source.db").to_string_lossy());
    let target_path = dir.path().join("fresh/target.db");
    let target_config = BackendConfig::sqlite(target_path.to_string_lossy());

    let (memories, rels) = ring_graph();
    {
        let source = open_backend(&source_config).await.unwrap();
        source.put_entities_batch(&memories).await.unwrap();
        for r in &rels {
            source.put_relationship(r).await.unwrap();
        }
        source.close().await.unwrap();
    }

    let dry_run = || {
        MigrationManager::new(MigrationOptions {
            dry_run: true,
            scratch_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
    };

    let result = dry_run().migrate_configs(&source_config, &target_config).await;
    assert_eq!(result.state, MigrationState::Completed, "{}", result.summary());
    let projected = result.import.as_ref().unwrap();
    assert_eq!(projected.imported_entities, 50);
    assert_eq!(projected.imported_relationships, 120);
    assert!(!target_path.exists());
    assert!(!dir.path().join("fresh").exists());

    // An existing target is read, never written
    let existing_config = BackendConfig::sqlite(dir.path().join("existing.db").to_string_lossy());
    {
        let existing = open_backend(&existing_config).await.unwrap();
        existing.put_entity(&memories[0]).await.unwrap();
        existing.close().await.unwrap();
    }
    let result = dry_run().migrate_configs(&source_config, &existing_config).await;
    assert_eq!(result.state, MigrationState::Completed, "{}", result.summary());

    let existing = open_backend(&existing_config).await.unwrap();
    assert_eq!(existing.count_entities().await.unwrap(), 1);
    assert_eq!(existing.count_relationships().await.unwrap(), 0);
}

#[tokio::test]
async fn test_same_store_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");
    let config = BackendConfig::sqlite(path.to_string_lossy());

    let result = MigrationManager::default()
        .migrate_configs(&config, &config.clone())
        .await;

    assert_eq!(result.state, MigrationState::Aborted);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::Configuration);
    assert!(!path.exists(), "no store should have been opened");
}

#[tokio::test]
async fn test_unsupported_target_aborts_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let source = BackendConfig::sqlite(dir.path().join("source.db").to_string_lossy());
    let target = BackendConfig::new(memorygraph::BackendType::Neo4j).with_uri("bolt://localhost:7687");

    let result = MigrationManager::default()
        .migrate_configs(&source, &target)
        .await;

    assert_eq!(result.state, MigrationState::Aborted);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::Configuration);
}
