//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use memorygraph::error::{MemoryGraphError, Result};
use memorygraph::migration::{MigrationOptions, RetryPolicy};
use memorygraph::storage::{BackendAdapter, HealthStatus, InMemoryBackend, Page};
use memorygraph::types::{
    Direction, Memory, MemoryId, MemoryType, MemoryUpdate, Relationship, RelationshipId,
    RelationshipType,
};

pub fn memory(id: &str, memory_type: MemoryType) -> Memory {
    let mut m = Memory::new(memory_type, format!("Memory {}", id), format!("Content of {}", id));
    m.id = id.to_string();
    m
}

pub fn rel(id: &str, from: &str, to: &str, t: RelationshipType) -> Relationship {
    let mut r = Relationship::new(from, to, t);
    r.id = id.to_string();
    r
}

/// A: problem, B: solution, C: problem; B SOLVES A, C DEPENDS_ON B
pub fn three_entity_scenario() -> (Vec<Memory>, Vec<Relationship>) {
    (
        vec![
            memory("A", MemoryType::Problem),
            memory("B", MemoryType::Solution),
            memory("C", MemoryType::Problem),
        ],
        vec![
            rel("r-solves", "B", "A", RelationshipType::Solves),
            rel("r-depends", "C", "B", RelationshipType::DependsOn),
        ],
    )
}

/// 50 entities and 120 relationships
///
/// e000..e048 form a ring (every node reachable, so traversals see cycles),
/// chords fill the remaining edges, and e049 has no relationships at all.
pub fn ring_graph() -> (Vec<Memory>, Vec<Relationship>) {
    const TYPES: [MemoryType; 4] = [
        MemoryType::Problem,
        MemoryType::Solution,
        MemoryType::CodePattern,
        MemoryType::Workflow,
    ];
    const REL_TYPES: [RelationshipType; 4] = [
        RelationshipType::Solves,
        RelationshipType::Causes,
        RelationshipType::LeadsTo,
        RelationshipType::RelatedTo,
    ];

    let memories: Vec<Memory> = (0..50)
        .map(|i| {
            memory(&format!("e{:03}", i), TYPES[i % TYPES.len()])
                .with_tags([format!("group-{}", i % 5)])
                .with_importance((i % 10) as f64 / 10.0)
        })
        .collect();

    let ring = 49;
    let mut rels = Vec::with_capacity(120);
    for i in 0..ring {
        rels.push(rel(
            &format!("ring-{:03}", i),
            &format!("e{:03}", i),
            &format!("e{:03}", (i + 1) % ring),
            REL_TYPES[i % REL_TYPES.len()].clone(),
        ));
    }
    let mut k = 0;
    while rels.len() < 120 {
        let from = k % ring;
        let to = (k * 7 + 3) % ring;
        if from != to {
            rels.push(rel(
                &format!("chord-{:03}", k),
                &format!("e{:03}", from),
                &format!("e{:03}", to),
                REL_TYPES[k % REL_TYPES.len()].clone(),
            ));
        }
        k += 1;
    }

    (memories, rels)
}

/// Retries with millisecond delays so failure tests stay fast
pub fn fast_options() -> MigrationOptions {
    MigrationOptions {
        retry: RetryPolicy::with_base_delay(Duration::from_millis(1)),
        ..Default::default()
    }
}

/// Adapter wrapper that injects failures into an in-memory store
pub struct FaultyBackend {
    pub inner: InMemoryBackend,
    /// Entity writes for these ids report success but store nothing
    pub silently_drop: HashSet<MemoryId>,
    /// Entity writes for this id fail with a constraint violation
    pub reject: Option<MemoryId>,
    /// Remaining entity writes that fail with a transient error
    pub transient_failures: AtomicU32,
    /// Deletes always fail
    pub fail_deletes: bool,
    /// Raise the abort flag on the first entity write
    pub abort_on_write: Mutex<Option<memorygraph::migration::AbortHandle>>,
    pub unhealthy: AtomicBool,
}

impl FaultyBackend {
    pub fn new(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            silently_drop: HashSet::new(),
            reject: None,
            transient_failures: AtomicU32::new(0),
            fail_deletes: false,
            abort_on_write: Mutex::new(None),
            unhealthy: AtomicBool::new(false),
        }
    }

    pub fn dropping(mut self, id: &str) -> Self {
        self.silently_drop.insert(id.to_string());
        self
    }

    pub fn rejecting(mut self, id: &str) -> Self {
        self.reject = Some(id.to_string());
        self
    }

    pub fn with_transient_failures(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    fn before_write(&self, memory: &Memory) -> Result<bool> {
        if let Some(abort) = self.abort_on_write.lock().take() {
            abort.abort();
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(MemoryGraphError::TransientWrite(
                "temporarily unavailable".to_string(),
            ));
        }
        if self.reject.as_deref() == Some(memory.id.as_str()) {
            return Err(MemoryGraphError::Constraint(format!(
                "target rejected entity {}",
                memory.id
            )));
        }
        Ok(!self.silently_drop.contains(&memory.id))
    }
}

#[async_trait]
impl BackendAdapter for FaultyBackend {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    fn store_id(&self) -> String {
        format!("faulty:{}", self.inner.store_id())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Ok(HealthStatus::unhealthy("injected outage"));
        }
        self.inner.health_check().await
    }

    async fn scan_entities(&self, cursor: Option<String>, batch_size: usize) -> Result<Page<Memory>> {
        self.inner.scan_entities(cursor, batch_size).await
    }

    async fn scan_relationships(
        &self,
        cursor: Option<String>,
        batch_size: usize,
    ) -> Result<Page<Relationship>> {
        self.inner.scan_relationships(cursor, batch_size).await
    }

    async fn count_entities(&self) -> Result<u64> {
        self.inner.count_entities().await
    }

    async fn count_relationships(&self) -> Result<u64> {
        self.inner.count_relationships().await
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Memory>> {
        self.inner.get_entity(id).await
    }

    async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>> {
        self.inner.get_relationship(id).await
    }

    async fn get_related(
        &self,
        entity_id: &str,
        direction: Direction,
        types: Option<&[RelationshipType]>,
    ) -> Result<Vec<(Relationship, Memory)>> {
        self.inner.get_related(entity_id, direction, types).await
    }

    async fn put_entity(&self, memory: &Memory) -> Result<MemoryId> {
        if self.before_write(memory)? {
            self.inner.put_entity(memory).await
        } else {
            Ok(memory.id.clone())
        }
    }

    async fn put_relationship(&self, rel: &Relationship) -> Result<RelationshipId> {
        self.inner.put_relationship(rel).await
    }

    async fn update_entity(&self, id: &str, update: MemoryUpdate) -> Result<Memory> {
        self.inner.update_entity(id, update).await
    }

    async fn delete_entity(&self, id: &str) -> Result<bool> {
        if self.fail_deletes {
            return Err(MemoryGraphError::Constraint(format!("cannot delete {}", id)));
        }
        self.inner.delete_entity(id).await
    }

    async fn delete_relationship(&self, id: &str) -> Result<bool> {
        if self.fail_deletes {
            return Err(MemoryGraphError::Constraint(format!("cannot delete {}", id)));
        }
        self.inner.delete_relationship(id).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
