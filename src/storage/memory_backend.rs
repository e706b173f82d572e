//! In-memory implementation of the BackendAdapter trait
//!
//! Keeps memories and relationships in ordered maps behind a
//! `parking_lot::RwLock`. Scans use keyset pagination over the map keys, so
//! a cursor is simply the last id returned.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::backend::{BackendAdapter, HealthStatus, Page};
use crate::error::{MemoryGraphError, Result};
use crate::types::{
    Direction, Memory, MemoryId, MemoryUpdate, Relationship, RelationshipId, RelationshipType,
};

#[derive(Default)]
struct GraphState {
    memories: BTreeMap<MemoryId, Memory>,
    relationships: BTreeMap<RelationshipId, Relationship>,
}

/// Process-local memory store
pub struct InMemoryBackend {
    name: String,
    state: RwLock<GraphState>,
    closed: AtomicBool,
}

impl InMemoryBackend {
    /// Create an empty store; `name` distinguishes stores for aliasing checks
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(GraphState::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a store pre-populated with a graph (no endpoint checks)
    pub fn with_graph(
        name: impl Into<String>,
        memories: impl IntoIterator<Item = Memory>,
        relationships: impl IntoIterator<Item = Relationship>,
    ) -> Self {
        let backend = Self::new(name);
        {
            let mut state = backend.state.write();
            for memory in memories {
                state.memories.insert(memory.id.clone(), memory);
            }
            for relationship in relationships {
                state
                    .relationships
                    .insert(relationship.id.clone(), relationship);
            }
        }
        backend
    }

    /// Snapshot of every memory, ordered by id
    pub fn memories(&self) -> Vec<Memory> {
        self.state.read().memories.values().cloned().collect()
    }

    /// Snapshot of every relationship, ordered by id
    pub fn relationships(&self) -> Vec<Relationship> {
        self.state.read().relationships.values().cloned().collect()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MemoryGraphError::Connectivity(format!(
                "in-memory store '{}' is closed",
                self.name
            )));
        }
        Ok(())
    }
}

fn scan_page<T: Clone>(
    map: &BTreeMap<String, T>,
    cursor: Option<String>,
    batch_size: usize,
) -> Page<T> {
    let batch_size = batch_size.max(1);
    let lower = match cursor {
        Some(c) => Bound::Excluded(c),
        None => Bound::Unbounded,
    };

    let mut iter = map.range((lower, Bound::Unbounded));
    let mut items = Vec::with_capacity(batch_size);
    let mut last_key = None;
    for (key, value) in iter.by_ref().take(batch_size) {
        items.push(value.clone());
        last_key = Some(key.clone());
    }

    let next_cursor = if iter.next().is_some() { last_key } else { None };
    Page { items, next_cursor }
}

#[async_trait]
impl BackendAdapter for InMemoryBackend {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn store_id(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let start = Instant::now();
        if self.closed.load(Ordering::Acquire) {
            return Ok(HealthStatus::unhealthy("store is closed"));
        }
        let state = self.state.read();
        Ok(HealthStatus {
            healthy: true,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            error: None,
            details: HashMap::from([
                ("store".to_string(), self.name.clone()),
                ("memories".to_string(), state.memories.len().to_string()),
                (
                    "relationships".to_string(),
                    state.relationships.len().to_string(),
                ),
            ]),
        })
    }

    async fn scan_entities(
        &self,
        cursor: Option<String>,
        batch_size: usize,
    ) -> Result<Page<Memory>> {
        self.ensure_open()?;
        Ok(scan_page(&self.state.read().memories, cursor, batch_size))
    }

    async fn scan_relationships(
        &self,
        cursor: Option<String>,
        batch_size: usize,
    ) -> Result<Page<Relationship>> {
        self.ensure_open()?;
        Ok(scan_page(&self.state.read().relationships, cursor, batch_size))
    }

    async fn count_entities(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.state.read().memories.len() as u64)
    }

    async fn count_relationships(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.state.read().relationships.len() as u64)
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Memory>> {
        self.ensure_open()?;
        Ok(self.state.read().memories.get(id).cloned())
    }

    async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>> {
        self.ensure_open()?;
        Ok(self.state.read().relationships.get(id).cloned())
    }

    async fn get_related(
        &self,
        entity_id: &str,
        direction: Direction,
        types: Option<&[RelationshipType]>,
    ) -> Result<Vec<(Relationship, Memory)>> {
        self.ensure_open()?;
        let state = self.state.read();

        let related = state
            .relationships
            .values()
            .filter(|rel| direction.follows(rel, entity_id))
            .filter(|rel| types.map_or(true, |t| t.contains(&rel.relationship_type)))
            .filter_map(|rel| {
                let neighbor_id = rel.other_end(entity_id)?;
                let neighbor = state.memories.get(neighbor_id)?;
                Some((rel.clone(), neighbor.clone()))
            })
            .collect();

        Ok(related)
    }

    async fn put_entity(&self, memory: &Memory) -> Result<MemoryId> {
        self.ensure_open()?;
        self.state
            .write()
            .memories
            .insert(memory.id.clone(), memory.clone());
        Ok(memory.id.clone())
    }

    async fn put_relationship(&self, relationship: &Relationship) -> Result<RelationshipId> {
        self.ensure_open()?;
        let mut state = self.state.write();
        for endpoint in [&relationship.from_memory_id, &relationship.to_memory_id] {
            if !state.memories.contains_key(endpoint) {
                return Err(MemoryGraphError::Constraint(format!(
                    "relationship {} references missing memory {}",
                    relationship.id, endpoint
                )));
            }
        }
        state
            .relationships
            .insert(relationship.id.clone(), relationship.clone());
        Ok(relationship.id.clone())
    }

    async fn update_entity(&self, id: &str, update: MemoryUpdate) -> Result<Memory> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let memory = state
            .memories
            .get_mut(id)
            .ok_or_else(|| MemoryGraphError::NotFound(id.to_string()))?;
        memory.apply_update(update)?;
        Ok(memory.clone())
    }

    async fn delete_entity(&self, id: &str) -> Result<bool> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let existed = state.memories.remove(id).is_some();
        if existed {
            state
                .relationships
                .retain(|_, rel| rel.from_memory_id != id && rel.to_memory_id != id);
        }
        Ok(existed)
    }

    async fn delete_relationship(&self, id: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.state.write().relationships.remove(id).is_some())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
