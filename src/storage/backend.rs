//! Backend adapter trait for abstracting storage implementations
//!
//! This module defines the `BackendAdapter` trait that every storage backend
//! must implement. The migration engine and graph traversal depend only on
//! this contract, never on a specific database's query language, so the
//! same pipeline moves data between SQLite, property-graph databases, and
//! remote services.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::types::{
    Direction, Memory, MemoryId, MemoryUpdate, Relationship, RelationshipId, RelationshipType,
};

/// Health status of a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the backend is healthy
    pub healthy: bool,
    /// Latency of a simple query in milliseconds
    pub latency_ms: f64,
    /// Optional error message if unhealthy
    pub error: Option<String>,
    /// Additional health details
    pub details: HashMap<String, String>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            latency_ms: 0.0,
            error: None,
            details: HashMap::new(),
        }
    }
}

impl HealthStatus {
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// One page of a cursor-based scan
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page, `None` once the scan is exhausted
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// The storage backend contract
///
/// All methods are asynchronous and fallible. Callers treat every call as
/// possibly failing with a connectivity or backend-specific error; only
/// errors whose [`is_retryable`](crate::error::MemoryGraphError::is_retryable)
/// is true are worth retrying.
///
/// `get_related` is a single hop. Multi-hop traversal lives in
/// [`crate::graph`] and is built on top of it.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Get the backend name/type
    fn backend_name(&self) -> &'static str;

    /// Identity of the physical store (two adapters with equal ids alias)
    fn store_id(&self) -> String;

    /// Perform health check
    async fn health_check(&self) -> Result<HealthStatus>;

    // ========================================================================
    // Scans
    // ========================================================================

    /// Scan memories ordered by id, starting after `cursor`
    async fn scan_entities(&self, cursor: Option<String>, batch_size: usize)
        -> Result<Page<Memory>>;

    /// Scan relationships ordered by id, starting after `cursor`
    async fn scan_relationships(
        &self,
        cursor: Option<String>,
        batch_size: usize,
    ) -> Result<Page<Relationship>>;

    /// Count all memories
    async fn count_entities(&self) -> Result<u64>;

    /// Count all relationships
    async fn count_relationships(&self) -> Result<u64>;

    // ========================================================================
    // Point reads
    // ========================================================================

    /// Get a memory by ID
    async fn get_entity(&self, id: &str) -> Result<Option<Memory>>;

    /// Get a relationship by ID
    async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>>;

    /// Single-hop neighbours of `entity_id`
    ///
    /// # Arguments
    /// * `direction` - which edges to follow
    /// * `types` - keep only these relationship types (None = all)
    async fn get_related(
        &self,
        entity_id: &str,
        direction: Direction,
        types: Option<&[RelationshipType]>,
    ) -> Result<Vec<(Relationship, Memory)>>;

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write a memory verbatim (upsert by id)
    async fn put_entity(&self, memory: &Memory) -> Result<MemoryId>;

    /// Write several memories
    ///
    /// The default writes one by one and stops at the first error; backends
    /// with native batching should override it.
    async fn put_entities_batch(&self, memories: &[Memory]) -> Result<Vec<MemoryId>> {
        let mut ids = Vec::with_capacity(memories.len());
        for memory in memories {
            ids.push(self.put_entity(memory).await?);
        }
        Ok(ids)
    }

    /// Write a relationship verbatim (upsert by id)
    ///
    /// Fails with `Constraint` when either endpoint is missing.
    async fn put_relationship(&self, relationship: &Relationship) -> Result<RelationshipId>;

    /// Apply a partial update, bumping the version
    async fn update_entity(&self, id: &str, update: MemoryUpdate) -> Result<Memory>;

    /// Delete a memory and every relationship touching it
    ///
    /// Returns whether the memory existed.
    async fn delete_entity(&self, id: &str) -> Result<bool>;

    /// Delete a relationship, returning whether it existed
    async fn delete_relationship(&self, id: &str) -> Result<bool>;

    /// Release connections; later calls fail with a connectivity error
    async fn close(&self) -> Result<()>;
}
