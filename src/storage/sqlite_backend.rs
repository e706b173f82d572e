//! SQLite implementation of the BackendAdapter trait
//!
//! Wraps [`Storage`] and delegates to the functions in `queries.rs`. Every
//! call runs on the blocking thread pool so the single shared connection
//! never stalls the async runtime.

use async_trait::async_trait;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::backend::{BackendAdapter, HealthStatus, Page};
use super::connection::{Storage, StorageConfig};
use super::queries;
use crate::config::canonical_or_raw;
use crate::error::{MemoryGraphError, Result};
use crate::types::{
    Direction, Memory, MemoryId, MemoryUpdate, Relationship, RelationshipId, RelationshipType,
};

/// SQLite-based storage backend
pub struct SqliteBackend {
    storage: Storage,
    store_id: String,
    closed: AtomicBool,
}

impl SqliteBackend {
    /// Open (or create) the database described by `config`
    pub fn new(config: StorageConfig) -> Result<Self> {
        let store_id = if config.db_path == ":memory:" {
            format!("sqlite::memory:{}", uuid::Uuid::new_v4())
        } else {
            format!("sqlite:{}", canonical_or_raw(Path::new(&config.db_path)))
        };
        let storage = Storage::open(config)?;
        Ok(Self {
            storage,
            store_id,
            closed: AtomicBool::new(false),
        })
    }

    /// Open the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(StorageConfig::new(path.as_ref().to_string_lossy()))
    }

    /// Attach to an existing database file without writing to it
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(StorageConfig::new(path.as_ref().to_string_lossy()).read_only())
    }

    /// Create an in-memory SQLite backend (useful for testing)
    pub fn in_memory() -> Result<Self> {
        Self::new(StorageConfig::new(":memory:"))
    }

    /// Get a reference to the underlying Storage
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(MemoryGraphError::Connectivity(format!(
                "sqlite store {} is closed",
                self.storage.db_path()
            )));
        }
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.with_transaction(f))
            .await
            .map_err(|e| MemoryGraphError::Internal(format!("sqlite task failed: {}", e)))?
    }
}

fn page_of<T>(items: Vec<T>, has_more: bool, key: impl Fn(&T) -> String) -> Page<T> {
    let next_cursor = if has_more { items.last().map(key) } else { None };
    Page { items, next_cursor }
}

#[async_trait]
impl BackendAdapter for SqliteBackend {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn store_id(&self) -> String {
        self.store_id.clone()
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let start = Instant::now();
        let db_path = self.storage.db_path().to_string();

        let result = self
            .run(|conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))?;
                let memories = queries::count_memories(conn)?;
                let relationships = queries::count_relationships(conn)?;
                Ok((memories, relationships))
            })
            .await;

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok((memories, relationships)) => Ok(HealthStatus {
                healthy: true,
                latency_ms,
                error: None,
                details: HashMap::from([
                    ("db_path".to_string(), db_path),
                    (
                        "storage_mode".to_string(),
                        format!("{:?}", self.storage.storage_mode()),
                    ),
                    ("memories".to_string(), memories.to_string()),
                    ("relationships".to_string(), relationships.to_string()),
                ]),
            }),
            Err(e) => Ok(HealthStatus {
                healthy: false,
                latency_ms,
                error: Some(e.to_string()),
                details: HashMap::from([("db_path".to_string(), db_path)]),
            }),
        }
    }

    async fn scan_entities(
        &self,
        cursor: Option<String>,
        batch_size: usize,
    ) -> Result<Page<Memory>> {
        let limit = batch_size.max(1);
        let (items, has_more) = self
            .run(move |conn| queries::scan_memories(conn, cursor.as_deref(), limit))
            .await?;
        Ok(page_of(items, has_more, |m| m.id.clone()))
    }

    async fn scan_relationships(
        &self,
        cursor: Option<String>,
        batch_size: usize,
    ) -> Result<Page<Relationship>> {
        let limit = batch_size.max(1);
        let (items, has_more) = self
            .run(move |conn| queries::scan_relationships(conn, cursor.as_deref(), limit))
            .await?;
        Ok(page_of(items, has_more, |r| r.id.clone()))
    }

    async fn count_entities(&self) -> Result<u64> {
        self.run(queries::count_memories).await
    }

    async fn count_relationships(&self) -> Result<u64> {
        self.run(queries::count_relationships).await
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Memory>> {
        let id = id.to_string();
        self.run(move |conn| queries::get_memory(conn, &id)).await
    }

    async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>> {
        let id = id.to_string();
        self.run(move |conn| queries::get_relationship(conn, &id))
            .await
    }

    async fn get_related(
        &self,
        entity_id: &str,
        direction: Direction,
        types: Option<&[RelationshipType]>,
    ) -> Result<Vec<(Relationship, Memory)>> {
        let entity_id = entity_id.to_string();
        let types = types.map(|t| t.to_vec());
        self.run(move |conn| queries::get_related(conn, &entity_id, direction, types.as_deref()))
            .await
    }

    async fn put_entity(&self, memory: &Memory) -> Result<MemoryId> {
        let memory = memory.clone();
        self.run(move |conn| {
            queries::upsert_memory(conn, &memory)?;
            Ok(memory.id)
        })
        .await
    }

    /// Writes the whole batch in one transaction
    async fn put_entities_batch(&self, memories: &[Memory]) -> Result<Vec<MemoryId>> {
        let memories = memories.to_vec();
        self.run(move |conn| {
            let mut ids = Vec::with_capacity(memories.len());
            for memory in memories {
                queries::upsert_memory(conn, &memory)?;
                ids.push(memory.id);
            }
            Ok(ids)
        })
        .await
    }

    async fn put_relationship(&self, relationship: &Relationship) -> Result<RelationshipId> {
        let relationship = relationship.clone();
        self.run(move |conn| {
            queries::upsert_relationship(conn, &relationship)?;
            Ok(relationship.id)
        })
        .await
    }

    async fn update_entity(&self, id: &str, update: MemoryUpdate) -> Result<Memory> {
        let id = id.to_string();
        self.run(move |conn| queries::update_memory(conn, &id, update))
            .await
    }

    async fn delete_entity(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run(move |conn| queries::delete_memory(conn, &id)).await
    }

    async fn delete_relationship(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run(move |conn| queries::delete_relationship(conn, &id))
            .await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.checkpoint())
            .await
            .map_err(|e| MemoryGraphError::Internal(format!("sqlite task failed: {}", e)))?
    }
}
