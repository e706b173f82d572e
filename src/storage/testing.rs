//! Test-only adapter that never answers selected calls

use async_trait::async_trait;
use std::time::Duration;

use super::{BackendAdapter, HealthStatus, InMemoryBackend, Page};
use crate::error::Result;
use crate::types::{
    Direction, Memory, MemoryId, MemoryUpdate, Relationship, RelationshipId, RelationshipType,
};

/// Wraps an in-memory store; flagged calls sleep for an hour
pub(crate) struct StallingBackend {
    pub inner: InMemoryBackend,
    pub stall_related: bool,
    pub stall_close: bool,
}

impl StallingBackend {
    pub fn new(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            stall_related: false,
            stall_close: false,
        }
    }

    pub fn stalling_related(mut self) -> Self {
        self.stall_related = true;
        self
    }

    pub fn stalling_close(mut self) -> Self {
        self.stall_close = true;
        self
    }
}

async fn hang() {
    tokio::time::sleep(Duration::from_secs(3600)).await;
}

#[async_trait]
impl BackendAdapter for StallingBackend {
    fn backend_name(&self) -> &'static str {
        "stalling"
    }

    fn store_id(&self) -> String {
        format!("stalling:{}", self.inner.store_id())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
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
        if self.stall_related {
            hang().await;
        }
        self.inner.get_related(entity_id, direction, types).await
    }

    async fn put_entity(&self, memory: &Memory) -> Result<MemoryId> {
        self.inner.put_entity(memory).await
    }

    async fn put_relationship(&self, rel: &Relationship) -> Result<RelationshipId> {
        self.inner.put_relationship(rel).await
    }

    async fn update_entity(&self, id: &str, update: MemoryUpdate) -> Result<Memory> {
        self.inner.update_entity(id, update).await
    }

    async fn delete_entity(&self, id: &str) -> Result<bool> {
        self.inner.delete_entity(id).await
    }

    async fn delete_relationship(&self, id: &str) -> Result<bool> {
        self.inner.delete_relationship(id).await
    }

    async fn close(&self) -> Result<()> {
        if self.stall_close {
            hang().await;
        }
        self.inner.close().await
    }
}
