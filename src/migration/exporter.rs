//! Paginated export of a backend into a [`Snapshot`]

use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::retry::{with_timeout, DEFAULT_CALL_TIMEOUT};
use super::snapshot::{CountDrift, Snapshot};
use super::{report_progress, ItemKind, MigrationState, ProgressCallback};
use crate::error::{MemoryGraphError, Result};
use crate::storage::{BackendAdapter, Page};
use crate::types::{Memory, Relationship};

/// Default number of items fetched per scan call
pub const DEFAULT_PAGE_SIZE: usize = 500;

pub struct Exporter {
    page_size: usize,
    call_timeout: Duration,
    progress: Option<ProgressCallback>,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Exporter {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            progress: None,
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Scan every entity and relationship out of `adapter`
    ///
    /// Count drift against the upfront estimate is recorded in the snapshot
    /// metadata, not raised.
    pub async fn export(&self, adapter: &dyn BackendAdapter) -> Result<Snapshot> {
        let expected_entities =
            with_timeout("count_entities", self.call_timeout, adapter.count_entities()).await?;
        let expected_relationships = with_timeout(
            "count_relationships",
            self.call_timeout,
            adapter.count_relationships(),
        )
        .await?;

        info!(
            backend = adapter.backend_name(),
            entities = expected_entities,
            relationships = expected_relationships,
            "Exporting"
        );

        let entities: Vec<Memory> = self
            .drain(ItemKind::Entity, expected_entities, |cursor| {
                adapter.scan_entities(cursor, self.page_size)
            })
            .await?;
        let relationships: Vec<Relationship> = self
            .drain(ItemKind::Relationship, expected_relationships, |cursor| {
                adapter.scan_relationships(cursor, self.page_size)
            })
            .await?;

        let entity_drift = CountDrift::between(expected_entities, entities.len() as u64);
        let relationship_drift =
            CountDrift::between(expected_relationships, relationships.len() as u64);
        if let Some(drift) = entity_drift {
            warn!(
                expected = drift.expected,
                actual = drift.actual,
                "Entity count drifted during export"
            );
        }
        if let Some(drift) = relationship_drift {
            warn!(
                expected = drift.expected,
                actual = drift.actual,
                "Relationship count drifted during export"
            );
        }

        let mut snapshot = Snapshot::new(
            adapter.backend_name(),
            adapter.store_id(),
            entities,
            relationships,
        );
        snapshot.metadata.entity_drift = entity_drift;
        snapshot.metadata.relationship_drift = relationship_drift;

        info!(
            entities = snapshot.entities.len(),
            relationships = snapshot.relationships.len(),
            "Export complete"
        );
        Ok(snapshot)
    }

    async fn drain<T, F, Fut>(&self, kind: ItemKind, total: u64, mut scan: F) -> Result<Vec<T>>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: std::future::Future<Output = Result<Page<T>>>,
    {
        let mut items = Vec::with_capacity((total as usize).min(100_000));
        let mut cursor: Option<String> = None;
        let mut seen_cursors: HashSet<String> = HashSet::new();

        loop {
            let operation = format!("scan {}", kind);
            let page = with_timeout(&operation, self.call_timeout, scan(cursor.clone())).await?;
            items.extend(page.items);
            report_progress(
                self.progress.as_ref(),
                MigrationState::Exporting,
                kind,
                items.len() as u64,
                total,
            );
            debug!(%kind, so_far = items.len(), "Exported page");

            // A cursor handed out twice means the scan would loop forever
            match page.next_cursor {
                None => break,
                Some(next) if !seen_cursors.insert(next.clone()) => {
                    return Err(MemoryGraphError::Internal(format!(
                        "{} scan cursor repeated at {}",
                        kind, next
                    )));
                }
                Some(next) => cursor = Some(next),
            }
        }

        Ok(items)
    }
}
