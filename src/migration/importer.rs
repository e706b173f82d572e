//! Batched import of a validated snapshot into a target backend
//!
//! Entities go first, relationships after every entity has been attempted.
//! Every id that did not exist on the target before the run is appended to
//! the [`WriteLog`] *before* its write is issued, so a failure in the middle
//! of a batch still leaves enough bookkeeping to roll back.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::manager::AbortHandle;
use super::retry::{retry_with_backoff, RetryPolicy, DEFAULT_CALL_TIMEOUT};
use super::snapshot::Snapshot;
use super::{report_progress, ItemKind, MigrationState, ProgressCallback};
use crate::error::{MemoryGraphError, Result};
use crate::storage::BackendAdapter;
use crate::types::{Memory, MemoryId, RelationshipId};

/// Default number of entities written per batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Count items already on the target as skipped instead of overwriting
    pub skip_duplicates: bool,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            skip_duplicates: false,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Counts from an import, or the projection of one for a dry run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub imported_entities: u64,
    pub imported_relationships: u64,
    /// Entities already on the target and left alone
    pub skipped_duplicates: u64,
    /// Relationships already on the target and left alone
    pub skipped_relationships: u64,
    /// Relationships skipped because an endpoint is missing on the target
    pub errors: Vec<String>,
    /// Transient failures that were retried
    pub retries: u32,
    /// True when produced by [`Importer::plan`]
    pub projected: bool,
}

/// Ids that did not exist on the target before this run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteLog {
    pub entity_ids: Vec<MemoryId>,
    pub relationship_ids: Vec<RelationshipId>,
}

impl WriteLog {
    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty() && self.relationship_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entity_ids.len() + self.relationship_ids.len()
    }
}

pub struct Importer {
    options: ImportOptions,
    progress: Option<ProgressCallback>,
    abort: Option<AbortHandle>,
}

impl Importer {
    pub fn new(options: ImportOptions) -> Self {
        Self {
            options,
            progress: None,
            abort: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Stop between batches once `abort` fires
    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Write `snapshot` into `target`, recording new ids in `log`
    ///
    /// A non-transient write failure (or exhausted retries) aborts the whole
    /// import and is returned as an error; `log` keeps whatever was recorded
    /// up to that point.
    pub async fn import_snapshot(
        &self,
        snapshot: &Snapshot,
        target: &dyn BackendAdapter,
        log: &mut WriteLog,
    ) -> Result<ImportResult> {
        info!(
            target = target.backend_name(),
            entities = snapshot.entities.len(),
            relationships = snapshot.relationships.len(),
            batch_size = self.options.batch_size,
            skip_duplicates = self.options.skip_duplicates,
            "Importing snapshot"
        );
        let result = self.run(snapshot, target, Some(log)).await?;
        info!(
            imported_entities = result.imported_entities,
            imported_relationships = result.imported_relationships,
            skipped = result.skipped_duplicates,
            errors = result.errors.len(),
            "Import complete"
        );
        Ok(result)
    }

    /// Dry-run projection: the same pass with reads only
    pub async fn plan(&self, snapshot: &Snapshot, target: &dyn BackendAdapter) -> Result<ImportResult> {
        let result = self.run(snapshot, target, None).await?;
        info!(
            would_import_entities = result.imported_entities,
            would_import_relationships = result.imported_relationships,
            would_skip = result.skipped_duplicates,
            "Dry run projection"
        );
        Ok(result)
    }

    async fn run(
        &self,
        snapshot: &Snapshot,
        target: &dyn BackendAdapter,
        mut log: Option<&mut WriteLog>,
    ) -> Result<ImportResult> {
        let write = log.is_some();
        let batch_size = self.options.batch_size.max(1);
        let mut result = ImportResult {
            projected: !write,
            ..Default::default()
        };

        // Ids that will exist on the target once the entity pass is done
        let mut resolvable: HashSet<MemoryId> = HashSet::with_capacity(snapshot.entities.len());

        let entity_total = snapshot.entities.len() as u64;
        let mut processed = 0u64;
        for batch in snapshot.entities.chunks(batch_size) {
            self.check_abort()?;

            let mut to_write: Vec<Memory> = Vec::with_capacity(batch.len());
            for memory in batch {
                let existing = self
                    .call(&mut result.retries, "get_entity", || target.get_entity(&memory.id))
                    .await?;
                match existing {
                    Some(_) if self.options.skip_duplicates => {
                        debug!(id = %memory.id, "Entity already on target, skipping");
                        result.skipped_duplicates += 1;
                    }
                    Some(_) => to_write.push(memory.clone()),
                    None => {
                        if let Some(log) = log.as_deref_mut() {
                            log.entity_ids.push(memory.id.clone());
                        }
                        to_write.push(memory.clone());
                    }
                }
                resolvable.insert(memory.id.clone());
            }

            if write && !to_write.is_empty() {
                self.call(&mut result.retries, "put_entities_batch", || {
                    target.put_entities_batch(&to_write)
                })
                .await?;
            }
            result.imported_entities += to_write.len() as u64;

            processed += batch.len() as u64;
            report_progress(
                self.progress.as_ref(),
                MigrationState::Importing,
                ItemKind::Entity,
                processed,
                entity_total,
            );
        }

        // Endpoints outside the snapshot are looked up on the target once
        let mut outside: HashMap<MemoryId, bool> = HashMap::new();

        let relationship_total = snapshot.relationships.len() as u64;
        processed = 0;
        for batch in snapshot.relationships.chunks(batch_size) {
            self.check_abort()?;

            for rel in batch {
                let mut missing = None;
                for endpoint in [&rel.from_memory_id, &rel.to_memory_id] {
                    if resolvable.contains(endpoint) {
                        continue;
                    }
                    let found = match outside.get(endpoint) {
                        Some(found) => *found,
                        None => {
                            let found = self
                                .call(&mut result.retries, "get_entity", || {
                                    target.get_entity(endpoint)
                                })
                                .await?
                                .is_some();
                            outside.insert(endpoint.clone(), found);
                            found
                        }
                    };
                    if !found {
                        missing = Some(endpoint.clone());
                        break;
                    }
                }
                if let Some(endpoint) = missing {
                    warn!(id = %rel.id, endpoint = %endpoint, "Relationship endpoint missing on target");
                    result.errors.push(format!(
                        "relationship {} skipped: endpoint {} is not on the target",
                        rel.id, endpoint
                    ));
                    continue;
                }

                let existing = self
                    .call(&mut result.retries, "get_relationship", || {
                        target.get_relationship(&rel.id)
                    })
                    .await?;
                match existing {
                    Some(_) if self.options.skip_duplicates => {
                        debug!(id = %rel.id, "Relationship already on target, skipping");
                        result.skipped_relationships += 1;
                        continue;
                    }
                    Some(_) => {}
                    None => {
                        if let Some(log) = log.as_deref_mut() {
                            log.relationship_ids.push(rel.id.clone());
                        }
                    }
                }

                if write {
                    self.call(&mut result.retries, "put_relationship", || {
                        target.put_relationship(rel)
                    })
                    .await?;
                }
                result.imported_relationships += 1;
            }

            processed += batch.len() as u64;
            report_progress(
                self.progress.as_ref(),
                MigrationState::Importing,
                ItemKind::Relationship,
                processed,
                relationship_total,
            );
        }

        Ok(result)
    }

    async fn call<T, F, Fut>(&self, retries: &mut u32, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let out =
            retry_with_backoff(&self.options.retry, self.options.call_timeout, operation, f).await?;
        *retries += out.retries;
        Ok(out.value)
    }

    fn check_abort(&self) -> Result<()> {
        match &self.abort {
            Some(abort) if abort.is_aborted() => Err(MemoryGraphError::Cancelled),
            _ => Ok(()),
        }
    }
}
