//! Transient export of a whole memory graph
//!
//! A [`Snapshot`] lives only for the duration of one migration run. Between
//! validation and import it is spilled to a [`SnapshotArtifact`], a JSON temp
//! file private to that run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{MemoryGraphError, Result};
use crate::types::{Memory, Relationship};

/// Version of the artifact layout written by this build
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Difference between the upfront count and what pagination returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountDrift {
    pub expected: u64,
    pub actual: u64,
}

impl CountDrift {
    /// `Some` only when the two numbers disagree
    pub fn between(expected: u64, actual: u64) -> Option<Self> {
        (expected != actual).then_some(Self { expected, actual })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Backend type of the source (e.g. "sqlite")
    pub source_backend: String,
    /// Physical store identity of the source
    pub source_store: String,
    /// Declared number of entities
    pub entity_count: u64,
    /// Declared number of relationships
    pub relationship_count: u64,
    pub exported_at: DateTime<Utc>,
    pub format_version: u32,
    #[serde(default)]
    pub entity_drift: Option<CountDrift>,
    #[serde(default)]
    pub relationship_drift: Option<CountDrift>,
}

/// Entities and relationships exported from one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub entities: Vec<Memory>,
    pub relationships: Vec<Relationship>,
}

impl Snapshot {
    /// Build a snapshot whose declared counts match its contents
    pub fn new(
        source_backend: impl Into<String>,
        source_store: impl Into<String>,
        entities: Vec<Memory>,
        relationships: Vec<Relationship>,
    ) -> Self {
        Self {
            metadata: SnapshotMetadata {
                source_backend: source_backend.into(),
                source_store: source_store.into(),
                entity_count: entities.len() as u64,
                relationship_count: relationships.len() as u64,
                exported_at: Utc::now(),
                format_version: SNAPSHOT_FORMAT_VERSION,
                entity_drift: None,
                relationship_drift: None,
            },
            entities,
            relationships,
        }
    }

    pub fn entity_ids(&self) -> HashSet<&str> {
        self.entities.iter().map(|m| m.id.as_str()).collect()
    }

    /// Whether pagination disagreed with the upfront counts
    pub fn has_drift(&self) -> bool {
        self.metadata.entity_drift.is_some() || self.metadata.relationship_drift.is_some()
    }
}

/// A snapshot spilled to a temp file
///
/// The file is removed by [`delete`](Self::delete) or, failing that, when
/// the artifact is dropped.
#[derive(Debug)]
pub struct SnapshotArtifact {
    file: NamedTempFile,
    entity_count: usize,
    relationship_count: usize,
}

impl SnapshotArtifact {
    /// Write `snapshot` to a new temp file in `scratch_dir` (or the system
    /// temp dir)
    pub fn write(snapshot: &Snapshot, scratch_dir: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("memorygraph-snapshot-").suffix(".json");
        let mut file = match scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };

        {
            let mut writer = BufWriter::new(file.as_file_mut());
            serde_json::to_writer(&mut writer, snapshot)?;
            writer.flush()?;
        }

        debug!(
            path = %file.path().display(),
            entities = snapshot.entities.len(),
            relationships = snapshot.relationships.len(),
            "Snapshot artifact written"
        );

        Ok(Self {
            file,
            entity_count: snapshot.entities.len(),
            relationship_count: snapshot.relationships.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    pub fn relationship_count(&self) -> usize {
        self.relationship_count
    }

    /// Read the snapshot back, rejecting other format versions
    pub fn read(&self) -> Result<Snapshot> {
        let reader = BufReader::new(File::open(self.file.path())?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        if snapshot.metadata.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(MemoryGraphError::Validation(format!(
                "snapshot format version {} is not supported (expected {})",
                snapshot.metadata.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        Ok(snapshot)
    }

    /// Remove the temp file, returning its former path
    pub fn delete(self) -> Result<PathBuf> {
        let path = self.file.path().to_path_buf();
        self.file.close()?;
        debug!(path = %path.display(), "Snapshot artifact deleted");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryType, RelationshipType};

    fn sample() -> Snapshot {
        let a = Memory::new(MemoryType::Problem, "A", "a");
        let b = Memory::new(MemoryType::Solution, "B", "b");
        let rel = Relationship::new(b.id.clone(), a.id.clone(), RelationshipType::Solves);
        Snapshot::new("memory", "memory:test", vec![a, b], vec![rel])
    }

    #[test]
    fn test_drift_only_when_different() {
        assert!(CountDrift::between(3, 3).is_none());
        assert_eq!(
            CountDrift::between(3, 4),
            Some(CountDrift {
                expected: 3,
                actual: 4
            })
        );
    }

    #[test]
    fn test_artifact_roundtrip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = sample();
        let artifact = SnapshotArtifact::write(&snapshot, Some(dir.path())).unwrap();
        assert!(artifact.path().exists());
        assert_eq!(artifact.entity_count(), 2);

        let restored = artifact.read().unwrap();
        assert_eq!(restored.entities, snapshot.entities);
        assert_eq!(restored.relationships, snapshot.relationships);

        let path = artifact.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_artifact_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = SnapshotArtifact::write(&sample(), Some(dir.path())).unwrap();
        let path = artifact.path().to_path_buf();
        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn test_unknown_format_version_rejected() {
        let mut snapshot = sample();
        snapshot.metadata.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        let artifact = SnapshotArtifact::write(&snapshot, None).unwrap();
        let err = artifact.read().unwrap_err();
        assert!(matches!(err, MemoryGraphError::Validation(_)));
    }
}
