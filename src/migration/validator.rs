//! Structural checks on a snapshot before anything touches the target

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use super::snapshot::Snapshot;

/// Outcome of validating a snapshot
///
/// Errors name the offending record so operators can find it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
    pub entities_checked: usize,
    pub relationships_checked: usize,
}

impl ValidationReport {
    /// First few errors joined for a one-line message
    pub fn summary(&self, max: usize) -> String {
        let mut shown: Vec<&str> = self.errors.iter().take(max).map(String::as_str).collect();
        let more = self.errors.len().saturating_sub(max);
        if more > 0 {
            shown.push("...");
        }
        format!("{} error(s): {}", self.errors.len(), shown.join("; "))
    }
}

pub struct SnapshotValidator;

impl SnapshotValidator {
    /// Check entities, then relationship endpoints, then declared counts
    pub fn validate(snapshot: &Snapshot) -> ValidationReport {
        let mut errors = Vec::new();

        // (a) entities
        let mut entity_ids: HashSet<&str> = HashSet::with_capacity(snapshot.entities.len());
        for (idx, memory) in snapshot.entities.iter().enumerate() {
            let label = if memory.id.trim().is_empty() {
                format!("entity #{}", idx)
            } else {
                format!("entity {}", memory.id)
            };
            for problem in memory.check_invariants() {
                errors.push(format!("{}: {}", label, problem));
            }
            if memory.title.trim().is_empty() {
                errors.push(format!("{}: title is empty", label));
            }
            if !memory.id.is_empty() && !entity_ids.insert(memory.id.as_str()) {
                errors.push(format!("{}: duplicate id", label));
            }
        }

        // (b) relationships
        let mut relationship_ids: HashSet<&str> = HashSet::new();
        for (idx, rel) in snapshot.relationships.iter().enumerate() {
            let label = if rel.id.trim().is_empty() {
                format!("relationship #{}", idx)
            } else {
                format!("relationship {}", rel.id)
            };
            for problem in rel.check_invariants() {
                errors.push(format!("{}: {}", label, problem));
            }
            if !entity_ids.contains(rel.from_memory_id.as_str()) {
                errors.push(format!(
                    "{}: from_memory_id {} not found in snapshot",
                    label, rel.from_memory_id
                ));
            }
            if !entity_ids.contains(rel.to_memory_id.as_str()) {
                errors.push(format!(
                    "{}: to_memory_id {} not found in snapshot",
                    label, rel.to_memory_id
                ));
            }
            if !rel.id.is_empty() && !relationship_ids.insert(rel.id.as_str()) {
                errors.push(format!("{}: duplicate id", label));
            }
        }

        // (c) declared counts
        let meta = &snapshot.metadata;
        if meta.entity_count != snapshot.entities.len() as u64 {
            errors.push(format!(
                "metadata declares {} entities but snapshot holds {}",
                meta.entity_count,
                snapshot.entities.len()
            ));
        }
        if meta.relationship_count != snapshot.relationships.len() as u64 {
            errors.push(format!(
                "metadata declares {} relationships but snapshot holds {}",
                meta.relationship_count,
                snapshot.relationships.len()
            ));
        }

        let report = ValidationReport {
            ok: errors.is_empty(),
            errors,
            entities_checked: snapshot.entities.len(),
            relationships_checked: snapshot.relationships.len(),
        };

        if report.ok {
            debug!(
                entities = report.entities_checked,
                relationships = report.relationships_checked,
                "Snapshot valid"
            );
        } else {
            warn!(errors = report.errors.len(), "Snapshot failed validation");
        }
        report
    }
}
