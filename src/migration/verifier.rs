//! Post-import integrity check
//!
//! Counts are compared exactly. Entities are compared on a uniform random
//! sample only, so a passing report is evidence, not proof, that the target
//! matches the source.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::retry::{with_timeout, DEFAULT_CALL_TIMEOUT};
use crate::error::{MemoryGraphError, Result};
use crate::graph::{traverse, TraversalOptions};
use crate::storage::BackendAdapter;
use crate::types::{Direction, MemoryId};

/// Default number of entities compared field by field
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

const ID_SCAN_PAGE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    EntityCount,
    RelationshipCount,
    MissingInTarget,
    FieldMismatch,
    RelationshipMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Offending entity id (`None` for count mismatches)
    pub id: Option<MemoryId>,
    pub kind: MismatchKind,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    pub ok: bool,
    pub source_count: u64,
    pub target_count: u64,
    pub source_relationship_count: u64,
    pub target_relationship_count: u64,
    pub sample_checked: usize,
    pub sample_passed: usize,
    pub mismatches: Vec<Mismatch>,
}

pub struct Verifier {
    sample_size: usize,
    call_timeout: Duration,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_SIZE)
    }
}

impl Verifier {
    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_size,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Compare `target` against `source`
    ///
    /// A count mismatch marks the report failed but sampling still runs so
    /// the report carries as much detail as possible.
    pub async fn verify(
        &self,
        source: &dyn BackendAdapter,
        target: &dyn BackendAdapter,
    ) -> Result<VerificationReport> {
        let mut report = VerificationReport {
            source_count: self.timed("count_entities", source.count_entities()).await?,
            target_count: self.timed("count_entities", target.count_entities()).await?,
            source_relationship_count: self
                .timed("count_relationships", source.count_relationships())
                .await?,
            target_relationship_count: self
                .timed("count_relationships", target.count_relationships())
                .await?,
            ..Default::default()
        };

        if report.source_count != report.target_count {
            report.mismatches.push(Mismatch {
                id: None,
                kind: MismatchKind::EntityCount,
                detail: format!(
                    "source has {} entities, target has {}",
                    report.source_count, report.target_count
                ),
            });
        }
        if report.source_relationship_count != report.target_relationship_count {
            report.mismatches.push(Mismatch {
                id: None,
                kind: MismatchKind::RelationshipCount,
                detail: format!(
                    "source has {} relationships, target has {}",
                    report.source_relationship_count, report.target_relationship_count
                ),
            });
        }

        let sample = self.draw_sample(source).await?;
        for id in &sample {
            let before = report.mismatches.len();
            if self.check_entity(source, target, id, &mut report.mismatches).await? {
                report.sample_checked += 1;
                if report.mismatches.len() == before {
                    report.sample_passed += 1;
                }
            }
        }

        report.ok = report.mismatches.is_empty();
        if report.ok {
            info!(
                entities = report.target_count,
                relationships = report.target_relationship_count,
                sampled = report.sample_checked,
                "Verification passed"
            );
        } else {
            for mismatch in &report.mismatches {
                warn!(id = ?mismatch.id, kind = ?mismatch.kind, "{}", mismatch.detail);
            }
        }
        Ok(report)
    }

    async fn draw_sample(&self, source: &dyn BackendAdapter) -> Result<Vec<MemoryId>> {
        if self.sample_size == 0 {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .timed("scan_entities", source.scan_entities(cursor, ID_SCAN_PAGE))
                .await?;
            ids.extend(page.items.into_iter().map(|m| m.id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let sample: Vec<MemoryId> = ids
            .choose_multiple(&mut rand::thread_rng(), self.sample_size)
            .cloned()
            .collect();
        debug!(population = ids.len(), sample = sample.len(), "Drew verification sample");
        Ok(sample)
    }

    /// Returns false when the entity vanished from the source (not counted)
    async fn check_entity(
        &self,
        source: &dyn BackendAdapter,
        target: &dyn BackendAdapter,
        id: &str,
        mismatches: &mut Vec<Mismatch>,
    ) -> Result<bool> {
        let Some(expected) = self.timed("get_entity", source.get_entity(id)).await? else {
            debug!(id, "Sampled entity no longer on source");
            return Ok(false);
        };

        let Some(actual) = self.timed("get_entity", target.get_entity(id)).await? else {
            mismatches.push(Mismatch {
                id: Some(id.to_string()),
                kind: MismatchKind::MissingInTarget,
                detail: format!("entity {} is missing on the target", id),
            });
            return Ok(true);
        };

        let fields = expected.differing_fields(&actual);
        if !fields.is_empty() {
            mismatches.push(Mismatch {
                id: Some(id.to_string()),
                kind: MismatchKind::FieldMismatch,
                detail: format!("entity {} differs in: {}", id, fields.join(", ")),
            });
        }

        let options = TraversalOptions::with_depth(1)
            .direction(Direction::Both)
            .with_call_timeout(self.call_timeout);
        let source_types = traverse(source, id, &options)
            .await?
            .relationship_type_counts();
        let target_types = match traverse(target, id, &options).await {
            Ok(result) => result.relationship_type_counts(),
            Err(MemoryGraphError::NotFound(_)) => Default::default(),
            Err(e) => return Err(e),
        };
        if source_types != target_types {
            mismatches.push(Mismatch {
                id: Some(id.to_string()),
                kind: MismatchKind::RelationshipMismatch,
                detail: format!(
                    "entity {} relationships differ: source {:?}, target {:?}",
                    id, source_types, target_types
                ),
            });
        }

        Ok(true)
    }

    async fn timed<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        with_timeout(operation, self.call_timeout, fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::StallingBackend;
    use crate::storage::InMemoryBackend;
    use crate::types::{Memory, MemoryType, Relationship, RelationshipType};

    fn memory(id: &str) -> Memory {
        let mut m = Memory::new(MemoryType::Solution, id, "body");
        m.id = id.to_string();
        m
    }

    fn rel(id: &str, from: &str, to: &str, t: RelationshipType) -> Relationship {
        let mut r = Relationship::new(from, to, t);
        r.id = id.to_string();
        r
    }

    fn pair() -> (Vec<Memory>, Vec<Relationship>) {
        (
            vec![memory("a"), memory("b"), memory("c")],
            vec![
                rel("r1", "a", "b", RelationshipType::Solves),
                rel("r2", "b", "c", RelationshipType::Causes),
            ],
        )
    }

    #[tokio::test]
    async fn test_identical_stores_pass() {
        let (m, r) = pair();
        let source = InMemoryBackend::with_graph("src", m.clone(), r.clone());
        let target = InMemoryBackend::with_graph("dst", m, r);
        let report = Verifier::new(10).verify(&source, &target).await.unwrap();
        assert!(report.ok, "{:?}", report.mismatches);
        assert_eq!(report.sample_checked, 3);
        assert_eq!(report.sample_passed, 3);
    }

    #[tokio::test]
    async fn test_missing_entity_fails_counts_and_sample() {
        let (m, r) = pair();
        let source = InMemoryBackend::with_graph("src", m.clone(), r.clone());
        let target = InMemoryBackend::with_graph(
            "dst",
            m.into_iter().filter(|x| x.id != "c"),
            vec![r[0].clone()],
        );
        let report = Verifier::new(10).verify(&source, &target).await.unwrap();
        assert!(!report.ok);
        let kinds: Vec<MismatchKind> = report.mismatches.iter().map(|m| m.kind).collect();
        assert!(kinds.contains(&MismatchKind::EntityCount));
        assert!(kinds.contains(&MismatchKind::RelationshipCount));
        assert!(kinds.contains(&MismatchKind::MissingInTarget));
        assert!(report.sample_passed < report.sample_checked);
    }

    #[tokio::test]
    async fn test_field_mismatch_names_fields() {
        let (m, r) = pair();
        let source = InMemoryBackend::with_graph("src", m.clone(), r.clone());
        let mut altered = m;
        altered[0].title = "changed".to_string();
        let target = InMemoryBackend::with_graph("dst", altered, r);
        let report = Verifier::new(10).verify(&source, &target).await.unwrap();
        assert!(!report.ok);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].id.as_deref(), Some("a"));
        assert!(report.mismatches[0].detail.contains("title"));
    }

    #[tokio::test]
    async fn test_relationship_type_mismatch() {
        let (m, r) = pair();
        let source = InMemoryBackend::with_graph("src", m.clone(), r);
        let target = InMemoryBackend::with_graph(
            "dst",
            m,
            vec![
                rel("r1", "a", "b", RelationshipType::Solves),
                rel("r2", "b", "c", RelationshipType::Prevents),
            ],
        );
        let report = Verifier::new(10).verify(&source, &target).await.unwrap();
        assert!(!report.ok);
        assert!(report
            .mismatches
            .iter()
            .all(|m| m.kind == MismatchKind::RelationshipMismatch));
        // b and c both touch the retyped edge
        assert_eq!(report.mismatches.len(), 2);
    }

    #[tokio::test]
    async fn test_sample_capped_by_population() {
        let (m, r) = pair();
        let source = InMemoryBackend::with_graph("src", m.clone(), r.clone());
        let target = InMemoryBackend::with_graph("dst", m, r);
        let report = Verifier::new(2).verify(&source, &target).await.unwrap();
        assert_eq!(report.sample_checked, 2);

        let empty = Verifier::new(10)
            .verify(&InMemoryBackend::new("a"), &InMemoryBackend::new("b"))
            .await
            .unwrap();
        assert!(empty.ok);
        assert_eq!(empty.sample_checked, 0);
    }

    #[tokio::test]
    async fn test_hung_neighbour_lookup_times_out() {
        let (m, r) = pair();
        let source = InMemoryBackend::with_graph("src", m.clone(), r.clone());
        let target =
            StallingBackend::new(InMemoryBackend::with_graph("dst", m, r)).stalling_related();
        let verifier = Verifier::new(10).with_timeout(Duration::from_millis(50));

        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            verifier.verify(&source, &target),
        )
        .await
        .expect("verification must not hang");
        let err = outcome.unwrap_err();
        assert!(matches!(err, MemoryGraphError::Timeout { .. }), "{:?}", err);
        assert!(err.is_retryable());
    }
}
