//! Cross-backend migration engine
//!
//! Moves a complete memory graph from one [`BackendAdapter`] to another:
//!
//! ```text
//! PENDING -> PRE_FLIGHT -> EXPORTING -> VALIDATING -> IMPORTING -> VERIFYING -> CLEANUP -> COMPLETED
//!                 |             |            |             |            |
//!                 +-------------+------------+-> ABORTED   +------------+-> ROLLING_BACK -> FAILED
//! ```
//!
//! Failures before the first target write end in `ABORTED` with the target
//! untouched. Failures after it roll back the ids the importer recorded as
//! newly written and end in `FAILED`.
//!
//! [`BackendAdapter`]: crate::storage::BackendAdapter

mod exporter;
mod importer;
mod manager;
pub mod retry;
mod snapshot;
mod validator;
mod verifier;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use exporter::Exporter;
pub use importer::{ImportOptions, ImportResult, Importer, WriteLog};
pub use manager::{
    AbortHandle, MigrationFailure, MigrationManager, MigrationOptions, MigrationResult,
    MigrationState, PhaseTiming, RollbackOutcome, StateTransition,
};
pub use retry::RetryPolicy;
pub use snapshot::{CountDrift, Snapshot, SnapshotArtifact, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};
pub use validator::{SnapshotValidator, ValidationReport};
pub use verifier::{Mismatch, MismatchKind, VerificationReport, Verifier};

/// Which stream a progress event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Entity,
    Relationship,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Entity => write!(f, "entities"),
            ItemKind::Relationship => write!(f, "relationships"),
        }
    }
}

/// Emitted after each exported page and each imported batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: MigrationState,
    pub kind: ItemKind,
    pub processed: u64,
    /// Upfront estimate; may be off if the source is being written to
    pub total: u64,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

pub(crate) fn report_progress(
    callback: Option<&ProgressCallback>,
    phase: MigrationState,
    kind: ItemKind,
    processed: u64,
    total: u64,
) {
    if let Some(callback) = callback {
        callback(&ProgressEvent {
            phase,
            kind,
            processed,
            total,
        });
    }
}
