//! Migration state machine
//!
//! Drives one run through export, validation, import, and verification, and
//! guarantees that the snapshot artifact is removed on every exit path.
//! Adapters opened by the manager itself (see
//! [`migrate_configs`](MigrationManager::migrate_configs)) are closed on
//! every exit path as well.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::exporter::{Exporter, DEFAULT_PAGE_SIZE};
use super::importer::{ImportOptions, ImportResult, Importer, WriteLog, DEFAULT_BATCH_SIZE};
use super::retry::{retry_with_backoff, RetryPolicy, DEFAULT_CALL_TIMEOUT};
use super::snapshot::{CountDrift, Snapshot, SnapshotArtifact};
use super::validator::{SnapshotValidator, ValidationReport};
use super::verifier::{VerificationReport, Verifier, DEFAULT_SAMPLE_SIZE};
use super::ProgressCallback;
use crate::config::BackendConfig;
use crate::error::{ErrorKind, MemoryGraphError, Result};
use crate::storage::{open_backend, open_backend_read_only, BackendAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationState {
    Pending,
    PreFlight,
    Exporting,
    Validating,
    Importing,
    Verifying,
    Cleanup,
    Completed,
    RollingBack,
    Failed,
    Aborted,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Pending => "PENDING",
            MigrationState::PreFlight => "PRE_FLIGHT",
            MigrationState::Exporting => "EXPORTING",
            MigrationState::Validating => "VALIDATING",
            MigrationState::Importing => "IMPORTING",
            MigrationState::Verifying => "VERIFYING",
            MigrationState::Cleanup => "CLEANUP",
            MigrationState::Completed => "COMPLETED",
            MigrationState::RollingBack => "ROLLING_BACK",
            MigrationState::Failed => "FAILED",
            MigrationState::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationState::Completed | MigrationState::Failed | MigrationState::Aborted
        )
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cooperative cancellation for a running migration
///
/// Checked between phases and between import batches. A cancelled run
/// still performs cleanup before returning.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Export and validate only; never write to the target
    pub dry_run: bool,
    pub skip_duplicates: bool,
    pub verify: bool,
    /// Abort in pre-flight if the target already holds entities
    pub require_empty_target: bool,
    pub page_size: usize,
    pub batch_size: usize,
    pub sample_size: usize,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    /// Directory for the snapshot artifact (system temp dir if unset)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            skip_duplicates: false,
            verify: true,
            require_empty_target: false,
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            sample_size: DEFAULT_SAMPLE_SIZE,
            retry: RetryPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: MigrationState,
    pub to: MigrationState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: MigrationState,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub attempted: bool,
    pub deleted_entities: u64,
    pub deleted_relationships: u64,
    pub failures: Vec<String>,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationFailure {
    pub kind: ErrorKind,
    /// Phase in which the failure occurred
    pub phase: MigrationState,
    pub message: String,
    /// Set when the target may be left inconsistent
    pub requires_manual_intervention: bool,
}

/// Structured outcome of a migration run, returned on every path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    pub migration_id: String,
    pub state: MigrationState,
    pub dry_run: bool,
    pub source_backend: String,
    pub target_backend: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub transitions: Vec<StateTransition>,
    pub phases: Vec<PhaseTiming>,
    pub exported_entities: u64,
    pub exported_relationships: u64,
    pub drift: Vec<(String, CountDrift)>,
    pub validation: Option<ValidationReport>,
    /// Actual counts, or the projection for a dry run
    pub import: Option<ImportResult>,
    pub verification: Option<VerificationReport>,
    pub rollback: Option<RollbackOutcome>,
    pub warnings: Vec<String>,
    pub error: Option<MigrationFailure>,
}

impl MigrationResult {
    fn new(source_backend: &str, target_backend: &str, dry_run: bool) -> Self {
        Self {
            migration_id: uuid::Uuid::new_v4().to_string(),
            state: MigrationState::Pending,
            dry_run,
            source_backend: source_backend.to_string(),
            target_backend: target_backend.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            transitions: Vec::new(),
            phases: Vec::new(),
            exported_entities: 0,
            exported_relationships: 0,
            drift: Vec::new(),
            validation: None,
            import: None,
            verification: None,
            rollback: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == MigrationState::Completed
    }

    /// Process exit code for the CLI
    ///
    /// 0 completed, 1 aborted, 2 failed, 3 failed with a rollback failure.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            MigrationState::Completed => 0,
            MigrationState::Aborted => 1,
            MigrationState::Failed => {
                if self.rollback.as_ref().map_or(false, |r| !r.succeeded) {
                    3
                } else {
                    2
                }
            }
            _ => 2,
        }
    }

    /// Human-readable summary for terminals
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let mode = if self.dry_run { " (dry run)" } else { "" };
        out.push_str(&format!(
            "Migration {} -> {}{}: {}\n",
            self.source_backend, self.target_backend, mode, self.state
        ));
        out.push_str(&format!("  Id:       {}\n", self.migration_id));
        out.push_str(&format!("  Duration: {} ms\n", self.duration_ms));
        out.push_str(&format!(
            "  Exported: {} entities, {} relationships\n",
            self.exported_entities, self.exported_relationships
        ));

        if let Some(import) = &self.import {
            let verb = if import.projected { "Would import" } else { "Imported" };
            out.push_str(&format!(
                "  {}: {} entities, {} relationships\n",
                verb, import.imported_entities, import.imported_relationships
            ));
            out.push_str(&format!(
                "  Skipped:  {} entities, {} relationships\n",
                import.skipped_duplicates, import.skipped_relationships
            ));
            for e in &import.errors {
                out.push_str(&format!("    - {}\n", e));
            }
        }

        if let Some(validation) = &self.validation {
            if !validation.ok {
                out.push_str(&format!("  Validation: {} error(s)\n", validation.errors.len()));
                for e in validation.errors.iter().take(20) {
                    out.push_str(&format!("    - {}\n", e));
                }
            }
        }

        if let Some(v) = &self.verification {
            let status = if v.ok { "passed" } else { "FAILED" };
            out.push_str(&format!(
                "  Verification {}: {}/{} entities, {}/{} sampled entities matched\n",
                status, v.target_count, v.source_count, v.sample_passed, v.sample_checked
            ));
            for m in &v.mismatches {
                out.push_str(&format!("    - {}\n", m.detail));
            }
        }

        if let Some(r) = &self.rollback {
            out.push_str(&format!(
                "  Rollback {}: deleted {} entities, {} relationships\n",
                if r.succeeded { "succeeded" } else { "FAILED" },
                r.deleted_entities,
                r.deleted_relationships
            ));
            for f in &r.failures {
                out.push_str(&format!("    - {}\n", f));
            }
        }

        for w in &self.warnings {
            out.push_str(&format!("  Warning: {}\n", w));
        }

        if let Some(err) = &self.error {
            out.push_str(&format!(
                "  Error ({} during {}): {}\n",
                err.kind, err.phase, err.message
            ));
            if err.requires_manual_intervention {
                out.push_str("  The target may be inconsistent and needs manual cleanup.\n");
            }
        }

        out
    }
}

/// Per-run mutable state owned by the manager
struct Run {
    result: MigrationResult,
    write_log: WriteLog,
    artifact: Option<SnapshotArtifact>,
    /// Set once IMPORTING has started; failures after this roll back
    writes_started: bool,
}

impl Run {
    fn transition(&mut self, to: MigrationState) {
        let from = self.result.state;
        info!(migration_id = %self.result.migration_id, %from, %to, "Migration state change");
        self.result.transitions.push(StateTransition {
            from,
            to,
            at: Utc::now(),
        });
        self.result.state = to;
    }

    fn record_phase(&mut self, phase: MigrationState, started_at: DateTime<Utc>, clock: Instant) {
        self.result.phases.push(PhaseTiming {
            phase,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
        });
    }

    fn warn(&mut self, message: String) {
        warn!(migration_id = %self.result.migration_id, "{}", message);
        self.result.warnings.push(message);
    }
}

pub struct MigrationManager {
    options: MigrationOptions,
    progress: Option<ProgressCallback>,
    abort: AbortHandle,
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new(MigrationOptions::default())
    }
}

impl MigrationManager {
    pub fn new(options: MigrationOptions) -> Self {
        Self {
            options,
            progress: None,
            abort: AbortHandle::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Handle that cancels this manager's runs
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Open both stores from config, migrate, and close them again
    ///
    /// Failing to open either store ends the run in `ABORTED`.
    pub async fn migrate_configs(
        &self,
        source: &BackendConfig,
        target: &BackendConfig,
    ) -> MigrationResult {
        let mut run = Run {
            result: MigrationResult::new(
                source.backend_type.as_str(),
                target.backend_type.as_str(),
                self.options.dry_run,
            ),
            write_log: WriteLog::default(),
            artifact: None,
            writes_started: false,
        };

        if source.aliases(target) {
            run.transition(MigrationState::PreFlight);
            let err = MemoryGraphError::Config(format!(
                "source and target are the same store ({})",
                source.store_identity()
            ));
            return self.finish_aborted(run, MigrationState::PreFlight, err, None).await;
        }

        let source_adapter = match open_backend(source).await {
            Ok(adapter) => adapter,
            Err(e) => {
                run.transition(MigrationState::PreFlight);
                let err = open_error("source", source, e);
                return self.finish_aborted(run, MigrationState::PreFlight, err, None).await;
            }
        };
        // A dry run only reads the target, so it must not create or migrate it
        let opened = if self.options.dry_run {
            open_backend_read_only(target).await
        } else {
            open_backend(target).await
        };
        let target_adapter = match opened {
            Ok(adapter) => adapter,
            Err(e) => {
                run.transition(MigrationState::PreFlight);
                let err = open_error("target", target, e);
                let owned = Some((source_adapter.as_ref(), None));
                return self.finish_aborted(run, MigrationState::PreFlight, err, owned).await;
            }
        };

        self.execute(run, source_adapter.as_ref(), target_adapter.as_ref(), true)
            .await
    }

    /// Migrate between two already-open adapters
    ///
    /// The caller keeps ownership of the adapters and their connections;
    /// only the snapshot artifact is cleaned up here.
    pub async fn migrate(
        &self,
        source: &dyn BackendAdapter,
        target: &dyn BackendAdapter,
    ) -> MigrationResult {
        let run = Run {
            result: MigrationResult::new(
                source.backend_name(),
                target.backend_name(),
                self.options.dry_run,
            ),
            write_log: WriteLog::default(),
            artifact: None,
            writes_started: false,
        };
        self.execute(run, source, target, false).await
    }

    async fn execute(
        &self,
        mut run: Run,
        source: &dyn BackendAdapter,
        target: &dyn BackendAdapter,
        owns_adapters: bool,
    ) -> MigrationResult {
        info!(
            migration_id = %run.result.migration_id,
            source = %source.store_id(),
            target = %target.store_id(),
            dry_run = self.options.dry_run,
            "Starting migration"
        );

        let outcome = self.pipeline(&mut run, source, target).await;
        let owned = owns_adapters.then_some((source, Some(target)));

        match outcome {
            Ok(()) => {
                self.cleanup(&mut run, owned).await;
                if let Some(failure) = run.result.error.clone() {
                    // Cleanup itself failed
                    error!(migration_id = %run.result.migration_id, "{}", failure.message);
                    run.transition(MigrationState::Failed);
                } else {
                    run.transition(MigrationState::Completed);
                }
                finalize(run)
            }
            Err((phase, err)) if !run.writes_started => {
                self.finish_aborted(run, phase, err, owned).await
            }
            Err((phase, err)) => self.finish_failed(run, phase, err, target, owned).await,
        }
    }

    async fn pipeline(
        &self,
        run: &mut Run,
        source: &dyn BackendAdapter,
        target: &dyn BackendAdapter,
    ) -> std::result::Result<(), (MigrationState, MemoryGraphError)> {
        // PRE_FLIGHT
        let phase = MigrationState::PreFlight;
        self.enter(run, phase)?;
        let (started, clock) = (Utc::now(), Instant::now());
        self.pre_flight(run, source, target).await.map_err(|e| (phase, e))?;
        run.record_phase(phase, started, clock);

        // EXPORTING
        let phase = MigrationState::Exporting;
        self.enter(run, phase)?;
        let (started, clock) = (Utc::now(), Instant::now());
        let snapshot = Exporter::new(self.options.page_size)
            .with_timeout(self.options.call_timeout)
            .with_progress(self.progress.clone())
            .export(source)
            .await
            .map_err(|e| (phase, e))?;
        run.result.exported_entities = snapshot.entities.len() as u64;
        run.result.exported_relationships = snapshot.relationships.len() as u64;
        if let Some(drift) = snapshot.metadata.entity_drift {
            run.result.drift.push(("entities".to_string(), drift));
            run.warn(format!(
                "source entity count changed during export ({} expected, {} exported)",
                drift.expected, drift.actual
            ));
        }
        if let Some(drift) = snapshot.metadata.relationship_drift {
            run.result.drift.push(("relationships".to_string(), drift));
            run.warn(format!(
                "source relationship count changed during export ({} expected, {} exported)",
                drift.expected, drift.actual
            ));
        }
        run.record_phase(phase, started, clock);

        // VALIDATING
        let phase = MigrationState::Validating;
        self.enter(run, phase)?;
        let (started, clock) = (Utc::now(), Instant::now());
        let report = SnapshotValidator::validate(&snapshot);
        let ok = report.ok;
        let message = report.summary(5);
        run.result.validation = Some(report);
        if !ok {
            return Err((phase, MemoryGraphError::Validation(message)));
        }
        let artifact = SnapshotArtifact::write(&snapshot, self.options.scratch_dir.as_deref())
            .map_err(|e| (phase, e))?;
        run.artifact = Some(artifact);
        drop(snapshot);
        run.record_phase(phase, started, clock);

        let importer = Importer::new(ImportOptions {
            skip_duplicates: self.options.skip_duplicates,
            batch_size: self.options.batch_size,
            retry: self.options.retry.clone(),
            call_timeout: self.options.call_timeout,
        })
        .with_progress(self.progress.clone())
        .with_abort(self.abort.clone());

        if self.options.dry_run {
            let (started, clock) = (Utc::now(), Instant::now());
            let snapshot = self.read_artifact(run).map_err(|e| (phase, e))?;
            let projected = importer
                .plan(&snapshot, target)
                .await
                .map_err(|e| (phase, e))?;
            run.result.import = Some(projected);
            run.record_phase(phase, started, clock);
            return Ok(());
        }

        // IMPORTING
        let phase = MigrationState::Importing;
        self.enter(run, phase)?;
        run.writes_started = true;
        let (started, clock) = (Utc::now(), Instant::now());
        let snapshot = self.read_artifact(run).map_err(|e| (phase, e))?;
        let imported = importer
            .import_snapshot(&snapshot, target, &mut run.write_log)
            .await
            .map_err(|e| (phase, e))?;
        drop(snapshot);
        if !imported.errors.is_empty() {
            run.warn(format!(
                "{} relationship(s) skipped during import",
                imported.errors.len()
            ));
        }
        run.result.import = Some(imported);
        run.record_phase(phase, started, clock);

        if !self.options.verify {
            return Ok(());
        }

        // VERIFYING
        let phase = MigrationState::Verifying;
        self.enter(run, phase)?;
        let (started, clock) = (Utc::now(), Instant::now());
        let report = Verifier::new(self.options.sample_size)
            .with_timeout(self.options.call_timeout)
            .verify(source, target)
            .await
            .map_err(|e| (phase, e))?;
        let ok = report.ok;
        let mismatches = report.mismatches.len();
        run.result.verification = Some(report);
        run.record_phase(phase, started, clock);
        if !ok {
            return Err((
                phase,
                MemoryGraphError::VerificationMismatch(format!(
                    "{} mismatch(es) between source and target",
                    mismatches
                )),
            ));
        }

        Ok(())
    }

    /// Transition into `phase` unless cancellation was requested
    fn enter(
        &self,
        run: &mut Run,
        phase: MigrationState,
    ) -> std::result::Result<(), (MigrationState, MemoryGraphError)> {
        if self.abort.is_aborted() {
            return Err((run.result.state, MemoryGraphError::Cancelled));
        }
        run.transition(phase);
        Ok(())
    }

    async fn pre_flight(
        &self,
        run: &mut Run,
        source: &dyn BackendAdapter,
        target: &dyn BackendAdapter,
    ) -> Result<()> {
        if source.store_id() == target.store_id() {
            return Err(MemoryGraphError::Config(format!(
                "source and target are the same store ({})",
                source.store_id()
            )));
        }

        let (source_health, target_health) = futures::future::join(
            self.timed("health_check", source.health_check()),
            self.timed("health_check", target.health_check()),
        )
        .await;
        for (side, adapter, health) in [
            ("source", source, source_health),
            ("target", target, target_health),
        ] {
            let health = health?;
            if !health.healthy {
                return Err(MemoryGraphError::Connectivity(format!(
                    "{} backend {} is unhealthy: {}",
                    side,
                    adapter.backend_name(),
                    health.error.unwrap_or_else(|| "no detail".to_string())
                )));
            }
        }

        let existing = self.timed("count_entities", target.count_entities()).await?;
        if existing > 0 {
            if self.options.require_empty_target {
                return Err(MemoryGraphError::Validation(format!(
                    "target already holds {} entities",
                    existing
                )));
            }
            run.warn(format!("target already holds {} entities", existing));
        }
        Ok(())
    }

    fn read_artifact(&self, run: &Run) -> Result<Snapshot> {
        run.artifact
            .as_ref()
            .ok_or_else(|| MemoryGraphError::Internal("snapshot artifact missing".to_string()))?
            .read()
    }

    async fn timed<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        super::retry::with_timeout(operation, self.options.call_timeout, fut).await
    }

    /// Delete every id the importer recorded as new, relationships first
    async fn rollback(&self, run: &Run, target: &dyn BackendAdapter) -> RollbackOutcome {
        let mut outcome = RollbackOutcome {
            attempted: true,
            ..Default::default()
        };
        info!(
            migration_id = %run.result.migration_id,
            entities = run.write_log.entity_ids.len(),
            relationships = run.write_log.relationship_ids.len(),
            "Rolling back newly written items"
        );

        for id in run.write_log.relationship_ids.iter().rev() {
            match retry_with_backoff(
                &self.options.retry,
                self.options.call_timeout,
                "delete_relationship",
                || target.delete_relationship(id),
            )
            .await
            {
                Ok(done) if done.value => outcome.deleted_relationships += 1,
                Ok(_) => {}
                Err(e) => outcome
                    .failures
                    .push(format!("relationship {}: {}", id, e)),
            }
        }

        for id in run.write_log.entity_ids.iter().rev() {
            match retry_with_backoff(
                &self.options.retry,
                self.options.call_timeout,
                "delete_entity",
                || target.delete_entity(id),
            )
            .await
            {
                Ok(done) if done.value => outcome.deleted_entities += 1,
                Ok(_) => {}
                Err(e) => outcome.failures.push(format!("entity {}: {}", id, e)),
            }
        }

        outcome.succeeded = outcome.failures.is_empty();
        if outcome.succeeded {
            info!(
                deleted_entities = outcome.deleted_entities,
                deleted_relationships = outcome.deleted_relationships,
                "Rollback complete"
            );
        } else {
            error!(
                failures = outcome.failures.len(),
                "Rollback incomplete, target needs manual cleanup"
            );
        }
        outcome
    }

    /// Remove the artifact and close owned adapters
    ///
    /// Runs on every exit path. A failure here is recorded on the result
    /// rather than hiding the outcome that preceded it.
    async fn cleanup(
        &self,
        run: &mut Run,
        owned: Option<(&dyn BackendAdapter, Option<&dyn BackendAdapter>)>,
    ) {
        let on_success_path = !run.result.state.is_terminal()
            && run.result.error.is_none()
            && run.result.state != MigrationState::RollingBack;
        if on_success_path {
            run.transition(MigrationState::Cleanup);
        }
        let (started, clock) = (Utc::now(), Instant::now());
        let mut problems = Vec::new();

        if let Some(artifact) = run.artifact.take() {
            if let Err(e) = artifact.delete() {
                problems.push(format!("could not delete snapshot artifact: {}", e));
            }
        }

        if let Some((source, target)) = owned {
            for adapter in std::iter::once(source).chain(target) {
                if let Err(e) = self.timed("close", adapter.close()).await {
                    problems.push(format!("closing {}: {}", adapter.backend_name(), e));
                }
            }
        }

        run.record_phase(MigrationState::Cleanup, started, clock);

        for problem in problems {
            if on_success_path && run.result.error.is_none() {
                run.result.error = Some(MigrationFailure {
                    kind: ErrorKind::Internal,
                    phase: MigrationState::Cleanup,
                    message: problem.clone(),
                    requires_manual_intervention: false,
                });
            }
            run.warn(problem);
        }
    }

    async fn finish_aborted(
        &self,
        mut run: Run,
        phase: MigrationState,
        err: MemoryGraphError,
        owned: Option<(&dyn BackendAdapter, Option<&dyn BackendAdapter>)>,
    ) -> MigrationResult {
        warn!(migration_id = %run.result.migration_id, %phase, error = %err, "Migration aborted");
        run.result.error = Some(MigrationFailure {
            kind: err.kind(),
            phase,
            message: err.to_string(),
            requires_manual_intervention: false,
        });
        self.cleanup(&mut run, owned).await;
        run.transition(MigrationState::Aborted);
        finalize(run)
    }

    async fn finish_failed(
        &self,
        mut run: Run,
        phase: MigrationState,
        err: MemoryGraphError,
        target: &dyn BackendAdapter,
        owned: Option<(&dyn BackendAdapter, Option<&dyn BackendAdapter>)>,
    ) -> MigrationResult {
        error!(migration_id = %run.result.migration_id, %phase, error = %err, "Migration failed");
        run.result.error = Some(MigrationFailure {
            kind: err.kind(),
            phase,
            message: err.to_string(),
            requires_manual_intervention: false,
        });

        run.transition(MigrationState::RollingBack);
        let (started, clock) = (Utc::now(), Instant::now());
        let outcome = self.rollback(&run, target).await;
        run.record_phase(MigrationState::RollingBack, started, clock);

        if !outcome.succeeded {
            let rollback_err = MemoryGraphError::Rollback(format!(
                "{} item(s) could not be removed after: {}",
                outcome.failures.len(),
                err
            ));
            run.result.error = Some(MigrationFailure {
                kind: ErrorKind::Rollback,
                phase: MigrationState::RollingBack,
                message: rollback_err.to_string(),
                requires_manual_intervention: true,
            });
        }
        run.result.rollback = Some(outcome);

        self.cleanup(&mut run, owned).await;
        run.transition(MigrationState::Failed);
        finalize(run)
    }
}

fn open_error(side: &str, config: &BackendConfig, err: MemoryGraphError) -> MemoryGraphError {
    match err {
        MemoryGraphError::Connectivity(_)
        | MemoryGraphError::Config(_)
        | MemoryGraphError::UnsupportedBackend(_) => err,
        other => MemoryGraphError::Connectivity(format!(
            "cannot open {} {}: {}",
            side,
            config.describe(),
            other
        )),
    }
}

fn finalize(mut run: Run) -> MigrationResult {
    let finished = Utc::now();
    run.result.duration_ms = (finished - run.result.started_at)
        .num_milliseconds()
        .max(0) as u64;
    run.result.finished_at = Some(finished);
    info!(
        migration_id = %run.result.migration_id,
        state = %run.result.state,
        duration_ms = run.result.duration_ms,
        "Migration finished"
    );
    run.result
}
