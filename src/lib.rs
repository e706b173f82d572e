//! MemoryGraph - portable memory graph storage
//!
//! Moves a memory graph between storage backends without losing
//! referential integrity: paginated export, snapshot validation, batched
//! import with retry, sampled verification, and rollback, driven by a
//! single migration state machine. Also provides cycle-safe bounded
//! traversal over any backend.

pub mod config;
pub mod error;
pub mod graph;
pub mod mcp;
pub mod migration;
pub mod storage;
pub mod types;

pub use config::{BackendConfig, BackendType};
pub use error::{ErrorKind, MemoryGraphError, Result};
pub use migration::{MigrationManager, MigrationOptions, MigrationResult, MigrationState};
pub use storage::{open_backend, open_backend_read_only, BackendAdapter};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
