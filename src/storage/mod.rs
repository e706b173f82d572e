//! Storage layer
//!
//! The [`BackendAdapter`] contract plus the bundled SQLite and in-memory
//! adapters.

mod backend;
mod connection;
mod factory;
mod memory_backend;
mod migrations;
pub mod queries;
mod sqlite_backend;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendAdapter, HealthStatus, Page};
pub use connection::{Storage, StorageConfig, StorageMode};
pub use factory::{open_backend, open_backend_read_only};
pub use memory_backend::InMemoryBackend;
pub use migrations::SCHEMA_VERSION;
pub use sqlite_backend::SqliteBackend;
