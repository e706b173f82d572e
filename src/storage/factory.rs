//! Construct a [`BackendAdapter`] from a [`BackendConfig`]

use std::sync::Arc;

use tracing::{debug, info};

use super::backend::BackendAdapter;
use super::connection::StorageConfig;
use super::memory_backend::InMemoryBackend;
use super::sqlite_backend::SqliteBackend;
use crate::config::{BackendConfig, BackendType};
use crate::error::{MemoryGraphError, Result};

/// Open the store described by `config`
///
/// Open failures are reported as `Connectivity` errors. Backend types
/// without a bundled adapter fail with `UnsupportedBackend`; callers with
/// their own adapter can pass it to the migration manager directly.
pub async fn open_backend(config: &BackendConfig) -> Result<Arc<dyn BackendAdapter>> {
    open(config, false).await
}

/// Open the store described by `config` for reading only
///
/// Nothing is created or migrated. A SQLite file that does not exist yet
/// is stood in for by an empty in-memory store, so callers see the same
/// counts and lookups a fresh database would give them.
pub async fn open_backend_read_only(config: &BackendConfig) -> Result<Arc<dyn BackendAdapter>> {
    open(config, true).await
}

async fn open(config: &BackendConfig, read_only: bool) -> Result<Arc<dyn BackendAdapter>> {
    config.validate()?;
    debug!(
        backend = %config.backend_type,
        location = %config.describe(),
        read_only,
        "Opening backend"
    );

    let backend: Arc<dyn BackendAdapter> = match config.backend_type {
        BackendType::Sqlite => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| MemoryGraphError::Config("sqlite backend requires a path".into()))?;
            if read_only && !path.exists() {
                debug!(path = %path.display(), "Database does not exist yet, treating as empty");
                return Ok(Arc::new(InMemoryBackend::new(config.store_identity())));
            }

            let mut storage_config = StorageConfig::new(path.to_string_lossy());
            storage_config.read_only = read_only;
            let backend = tokio::task::spawn_blocking(move || SqliteBackend::new(storage_config))
                .await
                .map_err(|e| MemoryGraphError::Internal(format!("open task failed: {}", e)))?
                .map_err(|e| match e {
                    MemoryGraphError::Database(_) | MemoryGraphError::Io(_) => {
                        MemoryGraphError::Connectivity(format!(
                            "cannot open {}: {}",
                            config.describe(),
                            e
                        ))
                    }
                    other => other,
                })?;
            Arc::new(backend)
        }
        BackendType::Memory => {
            let name = config
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "default".to_string());
            Arc::new(InMemoryBackend::new(name))
        }
        other => return Err(MemoryGraphError::UnsupportedBackend(other.to_string())),
    };

    info!(backend = backend.backend_name(), store = %backend.store_id(), "Backend opened");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackendConfig::sqlite(dir.path().join("a.db").to_string_lossy());
        let backend = open_backend(&config).await.unwrap();
        assert_eq!(backend.backend_name(), "sqlite");
        assert!(backend.health_check().await.unwrap().healthy);
    }

    #[tokio::test]
    async fn test_read_only_missing_file_is_empty_stand_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new/target.db");
        let config = BackendConfig::sqlite(path.to_string_lossy());
        let backend = open_backend_read_only(&config).await.unwrap();
        assert_eq!(backend.count_entities().await.unwrap(), 0);
        assert!(backend.health_check().await.unwrap().healthy);
        backend.close().await.unwrap();
        assert!(!path.exists());
        assert!(!dir.path().join("new").exists());
    }

    #[tokio::test]
    async fn test_read_only_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackendConfig::sqlite(dir.path().join("a.db").to_string_lossy());
        open_backend(&config).await.unwrap().close().await.unwrap();

        let backend = open_backend_read_only(&config).await.unwrap();
        assert_eq!(backend.backend_name(), "sqlite");
        assert_eq!(backend.count_entities().await.unwrap(), 0);
        let memory = crate::types::Memory::new(crate::types::MemoryType::General, "t", "c");
        assert!(backend.put_entity(&memory).await.is_err());
    }

    #[tokio::test]
    async fn test_open_memory() {
        let backend = open_backend(&BackendConfig::memory("scratch")).await.unwrap();
        assert_eq!(backend.store_id(), "memory:scratch");
    }

    #[tokio::test]
    async fn test_unsupported_backend() {
        let config = BackendConfig::new(BackendType::Neo4j).with_uri("bolt://localhost:7687");
        let err = open_backend(&config).await.err().unwrap();
        assert!(matches!(err, MemoryGraphError::UnsupportedBackend(_)));
    }

    #[tokio::test]
    async fn test_missing_path_is_config_error() {
        let err = open_backend(&BackendConfig::new(BackendType::Sqlite))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MemoryGraphError::Config(_)));
    }
}
