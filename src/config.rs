//! Backend configuration
//!
//! A `BackendConfig` names one physical store: the backend type plus the
//! connection parameters that backend needs. Configs are immutable once
//! built; construct them programmatically, from CLI flags, or from the
//! environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MemoryGraphError, Result};

/// Default location of the embedded SQLite store
pub const DEFAULT_SQLITE_PATH: &str = "~/.memorygraph/memory.db";

/// Supported backend identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Embedded relational store
    Sqlite,
    /// Neo4j property-graph database
    Neo4j,
    /// Memgraph property-graph database
    Memgraph,
    /// FalkorDB (Redis graph module), client/server
    FalkorDb,
    /// FalkorDB embedded (file-backed Redis)
    FalkorDbLite,
    /// Remote multi-tenant service
    Cloud,
    /// Process-local store, lost on exit
    Memory,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Sqlite => "sqlite",
            BackendType::Neo4j => "neo4j",
            BackendType::Memgraph => "memgraph",
            BackendType::FalkorDb => "falkordb",
            BackendType::FalkorDbLite => "falkordblite",
            BackendType::Cloud => "cloud",
            BackendType::Memory => "memory",
        }
    }

    /// Whether this backend is addressed by a local file path
    pub fn is_file_backed(&self) -> bool {
        matches!(self, BackendType::Sqlite | BackendType::FalkorDbLite)
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BackendType {
    type Err = MemoryGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(BackendType::Sqlite),
            "neo4j" => Ok(BackendType::Neo4j),
            "memgraph" => Ok(BackendType::Memgraph),
            "falkordb" => Ok(BackendType::FalkorDb),
            "falkordblite" | "falkordb-lite" => Ok(BackendType::FalkorDbLite),
            "cloud" => Ok(BackendType::Cloud),
            "memory" | "in-memory" | "inmemory" => Ok(BackendType::Memory),
            other => Err(MemoryGraphError::Config(format!(
                "Unknown backend '{}'. Expected one of: sqlite, neo4j, memgraph, falkordb, falkordblite, cloud, memory",
                other
            ))),
        }
    }
}

/// Connection parameters for one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub backend_type: BackendType,
    /// Local path (file-backed backends) or store name (in-memory)
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Connection URI (server backends and cloud)
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl BackendConfig {
    /// Bare config for a backend type with no connection parameters
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            path: None,
            uri: None,
            username: None,
            password: None,
            api_key: None,
        }
    }

    /// SQLite store at `path` (tilde-expanded)
    pub fn sqlite(path: impl AsRef<str>) -> Self {
        Self {
            path: Some(expand_path(path.as_ref())),
            ..Self::new(BackendType::Sqlite)
        }
    }

    /// Named in-memory store
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            path: Some(PathBuf::from(name.into())),
            ..Self::new(BackendType::Memory)
        }
    }

    pub fn with_path(mut self, path: impl AsRef<str>) -> Self {
        self.path = Some(expand_path(path.as_ref()));
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Load the active backend from environment variables
    ///
    /// `MEMORY_BACKEND` selects the type (default `sqlite`); the remaining
    /// variables supply that backend's connection parameters.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_type: BackendType = lookup("MEMORY_BACKEND")
            .as_deref()
            .unwrap_or("sqlite")
            .parse()?;

        let config = match backend_type {
            BackendType::Sqlite => Self::sqlite(
                lookup("MEMORY_SQLITE_PATH").unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string()),
            ),
            BackendType::Neo4j => Self::new(backend_type)
                .with_uri(
                    lookup("MEMORY_NEO4J_URI").unwrap_or_else(|| "bolt://localhost:7687".into()),
                )
                .with_credentials(
                    lookup("MEMORY_NEO4J_USER").or_else(|| Some("neo4j".into())),
                    lookup("MEMORY_NEO4J_PASSWORD"),
                ),
            BackendType::Memgraph => Self::new(backend_type)
                .with_uri(
                    lookup("MEMORY_MEMGRAPH_URI")
                        .unwrap_or_else(|| "bolt://localhost:7687".into()),
                )
                .with_credentials(
                    lookup("MEMORY_MEMGRAPH_USER"),
                    lookup("MEMORY_MEMGRAPH_PASSWORD"),
                ),
            BackendType::FalkorDb => {
                let host = lookup("MEMORY_FALKORDB_HOST").unwrap_or_else(|| "localhost".into());
                let port = lookup("MEMORY_FALKORDB_PORT").unwrap_or_else(|| "6379".into());
                Self::new(backend_type)
                    .with_uri(format!("redis://{}:{}", host, port))
                    .with_credentials(None, lookup("MEMORY_FALKORDB_PASSWORD"))
            }
            BackendType::FalkorDbLite => Self::new(backend_type).with_path(
                lookup("MEMORY_FALKORDBLITE_PATH")
                    .unwrap_or_else(|| "~/.memorygraph/falkordblite.db".into()),
            ),
            BackendType::Cloud => Self::new(backend_type)
                .with_uri(
                    lookup("MEMORYGRAPH_API_URL")
                        .unwrap_or_else(|| "https://graph-api.memorygraph.dev".into()),
                )
                .with_api_key(lookup("MEMORYGRAPH_API_KEY")),
            BackendType::Memory => Self::memory(
                lookup("MEMORY_STORE_NAME").unwrap_or_else(|| "default".into()),
            ),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check that the parameters this backend type requires are present
    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| {
            Err(MemoryGraphError::Config(format!(
                "{} backend requires {}",
                self.backend_type, what
            )))
        };

        match self.backend_type {
            BackendType::Sqlite | BackendType::FalkorDbLite | BackendType::Memory => {
                if self.path.as_ref().map_or(true, |p| p.as_os_str().is_empty()) {
                    return missing("a path");
                }
            }
            BackendType::Neo4j | BackendType::Memgraph | BackendType::FalkorDb => {
                if self.uri.as_deref().map_or(true, str::is_empty) {
                    return missing("a connection URI");
                }
            }
            BackendType::Cloud => {
                if self.api_key.as_deref().map_or(true, str::is_empty) {
                    return missing("an API key (MEMORYGRAPH_API_KEY)");
                }
            }
        }
        Ok(())
    }

    /// Stable identity of the physical store this config points at
    pub fn store_identity(&self) -> String {
        let location = if self.backend_type.is_file_backed() {
            self.path
                .as_deref()
                .map(canonical_or_raw)
                .unwrap_or_default()
        } else if self.backend_type == BackendType::Memory {
            self.path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        } else {
            self.uri
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_lowercase())
                .unwrap_or_default()
        };
        format!("{}:{}", self.backend_type, location)
    }

    /// Whether two configs point at the same physical store
    pub fn aliases(&self, other: &BackendConfig) -> bool {
        self.store_identity() == other.store_identity()
    }

    /// Human-readable location for logs (never includes secrets)
    pub fn describe(&self) -> String {
        match (&self.path, &self.uri) {
            (Some(path), _) => format!("{} ({})", self.backend_type, path.display()),
            (None, Some(uri)) => format!("{} ({})", self.backend_type, uri),
            (None, None) => self.backend_type.to_string(),
        }
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

pub(crate) fn canonical_or_raw(path: &Path) -> String {
    // The file may not exist yet (fresh target), so fall back to the parent
    std::fs::canonicalize(path)
        .or_else(|_| {
            let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
            match (parent, path.file_name()) {
                (Some(parent), Some(name)) => {
                    std::fs::canonicalize(parent).map(|p| p.join(name))
                }
                _ => Err(std::io::Error::from(std::io::ErrorKind::NotFound)),
            }
        })
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Default data directory (`~/.memorygraph`)
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memorygraph")
}
