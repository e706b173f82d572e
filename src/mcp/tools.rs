//! MCP tool definitions and handlers for backend migration

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::protocol::{ToolCallResult, ToolDefinition};
use crate::config::{BackendConfig, BackendType};
use crate::error::{MemoryGraphError, Result};
use crate::migration::{MigrationManager, MigrationOptions};

/// All migration tool definitions
pub const TOOL_DEFINITIONS: &[(&str, &str, &str)] = &[
    (
        "migrate_database",
        "Migrate the whole memory graph from the current backend to another backend. Exports, validates, imports, and verifies; rolls back newly written items if verification fails. Use dry_run first to preview.",
        r#"{
            "type": "object",
            "properties": {
                "target_backend": {"type": "string", "enum": ["sqlite", "neo4j", "memgraph", "falkordb", "falkordblite", "cloud", "memory"], "description": "Backend to migrate into"},
                "target_config": {
                    "type": "object",
                    "description": "Connection parameters for the target",
                    "properties": {
                        "path": {"type": "string", "description": "Database path for file-based backends"},
                        "uri": {"type": "string", "description": "Connection URI for server backends"},
                        "username": {"type": "string"},
                        "password": {"type": "string"},
                        "api_key": {"type": "string", "description": "API key for the cloud backend"}
                    }
                },
                "dry_run": {"type": "boolean", "default": false, "description": "Validate and project counts without writing"},
                "skip_duplicates": {"type": "boolean", "default": false, "description": "Leave memories that already exist on the target untouched"},
                "verify": {"type": "boolean", "default": true, "description": "Compare counts and a random sample after import"}
            },
            "required": ["target_backend"]
        }"#,
    ),
    (
        "validate_migration",
        "Check whether the memory graph can be migrated to another backend without writing anything. Always a dry run; reports what would be imported and any malformed records.",
        r#"{
            "type": "object",
            "properties": {
                "target_backend": {"type": "string", "enum": ["sqlite", "neo4j", "memgraph", "falkordb", "falkordblite", "cloud", "memory"], "description": "Backend to validate against"},
                "target_config": {
                    "type": "object",
                    "description": "Connection parameters for the target",
                    "properties": {
                        "path": {"type": "string"},
                        "uri": {"type": "string"},
                        "username": {"type": "string"},
                        "password": {"type": "string"},
                        "api_key": {"type": "string"}
                    }
                }
            },
            "required": ["target_backend"]
        }"#,
    ),
];

/// Get all tool definitions as ToolDefinition structs
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    TOOL_DEFINITIONS
        .iter()
        .map(|(name, description, schema)| ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: serde_json::from_str(schema).unwrap_or(json!({})),
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct TargetConfigArgs {
    path: Option<String>,
    uri: Option<String>,
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MigrateArgs {
    target_backend: String,
    #[serde(default)]
    target_config: TargetConfigArgs,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    skip_duplicates: bool,
    #[serde(default = "default_true")]
    verify: bool,
}

fn default_true() -> bool {
    true
}

impl MigrateArgs {
    fn parse(args: Value) -> Result<Self> {
        serde_json::from_value(args)
            .map_err(|e| MemoryGraphError::InvalidInput(format!("invalid arguments: {}", e)))
    }

    fn target(&self) -> Result<BackendConfig> {
        let backend_type: BackendType = self.target_backend.parse()?;
        let cfg = &self.target_config;
        let mut config = BackendConfig::new(backend_type)
            .with_credentials(cfg.username.clone(), cfg.password.clone())
            .with_api_key(cfg.api_key.clone());
        if let Some(path) = &cfg.path {
            config = config.with_path(path);
        }
        if let Some(uri) = &cfg.uri {
            config = config.with_uri(uri.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Dispatch a tool call by name
pub async fn call_tool(name: &str, source: &BackendConfig, args: Value) -> ToolCallResult {
    match name {
        "migrate_database" => migrate_database(source, args).await,
        "validate_migration" => validate_migration(source, args).await,
        other => ToolCallResult::error(format!("Unknown tool: {}", other)),
    }
}

/// Run a full migration from `source` to the target described in `args`
pub async fn migrate_database(source: &BackendConfig, args: Value) -> ToolCallResult {
    let args = match MigrateArgs::parse(args) {
        Ok(args) => args,
        Err(e) => return ToolCallResult::error(e.to_string()),
    };
    run(source, args, false).await
}

/// Dry-run migration: same checks, no writes
pub async fn validate_migration(source: &BackendConfig, args: Value) -> ToolCallResult {
    let args = match MigrateArgs::parse(args) {
        Ok(args) => args,
        Err(e) => return ToolCallResult::error(e.to_string()),
    };
    run(source, args, true).await
}

async fn run(source: &BackendConfig, args: MigrateArgs, force_dry_run: bool) -> ToolCallResult {
    let target = match args.target() {
        Ok(target) => target,
        Err(e) => {
            warn!(error = %e, "Rejected migration tool call");
            return ToolCallResult::error(e.to_string());
        }
    };

    let options = MigrationOptions {
        dry_run: force_dry_run || args.dry_run,
        skip_duplicates: args.skip_duplicates,
        verify: args.verify,
        ..Default::default()
    };
    info!(
        source = %source.describe(),
        target = %target.describe(),
        dry_run = options.dry_run,
        "Migration requested via tool call"
    );

    let result = MigrationManager::new(options)
        .migrate_configs(source, &target)
        .await;
    ToolCallResult::json(&result)
}
