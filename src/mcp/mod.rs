//! Agent-facing tool surface
//!
//! Tool definitions plus handlers that turn a JSON argument object into a
//! migration run and hand back the structured result.

pub mod protocol;
pub mod tools;

pub use protocol::{ToolCallResult, ToolContent, ToolDefinition};
pub use tools::{
    call_tool, get_tool_definitions, migrate_database, validate_migration, TOOL_DEFINITIONS,
};
