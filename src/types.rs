//! Core types for MemoryGraph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{MemoryGraphError, Result};

/// Unique identifier for a memory
pub type MemoryId = String;

/// Unique identifier for a relationship
pub type RelationshipId = String;

/// A memory entry: one unit of agent knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier, immutable once assigned
    pub id: MemoryId,
    /// Memory type (e.g., "problem", "solution", "code_pattern")
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Short human-readable title
    pub title: String,
    /// Main content of the memory
    pub content: String,
    /// Optional short abstract of the content
    #[serde(default)]
    pub summary: Option<String>,
    /// Tags for categorization (unordered)
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Importance score (0.0 - 1.0)
    #[serde(default = "default_importance")]
    pub importance: f64,
    /// Where the memory came from
    #[serde(default)]
    pub context: MemoryContext,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last updated
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version, starts at 1
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_importance() -> f64 {
    0.5
}

fn default_version() -> u32 {
    1
}

impl Memory {
    /// Create a new memory with a fresh id and version 1
    pub fn new(memory_type: MemoryType, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            memory_type,
            title: title.into(),
            content: content.into(),
            summary: None,
            tags: BTreeSet::new(),
            importance: default_importance(),
            context: MemoryContext::default(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Builder-style tag helper
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style importance helper
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    /// Apply a partial update, bumping `version` and `updated_at`
    pub fn apply_update(&mut self, update: MemoryUpdate) -> Result<()> {
        if let Some(importance) = update.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(MemoryGraphError::InvalidInput(format!(
                    "importance must be within 0.0..=1.0, got {}",
                    importance
                )));
            }
            self.importance = importance;
        }
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(content) = update.content {
            self.content = content;
        }
        if let Some(summary) = update.summary {
            self.summary = summary;
        }
        if let Some(tags) = update.tags {
            self.tags = tags;
        }
        if let Some(context) = update.context {
            self.context = context;
        }

        self.version += 1;
        self.updated_at = Utc::now().max(self.created_at);
        Ok(())
    }

    /// List the invariants this memory violates (empty when well-formed)
    pub fn check_invariants(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.id.trim().is_empty() {
            problems.push("id is empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.importance) {
            problems.push(format!("importance {} outside 0.0..=1.0", self.importance));
        }
        if self.updated_at < self.created_at {
            problems.push("updated_at precedes created_at".to_string());
        }
        if self.version == 0 {
            problems.push("version must start at 1".to_string());
        }
        problems
    }

    /// Names of the fields whose values differ between two copies
    pub fn differing_fields(&self, other: &Memory) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.id != other.id {
            fields.push("id");
        }
        if self.memory_type != other.memory_type {
            fields.push("type");
        }
        if self.title != other.title {
            fields.push("title");
        }
        if self.content != other.content {
            fields.push("content");
        }
        if self.summary != other.summary {
            fields.push("summary");
        }
        if self.tags != other.tags {
            fields.push("tags");
        }
        if self.importance != other.importance {
            fields.push("importance");
        }
        if self.context != other.context {
            fields.push("context");
        }
        if self.created_at != other.created_at {
            fields.push("created_at");
        }
        if self.updated_at != other.updated_at {
            fields.push("updated_at");
        }
        if self.version != other.version {
            fields.push("version");
        }
        fields
    }
}

/// Memory type classification
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Task,
    CodePattern,
    Problem,
    Solution,
    Project,
    Technology,
    Error,
    Fix,
    Command,
    FileContext,
    Workflow,
    Conversation,
    #[default]
    General,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Task => "task",
            MemoryType::CodePattern => "code_pattern",
            MemoryType::Problem => "problem",
            MemoryType::Solution => "solution",
            MemoryType::Project => "project",
            MemoryType::Technology => "technology",
            MemoryType::Error => "error",
            MemoryType::Fix => "fix",
            MemoryType::Command => "command",
            MemoryType::FileContext => "file_context",
            MemoryType::Workflow => "workflow",
            MemoryType::Conversation => "conversation",
            MemoryType::General => "general",
        }
    }

    pub fn all() -> &'static [MemoryType] {
        &[
            MemoryType::Task,
            MemoryType::CodePattern,
            MemoryType::Problem,
            MemoryType::Solution,
            MemoryType::Project,
            MemoryType::Technology,
            MemoryType::Error,
            MemoryType::Fix,
            MemoryType::Command,
            MemoryType::FileContext,
            MemoryType::Workflow,
            MemoryType::Conversation,
            MemoryType::General,
        ]
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        MemoryType::all()
            .iter()
            .find(|t| t.as_str() == normalized)
            .copied()
            .ok_or_else(|| format!("Unknown memory type: {}", s))
    }
}

/// Visibility levels for multi-tenant deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Project,
    Team,
    Public,
}

/// Context describing where and when a memory was captured
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryContext {
    pub project_path: Option<String>,
    #[serde(default)]
    pub files_involved: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    pub git_branch: Option<String>,
    pub session_id: Option<String>,
    // Multi-tenant fields, unset for single-user deployments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

/// Partial update for a memory (only `Some` fields are applied)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    /// Use Some(None) to clear the summary
    pub summary: Option<Option<String>>,
    pub tags: Option<BTreeSet<String>>,
    pub importance: Option<f64>,
    pub context: Option<MemoryContext>,
}

/// Directed, typed edge between two memories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier
    pub id: RelationshipId,
    /// Source memory ID
    pub from_memory_id: MemoryId,
    /// Target memory ID
    pub to_memory_id: MemoryId,
    /// Type of relationship
    pub relationship_type: RelationshipType,
    /// How strongly the memories are connected (0.0 - 1.0)
    #[serde(default = "default_strength")]
    pub strength: f64,
    /// How certain the connection is (0.0 - 1.0)
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Why the relation exists
    #[serde(default)]
    pub context: Option<String>,
    /// When the relation was created
    pub created_at: DateTime<Utc>,
}

fn default_strength() -> f64 {
    0.5
}

fn default_confidence() -> f64 {
    0.8
}

impl Relationship {
    pub fn new(
        from_memory_id: impl Into<MemoryId>,
        to_memory_id: impl Into<MemoryId>,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from_memory_id: from_memory_id.into(),
            to_memory_id: to_memory_id.into(),
            relationship_type,
            strength: default_strength(),
            confidence: default_confidence(),
            context: None,
            created_at: Utc::now(),
        }
    }

    /// The endpoint on the other side of `memory_id`, if this edge touches it
    pub fn other_end(&self, memory_id: &str) -> Option<&str> {
        if self.from_memory_id == memory_id {
            Some(&self.to_memory_id)
        } else if self.to_memory_id == memory_id {
            Some(&self.from_memory_id)
        } else {
            None
        }
    }

    /// List the invariants this relationship violates (endpoints excluded)
    pub fn check_invariants(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.id.trim().is_empty() {
            problems.push("id is empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.strength) {
            problems.push(format!("strength {} outside 0.0..=1.0", self.strength));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            problems.push(format!("confidence {} outside 0.0..=1.0", self.confidence));
        }
        problems
    }
}

/// Types of relationships between memories
///
/// The vocabulary is conventional rather than closed: unknown names are
/// preserved as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationshipType {
    Solves,
    Causes,
    Triggers,
    LeadsTo,
    Prevents,
    Breaks,
    Addresses,
    AlternativeTo,
    Improves,
    Replaces,
    OccursIn,
    AppliesTo,
    WorksWith,
    Requires,
    UsedIn,
    BuildsOn,
    Contradicts,
    Confirms,
    Follows,
    DependsOn,
    Enables,
    Blocks,
    SimilarTo,
    VariantOf,
    RelatedTo,
    Custom(String),
}

impl RelationshipType {
    pub fn as_str(&self) -> &str {
        match self {
            RelationshipType::Solves => "SOLVES",
            RelationshipType::Causes => "CAUSES",
            RelationshipType::Triggers => "TRIGGERS",
            RelationshipType::LeadsTo => "LEADS_TO",
            RelationshipType::Prevents => "PREVENTS",
            RelationshipType::Breaks => "BREAKS",
            RelationshipType::Addresses => "ADDRESSES",
            RelationshipType::AlternativeTo => "ALTERNATIVE_TO",
            RelationshipType::Improves => "IMPROVES",
            RelationshipType::Replaces => "REPLACES",
            RelationshipType::OccursIn => "OCCURS_IN",
            RelationshipType::AppliesTo => "APPLIES_TO",
            RelationshipType::WorksWith => "WORKS_WITH",
            RelationshipType::Requires => "REQUIRES",
            RelationshipType::UsedIn => "USED_IN",
            RelationshipType::BuildsOn => "BUILDS_ON",
            RelationshipType::Contradicts => "CONTRADICTS",
            RelationshipType::Confirms => "CONFIRMS",
            RelationshipType::Follows => "FOLLOWS",
            RelationshipType::DependsOn => "DEPENDS_ON",
            RelationshipType::Enables => "ENABLES",
            RelationshipType::Blocks => "BLOCKS",
            RelationshipType::SimilarTo => "SIMILAR_TO",
            RelationshipType::VariantOf => "VARIANT_OF",
            RelationshipType::RelatedTo => "RELATED_TO",
            RelationshipType::Custom(name) => name,
        }
    }

    /// The conventional vocabulary (excludes `Custom`)
    pub fn known() -> &'static [RelationshipType] {
        &[
            RelationshipType::Solves,
            RelationshipType::Causes,
            RelationshipType::Triggers,
            RelationshipType::LeadsTo,
            RelationshipType::Prevents,
            RelationshipType::Breaks,
            RelationshipType::Addresses,
            RelationshipType::AlternativeTo,
            RelationshipType::Improves,
            RelationshipType::Replaces,
            RelationshipType::OccursIn,
            RelationshipType::AppliesTo,
            RelationshipType::WorksWith,
            RelationshipType::Requires,
            RelationshipType::UsedIn,
            RelationshipType::BuildsOn,
            RelationshipType::Contradicts,
            RelationshipType::Confirms,
            RelationshipType::Follows,
            RelationshipType::DependsOn,
            RelationshipType::Enables,
            RelationshipType::Blocks,
            RelationshipType::SimilarTo,
            RelationshipType::VariantOf,
            RelationshipType::RelatedTo,
        ]
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for RelationshipType {
    fn from(s: String) -> Self {
        let normalized = s.trim().to_uppercase().replace(['-', ' '], "_");
        RelationshipType::known()
            .iter()
            .find(|t| t.as_str() == normalized)
            .cloned()
            .unwrap_or(RelationshipType::Custom(s))
    }
}

impl From<&str> for RelationshipType {
    fn from(s: &str) -> Self {
        RelationshipType::from(s.to_string())
    }
}

impl From<RelationshipType> for String {
    fn from(t: RelationshipType) -> Self {
        match t {
            RelationshipType::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(RelationshipType::from(s))
    }
}

/// Direction of a relationship hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Follow outgoing edges only (from -> to)
    Outgoing,
    /// Follow incoming edges only (to -> from)
    Incoming,
    /// Follow edges in both directions
    #[default]
    Both,
}

impl Direction {
    /// Whether an edge is followed from `memory_id` in this direction
    pub fn follows(&self, relationship: &Relationship, memory_id: &str) -> bool {
        match self {
            Direction::Outgoing => relationship.from_memory_id == memory_id,
            Direction::Incoming => relationship.to_memory_id == memory_id,
            Direction::Both => {
                relationship.from_memory_id == memory_id || relationship.to_memory_id == memory_id
            }
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "outgoing" | "out" => Ok(Direction::Outgoing),
            "incoming" | "in" => Ok(Direction::Incoming),
            "both" => Ok(Direction::Both),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}
