//! Bounded, cycle-safe breadth-first traversal
//!
//! The graph is not guaranteed to be acyclic. A single `visited` set, seeded
//! with the start id, is the only cycle guard: a neighbour that has already
//! been seen is pruned instead of re-queued, so every traversal terminates
//! after at most `max_depth` levels.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

use crate::error::{MemoryGraphError, Result};
use crate::migration::retry::with_timeout;
use crate::storage::BackendAdapter;
use crate::types::{Direction, Memory, MemoryId, Relationship, RelationshipType};

/// Largest depth a caller may request; there is no unbounded mode
pub const MAX_TRAVERSAL_DEPTH: usize = 10;

/// Options for multi-hop graph traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalOptions {
    /// Maximum traversal depth (0 = start node only, 1 = direct relations)
    #[serde(default = "default_depth")]
    pub max_depth: usize,
    /// Only follow these relationship types (None = all types)
    #[serde(default)]
    pub relationship_types: Option<Vec<RelationshipType>>,
    /// Direction of traversal
    #[serde(default)]
    pub direction: Direction,
    /// Maximum number of edges followed from a single node
    #[serde(default)]
    pub limit_per_hop: Option<usize>,
    /// Upper bound on each adapter call (None = wait indefinitely)
    #[serde(skip)]
    pub call_timeout: Option<Duration>,
}

fn default_depth() -> usize {
    2
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_depth: default_depth(),
            relationship_types: None,
            direction: Direction::Both,
            limit_per_hop: None,
            call_timeout: None,
        }
    }
}

impl TraversalOptions {
    pub fn with_depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Default::default()
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn types(mut self, types: Vec<RelationshipType>) -> Self {
        self.relationship_types = Some(types);
        self
    }

    pub fn with_call_timeout(mut self, limit: Duration) -> Self {
        self.call_timeout = Some(limit);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_depth > MAX_TRAVERSAL_DEPTH {
            return Err(MemoryGraphError::InvalidInput(format!(
                "max_depth {} exceeds the limit of {}",
                self.max_depth, MAX_TRAVERSAL_DEPTH
            )));
        }
        if self.limit_per_hop == Some(0) {
            return Err(MemoryGraphError::InvalidInput(
                "limit_per_hop must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A node in the traversal result with path information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalNode {
    pub memory: Memory,
    /// Depth from the starting node (0 = start node)
    pub depth: usize,
    /// Memory ids from the start to this node, inclusive
    pub path: Vec<MemoryId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TraversalStats {
    /// Total nodes visited, start included
    pub nodes_visited: usize,
    /// Nodes at each depth level
    pub nodes_per_depth: BTreeMap<usize, usize>,
    /// Edges returned by the adapter across all hops
    pub edges_examined: usize,
    /// Neighbours dropped because they were already visited
    pub revisits_pruned: usize,
    /// Maximum depth reached
    pub max_depth_reached: usize,
}

/// Result of a bounded traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalResult {
    pub start_id: MemoryId,
    /// Visited nodes in discovery order; the start node comes first
    pub nodes: Vec<TraversalNode>,
    /// Every distinct edge crossed, including edges into visited nodes
    pub edges: Vec<Relationship>,
    pub stats: TraversalStats,
}

impl TraversalResult {
    /// Ids of every visited node except the start
    pub fn related_ids(&self) -> HashSet<MemoryId> {
        self.nodes
            .iter()
            .filter(|n| n.depth > 0)
            .map(|n| n.memory.id.clone())
            .collect()
    }

    /// Multiset of relationship types over the crossed edges
    pub fn relationship_type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for edge in &self.edges {
            *counts
                .entry(edge.relationship_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        counts
    }
}

/// Breadth-first traversal from `start_id`
///
/// Fails with `NotFound` if the start entity does not exist and with
/// `InvalidInput` if `max_depth` exceeds [`MAX_TRAVERSAL_DEPTH`].
pub async fn traverse(
    adapter: &dyn BackendAdapter,
    start_id: &str,
    options: &TraversalOptions,
) -> Result<TraversalResult> {
    options.validate()?;

    let start = bounded(options, "get_entity", adapter.get_entity(start_id))
        .await?
        .ok_or_else(|| MemoryGraphError::NotFound(format!("memory {}", start_id)))?;

    let mut visited: HashSet<MemoryId> = HashSet::from([start.id.clone()]);
    let mut seen_edges: HashSet<String> = HashSet::new();
    let mut edges: Vec<Relationship> = Vec::new();
    let mut stats = TraversalStats::default();

    let mut nodes = vec![TraversalNode {
        memory: start,
        depth: 0,
        path: vec![start_id.to_string()],
    }];
    stats.nodes_per_depth.insert(0, 1);

    // Frontier holds indexes into `nodes`
    let mut frontier: Vec<usize> = vec![0];
    let types = options.relationship_types.as_deref();

    for depth in 1..=options.max_depth {
        if frontier.is_empty() {
            break;
        }
        let mut next_frontier = Vec::new();

        for idx in frontier {
            let current_id = nodes[idx].memory.id.clone();
            let mut related = bounded(
                options,
                "get_related",
                adapter.get_related(&current_id, options.direction, types),
            )
            .await?;
            if let Some(limit) = options.limit_per_hop {
                related.truncate(limit);
            }
            stats.edges_examined += related.len();

            for (relationship, neighbor) in related {
                // Adapters pre-filter, but a loose adapter must not widen the result
                if types.map_or(false, |t| !t.contains(&relationship.relationship_type)) {
                    continue;
                }
                if seen_edges.insert(relationship.id.clone()) {
                    edges.push(relationship);
                }

                if !visited.insert(neighbor.id.clone()) {
                    stats.revisits_pruned += 1;
                    continue;
                }

                let mut path = nodes[idx].path.clone();
                path.push(neighbor.id.clone());
                nodes.push(TraversalNode {
                    memory: neighbor,
                    depth,
                    path,
                });
                next_frontier.push(nodes.len() - 1);

                *stats.nodes_per_depth.entry(depth).or_insert(0) += 1;
                stats.max_depth_reached = depth;
            }
        }

        frontier = next_frontier;
    }

    stats.nodes_visited = nodes.len();
    debug!(
        start = start_id,
        visited = stats.nodes_visited,
        edges = edges.len(),
        pruned = stats.revisits_pruned,
        "Traversal finished"
    );

    Ok(TraversalResult {
        start_id: start_id.to_string(),
        nodes,
        edges,
        stats,
    })
}

async fn bounded<T>(
    options: &TraversalOptions,
    operation: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match options.call_timeout {
        Some(limit) => with_timeout(operation, limit, fut).await,
        None => fut.await,
    }
}

/// Entities reachable from `start_id`, excluding the start itself
pub async fn related_entities(
    adapter: &dyn BackendAdapter,
    start_id: &str,
    options: &TraversalOptions,
) -> Result<HashMap<MemoryId, Memory>> {
    let result = traverse(adapter, start_id, options).await?;
    Ok(result
        .nodes
        .into_iter()
        .filter(|n| n.depth > 0)
        .map(|n| (n.memory.id.clone(), n.memory))
        .collect())
}

/// Entities reachable from `start_id`, including the start
pub async fn reachable_entities(
    adapter: &dyn BackendAdapter,
    start_id: &str,
    options: &TraversalOptions,
) -> Result<HashMap<MemoryId, Memory>> {
    let result = traverse(adapter, start_id, options).await?;
    Ok(result
        .nodes
        .into_iter()
        .map(|n| (n.memory.id.clone(), n.memory))
        .collect())
}

/// Find shortest path between two memories
pub async fn find_path(
    adapter: &dyn BackendAdapter,
    from_id: &str,
    to_id: &str,
    max_depth: usize,
) -> Result<Option<TraversalNode>> {
    let result = traverse(adapter, from_id, &TraversalOptions::with_depth(max_depth)).await?;

    // BFS discovers each node at its shortest distance
    Ok(result.nodes.into_iter().find(|n| n.memory.id == to_id))
}

/// Get all memories within a certain graph distance
pub async fn neighborhood(
    adapter: &dyn BackendAdapter,
    center_id: &str,
    radius: usize,
) -> Result<Vec<MemoryId>> {
    let result = traverse(adapter, center_id, &TraversalOptions::with_depth(radius)).await?;

    Ok(result.nodes.into_iter().map(|n| n.memory.id).collect())
}
