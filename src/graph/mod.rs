//! Graph algorithms over a [`BackendAdapter`](crate::storage::BackendAdapter)
//!
//! Adapters only answer single-hop questions; everything multi-hop is built
//! here on top of `get_related`.

mod traversal;

pub use traversal::{
    find_path, neighborhood, reachable_entities, related_entities, traverse, TraversalNode,
    TraversalOptions, TraversalResult, TraversalStats, MAX_TRAVERSAL_DEPTH,
};
