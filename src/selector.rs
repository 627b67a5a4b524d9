//! Node filters and selection strategies.

use std::fmt;
use std::sync::Arc;

use crate::connection::Connection;

/// Predicate deciding whether a node may serve a request
pub type NodeFilterFn = Arc<dyn Fn(&Connection) -> bool + Send + Sync>;

/// Node filter applied before selection
#[derive(Clone)]
pub enum NodeFilter {
    /// Exclude master-only nodes; they coordinate the cluster and should not
    /// serve client traffic
    Default,
    /// Caller-supplied predicate
    Custom(NodeFilterFn),
}

impl fmt::Debug for NodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("NodeFilter::Default"),
            Self::Custom(_) => f.write_str("NodeFilter::Custom"),
        }
    }
}

impl Default for NodeFilter {
    fn default() -> Self {
        Self::Default
    }
}

impl NodeFilter {
    /// Whether the filter accepts this node
    pub fn accepts(&self, connection: &Connection) -> bool {
        match self {
            Self::Default => {
                let roles = connection.roles();
                !(roles.master && !roles.data && !roles.ingest)
            }
            Self::Custom(filter) => filter(connection),
        }
    }
}

/// Picks one node out of the filtered set
pub type NodeSelectorFn = Arc<dyn Fn(&[Arc<Connection>]) -> usize + Send + Sync>;

/// Selection strategy applied to the filtered node set
#[derive(Clone)]
pub enum NodeSelector {
    /// Cycle through nodes in insertion order; the cursor persists across
    /// calls on the pool instance
    RoundRobin,
    /// Pick uniformly at random; no persisted state
    Random,
    /// Caller-supplied selector returning an index into the filtered set
    Custom(NodeSelectorFn),
}

impl fmt::Debug for NodeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => f.write_str("NodeSelector::RoundRobin"),
            Self::Random => f.write_str("NodeSelector::Random"),
            Self::Custom(_) => f.write_str("NodeSelector::Custom"),
        }
    }
}

impl Default for NodeSelector {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl NodeSelector {
    /// Select an index into `nodes`, advancing `cursor` for the round-robin
    /// strategy. `nodes` must be non-empty.
    pub(crate) fn select(&self, nodes: &[Arc<Connection>], cursor: &mut usize) -> usize {
        debug_assert!(!nodes.is_empty());
        match self {
            Self::RoundRobin => {
                let index = *cursor % nodes.len();
                *cursor = cursor.wrapping_add(1);
                index
            }
            Self::Random => fastrand::usize(..nodes.len()),
            Self::Custom(selector) => selector(nodes).min(nodes.len() - 1),
        }
    }
}
