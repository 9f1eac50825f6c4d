//! Process-unique identity for planner nodes.
//!
//! Every [`PlannerNode`](crate::node::PlannerNode) is stamped with a `NodeId`
//! when it is created. Identity, not structure, is what the planner memoizes
//! on: two structurally equal nodes built separately are different nodes, and
//! a node shared by several graphs is the same node everywhere.
//!
//! They're small, `Copy`, and ordered, so they can be used as keys in memo
//! tables during graph traversal and cloning.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// Unique numeric identifier for a planner node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(u64);

impl NodeId {
    /// Allocate the next id.
    pub(crate) fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the underlying numeric value.
    ///
    /// Useful mainly for debugging and plan explanations.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}
