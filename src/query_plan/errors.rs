use thiserror::Error;

use crate::query_plan::node_id::NodeId;

/// Structural defects in a plan graph. These indicate a bug in the producing
/// layer; compilation aborts immediately and never retries.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanGraphError {
    #[error("cycle detected through plan node {0}")]
    CycleDetected(NodeId),

    #[error("plan node {0} is not present in the graph")]
    UnknownNode(NodeId),

    #[error("{kind} node carries {got} children, expected {expected}")]
    ChildArity {
        kind: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("plan serialization failed: {0}")]
    Serialization(String),
}
