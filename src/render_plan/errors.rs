use thiserror::Error;

use crate::query_plan::{NodeId, PlanGraphError};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderBuildError {
    #[error("no collision-free CTE alias for node {node} within {attempts} attempts")]
    AliasSpaceExhausted { node: NodeId, attempts: usize },

    #[error(transparent)]
    Plan(#[from] PlanGraphError),
}
