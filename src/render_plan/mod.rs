//! # Compiler Orchestrator
//!
//! End-to-end entry point: [`compile`] takes a plan root and options,
//! drives the reference-count analyzer and the CTE synthesizer, and
//! assembles the final statement text. With CSE enabled and at least one
//! duplicate node, the output is a `WITH` preamble of dependency-ordered
//! alias/body pairs followed by the rewritten top-level body; otherwise it
//! is the root's body by pure recursive inlining.
//!
//! Compilation is a deterministic, side-effect-free transformation:
//! identical (graph, root, options) inputs yield byte-identical text. Any
//! upstream plan reshaping must happen before the call; reference counts
//! are computed on the graph exactly as handed in.

use serde::Serialize;
use thiserror::Error;

use crate::analyzer;
use crate::query_plan::{NodeId, PlanGraph, PlanGraphError};

pub mod cte;
pub mod errors;

pub use cte::Cte;
pub use errors::RenderBuildError;

/// Compilation switches.
#[derive(Debug, Clone, Serialize)]
pub struct CompileOptions {
    /// When false, forces the inline-only path regardless of sharing. The
    /// inlined form re-evaluates shared subplans per reference, so
    /// non-deterministic expressions can diverge across occurrences.
    pub cte_optimization_enabled: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            cte_optimization_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Plan(#[from] PlanGraphError),

    #[error(transparent)]
    Render(#[from] RenderBuildError),
}

/// Compile the plan rooted at `root` into one executable SQL statement.
///
/// Fails with a structured error on a cyclic graph or a dangling node id;
/// it never hangs on malformed input and never silently skips a node.
pub fn compile(
    graph: &PlanGraph,
    root: NodeId,
    options: &CompileOptions,
) -> Result<String, CompileError> {
    let counts = analyzer::count_references(graph, root)?;

    if !options.cte_optimization_enabled {
        log::debug!("CTE optimization disabled, inlining {} nodes", counts.node_count());
        return Ok(cte::render_inline(graph, root)?);
    }

    let duplicates = counts.duplicate_set();
    if duplicates.is_empty() {
        return Ok(cte::render_inline(graph, root)?);
    }

    log::debug!(
        "promoting {} duplicate nodes to CTEs for root {}",
        duplicates.len(),
        root
    );
    let (ctes, root_body) = cte::synthesize(graph, root, &counts)?;
    Ok(assemble(&ctes, &root_body))
}

/// `WITH a1 AS (body1), a2 AS (body2), ... <root body>`.
fn assemble(ctes: &[Cte], root_body: &str) -> String {
    let preamble = ctes
        .iter()
        .map(|cte| format!("{} AS ({})", cte.alias, cte.body))
        .collect::<Vec<_>>()
        .join(", ");
    format!("WITH {} {}", preamble, root_body)
}
