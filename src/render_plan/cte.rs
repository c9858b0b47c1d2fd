//! # CTE Synthesizer
//!
//! Turns the analyzer's duplicate set into a dependency-ordered list of
//! named, materializable sub-statements, plus the rewritten reference
//! scheme: anywhere a duplicate node is referenced, in the top-level body or
//! inside another CTE body, a bare alias stands in for the node's SQL.
//!
//! Emission order is the graph's depth-first postorder restricted to the
//! duplicate set. Postorder places every duplicate descendant before its
//! duplicate ancestors, so a CTE body only ever references aliases declared
//! earlier in the preamble (the forward-only ordering the target engine
//! requires), and the order is fully determined by the graph.
//!
//! Each duplicate's body is rendered exactly once, at the point it enters
//! the ordered sequence. With CSE disabled (or nothing shared) the
//! degenerate path renders the root by pure recursive inlining instead.
//! That form is semantically weaker for non-deterministic expressions: two
//! occurrences of the same subtree then evaluate independently.

use std::collections::{HashMap, HashSet};

use crate::analyzer::{self, ReferenceCounts};
use crate::query_plan::{NodeId, NodeKind, PlanGraph, PlanGraphError};
use crate::render_plan::errors::RenderBuildError;
use crate::utils::cte_naming;

/// One emitted common table expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub alias: String,
    pub body: String,
}

/// Resolves node references during rendering: a duplicate resolves to its
/// bare alias, anything else to a freshly rendered, parenthesized inline
/// body whose own children go through the same rule.
struct RenderingContext<'a> {
    graph: &'a PlanGraph,
    aliases: HashMap<NodeId, String>,
}

impl RenderingContext<'_> {
    fn resolve(&self, id: NodeId) -> Result<String, RenderBuildError> {
        match self.aliases.get(&id) {
            Some(alias) => Ok(alias.clone()),
            None => Ok(format!("({})", self.render_node(id)?)),
        }
    }

    /// Render a node's own body. Used both for CTE bodies (where the node
    /// itself must not collapse to its alias) and for inline expansion.
    fn render_node(&self, id: NodeId) -> Result<String, RenderBuildError> {
        let node = self
            .graph
            .node(id)
            .ok_or(PlanGraphError::UnknownNode(id))?;
        let child_refs = node
            .children
            .iter()
            .map(|&child| self.resolve(child))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(node.kind.render_body(&child_refs)?)
    }
}

/// Render the root by pure recursive inlining: every reference to a shared
/// node is independently re-expanded.
pub(crate) fn render_inline(graph: &PlanGraph, root: NodeId) -> Result<String, RenderBuildError> {
    let ctx = RenderingContext {
        graph,
        aliases: HashMap::new(),
    };
    ctx.render_node(root)
}

/// Produce the dependency-ordered CTE list and the rewritten top-level body
/// for a graph with a nonempty duplicate set.
pub(crate) fn synthesize(
    graph: &PlanGraph,
    root: NodeId,
    counts: &ReferenceCounts,
) -> Result<(Vec<Cte>, String), RenderBuildError> {
    let order = analyzer::postorder(graph, root)?;
    let mut reserved = reserved_identifiers(graph, &order)?;

    // Aliases are assigned in emission order; each taken name joins the
    // reserved set so later assignments cannot collide with it.
    let mut aliases: HashMap<NodeId, String> = HashMap::new();
    let mut emission: Vec<(NodeId, String)> = Vec::new();
    for &id in order.iter().filter(|&&id| counts.is_duplicate(id)) {
        let alias = cte_naming::unique_alias(id, &reserved).ok_or(
            RenderBuildError::AliasSpaceExhausted {
                node: id,
                attempts: cte_naming::MAX_ALIAS_ATTEMPTS,
            },
        )?;
        reserved.insert(alias.clone());
        aliases.insert(id, alias.clone());
        emission.push((id, alias));
    }

    let ctx = RenderingContext { graph, aliases };
    let mut ctes = Vec::with_capacity(emission.len());
    for (id, alias) in emission {
        let body = ctx.render_node(id)?;
        log::debug!("materializing node {} as CTE {}", id, alias);
        ctes.push(Cte { alias, body });
    }

    let root_body = ctx.render_node(root)?;
    Ok((ctes, root_body))
}

/// User-visible identifiers the alias scheme must not shadow: the table
/// names of every reachable scan.
fn reserved_identifiers(
    graph: &PlanGraph,
    reachable: &[NodeId],
) -> Result<HashSet<String>, RenderBuildError> {
    let mut reserved = HashSet::new();
    for &id in reachable {
        let node = graph
            .node(id)
            .ok_or(PlanGraphError::UnknownNode(id))?;
        if let NodeKind::TableScan { table } = &node.kind {
            reserved.insert(table.clone());
        }
    }
    Ok(reserved)
}
