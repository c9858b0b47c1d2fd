//! # Reference-Count Analyzer
//!
//! Counts how many times each plan node is referenced within the graph
//! reachable from a compilation root, and derives the duplicate set: nodes
//! reachable through two or more occurrences. Those are the nodes the CTE
//! synthesizer materializes exactly once instead of re-emitting per
//! reference.
//!
//! The traversal is linear in distinct nodes plus edges. Every occurrence
//! of a child increments its counter, including repeated slots from the
//! same parent, but a node's own children are expanded only the first time
//! the node is discovered. Under heavy sharing the fully inlined tree is
//! exponential in graph depth; this pass never pays that cost.
//!
//! The same module owns structural validation: a cycle (a node reachable
//! from itself) or a dangling child id aborts analysis with a structured
//! error instead of hanging or skipping.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::query_plan::{NodeId, PlanGraph, PlanGraphError};

/// Occurrence counts for every node reachable from the root, root excluded
/// (the root has no incoming occurrence within the analyzed graph).
#[derive(Debug, Clone)]
pub struct ReferenceCounts {
    counts: HashMap<NodeId, usize>,
    distinct_nodes: usize,
    total_occurrences: usize,
}

impl ReferenceCounts {
    /// Occurrences pointing at `id`, summed across all parents and slots.
    pub fn count(&self, id: NodeId) -> usize {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    pub fn is_duplicate(&self, id: NodeId) -> bool {
        self.count(id) >= 2
    }

    /// Nodes referenced through two or more occurrences. The threshold is
    /// exactly 2; a node with a single incoming occurrence is never
    /// promoted to a CTE.
    pub fn duplicate_set(&self) -> BTreeSet<NodeId> {
        self.counts
            .iter()
            .filter(|&(_, &count)| count >= 2)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Distinct nodes reachable from the root, root included.
    pub fn node_count(&self) -> usize {
        self.distinct_nodes
    }

    /// Child occurrences (edges counted with multiplicity) in the analyzed
    /// graph. Equals the sum of all per-node counts.
    pub fn total_occurrences(&self) -> usize {
        self.total_occurrences
    }
}

/// Compute reference counts for the graph reachable from `root`.
///
/// Runs structural validation first, so a malformed graph fails here with
/// [`PlanGraphError::CycleDetected`] or [`PlanGraphError::UnknownNode`]
/// before any counting happens.
pub fn count_references(
    graph: &PlanGraph,
    root: NodeId,
) -> Result<ReferenceCounts, PlanGraphError> {
    validate_acyclic(graph, root)?;

    let mut counts: HashMap<NodeId, usize> = HashMap::new();
    let mut total_occurrences = 0usize;
    let mut discovered: HashSet<NodeId> = HashSet::from([root]);
    let mut pending = vec![root];

    while let Some(id) = pending.pop() {
        let node = graph.node(id).ok_or(PlanGraphError::UnknownNode(id))?;
        for &child in &node.children {
            *counts.entry(child).or_insert(0) += 1;
            total_occurrences += 1;
            if discovered.insert(child) {
                pending.push(child);
            }
        }
    }

    let analysis = ReferenceCounts {
        counts,
        distinct_nodes: discovered.len(),
        total_occurrences,
    };
    log::debug!(
        "reference counting: {} distinct nodes, {} occurrences, {} duplicates",
        analysis.node_count(),
        analysis.total_occurrences(),
        analysis.duplicate_set().len()
    );
    Ok(analysis)
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    InProgress,
    Done,
}

enum Frame {
    Enter(NodeId),
    Exit(NodeId),
}

/// Check that every node reachable from `root` exists in the arena and that
/// no node is reachable from itself. Iterative DFS with gray/black
/// coloring, so even a malformed cyclic input terminates with an error
/// after visiting each node at most once.
pub fn validate_acyclic(graph: &PlanGraph, root: NodeId) -> Result<(), PlanGraphError> {
    walk_depth_first(graph, root, |_| {})
}

/// Distinct reachable nodes in depth-first postorder: every node appears
/// after all of its descendants. Children are expanded in slot order and
/// each node only once, so the order is fully determined by the graph.
/// This is what makes CTE emission reproducible.
pub fn postorder(graph: &PlanGraph, root: NodeId) -> Result<Vec<NodeId>, PlanGraphError> {
    let mut order = Vec::new();
    walk_depth_first(graph, root, |id| order.push(id))?;
    Ok(order)
}

fn walk_depth_first(
    graph: &PlanGraph,
    root: NodeId,
    mut on_exit: impl FnMut(NodeId),
) -> Result<(), PlanGraphError> {
    let mut colors: HashMap<NodeId, Color> = HashMap::new();
    let mut stack = vec![Frame::Enter(root)];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(id) => match colors.get(&id) {
                Some(Color::InProgress) => return Err(PlanGraphError::CycleDetected(id)),
                Some(Color::Done) => {}
                None => {
                    colors.insert(id, Color::InProgress);
                    stack.push(Frame::Exit(id));
                    let node = graph.node(id).ok_or(PlanGraphError::UnknownNode(id))?;
                    for &child in node.children.iter().rev() {
                        stack.push(Frame::Enter(child));
                    }
                }
            },
            Frame::Exit(id) => {
                colors.insert(id, Color::Done);
                on_exit(id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::query_plan::{JoinType, NodeKind, PlanNode};

    // root->{A,B}; A->{C,C}; C->{D}; B->{E,F}; D->{E}; E->{}; F->{}
    // with ids root=0, A=1, C=2, B=3, D=4, E=5, F=6.
    fn shared_leaf_plan() -> (PlanGraph, NodeId, Vec<u64>) {
        let mut graph = PlanGraph::new();
        let root = graph.table_scan("t0"); // 0
        let a = graph.table_scan("t1"); // 1
        let c = graph.table_scan("t2"); // 2
        let b = graph.table_scan("t3"); // 3
        let d = graph.table_scan("t4"); // 4
        let e = graph.table_scan("t5"); // 5
        let f = graph.table_scan("t6"); // 6
        relink(&mut graph, root, vec![a, b]);
        relink(&mut graph, a, vec![c, c]);
        relink(&mut graph, c, vec![d]);
        relink(&mut graph, b, vec![e, f]);
        relink(&mut graph, d, vec![e]);
        (graph, root, vec![2, 5])
    }

    // root->{A,B}; A->{C,C}; C->{D,D}; B->{F,F}; D->{E}; E->{}; F->{D,D}
    // with ids root=0, A=1, C=2, B=3, D=4, E=5, F=6. D is reachable via C
    // with multiplicity 2 and via F with multiplicity 2, total 4.
    fn shared_interior_plan() -> (PlanGraph, NodeId, Vec<u64>) {
        let mut graph = PlanGraph::new();
        let root = graph.table_scan("t0"); // 0
        let a = graph.table_scan("t1"); // 1
        let c = graph.table_scan("t2"); // 2
        let b = graph.table_scan("t3"); // 3
        let d = graph.table_scan("t4"); // 4
        let _e = graph.table_scan("t5"); // 5
        let f = graph.table_scan("t6"); // 6
        relink(&mut graph, root, vec![a, b]);
        relink(&mut graph, a, vec![c, c]);
        relink(&mut graph, c, vec![d, d]);
        relink(&mut graph, b, vec![f, f]);
        relink(&mut graph, d, vec![_e]);
        relink(&mut graph, f, vec![d, d]);
        (graph, root, vec![2, 4, 6])
    }

    // Rewire a node's child slots in place. Only tests reshape nodes; the
    // compiler itself treats graphs as immutable.
    fn relink(graph: &mut PlanGraph, id: NodeId, children: Vec<NodeId>) {
        let node = graph.nodes.get_mut(&id).unwrap();
        node.children = children;
    }

    #[test_case(shared_leaf_plan(); "shared leaf")]
    #[test_case(shared_interior_plan(); "shared interior with combined multiplicity")]
    fn test_duplicate_sets(case: (PlanGraph, NodeId, Vec<u64>)) {
        let (graph, root, expected) = case;
        let counts = count_references(&graph, root).unwrap();
        let duplicates: Vec<u64> = counts
            .duplicate_set()
            .into_iter()
            .map(|id| id.as_u64())
            .collect();
        assert_eq!(duplicates, expected);
    }

    #[test]
    fn test_multiplicity_composes_across_parents() {
        let (graph, root, _) = shared_interior_plan();
        let counts = count_references(&graph, root).unwrap();
        let d = graph.nodes.keys().find(|id| id.as_u64() == 4).copied().unwrap();
        assert_eq!(counts.count(d), 4);
    }

    #[test]
    fn test_root_is_never_counted() {
        let (graph, root, _) = shared_leaf_plan();
        let counts = count_references(&graph, root).unwrap();
        assert_eq!(counts.count(root), 0);
        assert!(!counts.duplicate_set().contains(&root));
    }

    #[test]
    fn test_occurrence_conservation() {
        for (graph, root, _) in [shared_leaf_plan(), shared_interior_plan()] {
            let counts = count_references(&graph, root).unwrap();
            let reachable = postorder(&graph, root).unwrap();
            let edges: usize = reachable
                .iter()
                .map(|&id| graph.node(id).unwrap().children.len())
                .sum();
            assert_eq!(counts.total_occurrences(), edges);
            let summed: usize = reachable.iter().map(|&id| counts.count(id)).sum();
            assert_eq!(summed, edges);
            assert_eq!(counts.node_count(), reachable.len());
        }
    }

    #[test]
    fn test_single_reference_is_not_duplicate() {
        let mut graph = PlanGraph::new();
        let scan = graph.table_scan("users");
        let filtered = graph.filter(scan, "age > 21");
        let counts = count_references(&graph, filtered).unwrap();
        assert_eq!(counts.count(scan), 1);
        assert!(counts.duplicate_set().is_empty());
    }

    #[test]
    fn test_cycle_is_reported_not_looped() {
        let mut graph = PlanGraph::new();
        let scan = graph.table_scan("users");
        let filtered = graph.filter(scan, "age > 21");
        // Force a back edge; impossible through the public builder API.
        relink(&mut graph, scan, vec![filtered]);
        let err = count_references(&graph, filtered).unwrap_err();
        assert!(matches!(err, PlanGraphError::CycleDetected(_)));
    }

    #[test]
    fn test_self_cycle_is_reported() {
        let mut graph = PlanGraph::new();
        let scan = graph.table_scan("users");
        relink(&mut graph, scan, vec![scan]);
        let err = validate_acyclic(&graph, scan).unwrap_err();
        assert_eq!(err, PlanGraphError::CycleDetected(scan));
    }

    #[test]
    fn test_dangling_child_is_reported() {
        let mut graph = PlanGraph::new();
        let scan = graph.table_scan("users");
        let filtered = graph.filter(scan, "age > 21");
        graph.nodes.remove(&scan);
        let err = count_references(&graph, filtered).unwrap_err();
        assert_eq!(err, PlanGraphError::UnknownNode(scan));
    }

    #[test]
    fn test_postorder_puts_descendants_first() {
        let (graph, root, _) = shared_interior_plan();
        let order = postorder(&graph, root).unwrap();
        let position: std::collections::HashMap<NodeId, usize> = order
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        for &id in &order {
            for &child in &graph.node(id).unwrap().children {
                assert!(position[&child] < position[&id]);
            }
        }
        // Each distinct node appears exactly once.
        assert_eq!(position.len(), order.len());
    }

    #[test]
    fn test_diamond_counts_each_edge() {
        let mut graph = PlanGraph::new();
        let scan = graph.table_scan("events");
        let left = graph.filter(scan, "kind = 'view'");
        let right = graph.filter(scan, "kind = 'click'");
        let joined = graph.join(left, right, JoinType::Inner, "lhs.user = rhs.user");
        let counts = count_references(&graph, joined).unwrap();
        assert_eq!(counts.count(scan), 2);
        assert_eq!(counts.duplicate_set(), BTreeSet::from([scan]));
        assert!(matches!(
            graph.node(scan).map(|n: &PlanNode| &n.kind),
            Some(NodeKind::TableScan { .. })
        ));
    }
}
