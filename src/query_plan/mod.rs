//! # Plan Graph Model
//!
//! The in-memory representation of a query under construction: a directed
//! acyclic graph of relational operations. The same intermediate result can
//! feed several downstream operations, so the graph is a DAG, not a tree:
//! a node may have many parents, and one parent may reference the same
//! child in more than one slot (a self-join uses its source twice).
//!
//! The graph is an id-indexed arena. Nodes hold child [`NodeId`]s rather
//! than direct references, which makes identity comparison cheap, keeps
//! ownership unambiguous, and rules out reference-cycle lifetime issues.
//! Nodes are immutable once inserted; later compiler stages only ever read.
//!
//! Construction never merges two independently created nodes, even when
//! kind and children are identical value-for-value. Sharing exists only
//! when the producing layer reuses a [`NodeId`] it already holds.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

pub mod errors;
pub mod node_id;

pub use errors::PlanGraphError;
pub use node_id::{IdAllocator, NodeId};

/// Join flavor, rendered as the SQL join keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    fn sql_keyword(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
        }
    }
}

/// One relational operation. Operation payloads (predicates, column lists,
/// join conditions) are opaque SQL fragments supplied by the producing
/// layer; the compiler core never inspects them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeKind {
    TableScan {
        table: String,
    },
    Filter {
        predicate: String,
    },
    Project {
        columns: Vec<String>,
    },
    Join {
        join_type: JoinType,
        on: String,
    },
    Aggregate {
        group_by: Vec<String>,
        aggregates: Vec<String>,
    },
    Union {
        all: bool,
    },
    Sort {
        keys: Vec<String>,
    },
    Limit {
        limit: u64,
        offset: Option<u64>,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::TableScan { .. } => "TableScan",
            NodeKind::Filter { .. } => "Filter",
            NodeKind::Project { .. } => "Project",
            NodeKind::Join { .. } => "Join",
            NodeKind::Aggregate { .. } => "Aggregate",
            NodeKind::Union { .. } => "Union",
            NodeKind::Sort { .. } => "Sort",
            NodeKind::Limit { .. } => "Limit",
        }
    }

    /// Render this node's own SQL body given already-resolved child
    /// reference texts. A child reference is either a bare CTE alias or a
    /// parenthesized inline subquery; both splice into a FROM position.
    ///
    /// This is the only place node content is interpreted; the analyzer
    /// and synthesizer stay kind-agnostic.
    pub fn render_body(&self, child_refs: &[String]) -> Result<String, PlanGraphError> {
        match (self, child_refs) {
            (NodeKind::TableScan { table }, []) => Ok(format!("SELECT * FROM {}", table)),
            (NodeKind::Filter { predicate }, [input]) => {
                Ok(format!("SELECT * FROM {} WHERE {}", input, predicate))
            }
            (NodeKind::Project { columns }, [input]) => {
                Ok(format!("SELECT {} FROM {}", columns.join(", "), input))
            }
            (NodeKind::Join { join_type, on }, [left, right]) => {
                // Explicit lhs/rhs table aliases so the same CTE alias can
                // appear on both sides of one join.
                Ok(format!(
                    "SELECT * FROM {} AS lhs {} {} AS rhs ON {}",
                    left,
                    join_type.sql_keyword(),
                    right,
                    on
                ))
            }
            (
                NodeKind::Aggregate {
                    group_by,
                    aggregates,
                },
                [input],
            ) => {
                let mut select_items = group_by.clone();
                select_items.extend(aggregates.iter().cloned());
                if group_by.is_empty() {
                    Ok(format!("SELECT {} FROM {}", select_items.join(", "), input))
                } else {
                    Ok(format!(
                        "SELECT {} FROM {} GROUP BY {}",
                        select_items.join(", "),
                        input,
                        group_by.join(", ")
                    ))
                }
            }
            (NodeKind::Union { all }, inputs) if !inputs.is_empty() => {
                let connector = if *all { " UNION ALL " } else { " UNION DISTINCT " };
                Ok(inputs
                    .iter()
                    .map(|input| format!("SELECT * FROM {}", input))
                    .collect::<Vec<_>>()
                    .join(connector))
            }
            (NodeKind::Sort { keys }, [input]) => {
                Ok(format!("SELECT * FROM {} ORDER BY {}", input, keys.join(", ")))
            }
            (NodeKind::Limit { limit, offset }, [input]) => match offset {
                Some(offset) => Ok(format!(
                    "SELECT * FROM {} LIMIT {} OFFSET {}",
                    input, limit, offset
                )),
                None => Ok(format!("SELECT * FROM {} LIMIT {}", input, limit)),
            },
            _ => Err(PlanGraphError::ChildArity {
                kind: self.name(),
                expected: self.expected_children(),
                got: child_refs.len(),
            }),
        }
    }

    fn expected_children(&self) -> &'static str {
        match self {
            NodeKind::TableScan { .. } => "0",
            NodeKind::Join { .. } => "2",
            NodeKind::Union { .. } => "at least 1",
            _ => "1",
        }
    }
}

/// One node in the arena: identity, operation, and ordered child slots.
/// Child order is stable and significant (it decides join operand order).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
}

/// Id-indexed arena holding every node of one query plan.
///
/// Graphs built for the same client session should share one
/// [`IdAllocator`] so ids stay unique across plans.
#[derive(Debug)]
pub struct PlanGraph {
    pub(crate) nodes: HashMap<NodeId, PlanNode>,
    allocator: Arc<IdAllocator>,
}

impl PlanGraph {
    /// New graph with a fresh session allocator.
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(IdAllocator::new()))
    }

    /// New graph drawing ids from an existing session allocator.
    pub fn with_allocator(allocator: Arc<IdAllocator>) -> Self {
        Self {
            nodes: HashMap::new(),
            allocator,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a node with the given kind and ordered children. Always
    /// allocates a fresh identity; there is no value-based merging.
    /// Children are expected to already live in this graph; the analyzer
    /// reports any dangling id as a structural error at compile time.
    pub fn insert(&mut self, kind: NodeKind, children: Vec<NodeId>) -> NodeId {
        let id = self.allocator.next_id();
        self.nodes.insert(id, PlanNode { id, kind, children });
        id
    }

    pub fn table_scan(&mut self, table: impl Into<String>) -> NodeId {
        self.insert(
            NodeKind::TableScan {
                table: table.into(),
            },
            vec![],
        )
    }

    pub fn filter(&mut self, input: NodeId, predicate: impl Into<String>) -> NodeId {
        self.insert(
            NodeKind::Filter {
                predicate: predicate.into(),
            },
            vec![input],
        )
    }

    pub fn project(&mut self, input: NodeId, columns: Vec<String>) -> NodeId {
        self.insert(NodeKind::Project { columns }, vec![input])
    }

    pub fn join(
        &mut self,
        left: NodeId,
        right: NodeId,
        join_type: JoinType,
        on: impl Into<String>,
    ) -> NodeId {
        self.insert(
            NodeKind::Join {
                join_type,
                on: on.into(),
            },
            vec![left, right],
        )
    }

    pub fn aggregate(
        &mut self,
        input: NodeId,
        group_by: Vec<String>,
        aggregates: Vec<String>,
    ) -> NodeId {
        self.insert(
            NodeKind::Aggregate {
                group_by,
                aggregates,
            },
            vec![input],
        )
    }

    pub fn union_all(&mut self, inputs: Vec<NodeId>) -> NodeId {
        self.insert(NodeKind::Union { all: true }, inputs)
    }

    pub fn union_distinct(&mut self, inputs: Vec<NodeId>) -> NodeId {
        self.insert(NodeKind::Union { all: false }, inputs)
    }

    pub fn sort(&mut self, input: NodeId, keys: Vec<String>) -> NodeId {
        self.insert(NodeKind::Sort { keys }, vec![input])
    }

    pub fn limit(&mut self, input: NodeId, limit: u64, offset: Option<u64>) -> NodeId {
        self.insert(NodeKind::Limit { limit, offset }, vec![input])
    }

    /// Render the subgraph reachable from `root` as a JSON tree for plan
    /// inspection. Shared nodes are re-expanded at every reference, so this
    /// is a debugging view, not the compiled form.
    pub fn explain_json(&self, root: NodeId) -> Result<serde_json::Value, PlanGraphError> {
        crate::analyzer::validate_acyclic(self, root)?;
        self.explain_node(root)
    }

    fn explain_node(&self, id: NodeId) -> Result<serde_json::Value, PlanGraphError> {
        let node = self.node(id).ok_or(PlanGraphError::UnknownNode(id))?;
        let children = node
            .children
            .iter()
            .map(|&child| self.explain_node(child))
            .collect::<Result<Vec<_>, _>>()?;
        let kind = serde_json::to_value(&node.kind)
            .map_err(|e| PlanGraphError::Serialization(e.to_string()))?;
        Ok(serde_json::json!({
            "id": node.id,
            "kind": kind,
            "children": children,
        }))
    }
}

impl Default for PlanGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_content_gets_distinct_identity() {
        let mut graph = PlanGraph::new();
        let first = graph.table_scan("users");
        let second = graph.table_scan("users");
        assert_ne!(first, second);
        assert_eq!(graph.node(first).unwrap().kind, graph.node(second).unwrap().kind);
    }

    #[test]
    fn test_child_order_is_preserved() {
        let mut graph = PlanGraph::new();
        let left = graph.table_scan("users");
        let right = graph.table_scan("orders");
        let join = graph.join(left, right, JoinType::Inner, "lhs.id = rhs.user_id");
        assert_eq!(graph.node(join).unwrap().children, vec![left, right]);
    }

    #[test]
    fn test_same_child_in_two_slots() {
        let mut graph = PlanGraph::new();
        let scan = graph.table_scan("users");
        let self_join = graph.join(scan, scan, JoinType::Inner, "lhs.manager_id = rhs.id");
        assert_eq!(graph.node(self_join).unwrap().children, vec![scan, scan]);
    }

    #[test]
    fn test_render_body_rejects_bad_arity() {
        let kind = NodeKind::Filter {
            predicate: "x > 1".into(),
        };
        let err = kind.render_body(&[]).unwrap_err();
        assert!(matches!(err, PlanGraphError::ChildArity { got: 0, .. }));
    }

    #[test]
    fn test_join_renders_both_operands() {
        let kind = NodeKind::Join {
            join_type: JoinType::Left,
            on: "lhs.id = rhs.id".into(),
        };
        let sql = kind
            .render_body(&["cse_1".into(), "(SELECT * FROM orders)".into()])
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM cse_1 AS lhs LEFT JOIN (SELECT * FROM orders) AS rhs ON lhs.id = rhs.id"
        );
    }

    #[test]
    fn test_explain_json_reexpands_shared_nodes() {
        let mut graph = PlanGraph::new();
        let scan = graph.table_scan("users");
        let join = graph.join(scan, scan, JoinType::Inner, "lhs.id = rhs.id");
        let value = graph.explain_json(join).unwrap();
        assert_eq!(value["children"].as_array().unwrap().len(), 2);
        assert_eq!(value["children"][0], value["children"][1]);
    }
}
