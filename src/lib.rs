//! Clickframe - DataFrame-style plan compilation for ClickHouse
//!
//! This crate compiles a DAG of tabular operations into a single SQL
//! statement for a remote analytical engine:
//! - Arena-based plan graphs with stable node identity
//! - Linear-time reference counting over shared subplans
//! - Common-subexpression elimination via WITH-clause CTEs
//! - Deterministic, byte-reproducible statement text
//!
//! The same intermediate result can feed several downstream operations, so
//! plans are DAGs rather than trees. Without CSE, naive SQL generation
//! re-emits (and the engine re-executes) a shared subplan once per
//! reference; [`compile`] materializes each shared node exactly once as a
//! named CTE and replaces every reference with its alias.

pub mod analyzer;
pub mod query_plan;
pub mod render_plan;
pub mod utils;

pub use query_plan::{IdAllocator, JoinType, NodeId, NodeKind, PlanGraph, PlanNode};
pub use render_plan::{compile, CompileError, CompileOptions};
