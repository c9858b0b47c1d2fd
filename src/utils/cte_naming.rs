//! Centralized CTE alias naming so every stage agrees on the name of a
//! materialized node.
//!
//! ## Naming convention
//!
//! Format: `cse_{node_id}`, e.g. node 4 becomes `cse_4`. The name is
//! derived from the node's stable identity, so recompiling an unchanged
//! graph produces byte-identical aliases.
//!
//! ## Collision handling
//!
//! A user table may legitimately be named like a candidate alias. When the
//! candidate is already reserved, a positional suffix is appended in order
//! (`cse_4_1`, `cse_4_2`, …) and the first free name wins. The search is
//! bounded; exhausting it means the reserved set contains over a thousand
//! names shaped exactly like our aliases, which indicates something other
//! than an accidental clash.

use std::collections::HashSet;

use crate::query_plan::NodeId;

/// Reserved prefix for synthesized CTE aliases.
pub const CTE_ALIAS_PREFIX: &str = "cse";

/// Upper bound on positional-suffix variations tried per node.
pub const MAX_ALIAS_ATTEMPTS: usize = 1024;

/// Deterministic base alias for a node, before collision checks.
pub fn base_alias(id: NodeId) -> String {
    format!("{}_{}", CTE_ALIAS_PREFIX, id)
}

/// First collision-free alias for `id` against `reserved`, or `None` when
/// the bounded search is exhausted. Deterministic: the same id and reserved
/// set always yield the same alias.
pub fn unique_alias(id: NodeId, reserved: &HashSet<String>) -> Option<String> {
    let base = base_alias(id);
    if !reserved.contains(&base) {
        return Some(base);
    }
    for attempt in 1..=MAX_ALIAS_ATTEMPTS {
        let candidate = format!("{}_{}", base, attempt);
        if !reserved.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}
