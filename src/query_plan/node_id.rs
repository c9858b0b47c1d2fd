//! Plan node identity and its allocator.
//!
//! Every plan node gets a process-unique id at construction time. Two nodes
//! are the same entity iff their ids match; node content is never compared.
//! Ids come from an [`IdAllocator`], created once per client session and
//! never reset mid-session. Tests construct their own allocators to get
//! deterministic, isolated id sequences.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Stable identity of one plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing, thread-safe id source.
///
/// Allocation is the only mutable state in the plan model; graphs built from
/// the same allocator on separate threads never hand out the same id twice.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> NodeId {
        NodeId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
