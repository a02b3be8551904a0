//! Two-level taint dependency graph: the reusable function summary.

pub mod node;
pub mod taint_graph;

pub use node::{NanIdAllocator, NanSourceId, NanStatus, NodeId, NodeKind, TaintNode};
pub use taint_graph::TaintDepGraph;
