//! Context-sensitive constraint collapse over function summaries.

pub mod solver;

pub use solver::{AttackerNanSet, CollapseSolver, FunctionCallStack};
