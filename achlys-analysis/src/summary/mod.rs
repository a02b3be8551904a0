//! Flow-sensitive per-function taint state.

pub mod taint_set;

pub use taint_set::FunctionTaintSet;
