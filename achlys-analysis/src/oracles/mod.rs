//! CFG-derived oracle implementations.
//!
//! The engine consumes loop structure, dominance, and memory dependence
//! through the traits in `achlys_core::traits`; these are the default
//! providers, computed from the function's own control-flow graph.

pub mod cfg;
pub mod loops;
pub mod memdep;

pub use cfg::FunctionCfg;
pub use loops::NaturalLoops;
pub use memdep::ReachingStores;
