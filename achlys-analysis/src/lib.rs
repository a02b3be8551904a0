//! # achlys-analysis
//!
//! Analysis engine for the Achlys NaN-hazard detection pass.
//! Contains the pointer-dependency tree, the two-level taint dependency
//! graph, per-function taint sets, the instruction transfer functions,
//! the intra- and inter-procedural drivers, the constraint-collapse
//! solver, and the branch filter + fault-injection rewriter.

pub mod collapse;
pub mod engine;
pub mod filter;
pub mod graph;
pub mod instrument;
pub mod memory;
pub mod oracles;
pub mod report;
pub mod summary;

pub use engine::session::{AnalysisOutcome, AnalysisSession};
pub use report::{Hazard, HazardReport};
