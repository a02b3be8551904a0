//! The analysis engine: per-instruction transfer functions, the
//! intra-procedural driver, and the inter-procedural session.

pub mod intra;
pub mod session;
pub mod transfer;

pub use session::{AnalysisOutcome, AnalysisSession, FunctionContext};
