//! # achlys-core
//!
//! Foundation crate for the Achlys NaN-hazard analysis engine.
//! Defines the IR data model and builder, configuration, the error
//! taxonomy, the buffered log sink, and the oracle traits the engine
//! consumes. Every other crate in the workspace depends on this.

pub mod config;
pub mod errors;
pub mod ir;
pub mod logging;
pub mod traits;
pub mod types;

// Re-export the most commonly used types at the crate root.
pub use config::AchlysConfig;
pub use errors::{AnalysisError, ErrorCode, ModuleError};
pub use ir::{BlockId, FunctionId, Module, ValueId};
pub use logging::{LogSink, Verbosity};
pub use types::collections::{FxHashMap, FxHashSet};
