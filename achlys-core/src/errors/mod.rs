//! Error taxonomy for the analysis pass.
//!
//! Only the malformed-input category is fatal. Everything else is a logged
//! warning and the pass completes the remaining work.

/// Stable machine-readable code for each error variant.
pub trait ErrorCode {
    fn error_code(&self) -> &'static str;
}

/// Fatal analysis errors: the input module is malformed for this pass.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("root function `{name}` takes {arity} arguments; expected 0 or 2")]
    UnsupportedRootArity { name: String, arity: usize },

    #[error(transparent)]
    Module(#[from] ModuleError),
}

impl ErrorCode for AnalysisError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedRootArity { .. } => "ANALYSIS_UNSUPPORTED_ROOT_ARITY",
            Self::Module(e) => e.error_code(),
        }
    }
}

/// IR construction and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("value %{value} out of bounds in function `{function}`")]
    ValueOutOfBounds { function: String, value: u32 },

    #[error("block {block} of function `{function}` has no terminator")]
    MissingTerminator { function: String, block: u32 },

    #[error("block {block} out of bounds in function `{function}`")]
    BlockOutOfBounds { function: String, block: u32 },

    #[error("store in `{function}` expects (value, pointer) operands")]
    MalformedStore { function: String },

    #[error("phi in `{function}` has {values} values but {blocks} incoming blocks")]
    PhiArityMismatch {
        function: String,
        values: usize,
        blocks: usize,
    },

    #[error("function `{function}` has a body but no entry block")]
    EmptyFunction { function: String },
}

impl ErrorCode for ModuleError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ValueOutOfBounds { .. } => "MODULE_VALUE_OUT_OF_BOUNDS",
            Self::MissingTerminator { .. } => "MODULE_MISSING_TERMINATOR",
            Self::BlockOutOfBounds { .. } => "MODULE_BLOCK_OUT_OF_BOUNDS",
            Self::MalformedStore { .. } => "MODULE_MALFORMED_STORE",
            Self::PhiArityMismatch { .. } => "MODULE_PHI_ARITY_MISMATCH",
            Self::EmptyFunction { .. } => "MODULE_EMPTY_FUNCTION",
        }
    }
}
