//! Typed, arena-allocated SSA intermediate representation.
//!
//! Parsing is out of scope for the pass; modules are built
//! programmatically with [`builder::ModuleBuilder`] or loaded from their
//! serde form.

pub mod builder;
pub mod display;
pub mod module;
pub mod types;
pub mod value;

pub use builder::{FunctionBuilder, ModuleBuilder};
pub use display::render_value;
pub use module::{Block, BlockId, Function, FunctionId, Module, Terminator};
pub use types::IrType;
pub use value::{
    BinaryOp, Callee, CastKind, ConstKind, Instruction, Opcode, Predicate, UnaryOp, ValueDef,
    ValueId,
};
