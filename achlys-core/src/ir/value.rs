//! Values: arguments, constants, and instructions.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::module::{BlockId, FunctionId};
use super::types::IrType;

/// Function-local value index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Constant payloads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConstKind {
    Int(i64),
    Float(f64),
    Null,
    Undef,
}

impl ConstKind {
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Int(v) => *v == 0,
            Self::Float(v) => *v == 0.0,
            Self::Null | Self::Undef => false,
        }
    }
}

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    FAdd,
    Sub,
    FSub,
    Mul,
    FMul,
    SDiv,
    FDiv,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    /// Divisions are the arithmetic NaN origination points.
    pub fn is_division(self) -> bool {
        matches!(self, Self::SDiv | Self::FDiv)
    }
}

/// Value conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastKind {
    Bitcast,
    Trunc,
    ZExt,
    SExt,
    FpToSi,
    SiToFp,
    FpExt,
    FpTrunc,
    PtrToInt,
    IntToPtr,
}

/// Single-operand operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    FNeg,
    Not,
}

/// Comparison predicates; used for both integer and float compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// The target of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Callee {
    /// A function of this module.
    Local(FunctionId),
    /// A library function known only by symbol name.
    External(String),
    /// A call through a function pointer; no statically known target.
    Indirect,
}

/// Instruction opcodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opcode {
    /// Stack allocation of the given type; the result is a pointer to it.
    Alloca(IrType),
    /// `store operands[0] -> operands[1]`.
    Store,
    /// `load operands[0]`.
    Load,
    /// Pointer derivation: `operands[0]` is the base, the rest are indices.
    Gep,
    /// Merge point; incoming blocks parallel the operands.
    Phi(SmallVec<[BlockId; 2]>),
    Binary(BinaryOp),
    Cast(CastKind),
    Unary(UnaryOp),
    Cmp(Predicate),
    Call(Callee),
    /// An instruction the analysis has no rule for; carries its mnemonic.
    /// Transfer treats it conservatively: no new taint.
    Other(String),
}

impl Opcode {
    /// Short mnemonic for rendering.
    pub fn mnemonic(&self) -> &str {
        match self {
            Self::Alloca(_) => "alloca",
            Self::Store => "store",
            Self::Load => "load",
            Self::Gep => "gep",
            Self::Phi(_) => "phi",
            Self::Binary(BinaryOp::Add) => "add",
            Self::Binary(BinaryOp::FAdd) => "fadd",
            Self::Binary(BinaryOp::Sub) => "sub",
            Self::Binary(BinaryOp::FSub) => "fsub",
            Self::Binary(BinaryOp::Mul) => "mul",
            Self::Binary(BinaryOp::FMul) => "fmul",
            Self::Binary(BinaryOp::SDiv) => "sdiv",
            Self::Binary(BinaryOp::FDiv) => "fdiv",
            Self::Binary(BinaryOp::And) => "and",
            Self::Binary(BinaryOp::Or) => "or",
            Self::Binary(BinaryOp::Xor) => "xor",
            Self::Cast(_) => "cast",
            Self::Unary(UnaryOp::FNeg) => "fneg",
            Self::Unary(UnaryOp::Not) => "not",
            Self::Cmp(_) => "cmp",
            Self::Call(_) => "call",
            Self::Other(mnemonic) => mnemonic,
        }
    }
}

/// One instruction in a function body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: SmallVec<[ValueId; 2]>,
    /// Result type; `Void` for stores and void calls.
    pub ty: IrType,
    /// Owning basic block.
    pub block: BlockId,
    /// Source line from debug metadata, when present.
    pub source_line: Option<u32>,
}

/// A value definition in the function-local arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueDef {
    Argument { index: usize, ty: IrType },
    Constant { kind: ConstKind, ty: IrType },
    Instruction(Instruction),
}

impl ValueDef {
    pub fn ty(&self) -> &IrType {
        match self {
            Self::Argument { ty, .. } | Self::Constant { ty, .. } => ty,
            Self::Instruction(inst) => &inst.ty,
        }
    }

    pub fn as_instruction(&self) -> Option<&Instruction> {
        match self {
            Self::Instruction(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant { .. })
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, Self::Argument { .. })
    }
}
