//! Human-readable rendering of IR values for logs and reports.

use std::fmt::Write as _;

use super::module::Function;
use super::value::{Callee, ConstKind, Opcode, ValueDef, ValueId};

/// Render a value the way it would appear in a listing, e.g.
/// `%7 = fdiv double %5, %6` or `3.0`.
pub fn render_value(func: &Function, id: ValueId) -> String {
    match func.value(id) {
        ValueDef::Argument { index, ty } => format!("%arg{index}: {ty}"),
        ValueDef::Constant { kind, .. } => render_const(kind),
        ValueDef::Instruction(inst) => {
            let mut out = String::new();
            if inst.ty.is_void() {
                let _ = write!(out, "{}", inst.opcode.mnemonic());
            } else {
                let _ = write!(out, "%{} = {} {}", id.0, inst.opcode.mnemonic(), inst.ty);
            }
            if let Opcode::Call(callee) = &inst.opcode {
                let _ = write!(out, " {}", render_callee(callee));
            }
            for (i, &op) in inst.operands.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                let _ = write!(out, "{sep}{}", render_operand(func, op));
            }
            out
        }
    }
}

fn render_operand(func: &Function, id: ValueId) -> String {
    match func.value(id) {
        ValueDef::Constant { kind, .. } => render_const(kind),
        ValueDef::Argument { index, .. } => format!("%arg{index}"),
        ValueDef::Instruction(_) => format!("%{}", id.0),
    }
}

fn render_const(kind: &ConstKind) -> String {
    match kind {
        ConstKind::Int(v) => v.to_string(),
        ConstKind::Float(v) => format!("{v:?}"),
        ConstKind::Null => "null".to_string(),
        ConstKind::Undef => "undef".to_string(),
    }
}

fn render_callee(callee: &Callee) -> String {
    match callee {
        Callee::Local(id) => format!("@fn{}", id.0),
        Callee::External(name) => format!("@{name}"),
        Callee::Indirect => "@<indirect>".to_string(),
    }
}
