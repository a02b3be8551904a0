//! Per-instruction transfer functions.
//!
//! Each opcode applies its taint propagation and eviction rules to the
//! per-function taint set (flow-sensitive), the taint dependency graph
//! (the summary), and the pointer map.

use achlys_core::ir::{
    render_value, BinaryOp, Callee, Function, FunctionId, Module, Opcode, Terminator, ValueDef,
    ValueId,
};
use achlys_core::logging::{LogSink, Verbosity};
use achlys_core::traits::{MemoryDependenceOracle, SymbolDemangler};

use crate::graph::{NanIdAllocator, TaintDepGraph};
use crate::memory::PtrMap;
use crate::summary::FunctionTaintSet;

use super::session::FunctionContext;

/// Everything one instruction's transfer can touch.
pub(crate) struct TransferCtx<'a> {
    pub module: &'a Module,
    pub function: FunctionId,
    pub func: &'a Function,
    pub set: &'a mut FunctionTaintSet,
    pub graph: &'a mut TaintDepGraph,
    pub ptrs: &'a mut PtrMap,
    pub nan_ids: &'a mut NanIdAllocator,
    pub memdep: &'a dyn MemoryDependenceOracle,
    pub demangler: &'a dyn SymbolDemangler,
    pub sink: &'a mut LogSink,
    /// User-defined calls discovered during the walk, for the worklist.
    pub discovered_calls: &'a mut Vec<(FunctionId, FunctionContext)>,
}

/// A user-defined function is a local definition outside the standard
/// library namespace.
pub(crate) fn user_defined_callee(module: &Module, callee: &Callee) -> Option<FunctionId> {
    match callee {
        Callee::Local(id) => {
            let func = module.function(*id);
            (!func.is_declaration && !func.name.starts_with("std")).then_some(*id)
        }
        _ => None,
    }
}

/// The symbol a library call is classified by.
fn callee_symbol<'m>(module: &'m Module, callee: &'m Callee) -> Option<&'m str> {
    match callee {
        Callee::External(name) => Some(name),
        Callee::Local(id) => Some(module.function(*id).name.as_str()),
        Callee::Indirect => None,
    }
}

/// Stream readers and read syscalls introduce taint.
fn is_taint_source(name: &str) -> bool {
    name == "fread" || name == "read" || name == "aio_read" || name.contains("istream")
}

/// String-to-float conversions and sqrt can produce NaN from a tainted
/// argument.
fn is_nan_source(name: &str) -> bool {
    matches!(name, "atof" | "strtod" | "strtof" | "sqrt")
}

fn is_heap_allocator(name: &str) -> bool {
    matches!(name, "malloc" | "calloc" | "realloc")
}

fn is_const_zero(func: &Function, value: ValueId) -> bool {
    matches!(
        func.value(value),
        ValueDef::Constant { kind, .. } if kind.is_zero()
    )
}

/// Operations with a trivially constant result: `a - a`, `a xor a`,
/// `a / a`, and multiplication by a literal zero. Taint does not
/// propagate through them. Operand identity only; may-alias equality is
/// deliberately not consulted.
pub(crate) fn is_constant_instruction(
    func: &Function,
    op: BinaryOp,
    lhs: ValueId,
    rhs: ValueId,
) -> bool {
    match op {
        BinaryOp::Sub | BinaryOp::FSub | BinaryOp::Xor | BinaryOp::SDiv | BinaryOp::FDiv => {
            lhs == rhs
        }
        BinaryOp::Mul | BinaryOp::FMul => is_const_zero(func, lhs) || is_const_zero(func, rhs),
        _ => false,
    }
}

/// Apply one instruction's transfer.
pub(crate) fn transfer_instruction(cx: &mut TransferCtx<'_>, inst_id: ValueId) {
    let Some(inst) = cx.func.instruction(inst_id) else {
        return;
    };
    cx.sink.log(
        Verbosity::Instruction,
        format!("[step] analyzing: {}", render_value(cx.func, inst_id)),
    );

    match &inst.opcode {
        Opcode::Alloca(allocated) => {
            if allocated.is_pointer_like() {
                cx.ptrs.insert_base(cx.func, inst_id);
            }
        }

        Opcode::Store => {
            let src = inst.operands[0];
            let dst = inst.operands[1];

            if cx.func.ty_of(src).is_pointer_like()
                && cx.func.ty_of(dst).is_pointer_like()
                && !cx.func.is_constant(src)
            {
                cx.ptrs.insert(cx.func, dst, src);
            }

            // Propagation: a tainted store taints the location.
            cx.set.check_and_propagate(dst, &[src]);
            cx.graph.check_and_propagate(dst, &[src]);

            // Eviction: an untainted store scrubs a tainted location.
            if cx.set.is_tainted(dst) && !cx.set.is_tainted(src) {
                cx.set.remove_taint(dst);
                cx.graph.remove_taint(dst);
            }
        }

        Opcode::Load => {
            let ptr = inst.operands[0];

            // Ask the oracle which stores feed this load; an empty answer
            // degrades to the pointer operand alone.
            for dep in cx.memdep.store_dependencies(cx.func, inst_id) {
                if let Some(store) = cx.func.instruction(dep.inst) {
                    let stored = store.operands[0];
                    cx.ptrs.insert(cx.func, inst_id, stored);
                    cx.set.check_and_propagate(inst_id, &[stored]);
                    cx.graph.check_and_propagate(inst_id, &[stored]);
                }
            }

            cx.ptrs.insert(cx.func, inst_id, ptr);
            cx.set.check_and_propagate(inst_id, &[ptr]);
            cx.graph.check_and_propagate(inst_id, &[ptr]);
        }

        Opcode::Gep => {
            let base = inst.operands[0];
            cx.ptrs.insert(cx.func, inst_id, base);
            cx.set.check_and_propagate(inst_id, &[base]);
            cx.graph.check_and_propagate(inst_id, &[base]);

            // Anything sharing an allocation with the base can feed this
            // pointer too.
            let siblings = cx.ptrs.values_sharing_base(base);
            if !siblings.is_empty() {
                cx.set.check_and_propagate(inst_id, &siblings);
                cx.graph.check_and_propagate(inst_id, &siblings);
            }
        }

        Opcode::Phi(_) => {
            cx.set.check_and_propagate(inst_id, &inst.operands);
            cx.graph.check_and_propagate(inst_id, &inst.operands);
        }

        Opcode::Binary(op) => {
            let lhs = inst.operands[0];
            let rhs = inst.operands[1];

            if !is_constant_instruction(cx.func, *op, lhs, rhs) {
                cx.set.check_and_propagate(inst_id, &[lhs, rhs]);
                cx.graph.check_and_propagate(inst_id, &[lhs, rhs]);
            }

            // Divisions originate NaNs once either operand is tainted in
            // the summary; whether every parent is tainted is decided at
            // collapse time.
            if op.is_division() && (cx.graph.is_tainted(lhs) || cx.graph.is_tainted(rhs)) {
                cx.set.add_nan_source(inst_id);
                cx.set.check_and_propagate(inst_id, &[lhs, rhs]);
                cx.graph.check_and_propagate(inst_id, &[lhs, rhs]);
                cx.graph.mark_value_as_nan_source(inst_id, false, cx.nan_ids);
            }
        }

        Opcode::Cast(_) | Opcode::Unary(_) => {
            let operand = inst.operands[0];
            cx.set.check_and_propagate(inst_id, &[operand]);
            cx.graph.check_and_propagate(inst_id, &[operand]);
            cx.ptrs.insert(cx.func, inst_id, operand);
        }

        Opcode::Cmp(_) => {
            cx.set.check_and_propagate(inst_id, &inst.operands);
            cx.graph.check_and_propagate(inst_id, &inst.operands);
        }

        Opcode::Call(callee) => transfer_call(cx, inst_id, callee.clone()),

        Opcode::Other(mnemonic) => {
            tracing::warn!(
                function = %cx.func.name,
                mnemonic = %mnemonic,
                "unhandled instruction; no taint propagated"
            );
            cx.sink.log(
                Verbosity::Instruction,
                format!(
                    "[warning] unhandled instruction: {}",
                    render_value(cx.func, inst_id)
                ),
            );
        }
    }
}

fn transfer_call(cx: &mut TransferCtx<'_>, inst_id: ValueId, callee: Callee) {
    // Indirect calls have no statically known target.
    if matches!(callee, Callee::Indirect) {
        return;
    }
    let Some(inst) = cx.func.instruction(inst_id) else {
        return;
    };
    let operands = inst.operands.clone();

    if let Some(callee_id) = user_defined_callee(cx.module, &callee) {
        let mut tainted_indexes = Vec::new();
        let mut tainted_values = Vec::new();
        for (index, &arg) in operands.iter().enumerate() {
            if cx.set.is_tainted(arg) {
                tainted_indexes.push(index);
                tainted_values.push(arg);
            }
        }

        cx.discovered_calls.push((
            callee_id,
            FunctionContext {
                call_site: Some(inst_id),
                caller: Some(cx.function),
                tainted_args: tainted_indexes,
            },
        ));

        // A non-void return is tentatively tainted; the collapse solver
        // settles it per context.
        if !cx.module.function(callee_id).ret_ty.is_void() {
            cx.set.taint_with_dependency(inst_id, inst_id);
            cx.graph.add_call_site_return(inst_id, &tainted_values);
        }
        return;
    }

    let Some(symbol) = callee_symbol(cx.module, &callee) else {
        return;
    };
    let name = cx.demangler.demangle(symbol);

    if is_taint_source(&name) {
        cx.sink.log(
            Verbosity::Function,
            format!("[new info] found taint source: {name}"),
        );
        if name.contains("istream") {
            // Stream extraction writes through its last argument.
            let Some(&dest) = operands.last() else {
                return;
            };
            cx.set.check_and_propagate(dest, &[]);
            cx.graph.add_taint_source(dest);
            // Untrusted float input is itself a potential NaN.
            if cx
                .func
                .ty_of(dest)
                .pointee()
                .is_some_and(|t| t.is_float_like())
            {
                cx.graph.mark_value_as_nan_source(dest, true, cx.nan_ids);
            }
        } else {
            cx.set.check_and_propagate(inst_id, &[]);
            cx.graph.add_taint_source(inst_id);
        }
        return;
    }

    let tainted_values: Vec<ValueId> = operands
        .iter()
        .copied()
        .filter(|arg| cx.set.is_tainted(*arg))
        .collect();

    if is_nan_source(&name) {
        if !tainted_values.is_empty() {
            cx.set.add_nan_source(inst_id);
            cx.set.check_and_propagate(inst_id, &tainted_values);
            cx.graph.check_and_propagate(inst_id, &tainted_values);
            cx.graph.mark_value_as_nan_source(inst_id, false, cx.nan_ids);
        }
    } else if is_heap_allocator(&name) {
        cx.ptrs.insert_base(cx.func, inst_id);
    } else if !tainted_values.is_empty() {
        cx.set.check_and_propagate(inst_id, &[]);
        cx.graph.check_and_propagate(inst_id, &tainted_values);
    }
}

/// Apply the block terminator's transfer: returns mark the returned value.
pub(crate) fn transfer_terminator(cx: &mut TransferCtx<'_>, term: &Terminator) {
    if let Terminator::Ret(Some(value)) = term {
        if !cx.func.ret_ty.is_void() {
            cx.graph.mark_return_value(*value);
            cx.set.mark_return_value(*value);
        }
    }
}
