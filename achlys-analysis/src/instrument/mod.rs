//! Fault-injection instrumentation.
//!
//! For each retained hazard, splice a call to the matching injection
//! thunk directly after the culprit instruction and rewire every non-call
//! use of its result through the thunk's return value.

use achlys_core::ir::{
    render_value, Callee, ConstKind, FunctionId, Instruction, IrType, Module, Opcode, Terminator,
    ValueDef, ValueId,
};
use achlys_core::logging::{LogSink, Verbosity};
use achlys_core::types::collections::FxHashMap;
use smallvec::smallvec;

use crate::collapse::AttackerNanSet;
use crate::graph::TaintDepGraph;

/// One splice the rewriter is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteRequest {
    pub function: FunctionId,
    pub inst: ValueId,
    pub nan_id: u32,
}

/// Turn the filtered attacker-NaN set into rewrite requests.
pub fn rewrite_requests(
    graphs: &FxHashMap<FunctionId, TaintDepGraph>,
    set: &AttackerNanSet,
) -> Vec<RewriteRequest> {
    let mut requests = Vec::with_capacity(set.len());
    for (function, node_id) in set.iter() {
        let Some(graph) = graphs.get(&function) else {
            continue;
        };
        let node = graph.node(node_id);
        let Some(nan_id) = node.nan_source_id else {
            continue;
        };
        requests.push(RewriteRequest {
            function,
            inst: node.value,
            nan_id: nan_id.0,
        });
    }
    requests
}

/// The injection thunk for a result type; None for unsupported types.
fn thunk_for(ty: &IrType) -> Option<&'static str> {
    match ty {
        IrType::Ptr(_) => Some("injectNANFaultPtr"),
        IrType::Float => Some("injectNANFaultFloat"),
        IrType::Double => Some("injectNANFaultDouble"),
        IrType::Int(_) => Some("injectNANFaultInt"),
        _ => None,
    }
}

/// Apply every request to the module. Returns the number of hooks
/// actually spliced; unsupported result types warn and are skipped.
pub fn inject_fault_hooks(
    module: &mut Module,
    requests: &[RewriteRequest],
    sink: &mut LogSink,
) -> usize {
    let mut injected = 0;
    for request in requests {
        let func = module.function_mut(request.function);

        let Some(inst) = func.instruction(request.inst) else {
            continue;
        };
        let result_ty = inst.ty.clone();
        let block = inst.block;

        let Some(thunk) = thunk_for(&result_ty) else {
            tracing::warn!(ty = %result_ty, "unsupported fault-injection result type; skipping");
            sink.log(
                Verbosity::Function,
                format!("[warning] skipping fault injection; unsupported type {result_ty}"),
            );
            continue;
        };

        sink.log(
            Verbosity::Function,
            format!(
                "[step] inserting fault-injection call after {}",
                render_value(func, request.inst)
            ),
        );

        // Materialize the id constant and the thunk call.
        let id_const = ValueId(func.values.len() as u32);
        func.values.push(ValueDef::Constant {
            kind: ConstKind::Int(request.nan_id as i64),
            ty: IrType::Int(32),
        });
        let hook = ValueId(func.values.len() as u32);
        func.values.push(ValueDef::Instruction(Instruction {
            opcode: Opcode::Call(Callee::External(thunk.to_string())),
            operands: smallvec![request.inst, id_const],
            ty: result_ty,
            block,
            source_line: None,
        }));

        // Splice directly after the culprit instruction.
        let instructions = &mut func.blocks[block.index()].instructions;
        let position = instructions
            .iter()
            .position(|&id| id == request.inst)
            .map(|idx| idx + 1)
            .unwrap_or(instructions.len());
        instructions.insert(position, hook);

        // Rewire every non-call instruction use through the hook.
        for use_id in func.users(request.inst) {
            if use_id == hook {
                continue;
            }
            let Some(ValueDef::Instruction(use_inst)) = func.values.get_mut(use_id.index())
            else {
                continue;
            };
            if matches!(use_inst.opcode, Opcode::Call(_)) {
                continue;
            }
            for operand in use_inst.operands.iter_mut() {
                if *operand == request.inst {
                    *operand = hook;
                }
            }
        }
        // Terminator uses are not instructions; rewire them directly.
        for other_block in &mut func.blocks {
            match &mut other_block.terminator {
                Some(Terminator::CondBr { cond, .. }) if *cond == request.inst => {
                    *cond = hook;
                }
                Some(Terminator::Ret(Some(value))) if *value == request.inst => {
                    *value = hook;
                }
                _ => {}
            }
        }

        injected += 1;
    }
    injected
}
