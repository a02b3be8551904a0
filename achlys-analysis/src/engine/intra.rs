//! Intra-procedural driver: reverse post-order walk with per-loop
//! fixpoints and merge-point control-flow tainting.

use achlys_core::ir::{BlockId, Opcode};
use achlys_core::logging::Verbosity;
use achlys_core::traits::{DominanceOracle, LoopOracle};

use crate::oracles::FunctionCfg;

use super::transfer::{transfer_instruction, transfer_terminator, TransferCtx};

/// Walk every reachable block once; loops run to a local fixpoint.
pub(crate) fn analyze_function_body(
    cx: &mut TransferCtx<'_>,
    cfg: &FunctionCfg,
    loops: &dyn LoopOracle,
) {
    for &block in cfg.reverse_post_order() {
        let depth = loops.loop_depth(block);
        if depth == 0 {
            process_block(cx, block);
        } else if depth == 1 && loops.is_loop_header(block) {
            run_loop_fixpoint(cx, loops, block, 1);
        }
        // Deeper blocks are covered by their loop's fixpoint.
    }

    control_flow_taint(cx, cfg);
}

fn process_block(cx: &mut TransferCtx<'_>, block: BlockId) {
    cx.sink.log(
        Verbosity::Block,
        format!("[step] analyzing block `{}`", cx.func.block(block).label),
    );
    let instructions = cx.func.block(block).instructions.clone();
    for inst_id in instructions {
        transfer_instruction(cx, inst_id);
    }
    if let Some(term) = cx.func.block(block).terminator.clone() {
        transfer_terminator(cx, &term);
    }
}

/// Iterate the loop rooted at `header` until its taint frame is quiet.
///
/// The taint lattice only grows inside a pass, so the iteration count is
/// bounded; the cap is a backstop against eviction ping-pong.
fn run_loop_fixpoint(
    cx: &mut TransferCtx<'_>,
    loops: &dyn LoopOracle,
    header: BlockId,
    depth: usize,
) {
    cx.set.track_new_loop();
    let max_passes = cx.func.values.len() + 2;
    let mut passes = 0;
    loop {
        cx.set.reset_current_loop_changed();
        walk_loop_blocks(cx, loops, header, depth);
        passes += 1;
        if !cx.set.current_loop_changed() {
            break;
        }
        if passes >= max_passes {
            tracing::warn!(
                function = %cx.func.name,
                header = header.0,
                "loop fixpoint hit the iteration cap"
            );
            break;
        }
    }
    cx.set.finish_tracking_loop();
}

/// One pass over the loop: in source order from the header onward, every
/// member block at this depth is processed and every nested header
/// recursed into. Non-members are skipped, so a sibling loop sharing this
/// depth is reached only by the outer reverse-post-order driver.
fn walk_loop_blocks(
    cx: &mut TransferCtx<'_>,
    loops: &dyn LoopOracle,
    header: BlockId,
    depth: usize,
) {
    let block_count = cx.func.blocks.len();
    for idx in header.index()..block_count {
        let block = BlockId(idx as u32);
        if !loops.loop_contains(header, block) {
            continue;
        }
        if block == header || loops.loop_depth(block) == depth {
            process_block(cx, block);
        } else if loops.is_loop_header(block) && loops.loop_depth(block) == depth + 1 {
            run_loop_fixpoint(cx, loops, block, depth + 1);
        }
        // Deeper non-header members are handled inside the recursion.
    }
}

/// A returned phi depends on the branch that selected its incoming path:
/// if the nearest common dominator of two incoming blocks ends in a
/// conditional branch, the return is taint-dependent on its condition.
fn control_flow_taint(cx: &mut TransferCtx<'_>, cfg: &FunctionCfg) {
    let Some(ret_value) = cx.func.returned_value() else {
        return;
    };
    let Some(inst) = cx.func.instruction(ret_value) else {
        return;
    };
    let Opcode::Phi(incoming) = &inst.opcode else {
        return;
    };

    let blocks = incoming.clone();
    for i in 0..blocks.len() {
        for j in (i + 1)..blocks.len() {
            let Some(dominator) = cfg.nearest_common_dominator(blocks[i], blocks[j]) else {
                continue;
            };
            let Some(cond) = cx
                .func
                .block(dominator)
                .terminator
                .as_ref()
                .and_then(|t| t.condition())
            else {
                continue;
            };
            cx.set.check_and_propagate(ret_value, &[cond]);
            cx.graph.check_and_propagate(ret_value, &[cond]);
        }
    }
}
