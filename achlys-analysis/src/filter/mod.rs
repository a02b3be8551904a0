//! Branch-reachability filter over attacker-controlled NaN sources.
//!
//! A NaN that cannot alter control flow is not a hazard under this threat
//! model: an origination point is retained only when a comparison carrying
//! its identity feeds a conditional branch.

use achlys_core::ir::{render_value, Function, FunctionId, Module, Opcode};
use achlys_core::logging::{LogSink, Verbosity};
use achlys_core::types::collections::FxHashMap;

use crate::collapse::AttackerNanSet;
use crate::graph::{NanSourceId, NodeId, TaintDepGraph};

/// Drop every recorded NaN source that never reaches a branch predicate.
/// Idempotent: the predicate never depends on the set itself.
pub fn filter_attacker_nans(
    module: &Module,
    graphs: &FxHashMap<FunctionId, TaintDepGraph>,
    set: &mut AttackerNanSet,
    sink: &mut LogSink,
) {
    let mut log_lines = Vec::new();
    set.retain(|function, node_id| {
        let Some(graph) = graphs.get(&function) else {
            return false;
        };
        let func = module.function(function);
        let keep = reaches_branch_compare(func, graph, node_id);
        let verdict = if keep { "keeping" } else { "removing" };
        log_lines.push(format!(
            "[new info] {} attacker-controlled nan source: {}",
            verdict,
            render_value(func, graph.node(node_id).value)
        ));
        keep
    });
    for line in log_lines {
        sink.log(Verbosity::Function, line);
    }
}

/// Whether any compare carrying this node's NaN identity is consumed by a
/// conditional branch. Top-level nodes scan their children; derived nodes
/// scan the children of every parent.
fn reaches_branch_compare(func: &Function, graph: &TaintDepGraph, node_id: NodeId) -> bool {
    let node = graph.node(node_id);
    let Some(nan_id) = node.nan_source_id else {
        return false;
    };

    if graph.is_top_level(node_id) {
        node.edges
            .iter()
            .any(|&child| compare_feeds_branch(func, graph, child, nan_id))
    } else {
        node.edges.iter().any(|&parent| {
            graph
                .node(parent)
                .edges
                .iter()
                .any(|&sibling| compare_feeds_branch(func, graph, sibling, nan_id))
        })
    }
}

fn compare_feeds_branch(
    func: &Function,
    graph: &TaintDepGraph,
    node_id: NodeId,
    nan_id: NanSourceId,
) -> bool {
    let node = graph.node(node_id);
    let is_compare = func
        .instruction(node.value)
        .is_some_and(|inst| matches!(inst.opcode, Opcode::Cmp(_)));
    is_compare && node.derived_nan_ids.contains(&nan_id) && func.branch_consumes(node.value)
}
