//! Invariant sweeps: properties that must hold for any op sequence, not
//! just hand-crafted cases.

use achlys_analysis::graph::{NanIdAllocator, NodeId, TaintDepGraph};
use achlys_analysis::memory::PtrMap;
use achlys_core::ir::{FunctionId, IrType, ModuleBuilder, ValueId};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum GraphOp {
    AddSource(u32),
    Propagate(u32, Vec<u32>),
    CallSiteReturn(u32, Vec<u32>),
    MarkNan(u32),
    Remove(u32),
}

fn graph_op() -> impl Strategy<Value = GraphOp> {
    let value = 0..24u32;
    let deps = proptest::collection::vec(0..24u32, 0..4);
    prop_oneof![
        value.clone().prop_map(GraphOp::AddSource),
        (value.clone(), deps.clone()).prop_map(|(v, d)| GraphOp::Propagate(v, d)),
        (value.clone(), deps).prop_map(|(v, d)| GraphOp::CallSiteReturn(v, d)),
        value.clone().prop_map(GraphOp::MarkNan),
        value.prop_map(GraphOp::Remove),
    ]
}

fn apply(graph: &mut TaintDepGraph, ids: &mut NanIdAllocator, op: &GraphOp) -> bool {
    match op {
        GraphOp::AddSource(v) => graph.add_taint_source(ValueId(*v)),
        GraphOp::Propagate(v, deps) => {
            let deps: Vec<ValueId> = deps.iter().map(|d| ValueId(*d)).collect();
            graph.check_and_propagate(ValueId(*v), &deps);
        }
        GraphOp::CallSiteReturn(v, args) => {
            let args: Vec<ValueId> = args.iter().map(|a| ValueId(*a)).collect();
            graph.add_call_site_return(ValueId(*v), &args);
        }
        GraphOp::MarkNan(v) => graph.mark_value_as_nan_source(ValueId(*v), false, ids),
        GraphOp::Remove(v) => {
            graph.remove_taint(ValueId(*v));
            return true;
        }
    }
    false
}

proptest! {
    /// Uniqueness, edge symmetry, two-level closure, and NaN id bounds
    /// hold after any op sequence.
    #[test]
    fn graph_invariants_hold(ops in proptest::collection::vec(graph_op(), 0..60)) {
        let mut graph = TaintDepGraph::new(FunctionId(0));
        let mut ids = NanIdAllocator::new();
        let mut removed_any = false;

        for op in &ops {
            removed_any |= apply(&mut graph, &mut ids, op);
        }

        // Uniqueness: one node per value.
        let mut seen = std::collections::HashSet::new();
        for id in graph.node_ids() {
            prop_assert!(seen.insert(graph.node(id).value));
        }

        let live: Vec<NodeId> = graph.node_ids().collect();
        for &id in &live {
            let node = graph.node(id);
            prop_assert!(!node.removed);

            // Edge symmetry.
            for &neighbor in &node.edges {
                prop_assert!(
                    graph.node(neighbor).edges.contains(&id),
                    "edge {:?} -> {:?} not mirrored", id, neighbor
                );
            }

            // Two-level closure: a derived node touches only top-level
            // nodes, and has at least one unless a removal orphaned it.
            if !node.is_top_level_kind() {
                for &neighbor in &node.edges {
                    prop_assert!(graph.node(neighbor).is_top_level_kind());
                }
                if !removed_any {
                    prop_assert!(!node.edges.is_empty());
                }
            }

            // NaN ids are drawn from the allocator's contiguous range.
            let allocated = ids.allocated();
            if let Some(nan_id) = node.nan_source_id {
                prop_assert!(nan_id.0 >= 1 && nan_id.0 <= allocated);
            }
            for derived in &node.derived_nan_ids {
                prop_assert!(derived.0 >= 1 && derived.0 <= allocated);
            }
        }
    }

    /// Inserting the same pointer pair twice yields the same base sets as
    /// inserting it once.
    #[test]
    fn pointer_map_insert_is_idempotent(
        pairs in proptest::collection::vec((0..12usize, 0..12usize), 0..30)
    ) {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", &[], IrType::Void);
        let mut slots = Vec::new();
        {
            let mut b = mb.body(f);
            for _ in 0..12 {
                slots.push(b.alloca(IrType::Array(Box::new(IrType::Double), 2)));
            }
            b.ret_void();
        }
        let module = mb.finish();
        let func = module.function(f);

        let mut once = PtrMap::new();
        let mut twice = PtrMap::new();
        for &slot in &slots {
            once.insert_base(func, slot);
            twice.insert_base(func, slot);
        }
        for &(key, val) in &pairs {
            once.insert(func, slots[key], slots[val]);
            twice.insert(func, slots[key], slots[val]);
            twice.insert(func, slots[key], slots[val]);
        }

        for &slot in &slots {
            prop_assert_eq!(once.bases_of(slot), twice.bases_of(slot));
            prop_assert_eq!(once.is_base(slot), twice.is_base(slot));
        }
    }
}
