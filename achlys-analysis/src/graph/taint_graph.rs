//! The per-function taint dependency graph.
//!
//! A directed two-level graph: top-level nodes are taint inputs
//! (arguments, recognized sources, call-site returns); derived nodes hang
//! directly off top-level ones. Edges are stored symmetrically, so
//! removal unlinks both endpoints. The graph is the context-free function
//! summary instantiated by the collapse solver.

use achlys_core::ir::{render_value, Function, FunctionId, ValueId};
use achlys_core::logging::{LogSink, Verbosity};
use achlys_core::types::collections::FxHashMap;
use smallvec::SmallVec;

use crate::memory::PtrDepTree;

use super::node::{NanIdAllocator, NanStatus, NodeId, NodeKind, TaintNode};

#[derive(Debug)]
pub struct TaintDepGraph {
    pub function: FunctionId,
    nodes: Vec<TaintNode>,
    top_level: Vec<NodeId>,
    /// Call-site return nodes in creation order; the collapse solver
    /// resolves them in exactly this order.
    call_site_returns: Vec<NodeId>,
    index: FxHashMap<ValueId, NodeId>,
}

impl TaintDepGraph {
    pub fn new(function: FunctionId) -> Self {
        Self {
            function,
            nodes: Vec::new(),
            top_level: Vec::new(),
            call_site_returns: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn node(&self, id: NodeId) -> &TaintNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TaintNode {
        &mut self.nodes[id.index()]
    }

    pub fn lookup(&self, value: ValueId) -> Option<NodeId> {
        self.index.get(&value).copied()
    }

    pub fn contains(&self, value: ValueId) -> bool {
        self.index.contains_key(&value)
    }

    pub fn is_tainted(&self, value: ValueId) -> bool {
        self.contains(value)
    }

    pub fn top_level_nodes(&self) -> &[NodeId] {
        &self.top_level
    }

    pub fn call_site_returns(&self) -> &[NodeId] {
        &self.call_site_returns
    }

    pub fn is_top_level(&self, id: NodeId) -> bool {
        self.node(id).is_top_level_kind()
    }

    /// Live node ids, skipping tombstones.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.index.values().copied()
    }

    pub fn live_node_count(&self) -> usize {
        self.index.len()
    }

    fn add_node(&mut self, value: ValueId) -> NodeId {
        debug_assert!(!self.index.contains_key(&value));
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(TaintNode::new(value));
        self.index.insert(value, id);
        id
    }

    fn connect(&mut self, parent: NodeId, child: NodeId) {
        if !self.nodes[parent.index()].edges.contains(&child) {
            self.nodes[parent.index()].edges.push(child);
            self.nodes[child.index()].edges.push(parent);
        }
    }

    /// Register a function argument as a possible taint source. Float
    /// arguments are themselves NaN origination points: untrusted float
    /// input can carry a NaN.
    pub fn add_argument(
        &mut self,
        func: &Function,
        value: ValueId,
        arg_index: usize,
        nan_ids: &mut NanIdAllocator,
    ) {
        if self.contains(value) {
            return;
        }
        let id = self.add_node(value);
        let node = self.node_mut(id);
        node.kind = NodeKind::PossibleTaintSource;
        node.is_argument = true;
        node.arg_index = Some(arg_index);
        if func.ty_of(value).is_float_like() {
            node.nan_status = NanStatus::Source;
            node.nan_source_id = Some(nan_ids.allocate());
        }
        self.top_level.push(id);
    }

    /// Register the output of a recognized taint source.
    pub fn add_taint_source(&mut self, value: ValueId) {
        if self.contains(value) {
            return;
        }
        let id = self.add_node(value);
        self.node_mut(id).kind = NodeKind::DefiniteTaintSource;
        self.top_level.push(id);
    }

    /// Register the result of a call whose taintedness depends on the
    /// callee. If any recorded argument already carries NaN pedigree, the
    /// return conservatively inherits it.
    pub fn add_call_site_return(&mut self, value: ValueId, tainted_args: &[ValueId]) {
        if self.contains(value) {
            return;
        }
        let mut inherited: SmallVec<[_; 2]> = SmallVec::new();
        for &arg in tainted_args {
            if let Some(arg_node) = self.lookup(arg) {
                let node = self.node(arg_node);
                match node.nan_status {
                    NanStatus::Source => {
                        if let Some(id) = node.nan_source_id {
                            inherited.push(id);
                        }
                    }
                    NanStatus::TaintedNan => inherited.extend(node.derived_nan_ids.iter().copied()),
                    NanStatus::Unknown => {}
                }
            }
        }

        let id = self.add_node(value);
        let node = self.node_mut(id);
        node.kind = NodeKind::PossibleTaintSource;
        node.is_call_site_return = true;
        node.call_args = tainted_args.to_vec();
        if !inherited.is_empty() {
            node.nan_status = NanStatus::TaintedNan;
            for nan_id in inherited {
                node.add_derived_nan_id(nan_id);
            }
        }
        self.top_level.push(id);
        self.call_site_returns.push(id);
    }

    /// Add `value` as a derived node if at least one dependency is already
    /// tainted. Connections always land on top-level ancestors; NaN
    /// pedigree is unioned from the tainted dependencies.
    pub fn check_and_propagate(&mut self, value: ValueId, deps: &[ValueId]) {
        if self.contains(value) {
            return;
        }

        let tainted_deps: SmallVec<[NodeId; 4]> =
            deps.iter().filter_map(|d| self.lookup(*d)).collect();
        if tainted_deps.is_empty() {
            return;
        }

        // Resolve every dependency to its top-level ancestors first.
        let mut parents: SmallVec<[NodeId; 4]> = SmallVec::new();
        let mut nan_ids: SmallVec<[_; 2]> = SmallVec::new();
        let mut saw_nan = false;
        for dep in tainted_deps {
            let dep_node = self.node(dep);
            match dep_node.nan_status {
                NanStatus::Source => {
                    saw_nan = true;
                    if let Some(id) = dep_node.nan_source_id {
                        if !nan_ids.contains(&id) {
                            nan_ids.push(id);
                        }
                    }
                }
                NanStatus::TaintedNan => {
                    saw_nan = true;
                    for &id in &dep_node.derived_nan_ids {
                        if !nan_ids.contains(&id) {
                            nan_ids.push(id);
                        }
                    }
                }
                NanStatus::Unknown => {}
            }
            if dep_node.is_top_level_kind() {
                if !parents.contains(&dep) {
                    parents.push(dep);
                }
            } else {
                for &parent in &dep_node.edges {
                    if !parents.contains(&parent) {
                        parents.push(parent);
                    }
                }
            }
        }

        let id = self.add_node(value);
        let node = self.node_mut(id);
        node.kind = NodeKind::PossibleTaintVar;
        if saw_nan {
            node.nan_status = NanStatus::TaintedNan;
            for nan_id in nan_ids {
                node.add_derived_nan_id(nan_id);
            }
        }
        for parent in parents {
            self.connect(parent, id);
        }
    }

    /// Upgrade an existing node to a NaN origination point, allocating its
    /// identity. `definite` also promotes the node to a definite taint
    /// source.
    pub fn mark_value_as_nan_source(
        &mut self,
        value: ValueId,
        definite: bool,
        nan_ids: &mut NanIdAllocator,
    ) {
        let Some(id) = self.lookup(value) else {
            return;
        };
        let node = self.node_mut(id);
        if node.nan_source_id.is_none() {
            node.nan_source_id = Some(nan_ids.allocate());
        }
        node.nan_status = NanStatus::Source;
        if definite {
            node.kind = NodeKind::DefiniteTaintSource;
        }
    }

    /// Flag `value`'s node as the function's return.
    pub fn mark_return_value(&mut self, value: ValueId) {
        if let Some(id) = self.lookup(value) {
            self.node_mut(id).is_return_value = true;
        }
    }

    /// Delete `value`'s node and all of its edges.
    pub fn remove_taint(&mut self, value: ValueId) {
        let Some(id) = self.index.remove(&value) else {
            return;
        };
        let neighbors = std::mem::take(&mut self.nodes[id.index()].edges);
        for neighbor in neighbors {
            self.nodes[neighbor.index()].edges.retain(|e| *e != id);
        }
        self.top_level.retain(|&n| n != id);
        self.call_site_returns.retain(|&n| n != id);
        let node = self.node_mut(id);
        node.removed = true;
        node.derived_nan_ids.clear();
        node.nan_source_id = None;
    }

    /// Overlay the pointer tree: tainting any member of a base's family
    /// taints every other member. For each base family with at least one
    /// node already in the graph, that node anchors the rest.
    pub fn merge_mem_dep_graph(&mut self, tree: &PtrDepTree) {
        let bases: Vec<ValueId> = tree.bases().collect();
        for base in bases {
            let mut family: Vec<ValueId> = vec![base];
            family.extend(tree.derived_of(base));

            // Prefer a top-level representative as the anchor.
            let anchor = family
                .iter()
                .copied()
                .filter_map(|v| {
                    self.lookup(v)
                        .map(|id| (v, self.node(id).is_top_level_kind()))
                })
                .max_by_key(|&(_, is_top)| is_top)
                .map(|(v, _)| v);
            let Some(anchor) = anchor else {
                continue;
            };

            for member in family {
                if member != anchor {
                    self.check_and_propagate(member, &[anchor]);
                }
            }
        }
    }

    /// Clear the per-context instantiation flag on every node; invoked
    /// between collapse contexts.
    pub fn reset_current_call_stack(&mut self) {
        for node in &mut self.nodes {
            node.tainted_in_current_stack = false;
        }
    }

    pub fn dump(&self, func: &Function, sink: &mut LogSink, level: Verbosity) {
        if !sink.enabled(level) {
            return;
        }
        sink.log(level, format!("summary graph for `{}`:", func.name));
        for &id in &self.top_level {
            let node = self.node(id);
            let mut tags = Vec::new();
            if node.is_argument {
                tags.push("argument".to_string());
            }
            if node.is_call_site_return {
                tags.push("call site".to_string());
            }
            if node.is_return_value {
                tags.push("return value".to_string());
            }
            if let Some(nan) = node.nan_source_id {
                tags.push(format!("nan source #{}", nan.0));
            }
            let suffix = if tags.is_empty() {
                String::new()
            } else {
                format!(" ({})", tags.join(", "))
            };
            sink.log(
                level,
                format!("  top: {}{}", render_value(func, node.value), suffix),
            );
            for &child in &node.edges {
                let child_node = self.node(child);
                sink.log(
                    level,
                    format!("    child: {}", render_value(func, child_node.value)),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::NanSourceId;
    use achlys_core::ir::{IrType, ModuleBuilder};

    fn two_arg_func() -> (achlys_core::ir::Module, FunctionId) {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", &[IrType::Double, IrType::Int(32)], IrType::Double);
        {
            let mut b = mb.body(f);
            let arg = b.arg(0);
            b.ret(arg);
        }
        (mb.finish(), f)
    }

    #[test]
    fn float_arguments_become_nan_sources() {
        let (module, fid) = two_arg_func();
        let func = module.function(fid);
        let mut ids = NanIdAllocator::new();
        let mut graph = TaintDepGraph::new(fid);

        graph.add_argument(func, func.params[0], 0, &mut ids);
        graph.add_argument(func, func.params[1], 1, &mut ids);

        let float_node = graph.node(graph.lookup(func.params[0]).unwrap());
        assert!(float_node.is_nan_source());
        assert_eq!(float_node.nan_source_id, Some(NanSourceId(1)));

        let int_node = graph.node(graph.lookup(func.params[1]).unwrap());
        assert_eq!(int_node.nan_status, NanStatus::Unknown);
        assert_eq!(ids.allocated(), 1);
    }

    #[test]
    fn edges_are_symmetric() {
        let (module, fid) = two_arg_func();
        let func = module.function(fid);
        let mut ids = NanIdAllocator::new();
        let mut graph = TaintDepGraph::new(fid);

        graph.add_argument(func, func.params[0], 0, &mut ids);
        let derived = ValueId(10);
        graph.check_and_propagate(derived, &[func.params[0]]);

        let parent = graph.lookup(func.params[0]).unwrap();
        let child = graph.lookup(derived).unwrap();
        assert!(graph.node(parent).edges.contains(&child));
        assert!(graph.node(child).edges.contains(&parent));
    }

    #[test]
    fn derived_deps_connect_to_top_level_ancestors() {
        let (module, fid) = two_arg_func();
        let func = module.function(fid);
        let mut ids = NanIdAllocator::new();
        let mut graph = TaintDepGraph::new(fid);

        graph.add_argument(func, func.params[0], 0, &mut ids);
        let mid = ValueId(10);
        let leaf = ValueId(11);
        graph.check_and_propagate(mid, &[func.params[0]]);
        // leaf depends on mid (a derived node); it must connect to the
        // argument, not to mid.
        graph.check_and_propagate(leaf, &[mid]);

        let top = graph.lookup(func.params[0]).unwrap();
        let leaf_node = graph.node(graph.lookup(leaf).unwrap());
        assert_eq!(leaf_node.edges.as_slice(), &[top]);
        // NaN pedigree flowed through the derived hop.
        assert_eq!(leaf_node.nan_status, NanStatus::TaintedNan);
    }

    #[test]
    fn untainted_deps_create_no_node() {
        let (_, fid) = two_arg_func();
        let mut graph = TaintDepGraph::new(fid);
        graph.check_and_propagate(ValueId(5), &[ValueId(6), ValueId(7)]);
        assert!(!graph.contains(ValueId(5)));
    }

    #[test]
    fn removal_unlinks_both_sides() {
        let (module, fid) = two_arg_func();
        let func = module.function(fid);
        let mut ids = NanIdAllocator::new();
        let mut graph = TaintDepGraph::new(fid);

        graph.add_argument(func, func.params[0], 0, &mut ids);
        let derived = ValueId(10);
        graph.check_and_propagate(derived, &[func.params[0]]);
        let parent = graph.lookup(func.params[0]).unwrap();

        graph.remove_taint(derived);
        assert!(!graph.contains(derived));
        assert!(graph.node(parent).edges.is_empty());
    }

    #[test]
    fn call_site_return_inherits_nan_pedigree() {
        let (module, fid) = two_arg_func();
        let func = module.function(fid);
        let mut ids = NanIdAllocator::new();
        let mut graph = TaintDepGraph::new(fid);

        graph.add_argument(func, func.params[0], 0, &mut ids);
        let ret = ValueId(20);
        graph.add_call_site_return(ret, &[func.params[0]]);

        let node = graph.node(graph.lookup(ret).unwrap());
        assert_eq!(node.nan_status, NanStatus::TaintedNan);
        assert_eq!(node.derived_nan_ids.as_slice(), &[NanSourceId(1)]);
        assert_eq!(graph.call_site_returns().len(), 1);
    }

    #[test]
    fn reset_clears_every_stack_flag() {
        let (module, fid) = two_arg_func();
        let func = module.function(fid);
        let mut ids = NanIdAllocator::new();
        let mut graph = TaintDepGraph::new(fid);

        graph.add_argument(func, func.params[0], 0, &mut ids);
        let id = graph.lookup(func.params[0]).unwrap();
        graph.node_mut(id).tainted_in_current_stack = true;
        graph.reset_current_call_stack();
        assert!(!graph.node(id).tainted_in_current_stack);
    }
}
