//! The constraint-collapse solver.
//!
//! Recursive descent from the root context: instantiate each function's
//! summary graph against the concrete tainted-argument set, resolve
//! call-site returns in source order, and record every NaN origination
//! point whose parents are all tainted in the current stack.

use achlys_core::ir::{FunctionId, Module, Opcode, ValueId};
use achlys_core::logging::{LogSink, Verbosity};
use achlys_core::traits::SymbolDemangler;
use achlys_core::types::collections::{FxHashMap, FxHashSet};

use crate::engine::transfer::user_defined_callee;
use crate::graph::{NodeId, NodeKind, TaintDepGraph};

/// Call stack with O(1) recursion detection.
#[derive(Debug, Default)]
pub struct FunctionCallStack {
    stack: Vec<FunctionId>,
    members: FxHashSet<FunctionId>,
}

impl FunctionCallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, function: FunctionId) {
        self.stack.push(function);
        self.members.insert(function);
    }

    pub fn pop(&mut self) {
        if let Some(function) = self.stack.pop() {
            self.members.remove(&function);
        }
    }

    pub fn is_recursion(&self, function: FunctionId) -> bool {
        self.members.contains(&function)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// Attacker-controlled NaN origination points, keyed by owning function.
#[derive(Debug, Default)]
pub struct AttackerNanSet {
    entries: Vec<(FunctionId, NodeId)>,
    index: FxHashSet<(FunctionId, NodeId)>,
}

impl AttackerNanSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node; returns false if it was already present.
    pub fn add(&mut self, function: FunctionId, node: NodeId) -> bool {
        if self.index.insert((function, node)) {
            self.entries.push((function, node));
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (FunctionId, NodeId)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, function: FunctionId, node: NodeId) -> bool {
        self.index.contains(&(function, node))
    }

    /// Keep only the entries the predicate approves.
    pub fn retain(&mut self, mut keep: impl FnMut(FunctionId, NodeId) -> bool) {
        let index = &mut self.index;
        self.entries.retain(|&(function, node)| {
            let kept = keep(function, node);
            if !kept {
                index.remove(&(function, node));
            }
            kept
        });
    }
}

pub struct CollapseSolver<'a> {
    module: &'a Module,
    graphs: &'a mut FxHashMap<FunctionId, TaintDepGraph>,
    sink: &'a mut LogSink,
    demangler: &'a dyn SymbolDemangler,
}

impl<'a> CollapseSolver<'a> {
    pub fn new(
        module: &'a Module,
        graphs: &'a mut FxHashMap<FunctionId, TaintDepGraph>,
        sink: &'a mut LogSink,
        demangler: &'a dyn SymbolDemangler,
    ) -> Self {
        Self {
            module,
            graphs,
            sink,
            demangler,
        }
    }

    fn function_name(&self, function: FunctionId) -> String {
        self.demangler
            .demangle(&self.module.function(function).name)
    }

    /// Instantiate `function`'s summary under `tainted_args` and descend
    /// through its call sites. Returns whether the return value is
    /// tainted in this context.
    pub fn collapse(
        &mut self,
        function: FunctionId,
        stack: &mut FunctionCallStack,
        tainted_args: &[usize],
        out: &mut AttackerNanSet,
    ) -> bool {
        let name = self.function_name(function);
        self.sink.log(
            Verbosity::Function,
            format!("[step] collapsing constraints for `{name}`"),
        );

        if !self.graphs.contains_key(&function) {
            self.sink.log(
                Verbosity::Function,
                format!("[warning] no summary graph for `{name}`"),
            );
            return false;
        }
        if stack.is_recursion(function) {
            // Acknowledged unsoundness: the recursive edge contributes no
            // taint.
            tracing::warn!(function = %name, "recursive call; treating return as untainted");
            self.sink.log(
                Verbosity::Function,
                format!("[warning] recursive call to `{name}`; summary not expanded"),
            );
            return false;
        }
        stack.push(function);

        let mut ret_tainted = false;
        let mut tainted_parent_count: FxHashMap<NodeId, usize> = FxHashMap::default();

        // Argument-driven and unconditional top-level sources.
        if let Some(graph) = self.graphs.get_mut(&function) {
            for node_id in graph.top_level_nodes().to_vec() {
                let node = graph.node(node_id);
                let arg_hit = node.is_argument
                    && node
                        .arg_index
                        .is_some_and(|index| tainted_args.contains(&index));
                if !(arg_hit || node.kind == NodeKind::DefiniteTaintSource) {
                    continue;
                }
                graph.node_mut(node_id).tainted_in_current_stack = true;
                let node = graph.node(node_id);
                if node.is_nan_source() {
                    out.add(function, node_id);
                }
                if node.is_return_value {
                    ret_tainted = true;
                }
                mark_children(
                    graph,
                    node_id,
                    &mut tainted_parent_count,
                    &mut ret_tainted,
                );
            }
        }

        // Call-site returns, strictly in creation (source) order: a later
        // call may depend on the taint outcome of an earlier one.
        let call_sites: Vec<NodeId> = self
            .graphs
            .get(&function)
            .map(|g| g.call_site_returns().to_vec())
            .unwrap_or_default();

        for cs_id in call_sites {
            let Some((call_value, callee_id)) = self.call_site_target(function, cs_id) else {
                continue;
            };

            let child_args = self.tainted_call_arguments(function, call_value);
            let child_ret_tainted = self.collapse(callee_id, stack, &child_args, out);

            if child_ret_tainted {
                let callee_name = self.function_name(callee_id);
                self.sink.log(
                    Verbosity::Function,
                    format!("[step] tainted return from `{callee_name}`"),
                );
                if let Some(graph) = self.graphs.get_mut(&function) {
                    graph.node_mut(cs_id).tainted_in_current_stack = true;
                    if graph.node(cs_id).is_return_value {
                        ret_tainted = true;
                    }
                    mark_children(graph, cs_id, &mut tainted_parent_count, &mut ret_tainted);
                }
            }
        }

        // NaN nodes whose every parent is tainted in this stack are
        // attacker-controlled.
        if let Some(graph) = self.graphs.get(&function) {
            for (&node_id, &count) in &tainted_parent_count {
                if count == graph.node(node_id).edges.len() {
                    out.add(function, node_id);
                    self.sink.log(
                        Verbosity::Function,
                        format!(
                            "[new info] nan source with all parents tainted in `{}`",
                            name
                        ),
                    );
                }
            }
        }
        // Divisions are also confirmed directly from their operands, in
        // case the parent-count bookkeeping missed them.
        self.confirm_tainted_divisions(function, out);

        if let Some(graph) = self.graphs.get_mut(&function) {
            graph.reset_current_call_stack();
        }
        stack.pop();

        self.sink.log(
            Verbosity::Function,
            format!("[step] finished collapsing `{name}`; return tainted = {ret_tainted}"),
        );
        ret_tainted
    }

    /// Resolve a call-site node to its user-defined callee.
    fn call_site_target(
        &mut self,
        function: FunctionId,
        cs_id: NodeId,
    ) -> Option<(ValueId, FunctionId)> {
        let graph = self.graphs.get(&function)?;
        let call_value = graph.node(cs_id).value;
        let inst = self.module.function(function).instruction(call_value)?;
        let Opcode::Call(callee) = &inst.opcode else {
            return None;
        };
        let callee_id = user_defined_callee(self.module, callee)?;
        Some((call_value, callee_id))
    }

    /// Which argument positions of this call are tainted in the current
    /// stack. Constants never are; a non-constant argument missing from
    /// the summary graph carries no taint either.
    fn tainted_call_arguments(&mut self, function: FunctionId, call_value: ValueId) -> Vec<usize> {
        let func = self.module.function(function);
        let Some(inst) = func.instruction(call_value) else {
            return Vec::new();
        };
        let Some(graph) = self.graphs.get(&function) else {
            return Vec::new();
        };

        let mut tainted = Vec::new();
        for (index, &arg) in inst.operands.iter().enumerate() {
            if func.is_constant(arg) {
                continue;
            }
            match graph.lookup(arg) {
                Some(node_id) if graph.node(node_id).tainted_in_current_stack => {
                    tainted.push(index);
                }
                Some(_) => {}
                None => {
                    self.sink.log(
                        Verbosity::Instruction,
                        format!(
                            "[warning] call argument not in summary graph of `{}`; \
                             treating as untainted",
                            func.name
                        ),
                    );
                }
            }
        }
        tainted
    }

    /// A division NaN whose numerator and denominator are both tainted in
    /// the current stack is attacker-controlled.
    fn confirm_tainted_divisions(&mut self, function: FunctionId, out: &mut AttackerNanSet) {
        let func = self.module.function(function);
        let Some(graph) = self.graphs.get(&function) else {
            return;
        };

        let mut confirmed = Vec::new();
        for node_id in graph.node_ids() {
            let node = graph.node(node_id);
            if !node.is_nan_source() {
                continue;
            }
            let Some(inst) = func.instruction(node.value) else {
                continue;
            };
            let Opcode::Binary(op) = &inst.opcode else {
                continue;
            };
            if !op.is_division() {
                continue;
            }
            let both_tainted = inst.operands.iter().take(2).all(|&operand| {
                graph
                    .lookup(operand)
                    .is_some_and(|id| graph.node(id).tainted_in_current_stack)
            });
            if both_tainted {
                confirmed.push(node_id);
            }
        }
        for node_id in confirmed {
            out.add(function, node_id);
        }
    }
}

/// Mark every child of a freshly tainted top-level node, counting tainted
/// parents of NaN children and noticing tainted returns.
fn mark_children(
    graph: &mut TaintDepGraph,
    parent: NodeId,
    tainted_parent_count: &mut FxHashMap<NodeId, usize>,
    ret_tainted: &mut bool,
) {
    for child_id in graph.node(parent).edges.to_vec() {
        graph.node_mut(child_id).tainted_in_current_stack = true;
        let child = graph.node(child_id);
        if child.is_nan_source() {
            *tainted_parent_count.entry(child_id).or_insert(0) += 1;
        }
        if child.is_return_value {
            *ret_tainted = true;
        }
    }
}
