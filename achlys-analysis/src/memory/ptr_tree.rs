//! Two-level pointer tree: base allocations and their derived pointers.
//!
//! Intermediate derivations are collapsed away before the tree is built;
//! every derived node hangs directly off one or more bases.

use achlys_core::ir::{render_value, Function, ValueId};
use achlys_core::logging::{LogSink, Verbosity};
use achlys_core::types::collections::FxHashMap;
use smallvec::SmallVec;

/// Index into the tree's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PtrNodeId(pub u32);

impl PtrNodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct PtrNode {
    value: ValueId,
    parents: SmallVec<[PtrNodeId; 2]>,
    children: SmallVec<[PtrNodeId; 4]>,
}

/// The materialized base/derived tree of one function.
#[derive(Debug, Default)]
pub struct PtrDepTree {
    nodes: Vec<PtrNode>,
    bases: Vec<PtrNodeId>,
    index: FxHashMap<ValueId, PtrNodeId>,
}

impl PtrDepTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_node(&mut self, value: ValueId) -> PtrNodeId {
        if let Some(&id) = self.index.get(&value) {
            return id;
        }
        let id = PtrNodeId(self.nodes.len() as u32);
        self.nodes.push(PtrNode {
            value,
            parents: SmallVec::new(),
            children: SmallVec::new(),
        });
        self.index.insert(value, id);
        id
    }

    /// Register `value` as a base allocation.
    pub fn add_base(&mut self, value: ValueId) {
        let id = self.add_node(value);
        if !self.bases.contains(&id) {
            self.bases.push(id);
        }
    }

    /// Demote `value` from base status. The node survives; only its root
    /// standing is dropped.
    pub fn remove_base(&mut self, value: ValueId) {
        if let Some(&id) = self.index.get(&value) {
            self.bases.retain(|&b| b != id);
        }
    }

    pub fn is_base(&self, value: ValueId) -> bool {
        self.index
            .get(&value)
            .is_some_and(|id| self.bases.contains(id))
    }

    /// Attach `derived` under each listed base; unknown bases are skipped.
    pub fn add_derived(&mut self, derived: ValueId, bases: &[ValueId]) {
        let child = self.add_node(derived);
        for &base in bases {
            let Some(&parent) = self.index.get(&base) else {
                continue;
            };
            if !self.bases.contains(&parent) {
                continue;
            }
            if !self.nodes[parent.index()].children.contains(&child) {
                self.nodes[parent.index()].children.push(child);
                self.nodes[child.index()].parents.push(parent);
            }
        }
    }

    /// Base values, in registration order.
    pub fn bases(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.bases.iter().map(|id| self.nodes[id.index()].value)
    }

    /// Derived values attached under `base`.
    pub fn derived_of(&self, base: ValueId) -> Vec<ValueId> {
        let Some(&id) = self.index.get(&base) else {
            return Vec::new();
        };
        self.nodes[id.index()]
            .children
            .iter()
            .map(|c| self.nodes[c.index()].value)
            .collect()
    }

    pub fn base_count(&self) -> usize {
        self.bases.len()
    }

    pub fn dump(&self, func: &Function, sink: &mut LogSink, level: Verbosity) {
        if !sink.enabled(level) {
            return;
        }
        sink.log(
            level,
            format!("memory dependency tree for `{}`:", func.name),
        );
        for base in self.bases() {
            sink.log(level, format!("  base: {}", render_value(func, base)));
            for derived in self.derived_of(base) {
                sink.log(level, format!("    derived: {}", render_value(func, derived)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_nodes_link_both_directions() {
        let mut tree = PtrDepTree::new();
        let base_a = ValueId(0);
        let base_b = ValueId(1);
        let derived = ValueId(2);
        tree.add_base(base_a);
        tree.add_base(base_b);
        tree.add_derived(derived, &[base_a, base_b]);

        assert_eq!(tree.derived_of(base_a), vec![derived]);
        assert_eq!(tree.derived_of(base_b), vec![derived]);
        assert!(!tree.is_base(derived));
    }

    #[test]
    fn demotion_drops_root_standing_only() {
        let mut tree = PtrDepTree::new();
        let v = ValueId(7);
        tree.add_base(v);
        assert!(tree.is_base(v));
        tree.remove_base(v);
        assert!(!tree.is_base(v));
        assert_eq!(tree.base_count(), 0);
    }

    #[test]
    fn repeated_attachment_is_idempotent() {
        let mut tree = PtrDepTree::new();
        let base = ValueId(0);
        let derived = ValueId(1);
        tree.add_base(base);
        tree.add_derived(derived, &[base]);
        tree.add_derived(derived, &[base]);
        assert_eq!(tree.derived_of(base).len(), 1);
    }
}
