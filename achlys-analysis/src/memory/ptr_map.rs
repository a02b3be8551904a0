//! Derived-pointer map collapsed onto base allocations.
//!
//! During the block walk every pointer derivation is recorded here; at the
//! end of the walk the two-level tree is materialized so downstream
//! readers never chase chains.

use achlys_core::ir::{Function, ValueId};
use achlys_core::types::collections::FxHashMap;
use smallvec::SmallVec;

use super::ptr_tree::PtrDepTree;

/// Per-function mapping `value -> base-set(value)`.
///
/// An empty base-set means the value is itself a base.
#[derive(Debug, Default)]
pub struct PtrMap {
    entries: FxHashMap<ValueId, SmallVec<[ValueId; 2]>>,
    /// Insertion order, for deterministic tree construction.
    order: Vec<ValueId>,
    tree: PtrDepTree,
}

impl PtrMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn admits(func: &Function, value: ValueId) -> bool {
        func.ty_of(value).is_pointer_like()
    }

    fn entry_mut(&mut self, key: ValueId) -> &mut SmallVec<[ValueId; 2]> {
        if !self.entries.contains_key(&key) {
            self.order.push(key);
        }
        self.entries.entry(key).or_default()
    }

    /// Register `key` as a base allocation: an empty base-set plus a tree
    /// root.
    pub fn insert_base(&mut self, func: &Function, key: ValueId) {
        if !Self::admits(func, key) {
            return;
        }
        self.entry_mut(key);
        self.tree.add_base(key);
    }

    /// Record that `key` derives from `val`. Values that are not
    /// pointer-like are silently ignored.
    pub fn insert(&mut self, func: &Function, key: ValueId, val: ValueId) {
        if !Self::admits(func, key) || !Self::admits(func, val) {
            return;
        }

        if self.tree.is_base(val) {
            let bases = self.entry_mut(key);
            if !bases.contains(&val) {
                bases.push(val);
            }
        } else {
            // Collapse: copy val's bases into key's; an unmapped val is
            // treated as a base of its own.
            let copied: SmallVec<[ValueId; 2]> = match self.entries.get(&val) {
                Some(bases) if !bases.is_empty() => bases.clone(),
                _ => SmallVec::from_slice(&[val]),
            };
            let bases = self.entry_mut(key);
            for base in copied {
                if !bases.contains(&base) {
                    bases.push(base);
                }
            }
        }

        // A key that was an implicit root and now derives from a mapped
        // value loses its root standing.
        if self.tree.is_base(key) && self.entries.contains_key(&val) {
            self.tree.remove_base(key);
        }
    }

    pub fn is_base(&self, value: ValueId) -> bool {
        self.tree.is_base(value)
    }

    pub fn bases_of(&self, value: ValueId) -> &[ValueId] {
        self.entries.get(&value).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, value: ValueId) -> bool {
        self.entries.contains_key(&value)
    }

    /// Every other mapped value that shares at least one base with `value`.
    pub fn values_sharing_base(&self, value: ValueId) -> Vec<ValueId> {
        let own: &[ValueId] = match self.entries.get(&value) {
            Some(bases) if !bases.is_empty() => bases,
            // A base shares with everything derived from it.
            Some(_) => std::slice::from_ref(&value),
            None => return Vec::new(),
        };
        // `own` borrows from the map, so walk the order list by value.
        let own: SmallVec<[ValueId; 2]> = SmallVec::from_slice(own);
        self.order
            .iter()
            .copied()
            .filter(|&other| other != value)
            .filter(|other| {
                let other_bases = self.bases_of(*other);
                own.iter()
                    .any(|b| other_bases.contains(b) || *other == *b)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Materialize the two-level tree from the collapsed map.
    pub fn construct_tree(&mut self) {
        let pairs: Vec<(ValueId, SmallVec<[ValueId; 2]>)> = self
            .order
            .iter()
            .filter(|key| !self.tree.is_base(**key))
            .map(|key| (*key, self.entries[key].clone()))
            .collect();
        for (key, bases) in pairs {
            self.tree.add_derived(key, &bases);
        }
    }

    pub fn tree(&self) -> &PtrDepTree {
        &self.tree
    }
}
