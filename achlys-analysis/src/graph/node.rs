//! Taint graph nodes and NaN identities.

use achlys_core::ir::ValueId;
use smallvec::SmallVec;

/// Index into a graph's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Session-unique identity of one NaN origination point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NanSourceId(pub u32);

/// Allocates NaN-source ids for one analysis session.
///
/// Owned by the session driver, never process-global, so two sessions in
/// one process cannot interfere.
#[derive(Debug)]
pub struct NanIdAllocator {
    next: u32,
}

impl NanIdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn allocate(&mut self) -> NanSourceId {
        let id = NanSourceId(self.next);
        self.next += 1;
        id
    }

    /// Ids handed out so far.
    pub fn allocated(&self) -> u32 {
        self.next - 1
    }
}

impl Default for NanIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Taint standing of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Unknown,
    /// Output of a recognized taint source; tainted in every context.
    DefiniteTaintSource,
    /// Tainted if the calling context taints it (arguments, call returns).
    PossibleTaintSource,
    /// Derived value; tainted when a top-level parent is.
    PossibleTaintVar,
}

/// NaN pedigree of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NanStatus {
    Unknown,
    /// This instruction can originate a NaN.
    Source,
    /// Downstream of one or more NaN origination points.
    TaintedNan,
}

/// One node of the two-level taint dependency graph.
#[derive(Debug)]
pub struct TaintNode {
    pub value: ValueId,
    pub kind: NodeKind,
    pub nan_status: NanStatus,
    pub is_argument: bool,
    pub arg_index: Option<usize>,
    pub is_call_site_return: bool,
    /// Tainted argument values recorded at the call site.
    pub call_args: Vec<ValueId>,
    pub is_return_value: bool,
    /// The identity of this origination point, when `nan_status == Source`.
    pub nan_source_id: Option<NanSourceId>,
    /// Origination points this node descends from, when `TaintedNan`.
    pub derived_nan_ids: SmallVec<[NanSourceId; 2]>,
    /// Instantiation flag; cleared between collapse contexts.
    pub tainted_in_current_stack: bool,
    /// Symmetric adjacency: parents for derived nodes, children for
    /// top-level nodes.
    pub edges: SmallVec<[NodeId; 4]>,
    /// Tombstone set by removal; removed slots stay out of every index.
    pub removed: bool,
}

impl TaintNode {
    pub fn new(value: ValueId) -> Self {
        Self {
            value,
            kind: NodeKind::Unknown,
            nan_status: NanStatus::Unknown,
            is_argument: false,
            arg_index: None,
            is_call_site_return: false,
            call_args: Vec::new(),
            is_return_value: false,
            nan_source_id: None,
            derived_nan_ids: SmallVec::new(),
            tainted_in_current_stack: false,
            edges: SmallVec::new(),
            removed: false,
        }
    }

    /// Top-level nodes are the taint sources of the two-level invariant.
    pub fn is_top_level_kind(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::DefiniteTaintSource | NodeKind::PossibleTaintSource
        )
    }

    pub fn is_nan_source(&self) -> bool {
        matches!(self.nan_status, NanStatus::Source)
    }

    pub fn add_derived_nan_id(&mut self, id: NanSourceId) {
        if !self.derived_nan_ids.contains(&id) {
            self.derived_nan_ids.push(id);
        }
    }
}
