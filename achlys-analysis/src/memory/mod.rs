//! Pointer-dependency bookkeeping: which base allocation does a value
//! ultimately refer to?

pub mod ptr_map;
pub mod ptr_tree;

pub use ptr_map::PtrMap;
pub use ptr_tree::{PtrDepTree, PtrNodeId};
