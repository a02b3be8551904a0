//! Hash collections used throughout the engine.
//!
//! All engine maps are keyed by arena indices, never by untrusted strings,
//! so the faster FxHash is used everywhere.

pub use rustc_hash::{FxHashMap, FxHashSet};
