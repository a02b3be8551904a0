//! The per-function may-taint set.
//!
//! Maps each tainted value to the values its taint is conditional on; an
//! empty dependency list means the taint is unconditional. Carries the
//! NaN-source and tainted-NaN subsets and the per-loop change frames the
//! fixpoint driver reads.

use achlys_core::ir::{render_value, Function, ValueId};
use achlys_core::logging::{LogSink, Verbosity};
use achlys_core::types::collections::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

type DepList = SmallVec<[ValueId; 4]>;

#[derive(Debug, Default)]
pub struct FunctionTaintSet {
    taint: FxHashMap<ValueId, DepList>,
    /// First instruction that can originate each NaN.
    nan_sources: FxHashSet<ValueId>,
    /// Values that are both tainted and of NaN lineage.
    tainted_nans: FxHashSet<ValueId>,
    return_tainted: bool,
    return_deps: DepList,
    has_changed: bool,
    /// One change flag per active loop, innermost last.
    loop_changed: Vec<bool>,
}

impl FunctionTaintSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_change(&mut self) {
        self.has_changed = true;
        // Propagate outward: an inner change re-arms every enclosing loop.
        for frame in &mut self.loop_changed {
            *frame = true;
        }
    }

    /// Taint `value` if any dependency is tainted; an empty `deps` taints
    /// unconditionally (sources and root arguments).
    pub fn check_and_propagate(&mut self, value: ValueId, deps: &[ValueId]) {
        let mut combined = DepList::new();
        let mut tainted = deps.is_empty();
        let mut unconditional = deps.is_empty();
        let mut nan = false;

        for dep in deps {
            if let Some(dep_deps) = self.taint.get(dep) {
                tainted = true;
                if dep_deps.is_empty() {
                    unconditional = true;
                }
                for &d in dep_deps {
                    if !combined.contains(&d) {
                        combined.push(d);
                    }
                }
                if self.tainted_nans.contains(dep) {
                    nan = true;
                }
            }
        }

        if !tainted {
            return;
        }
        if nan && self.tainted_nans.insert(value) {
            self.record_change();
        }
        if unconditional {
            combined.clear();
        }
        if !self.taint.contains_key(&value) {
            self.taint.insert(value, combined);
            self.record_change();
        }
    }

    /// Taint `value` conditionally on a single dependency, bypassing the
    /// tainted-dep scan. Used for call returns pending collapse and for
    /// non-root tainted arguments.
    pub fn taint_with_dependency(&mut self, value: ValueId, dep: ValueId) {
        if !self.taint.contains_key(&value) {
            self.taint.insert(value, SmallVec::from_slice(&[dep]));
            self.record_change();
        }
    }

    pub fn remove_taint(&mut self, value: ValueId) {
        self.taint.remove(&value);
        self.nan_sources.remove(&value);
        self.tainted_nans.remove(&value);
    }

    /// Register `value` as a NaN origination point.
    pub fn add_nan_source(&mut self, value: ValueId) {
        if self.nan_sources.insert(value) {
            self.record_change();
        }
        self.tainted_nans.insert(value);
    }

    pub fn is_tainted(&self, value: ValueId) -> bool {
        self.taint.contains_key(&value)
    }

    pub fn is_unconditional_tainted(&self, value: ValueId) -> bool {
        self.taint.get(&value).is_some_and(|deps| deps.is_empty())
    }

    pub fn is_nan_value(&self, value: ValueId) -> bool {
        self.tainted_nans.contains(&value)
    }

    pub fn nan_sources(&self) -> &FxHashSet<ValueId> {
        &self.nan_sources
    }

    pub fn tainted_nans(&self) -> &FxHashSet<ValueId> {
        &self.tainted_nans
    }

    pub fn len(&self) -> usize {
        self.taint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taint.is_empty()
    }

    /// Record the taint standing of the function's returned value.
    pub fn mark_return_value(&mut self, value: ValueId) {
        match self.taint.get(&value) {
            Some(deps) => {
                self.return_tainted = true;
                self.return_deps = deps.clone();
            }
            None => {
                self.return_tainted = false;
                self.return_deps.clear();
            }
        }
    }

    pub fn return_taint(&self) -> (bool, &[ValueId]) {
        (self.return_tainted, &self.return_deps)
    }

    pub fn has_changed(&self) -> bool {
        self.has_changed
    }

    /// Clear the change flag before a pass so convergence can be observed.
    pub fn snapshot(&mut self) {
        self.has_changed = false;
    }

    // Loop fixpoint bookkeeping. Each active loop owns one frame; a fresh
    // frame starts armed so the loop body runs at least once.

    pub fn track_new_loop(&mut self) {
        self.loop_changed.push(true);
    }

    pub fn reset_current_loop_changed(&mut self) {
        if let Some(frame) = self.loop_changed.last_mut() {
            *frame = false;
        }
    }

    pub fn current_loop_changed(&self) -> bool {
        self.loop_changed.last().copied().unwrap_or(false)
    }

    pub fn finish_tracking_loop(&mut self) {
        self.loop_changed.pop();
    }

    pub fn summarize(&self, func: &Function, sink: &mut LogSink, level: Verbosity) {
        if !sink.enabled(level) {
            return;
        }
        sink.log(level, format!("taint set of `{}`:", func.name));
        for (value, deps) in &self.taint {
            let rendered: Vec<String> = deps.iter().map(|d| render_value(func, *d)).collect();
            sink.log(
                level,
                format!(
                    "  {} depends on {{{}}}",
                    render_value(func, *value),
                    rendered.join(", ")
                ),
            );
        }
        for value in &self.tainted_nans {
            sink.log(level, format!("  nan: {}", render_value(func, *value)));
        }
    }
}
