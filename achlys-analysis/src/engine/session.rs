//! The inter-procedural driver and analysis session.
//!
//! A session owns the module, the log sink, the NaN-id allocator, and the
//! per-function summaries. Summaries are computed once per function over
//! a worklist seeded at the root; the collapse, filter, and optional
//! instrumentation stages then run over the finished summaries.

use std::collections::VecDeque;
use std::time::Instant;

use achlys_core::config::AchlysConfig;
use achlys_core::errors::AnalysisError;
use achlys_core::ir::{FunctionId, Module, ValueId};
use achlys_core::logging::{LogSink, Verbosity};
use achlys_core::traits::{IdentityAlias, NoDemangle, SymbolDemangler};
use achlys_core::types::collections::{FxHashMap, FxHashSet};

use crate::collapse::{AttackerNanSet, CollapseSolver, FunctionCallStack};
use crate::filter;
use crate::graph::{NanIdAllocator, TaintDepGraph};
use crate::instrument;
use crate::memory::PtrMap;
use crate::oracles::{FunctionCfg, NaturalLoops, ReachingStores};
use crate::report::{self, HazardReport};
use crate::summary::FunctionTaintSet;

use super::intra;
use super::transfer::TransferCtx;

/// Calling context under which a function entered the worklist.
#[derive(Debug, Clone)]
pub struct FunctionContext {
    /// The call instruction, absent for the root.
    pub call_site: Option<ValueId>,
    /// The calling function, absent for the root.
    pub caller: Option<FunctionId>,
    /// Sorted 0-based indexes of tainted arguments; empty means none.
    pub tainted_args: Vec<usize>,
}

impl FunctionContext {
    /// The entry-root context: no call site, the given arguments tainted.
    pub fn root(tainted_args: Vec<usize>) -> Self {
        Self {
            call_site: None,
            caller: None,
            tainted_args,
        }
    }
}

/// Everything the pass produced.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub report: HazardReport,
    /// The module, rewritten when fault injection ran.
    pub module: Module,
    /// Whether any hook was actually spliced in.
    pub rewritten: bool,
    /// The session log; flush it to emit the buffered output.
    pub log: LogSink,
    /// The per-function summary graphs the collapse ran over.
    pub graphs: FxHashMap<FunctionId, TaintDepGraph>,
    /// The per-function flow-sensitive taint sets.
    pub taint_sets: FxHashMap<FunctionId, FunctionTaintSet>,
    /// The per-function pointer maps and trees.
    pub ptr_maps: FxHashMap<FunctionId, PtrMap>,
}

/// One run of the pass over one module.
pub struct AnalysisSession {
    module: Module,
    config: AchlysConfig,
    sink: LogSink,
    nan_ids: NanIdAllocator,
    demangler: Box<dyn SymbolDemangler>,
    taint_sets: FxHashMap<FunctionId, FunctionTaintSet>,
    graphs: FxHashMap<FunctionId, TaintDepGraph>,
    ptr_maps: FxHashMap<FunctionId, PtrMap>,
    analyzed: FxHashSet<FunctionId>,
}

impl AnalysisSession {
    pub fn new(module: Module, config: AchlysConfig) -> Self {
        let sink = LogSink::new(config.effective_verbosity());
        Self {
            module,
            config,
            sink,
            nan_ids: NanIdAllocator::new(),
            demangler: Box::new(NoDemangle),
            taint_sets: FxHashMap::default(),
            graphs: FxHashMap::default(),
            ptr_maps: FxHashMap::default(),
            analyzed: FxHashSet::default(),
        }
    }

    /// Replace the identity demangler, for modules carrying mangled names.
    pub fn with_demangler(mut self, demangler: Box<dyn SymbolDemangler>) -> Self {
        self.demangler = demangler;
        self
    }

    /// Run the whole pass: summaries, collapse, filter, and (when
    /// configured) fault-injection instrumentation.
    pub fn run(mut self) -> Result<AnalysisOutcome, AnalysisError> {
        self.module.validate()?;

        self.sink.log(
            Verbosity::Function,
            "*** calculating function summaries ***",
        );
        let started = Instant::now();

        let Some(root) = self.module.find_root() else {
            self.sink.result("could not find main; aborting");
            return Ok(AnalysisOutcome {
                report: HazardReport::default(),
                module: self.module,
                rewritten: false,
                log: self.sink,
                graphs: self.graphs,
                taint_sets: self.taint_sets,
                ptr_maps: self.ptr_maps,
            });
        };

        let root_func = self.module.function(root);
        let root_args: Vec<usize> = match root_func.arg_count() {
            0 => Vec::new(),
            2 => vec![0, 1],
            arity => {
                return Err(AnalysisError::UnsupportedRootArity {
                    name: root_func.name.clone(),
                    arity,
                })
            }
        };

        let mut worklist: VecDeque<(FunctionId, FunctionContext)> = VecDeque::new();
        let mut queued: FxHashSet<FunctionId> = FxHashSet::default();
        worklist.push_back((root, FunctionContext::root(root_args.clone())));
        queued.insert(root);

        while let Some((function, context)) = worklist.pop_front() {
            let discovered = self.analyze_function(function, &context);
            for (callee, callee_context) in discovered {
                if queued.insert(callee) {
                    worklist.push_back((callee, callee_context));
                }
            }
        }

        self.sink.log(
            Verbosity::Function,
            format!(
                "finished calculating function summaries in {:.3}s",
                started.elapsed().as_secs_f64()
            ),
        );

        self.sink.log(Verbosity::Function, "*** collapsing constraints ***");
        let mut attacker_nans = AttackerNanSet::new();
        {
            let mut solver = CollapseSolver::new(
                &self.module,
                &mut self.graphs,
                &mut self.sink,
                self.demangler.as_ref(),
            );
            let mut stack = FunctionCallStack::new();
            solver.collapse(root, &mut stack, &root_args, &mut attacker_nans);
        }

        self.sink.log(
            Verbosity::Function,
            "*** filtering attacker-controlled NaN sources ***",
        );
        filter::filter_attacker_nans(
            &self.module,
            &self.graphs,
            &mut attacker_nans,
            &mut self.sink,
        );

        let report = report::build_report(&self.module, &self.graphs, &attacker_nans);
        for hazard in &report.hazards {
            let line = match hazard.source_line {
                Some(source_line) => format!(
                    "attacker-controlled nan #{} in `{}` at line {}: {}",
                    hazard.nan_id, hazard.function, source_line, hazard.instruction
                ),
                None => format!(
                    "attacker-controlled nan #{} in `{}`: {}",
                    hazard.nan_id, hazard.function, hazard.instruction
                ),
            };
            self.sink.result(line);
        }

        let mut rewritten = false;
        if self.config.do_fault_injection {
            self.sink.log(
                Verbosity::Function,
                "*** injecting fault-injection instrumentation ***",
            );
            let requests = instrument::rewrite_requests(&self.graphs, &attacker_nans);
            let injected =
                instrument::inject_fault_hooks(&mut self.module, &requests, &mut self.sink);
            rewritten = injected > 0;
        } else {
            self.sink.log(
                Verbosity::Function,
                "fault injection skipped; enable it with --do-fault-injection",
            );
        }

        Ok(AnalysisOutcome {
            report,
            module: self.module,
            rewritten,
            log: self.sink,
            graphs: self.graphs,
            taint_sets: self.taint_sets,
            ptr_maps: self.ptr_maps,
        })
    }

    /// Summarize one function. The first encounter runs the two-pass
    /// analysis; later encounters are no-ops because summaries are
    /// context-free.
    fn analyze_function(
        &mut self,
        function: FunctionId,
        context: &FunctionContext,
    ) -> Vec<(FunctionId, FunctionContext)> {
        let name = self
            .demangler
            .demangle(&self.module.function(function).name);
        self.sink.log(
            Verbosity::Function,
            format!("[step] analyzing function `{name}`"),
        );

        if self.analyzed.contains(&function) {
            self.sink
                .log(Verbosity::Function, "  already summarized; skipping");
            return Vec::new();
        }
        self.analyzed.insert(function);

        let func = self.module.function(function);
        if func.is_declaration {
            return Vec::new();
        }

        let mut set = FunctionTaintSet::new();
        let mut graph = TaintDepGraph::new(function);
        let mut ptrs = PtrMap::new();

        // Every argument joins the summary graph; only context-tainted
        // ones enter the taint set. The root's arguments are tainted
        // unconditionally, a callee's conditionally on themselves.
        for (index, &param) in func.params.iter().enumerate() {
            graph.add_argument(func, param, index, &mut self.nan_ids);
            if context.tainted_args.contains(&index) {
                if context.caller.is_none() {
                    set.check_and_propagate(param, &[]);
                } else {
                    set.taint_with_dependency(param, param);
                }
                self.sink.log(
                    Verbosity::Function,
                    format!("[new info] found tainted argument #{index} of `{name}`"),
                );
            }
        }

        let cfg = FunctionCfg::analyze(func);
        let loops = NaturalLoops::analyze(func, &cfg);
        let alias = IdentityAlias;
        let memdep = ReachingStores::new(&alias);
        let mut discovered = Vec::new();

        // First pass: discover pointer derivations while propagating.
        {
            let mut cx = TransferCtx {
                module: &self.module,
                function,
                func,
                set: &mut set,
                graph: &mut graph,
                ptrs: &mut ptrs,
                nan_ids: &mut self.nan_ids,
                memdep: &memdep,
                demangler: self.demangler.as_ref(),
                sink: &mut self.sink,
                discovered_calls: &mut discovered,
            };
            intra::analyze_function_body(&mut cx, &cfg, &loops);
        }

        // Overlay aliasing: the finished pointer tree binds every member
        // of an allocation family to its tainted anchor.
        ptrs.construct_tree();
        graph.merge_mem_dep_graph(ptrs.tree());

        // Second pass recomputes taints with the overlay in place.
        set.snapshot();
        {
            let mut cx = TransferCtx {
                module: &self.module,
                function,
                func,
                set: &mut set,
                graph: &mut graph,
                ptrs: &mut ptrs,
                nan_ids: &mut self.nan_ids,
                memdep: &memdep,
                demangler: self.demangler.as_ref(),
                sink: &mut self.sink,
                discovered_calls: &mut discovered,
            };
            intra::analyze_function_body(&mut cx, &cfg, &loops);
        }

        set.summarize(func, &mut self.sink, Verbosity::Instruction);
        graph.dump(func, &mut self.sink, Verbosity::Block);
        ptrs.tree().dump(func, &mut self.sink, Verbosity::Block);

        self.taint_sets.insert(function, set);
        self.graphs.insert(function, graph);
        self.ptr_maps.insert(function, ptrs);

        self.sink.log(
            Verbosity::Function,
            format!("[step] finished analyzing function `{name}`"),
        );
        discovered
    }
}
