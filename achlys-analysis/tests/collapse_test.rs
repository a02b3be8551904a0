//! Constraint-collapse tests: context instantiation, call ordering,
//! recursion handling, and re-run determinism.

use achlys_analysis::collapse::{AttackerNanSet, CollapseSolver, FunctionCallStack};
use achlys_analysis::engine::AnalysisSession;
use achlys_core::ir::{BinaryOp, FunctionId, IrType, Module, ModuleBuilder, Predicate};
use achlys_core::logging::{LogSink, Verbosity};
use achlys_core::traits::NoDemangle;
use achlys_core::AchlysConfig;

fn argv_ty() -> IrType {
    IrType::Int(8).ptr_to().ptr_to()
}

fn run(module: Module) -> achlys_analysis::engine::AnalysisOutcome {
    AnalysisSession::new(module, AchlysConfig::default())
        .run()
        .expect("analysis should succeed")
}

/// main(argc, argv) calls ratio(argc-as-double, argc-as-double); the
/// callee divides its arguments and branches on the quotient.
fn divider_module(second_arg_tainted: bool) -> (Module, FunctionId, FunctionId) {
    let mut mb = ModuleBuilder::new();
    let main = mb.declare("main", &[IrType::Int(32), argv_ty()], IrType::Int(32));
    let ratio = mb.declare("ratio", &[IrType::Double, IrType::Double], IrType::Int(1));
    {
        let mut b = mb.body(ratio);
        let num = b.arg(0);
        let den = b.arg(1);
        let q = b.binary(BinaryOp::FDiv, num, den);
        let zero = b.const_double(0.0);
        let cond = b.cmp(Predicate::Gt, q, zero);
        let then_block = b.add_block("then");
        let else_block = b.add_block("else");
        b.cond_br(cond, then_block, else_block);
        b.switch_to(then_block);
        b.ret(cond);
        b.switch_to(else_block);
        b.ret(cond);
    }
    {
        let mut b = mb.body(main);
        let argc = b.arg(0);
        let tainted = b.cast(
            achlys_core::ir::CastKind::SiToFp,
            argc,
            IrType::Double,
        );
        let second = if second_arg_tainted {
            tainted
        } else {
            // A local double never touched by input.
            let clean_slot = b.alloca(IrType::Double);
            let c = b.const_double(2.0);
            b.store(c, clean_slot);
            b.load(clean_slot)
        };
        let _verdict = b.call(ratio, &[tainted, second], IrType::Int(1));
        let rv = b.const_int(0, 32);
        b.ret(rv);
    }
    (mb.finish(), main, ratio)
}

#[test]
fn fully_tainted_division_is_recorded_in_the_callee() {
    let (module, _main, ratio) = divider_module(true);
    let outcome = run(module);

    assert_eq!(outcome.report.len(), 1, "log: {}", outcome.log.debug_output());
    assert_eq!(outcome.report.hazards[0].function, "ratio");
    assert!(outcome.report.hazards[0].instruction.contains("fdiv"));
    assert!(outcome.graphs.contains_key(&ratio));
}

#[test]
fn half_tainted_division_is_discarded_at_collapse() {
    let (module, _main, ratio) = divider_module(false);
    let outcome = run(module);

    // The division is NaN-flagged in the summary, because within the
    // callee either argument might be tainted by some context.
    let ratio_set = &outcome.taint_sets[&ratio];
    assert_eq!(ratio_set.nan_sources().len(), 1);
    // But in this context only the numerator is tainted, so no hazard
    // survives the collapse.
    assert!(outcome.report.is_empty());
}

#[test]
fn recursion_guard_terminates_and_base_case_taints_the_return() {
    let mut mb = ModuleBuilder::new();
    let main = mb.declare("main", &[IrType::Int(32), argv_ty()], IrType::Int(32));
    let fact = mb.declare("factorial", &[IrType::Int(32)], IrType::Int(32));
    {
        let mut b = mb.body(fact);
        let n = b.arg(0);
        let one = b.const_int(1, 32);
        let cond = b.cmp(Predicate::Le, n, one);
        let base = b.add_block("base");
        let recurse = b.add_block("recurse");
        b.cond_br(cond, base, recurse);
        b.switch_to(base);
        b.ret(one);
        b.switch_to(recurse);
        let smaller = b.binary(BinaryOp::Sub, n, one);
        let inner = b.call(fact, &[smaller], IrType::Int(32));
        let product = b.binary(BinaryOp::Mul, n, inner);
        b.ret(product);
    }
    {
        let mut b = mb.body(main);
        let argc = b.arg(0);
        let r = b.call(fact, &[argc], IrType::Int(32));
        b.ret(r);
    }
    let module = mb.finish();
    let outcome = run(module.clone());

    // No NaN anywhere; the point is termination plus return taint.
    assert!(outcome.report.is_empty());

    let mut graphs = outcome.graphs;
    let mut sink = LogSink::new(Verbosity::Silent);
    let mut solver = CollapseSolver::new(&module, &mut graphs, &mut sink, &NoDemangle);

    // With a tainted argument, the multiply (hence the return) is tainted
    // through the non-recursive operand even though the recursive edge
    // reports untainted.
    let mut stack = FunctionCallStack::new();
    let mut out = AttackerNanSet::new();
    assert!(solver.collapse(fact, &mut stack, &[0], &mut out));
    assert_eq!(stack.depth(), 0, "stack must unwind completely");

    // With no tainted argument the return is clean.
    let mut out = AttackerNanSet::new();
    assert!(!solver.collapse(fact, &mut stack, &[], &mut out));
}

#[test]
fn collapse_is_idempotent_across_reruns() {
    let (module, main, _ratio) = divider_module(true);
    let outcome = run(module.clone());
    let mut graphs = outcome.graphs;
    let mut sink = LogSink::new(Verbosity::Silent);
    let mut solver = CollapseSolver::new(&module, &mut graphs, &mut sink, &NoDemangle);

    let mut first = AttackerNanSet::new();
    let mut stack = FunctionCallStack::new();
    solver.collapse(main, &mut stack, &[0, 1], &mut first);

    let mut second = AttackerNanSet::new();
    solver.collapse(main, &mut stack, &[0, 1], &mut second);

    let a: Vec<_> = first.iter().collect();
    let b: Vec<_> = second.iter().collect();
    assert_eq!(a, b, "reset_current_call_stack contract violated");
    assert!(!a.is_empty());
}

#[test]
fn call_sites_resolve_in_source_order() {
    // second() receives first()'s result; ordering matters because the
    // call-site taint of `first` must be settled before `second` is
    // instantiated.
    let mut mb = ModuleBuilder::new();
    let main = mb.declare("main", &[IrType::Int(32), argv_ty()], IrType::Int(32));
    let first = mb.declare("first", &[IrType::Int(32)], IrType::Int(32));
    let second = mb.declare("second", &[IrType::Int(32)], IrType::Int(32));
    {
        let mut b = mb.body(first);
        let n = b.arg(0);
        b.ret(n);
    }
    {
        let mut b = mb.body(second);
        let n = b.arg(0);
        b.ret(n);
    }
    let (x, y);
    {
        let mut b = mb.body(main);
        let argc = b.arg(0);
        x = b.call(first, &[argc], IrType::Int(32));
        y = b.call(second, &[x], IrType::Int(32));
        let rv = b.const_int(0, 32);
        b.ret(rv);
    }
    let outcome = run(mb.finish());

    let main_graph = &outcome.graphs[&main];
    let order: Vec<_> = main_graph
        .call_site_returns()
        .iter()
        .map(|&id| main_graph.node(id).value)
        .collect();
    assert_eq!(order, vec![x, y]);
    // `second`'s argument was recorded tainted through `first`'s return.
    let y_node = main_graph.node(main_graph.lookup(y).expect("y node"));
    assert_eq!(y_node.call_args.as_slice(), &[x]);
    assert!(outcome.report.is_empty());
}

#[test]
fn filter_is_idempotent() {
    let (module, main, _ratio) = divider_module(true);
    let outcome = run(module.clone());
    let mut graphs = outcome.graphs;

    let mut sink = LogSink::new(Verbosity::Silent);
    let mut solver = CollapseSolver::new(&module, &mut graphs, &mut sink, &NoDemangle);
    let mut set = AttackerNanSet::new();
    let mut stack = FunctionCallStack::new();
    solver.collapse(main, &mut stack, &[0, 1], &mut set);

    achlys_analysis::filter::filter_attacker_nans(&module, &graphs, &mut set, &mut sink);
    let after_first: Vec<_> = set.iter().collect();
    achlys_analysis::filter::filter_attacker_nans(&module, &graphs, &mut set, &mut sink);
    let after_second: Vec<_> = set.iter().collect();

    assert_eq!(after_first, after_second);
}
