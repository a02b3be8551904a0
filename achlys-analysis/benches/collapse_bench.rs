//! Summary construction + constraint collapse over a deep call chain.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use achlys_analysis::engine::AnalysisSession;
use achlys_core::ir::{BinaryOp, CastKind, IrType, Module, ModuleBuilder, Predicate};
use achlys_core::AchlysConfig;

/// main -> f0 -> f1 -> ... -> f{depth-1}, each frame dividing its tainted
/// argument and branching on the quotient.
fn chain_module(depth: usize) -> Module {
    let mut mb = ModuleBuilder::new();
    let main = mb.declare(
        "main",
        &[IrType::Int(32), IrType::Int(8).ptr_to().ptr_to()],
        IrType::Int(32),
    );
    let links: Vec<_> = (0..depth)
        .map(|i| mb.declare(&format!("f{i}"), &[IrType::Double], IrType::Double))
        .collect();

    for (i, &link) in links.iter().enumerate() {
        let mut b = mb.body(link);
        let x = b.arg(0);
        let two = b.const_double(2.0);
        let q = b.binary(BinaryOp::FDiv, x, two);
        let next = if i + 1 < depth {
            Some(b.call(links[i + 1], &[q], IrType::Double))
        } else {
            None
        };
        let zero = b.const_double(0.0);
        let cond = b.cmp(Predicate::Gt, q, zero);
        let t = b.add_block("t");
        let e = b.add_block("e");
        b.cond_br(cond, t, e);
        b.switch_to(t);
        match next {
            Some(r) => b.ret(r),
            None => b.ret(q),
        }
        b.switch_to(e);
        b.ret(q);
    }

    {
        let mut b = mb.body(main);
        let argc = b.arg(0);
        let seed = b.cast(CastKind::SiToFp, argc, IrType::Double);
        let _ = b.call(links[0], &[seed], IrType::Double);
        let rv = b.const_int(0, 32);
        b.ret(rv);
    }
    mb.finish()
}

fn bench_full_pass(c: &mut Criterion) {
    for depth in [8usize, 32] {
        c.bench_function(&format!("full_pass_chain_depth_{depth}"), |b| {
            b.iter(|| {
                let module = chain_module(black_box(depth));
                let outcome = AnalysisSession::new(module, AchlysConfig::default())
                    .run()
                    .expect("analysis");
                black_box(outcome.report.len())
            })
        });
    }
}

criterion_group!(benches, bench_full_pass);
criterion_main!(benches);
