//! Natural-loop detection: back edges, loop bodies, nesting depth.

use achlys_core::ir::{BlockId, Function};
use achlys_core::traits::{DominanceOracle, LoopOracle};
use achlys_core::types::collections::{FxHashMap, FxHashSet};

use super::cfg::FunctionCfg;

/// Loop structure of one function, from its back edges.
///
/// A back edge is an edge whose target dominates its source; the loop
/// body is the header plus everything that reaches the latch without
/// passing through the header.
#[derive(Debug, Default)]
pub struct NaturalLoops {
    depth: Vec<usize>,
    /// Loop bodies keyed by header; a header's body includes itself.
    bodies: FxHashMap<BlockId, FxHashSet<BlockId>>,
}

impl NaturalLoops {
    pub fn analyze(func: &Function, cfg: &FunctionCfg) -> Self {
        let block_count = func.blocks.len();
        let mut bodies: FxHashMap<BlockId, FxHashSet<BlockId>> = FxHashMap::default();

        for idx in 0..block_count {
            let source = BlockId(idx as u32);
            for target in func.successors(source) {
                if cfg.dominates(target, source) {
                    let body = bodies.entry(target).or_default();
                    body.insert(target);
                    collect_body(cfg, target, source, body);
                }
            }
        }

        let mut depth = vec![0usize; block_count];
        for body in bodies.values() {
            for block in body {
                depth[block.index()] += 1;
            }
        }

        Self { depth, bodies }
    }

    pub fn max_depth(&self) -> usize {
        self.depth.iter().copied().max().unwrap_or(0)
    }
}

/// Walk predecessors from `latch` back to `header`, accumulating the body.
fn collect_body(
    cfg: &FunctionCfg,
    header: BlockId,
    latch: BlockId,
    body: &mut FxHashSet<BlockId>,
) {
    let mut stack = vec![latch];
    while let Some(block) = stack.pop() {
        if block == header || !body.insert(block) {
            continue;
        }
        for pred in cfg.predecessors(block) {
            stack.push(pred);
        }
    }
}

impl LoopOracle for NaturalLoops {
    fn loop_depth(&self, block: BlockId) -> usize {
        self.depth.get(block.index()).copied().unwrap_or(0)
    }

    fn is_loop_header(&self, block: BlockId) -> bool {
        self.bodies.contains_key(&block)
    }

    fn loop_contains(&self, header: BlockId, block: BlockId) -> bool {
        self.bodies
            .get(&header)
            .is_some_and(|body| body.contains(&block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use achlys_core::ir::{BinaryOp, IrType, ModuleBuilder, Predicate};

    /// entry -> header <-> body, header -> exit; body contains an inner
    /// self-loop block.
    fn nested_loops() -> achlys_core::ir::Module {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", &[IrType::Int(32)], IrType::Void);
        {
            let mut b = mb.body(f);
            let arg = b.arg(0);
            let zero = b.const_int(0, 32);
            let header = b.add_block("header");
            let body = b.add_block("body");
            let inner = b.add_block("inner");
            let exit = b.add_block("exit");
            b.br(header);

            b.switch_to(header);
            let cond = b.cmp(Predicate::Gt, arg, zero);
            b.cond_br(cond, body, exit);

            b.switch_to(body);
            b.br(inner);

            b.switch_to(inner);
            let one = b.const_int(1, 32);
            let step = b.binary(BinaryOp::Sub, arg, one);
            let inner_cond = b.cmp(Predicate::Gt, step, zero);
            // Self back edge makes `inner` a depth-2 loop.
            b.cond_br(inner_cond, inner, header);

            b.switch_to(exit);
            b.ret_void();
        }
        mb.finish()
    }

    #[test]
    fn nesting_depths_and_headers() {
        let module = nested_loops();
        let func = module.function(achlys_core::ir::FunctionId(0));
        let cfg = FunctionCfg::analyze(func);
        let loops = NaturalLoops::analyze(func, &cfg);

        let (entry, header, body, inner, exit) =
            (BlockId(0), BlockId(1), BlockId(2), BlockId(3), BlockId(4));

        assert_eq!(loops.loop_depth(entry), 0);
        assert_eq!(loops.loop_depth(header), 1);
        assert_eq!(loops.loop_depth(body), 1);
        assert_eq!(loops.loop_depth(inner), 2);
        assert_eq!(loops.loop_depth(exit), 0);

        assert!(loops.is_loop_header(header));
        assert!(loops.is_loop_header(inner));
        assert!(!loops.is_loop_header(body));
        assert_eq!(loops.max_depth(), 2);

        // Membership: the outer body spans the nested loop, never the
        // other way around, and never blocks outside the loop.
        assert!(loops.loop_contains(header, header));
        assert!(loops.loop_contains(header, body));
        assert!(loops.loop_contains(header, inner));
        assert!(loops.loop_contains(inner, inner));
        assert!(!loops.loop_contains(inner, body));
        assert!(!loops.loop_contains(header, entry));
        assert!(!loops.loop_contains(header, exit));
    }

    #[test]
    fn straight_line_code_has_no_loops() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", &[], IrType::Void);
        {
            let mut b = mb.body(f);
            b.ret_void();
        }
        let module = mb.finish();
        let func = module.function(achlys_core::ir::FunctionId(0));
        let cfg = FunctionCfg::analyze(func);
        let loops = NaturalLoops::analyze(func, &cfg);
        assert_eq!(loops.max_depth(), 0);
        assert!(!loops.is_loop_header(BlockId(0)));
    }
}
