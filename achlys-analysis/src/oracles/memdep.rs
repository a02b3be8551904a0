//! Reaching-store memory dependence.
//!
//! Conservative and flow-insensitive: a load depends on every store to
//! the same pointer (a def) and on every store through a sibling
//! derivation of the same base (a clobber). Anything subtler is left to
//! the pointer-tree overlay.

use achlys_core::ir::{Function, Opcode, ValueId};
use achlys_core::traits::{AliasOracle, MemDep, MemDepKind, MemoryDependenceOracle};

#[derive(Clone, Copy)]
pub struct ReachingStores<'a> {
    alias: &'a dyn AliasOracle,
}

impl<'a> ReachingStores<'a> {
    pub fn new(alias: &'a dyn AliasOracle) -> Self {
        Self { alias }
    }

    /// The base operand when `value` is a pointer derivation.
    fn gep_base(func: &Function, value: ValueId) -> Option<ValueId> {
        func.instruction(value)
            .filter(|inst| matches!(inst.opcode, Opcode::Gep))
            .map(|inst| inst.operands[0])
    }
}

impl MemoryDependenceOracle for ReachingStores<'_> {
    fn store_dependencies(&self, func: &Function, load: ValueId) -> Vec<MemDep> {
        let Some(load_inst) = func.instruction(load) else {
            return Vec::new();
        };
        if !matches!(load_inst.opcode, Opcode::Load) {
            return Vec::new();
        }
        let ptr = load_inst.operands[0];
        let load_base = Self::gep_base(func, ptr);

        let mut deps = Vec::new();
        for block in &func.blocks {
            for &inst_id in &block.instructions {
                let Some(inst) = func.instruction(inst_id) else {
                    continue;
                };
                if !matches!(inst.opcode, Opcode::Store) {
                    continue;
                }
                let dst = inst.operands[1];
                if dst == ptr || self.alias.must_alias(dst, ptr) {
                    deps.push(MemDep {
                        kind: MemDepKind::Def,
                        inst: inst_id,
                    });
                } else if let (Some(load_base), Some(store_base)) =
                    (load_base, Self::gep_base(func, dst))
                {
                    if load_base == store_base {
                        deps.push(MemDep {
                            kind: MemDepKind::Clobber,
                            inst: inst_id,
                        });
                    }
                }
            }
        }
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use achlys_core::ir::{IrType, ModuleBuilder};
    use achlys_core::traits::IdentityAlias;

    #[test]
    fn finds_defs_and_sibling_clobbers() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", &[IrType::Double], IrType::Void);
        let (load, direct_store, sibling_store);
        {
            let mut b = mb.body(f);
            let arg = b.arg(0);
            let arr = b.alloca(IrType::Array(Box::new(IrType::Double), 4));
            let i = b.const_int(0, 64);
            let j = b.const_int(1, 64);
            let p = b.gep(arr, &[i]);
            let q = b.gep(arr, &[j]);
            direct_store = b.store(arg, p);
            sibling_store = b.store(arg, q);
            load = b.load(p);
            b.ret_void();
        }
        let module = mb.finish();
        let func = module.function(achlys_core::ir::FunctionId(0));

        let deps = ReachingStores::new(&IdentityAlias).store_dependencies(func, load);
        assert_eq!(deps.len(), 2);
        assert!(deps
            .iter()
            .any(|d| d.inst == direct_store && d.kind == MemDepKind::Def));
        assert!(deps
            .iter()
            .any(|d| d.inst == sibling_store && d.kind == MemDepKind::Clobber));
    }

    #[test]
    fn unrelated_stores_are_ignored() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", &[IrType::Double], IrType::Void);
        let load;
        {
            let mut b = mb.body(f);
            let arg = b.arg(0);
            let x = b.alloca(IrType::Double);
            let y = b.alloca(IrType::Double);
            b.store(arg, y);
            load = b.load(x);
            b.ret_void();
        }
        let module = mb.finish();
        let func = module.function(achlys_core::ir::FunctionId(0));
        assert!(ReachingStores::new(&IdentityAlias)
            .store_dependencies(func, load)
            .is_empty());
    }
}
