//! Modules, functions, and basic blocks.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::errors::ModuleError;

use super::types::IrType;
use super::value::{Instruction, Opcode, ValueDef, ValueId};

/// Module-wide function index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FunctionId(pub u32);

impl FunctionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Function-local basic block index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Block terminators. Terminators are not arena values; the returned or
/// branched-on values are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret(Option<ValueId>),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            Self::Br(target) => SmallVec::from_slice(&[*target]),
            Self::CondBr {
                then_block,
                else_block,
                ..
            } => SmallVec::from_slice(&[*then_block, *else_block]),
            Self::Ret(_) | Self::Unreachable => SmallVec::new(),
        }
    }

    /// The branch condition, for conditional branches.
    pub fn condition(&self) -> Option<ValueId> {
        match self {
            Self::CondBr { cond, .. } => Some(*cond),
            _ => None,
        }
    }
}

/// A basic block: a label, instructions in order, and a terminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub label: String,
    pub instructions: Vec<ValueId>,
    pub terminator: Option<Terminator>,
}

impl Block {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instructions: Vec::new(),
            terminator: None,
        }
    }
}

/// A function: parameters, blocks, and the value arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Argument values, one per parameter, in order.
    pub params: Vec<ValueId>,
    pub ret_ty: IrType,
    pub blocks: Vec<Block>,
    pub values: Vec<ValueDef>,
    /// Declarations have no body; they model external library functions.
    pub is_declaration: bool,
}

impl Function {
    pub fn value(&self, id: ValueId) -> &ValueDef {
        &self.values[id.index()]
    }

    pub fn ty_of(&self, id: ValueId) -> &IrType {
        self.values[id.index()].ty()
    }

    pub fn instruction(&self, id: ValueId) -> Option<&Instruction> {
        self.values.get(id.index()).and_then(ValueDef::as_instruction)
    }

    pub fn is_constant(&self, id: ValueId) -> bool {
        self.values[id.index()].is_constant()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn entry(&self) -> Option<BlockId> {
        (!self.blocks.is_empty()).then_some(BlockId(0))
    }

    pub fn arg_count(&self) -> usize {
        self.params.len()
    }

    /// Successor blocks of `block`, per its terminator.
    pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 2]> {
        self.block(block)
            .terminator
            .as_ref()
            .map(Terminator::successors)
            .unwrap_or_default()
    }

    /// Instructions that use `id` as an operand.
    pub fn users(&self, id: ValueId) -> Vec<ValueId> {
        let mut out = Vec::new();
        for block in &self.blocks {
            for &inst_id in &block.instructions {
                if let Some(inst) = self.instruction(inst_id) {
                    if inst.operands.contains(&id) {
                        out.push(inst_id);
                    }
                }
            }
        }
        out
    }

    /// Whether any conditional branch in the function tests `id`.
    pub fn branch_consumes(&self, id: ValueId) -> bool {
        self.blocks.iter().any(|block| {
            matches!(
                block.terminator,
                Some(Terminator::CondBr { cond, .. }) if cond == id
            )
        })
    }

    /// The value returned by this function, if any block returns one.
    pub fn returned_value(&self) -> Option<ValueId> {
        self.blocks.iter().find_map(|block| match block.terminator {
            Some(Terminator::Ret(v)) => v,
            _ => None,
        })
    }

    fn check_value(&self, id: ValueId) -> Result<(), ModuleError> {
        if id.index() >= self.values.len() {
            return Err(ModuleError::ValueOutOfBounds {
                function: self.name.clone(),
                value: id.0,
            });
        }
        Ok(())
    }

    fn check_block(&self, id: BlockId) -> Result<(), ModuleError> {
        if id.index() >= self.blocks.len() {
            return Err(ModuleError::BlockOutOfBounds {
                function: self.name.clone(),
                block: id.0,
            });
        }
        Ok(())
    }

    /// Validate operand indices, terminators, and per-opcode shape.
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.is_declaration {
            return Ok(());
        }
        if self.blocks.is_empty() {
            return Err(ModuleError::EmptyFunction {
                function: self.name.clone(),
            });
        }
        for (block_idx, block) in self.blocks.iter().enumerate() {
            for &inst_id in &block.instructions {
                self.check_value(inst_id)?;
                let Some(inst) = self.instruction(inst_id) else {
                    continue;
                };
                for &op in &inst.operands {
                    self.check_value(op)?;
                }
                match &inst.opcode {
                    Opcode::Store => {
                        if inst.operands.len() != 2
                            || !self.ty_of(inst.operands[1]).is_pointer_like()
                        {
                            return Err(ModuleError::MalformedStore {
                                function: self.name.clone(),
                            });
                        }
                    }
                    Opcode::Phi(incoming) => {
                        if incoming.len() != inst.operands.len() {
                            return Err(ModuleError::PhiArityMismatch {
                                function: self.name.clone(),
                                values: inst.operands.len(),
                                blocks: incoming.len(),
                            });
                        }
                        for &bb in incoming {
                            self.check_block(bb)?;
                        }
                    }
                    _ => {}
                }
            }
            match &block.terminator {
                None => {
                    return Err(ModuleError::MissingTerminator {
                        function: self.name.clone(),
                        block: block_idx as u32,
                    })
                }
                Some(term) => {
                    for bb in term.successors() {
                        self.check_block(bb)?;
                    }
                    if let Some(cond) = term.condition() {
                        self.check_value(cond)?;
                    }
                    if let Some(Terminator::Ret(Some(v))) = block.terminator {
                        self.check_value(v)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// A whole program in IR form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|idx| FunctionId(idx as u32))
    }

    pub fn iter(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(idx, f)| (FunctionId(idx as u32), f))
    }

    /// Find the entry function of the program: a defined function named
    /// exactly `main`.
    pub fn find_root(&self) -> Option<FunctionId> {
        self.iter()
            .find(|(_, f)| !f.is_declaration && f.name == "main")
            .map(|(id, _)| id)
    }

    /// Validate every function body.
    pub fn validate(&self) -> Result<(), ModuleError> {
        for function in &self.functions {
            function.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::ModuleBuilder;
    use crate::ir::types::IrType;
    use crate::ir::value::{BinaryOp, Predicate};

    fn sample() -> Module {
        let mut mb = ModuleBuilder::new();
        let main = mb.declare("main", &[], IrType::Int(32));
        {
            let mut b = mb.body(main);
            let x = b.alloca(IrType::Double);
            let c = b.const_double(4.0);
            b.store(c, x);
            let v = b.load(x);
            let q = b.binary(BinaryOp::FDiv, c, v);
            let zero = b.const_double(0.0);
            let cond = b.cmp(Predicate::Gt, q, zero);
            let t = b.add_block("t");
            let e = b.add_block("e");
            b.cond_br(cond, t, e);
            b.switch_to(t);
            let one = b.const_int(1, 32);
            b.ret(one);
            b.switch_to(e);
            let z = b.const_int(0, 32);
            b.ret(z);
        }
        mb.finish()
    }

    #[test]
    fn serde_round_trip_preserves_the_module() {
        let module = sample();
        let json = serde_json::to_string(&module).expect("serialize");
        let back: Module = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(module, back);
        back.validate().expect("round-tripped module validates");
    }

    #[test]
    fn find_root_skips_declarations() {
        let mut mb = ModuleBuilder::new();
        mb.declare("main", &[], IrType::Int(32));
        let module = mb.finish();
        // A declared-but-undefined main is not an entry point.
        assert_eq!(module.find_root(), None);
    }

    #[test]
    fn users_and_branch_consumption() {
        let module = sample();
        let func = module.function(FunctionId(0));
        let entry = &func.blocks[0];
        let load = entry.instructions[2];
        let div = entry.instructions[3];
        let cmp = entry.instructions[4];

        assert!(func.users(load).contains(&div));
        assert!(func.branch_consumes(cmp));
        assert!(!func.branch_consumes(div));
    }
}
