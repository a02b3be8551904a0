//! Programmatic IR construction.
//!
//! `ModuleBuilder` reserves function slots up front so bodies can call
//! functions declared later; `FunctionBuilder` appends blocks and
//! instructions to one body.

use smallvec::{smallvec, SmallVec};

use super::module::{Block, BlockId, Function, FunctionId, Module, Terminator};
use super::types::IrType;
use super::value::{
    BinaryOp, Callee, CastKind, ConstKind, Instruction, Opcode, Predicate, UnaryOp, ValueDef,
    ValueId,
};

/// Builds a [`Module`] function by function.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    functions: Vec<Function>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a function slot. The function starts as a declaration; open
    /// a body with [`ModuleBuilder::body`] to define it.
    pub fn declare(&mut self, name: &str, param_tys: &[IrType], ret_ty: IrType) -> FunctionId {
        let mut values = Vec::with_capacity(param_tys.len());
        let mut params = Vec::with_capacity(param_tys.len());
        for (index, ty) in param_tys.iter().enumerate() {
            params.push(ValueId(values.len() as u32));
            values.push(ValueDef::Argument {
                index,
                ty: ty.clone(),
            });
        }
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(Function {
            name: name.to_string(),
            params,
            ret_ty,
            blocks: Vec::new(),
            values,
            is_declaration: true,
        });
        id
    }

    /// Open a builder for the body of a previously declared function. The
    /// entry block is created automatically.
    pub fn body(&mut self, id: FunctionId) -> FunctionBuilder<'_> {
        let func = &mut self.functions[id.index()];
        func.is_declaration = false;
        if func.blocks.is_empty() {
            func.blocks.push(Block::new("entry"));
        }
        FunctionBuilder {
            func,
            current: BlockId(0),
            line: None,
        }
    }

    pub fn finish(self) -> Module {
        Module {
            functions: self.functions,
        }
    }
}

/// Appends instructions to one function body.
#[derive(Debug)]
pub struct FunctionBuilder<'a> {
    func: &'a mut Function,
    current: BlockId,
    line: Option<u32>,
}

impl FunctionBuilder<'_> {
    /// The argument value for parameter `index`.
    pub fn arg(&self, index: usize) -> ValueId {
        self.func.params[index]
    }

    /// Append a new block and return its id; does not switch to it.
    pub fn add_block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.func.blocks.len() as u32);
        self.func.blocks.push(Block::new(label));
        id
    }

    /// Direct subsequent instructions into `block`.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Source line attached to subsequently built instructions.
    pub fn set_line(&mut self, line: u32) {
        self.line = Some(line);
    }

    fn add_value(&mut self, def: ValueDef) -> ValueId {
        let id = ValueId(self.func.values.len() as u32);
        self.func.values.push(def);
        id
    }

    fn push(&mut self, opcode: Opcode, operands: SmallVec<[ValueId; 2]>, ty: IrType) -> ValueId {
        let inst = Instruction {
            opcode,
            operands,
            ty,
            block: self.current,
            source_line: self.line,
        };
        let id = self.add_value(ValueDef::Instruction(inst));
        self.func.blocks[self.current.index()].instructions.push(id);
        id
    }

    pub fn const_int(&mut self, value: i64, bits: u32) -> ValueId {
        self.add_value(ValueDef::Constant {
            kind: ConstKind::Int(value),
            ty: IrType::Int(bits),
        })
    }

    pub fn const_float(&mut self, value: f64) -> ValueId {
        self.add_value(ValueDef::Constant {
            kind: ConstKind::Float(value),
            ty: IrType::Float,
        })
    }

    pub fn const_double(&mut self, value: f64) -> ValueId {
        self.add_value(ValueDef::Constant {
            kind: ConstKind::Float(value),
            ty: IrType::Double,
        })
    }

    pub fn const_null(&mut self, ty: IrType) -> ValueId {
        self.add_value(ValueDef::Constant {
            kind: ConstKind::Null,
            ty,
        })
    }

    pub fn alloca(&mut self, ty: IrType) -> ValueId {
        let result_ty = ty.clone().ptr_to();
        self.push(Opcode::Alloca(ty), smallvec![], result_ty)
    }

    pub fn store(&mut self, value: ValueId, ptr: ValueId) -> ValueId {
        self.push(Opcode::Store, smallvec![value, ptr], IrType::Void)
    }

    pub fn load(&mut self, ptr: ValueId) -> ValueId {
        let ty = self
            .func
            .ty_of(ptr)
            .element()
            .cloned()
            .unwrap_or(IrType::Void);
        self.push(Opcode::Load, smallvec![ptr], ty)
    }

    pub fn gep(&mut self, base: ValueId, indices: &[ValueId]) -> ValueId {
        let base_ty = self.func.ty_of(base).clone();
        // GEP into an aggregate yields a pointer to the element; otherwise
        // the derived pointer keeps the base pointer type.
        let ty = match base_ty.element() {
            Some(IrType::Array(elem, _)) => elem.as_ref().clone().ptr_to(),
            Some(elem) if indices.len() > 1 => elem.clone().ptr_to(),
            _ => base_ty,
        };
        let mut operands: SmallVec<[ValueId; 2]> = smallvec![base];
        operands.extend_from_slice(indices);
        self.push(Opcode::Gep, operands, ty)
    }

    pub fn phi(&mut self, ty: IrType, incoming: &[(ValueId, BlockId)]) -> ValueId {
        let operands: SmallVec<[ValueId; 2]> = incoming.iter().map(|(v, _)| *v).collect();
        let blocks: SmallVec<[BlockId; 2]> = incoming.iter().map(|(_, b)| *b).collect();
        self.push(Opcode::Phi(blocks), operands, ty)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.ty_of(lhs).clone();
        self.push(Opcode::Binary(op), smallvec![lhs, rhs], ty)
    }

    pub fn cast(&mut self, kind: CastKind, value: ValueId, ty: IrType) -> ValueId {
        self.push(Opcode::Cast(kind), smallvec![value], ty)
    }

    pub fn unary(&mut self, op: UnaryOp, value: ValueId) -> ValueId {
        let ty = self.func.ty_of(value).clone();
        self.push(Opcode::Unary(op), smallvec![value], ty)
    }

    pub fn cmp(&mut self, pred: Predicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push(Opcode::Cmp(pred), smallvec![lhs, rhs], IrType::Int(1))
    }

    pub fn call(&mut self, callee: FunctionId, args: &[ValueId], ret_ty: IrType) -> ValueId {
        self.push(
            Opcode::Call(Callee::Local(callee)),
            SmallVec::from_slice(args),
            ret_ty,
        )
    }

    pub fn call_external(&mut self, name: &str, args: &[ValueId], ret_ty: IrType) -> ValueId {
        self.push(
            Opcode::Call(Callee::External(name.to_string())),
            SmallVec::from_slice(args),
            ret_ty,
        )
    }

    pub fn call_indirect(&mut self, args: &[ValueId], ret_ty: IrType) -> ValueId {
        self.push(
            Opcode::Call(Callee::Indirect),
            SmallVec::from_slice(args),
            ret_ty,
        )
    }

    /// An instruction outside the modeled opcode set.
    pub fn other(&mut self, mnemonic: &str, operands: &[ValueId], ty: IrType) -> ValueId {
        self.push(
            Opcode::Other(mnemonic.to_string()),
            SmallVec::from_slice(operands),
            ty,
        )
    }

    fn terminate(&mut self, term: Terminator) {
        self.func.blocks[self.current.index()].terminator = Some(term);
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    pub fn cond_br(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::CondBr {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, value: ValueId) {
        self.terminate(Terminator::Ret(Some(value)));
    }

    pub fn ret_void(&mut self) {
        self.terminate(Terminator::Ret(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_valid_function() {
        let mut mb = ModuleBuilder::new();
        let main = mb.declare("main", &[], IrType::Int(32));
        {
            let mut b = mb.body(main);
            let x = b.alloca(IrType::Double);
            let c = b.const_double(2.0);
            b.store(c, x);
            let v = b.load(x);
            let d = b.binary(BinaryOp::FDiv, c, v);
            let zero = b.const_double(0.0);
            let cond = b.cmp(Predicate::Gt, d, zero);
            let then_block = b.add_block("then");
            let else_block = b.add_block("else");
            b.cond_br(cond, then_block, else_block);
            b.switch_to(then_block);
            let one = b.const_int(1, 32);
            b.ret(one);
            b.switch_to(else_block);
            let zero_i = b.const_int(0, 32);
            b.ret(zero_i);
        }
        let module = mb.finish();
        module.validate().expect("module should validate");
        assert_eq!(module.find_root(), Some(FunctionId(0)));

        let f = module.function(FunctionId(0));
        assert_eq!(f.blocks.len(), 3);
        // The load's type follows the alloca pointee.
        let load_id = f.blocks[0].instructions[2];
        assert_eq!(*f.ty_of(load_id), IrType::Double);
    }

    #[test]
    fn declarations_skip_validation() {
        let mut mb = ModuleBuilder::new();
        mb.declare("atof", &[IrType::Int(8).ptr_to()], IrType::Double);
        let module = mb.finish();
        module.validate().expect("declarations have no body to check");
    }

    #[test]
    fn phi_arity_mismatch_is_rejected() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", &[IrType::Int(32)], IrType::Int(32));
        {
            let mut b = mb.body(f);
            let arg = b.arg(0);
            // Hand-build a malformed phi: one value, zero incoming blocks.
            let bad = b.push(Opcode::Phi(smallvec![]), smallvec![arg], IrType::Int(32));
            b.ret(bad);
        }
        let module = mb.finish();
        assert!(module.validate().is_err());
    }
}
