//! A thin construction-time API over [`OptFunction`], standing in for the
//! "IR-to-SSA lowering" half of the lifecycle description (spec §3): the
//! part that actually walks an AST is out of scope, but the container must
//! still grow incrementally block-by-block, instruction-by-instruction, the
//! way a real lowering pass would drive it.

use crate::common::error::CompilerResult;
use crate::ir::module::FunctionDeclId;
use crate::opt::block::BlockRef;
use crate::opt::call::CallRef;
use crate::opt::container::OptFunction;
use crate::opt::instr::InstrRef;
use crate::opt::operation::{Operation, OperationFamily};
use crate::opt::phi::PhiRef;

/// Builds one [`OptFunction`] incrementally. Every method either appends to
/// the "current" block's data list or terminates it and advances `current`
/// to a freshly created block — mirroring how a lowering pass emits one
/// basic block at a time.
pub struct FunctionBuilder {
    func: OptFunction,
    current: BlockRef,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let mut func = OptFunction::new(name);
        let entry = func.new_block();
        Self { func, current: entry }
    }

    pub fn entry_block(&self) -> BlockRef {
        self.func.entry.expect("builder always creates an entry block")
    }

    pub fn current_block(&self) -> BlockRef {
        self.current
    }

    /// Starts a new block and makes it current. Callers are responsible for
    /// terminating the previous block before calling this (the container
    /// itself does not enforce it until `finish`).
    pub fn start_block(&mut self) -> BlockRef {
        let b = self.func.new_block();
        self.current = b;
        b
    }

    pub fn set_current(&mut self, block: BlockRef) {
        self.current = block;
    }

    /// Emits a data-list-only instruction (no control-flow placement).
    pub fn push(&mut self, opcode: crate::opt::operation::Opcode, payload: OperationFamily) -> CompilerResult<InstrRef> {
        self.push_with_effects(opcode, payload, true)
    }

    pub fn push_with_effects(
        &mut self,
        opcode: crate::opt::operation::Opcode,
        payload: OperationFamily,
        side_effect_free: bool,
    ) -> CompilerResult<InstrRef> {
        self.func.new_instruction(self.current, Operation::new(opcode, payload), side_effect_free)
    }

    /// Emits an instruction and immediately places it on the control-flow
    /// list (used for terminators and other control-flow-visible ops such
    /// as calls with side effects).
    pub fn push_control(
        &mut self,
        opcode: crate::opt::operation::Opcode,
        payload: OperationFamily,
        side_effect_free: bool,
    ) -> CompilerResult<InstrRef> {
        let r = self.func.new_instruction(self.current, Operation::new(opcode, payload), side_effect_free)?;
        self.func.add_control(r)?;
        Ok(r)
    }

    pub fn new_phi(&mut self, block: BlockRef, output: InstrRef) -> CompilerResult<PhiRef> {
        self.func.new_phi(block, output)
    }

    pub fn set_phi_link(&mut self, phi: PhiRef, pred: BlockRef, value: InstrRef) -> CompilerResult<()> {
        self.func.set_phi_link(phi, pred, value)
    }

    pub fn new_call(&mut self, decl: FunctionDeclId) -> CompilerResult<CallRef> {
        self.func.new_call(self.current, decl)
    }

    pub fn push_call_argument(&mut self, call: CallRef, arg: InstrRef) -> CompilerResult<()> {
        self.func.push_call_argument(call, arg)
    }

    /// Hands back the finished container. No further validation is
    /// performed here; `crate::analysis` is where dominance/liveness
    /// invariants actually get checked.
    pub fn finish(self) -> OptFunction {
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::operation::{Immediate, Opcode};

    #[test]
    fn builds_single_block_return() {
        let mut b = FunctionBuilder::new("identity");
        let c = b.push(Opcode::IntConst, OperationFamily::Immediate(Immediate::Int(1))).unwrap();
        b.push_control(Opcode::Return, OperationFamily::Return(Some(c)), false).unwrap();
        let func = b.finish();
        let entry = func.entry.unwrap();
        assert_eq!(func.block_data_instrs(entry).unwrap().len(), 2);
        assert_eq!(func.block_control_instrs(entry).unwrap().len(), 1);
    }
}
