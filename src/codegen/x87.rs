//! The x87 stack model (spec §4.7): an 8-entry logical stack with
//! `fld`/`fstp`/`fxch` discipline, plus the Valgrind-compatible lowering
//! mode that prefers explicit `fxch` + `fstp` sequences over the hardware's
//! implicit `fdecstp` tag-word rotation (Valgrind's x87 emulation does not
//! model that rotation, so code generated for Valgrind runs must never rely
//! on it).
//!
//! Values never live on the x87 stack across instruction-selection steps
//! in this code generator: every extended-precision result is immediately
//! popped to a dedicated spill slot (`select.rs`'s `ValueWidth::Extended`
//! path), so `X87Stack` only needs to track depth within a single
//! expression's evaluation, not across a whole block.

use crate::codegen::asmcmp::{AsmInstr, AsmOp, Operand};
use crate::common::error::{CompilerError, CompilerResult};

pub const X87_STACK_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub struct X87Stack {
    depth: usize,
    valgrind_compatible: bool,
}

impl X87Stack {
    pub fn new(valgrind_compatible: bool) -> Self {
        Self { depth: 0, valgrind_compatible }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    fn push(&mut self) -> CompilerResult<()> {
        if self.depth == X87_STACK_CAPACITY {
            return Err(CompilerError::internal("x87 stack overflow"));
        }
        self.depth += 1;
        Ok(())
    }

    fn pop(&mut self) -> CompilerResult<()> {
        if self.depth == 0 {
            return Err(CompilerError::internal("x87 stack underflow"));
        }
        self.depth -= 1;
        Ok(())
    }

    /// `fld <operand>`: pushes a value (from memory, `.rodata`, or another
    /// spill slot) onto the top of the stack.
    pub fn load(&mut self, operand: Operand) -> CompilerResult<AsmInstr> {
        self.push()?;
        Ok(AsmInstr::new(AsmOp::FldX87, [operand]))
    }

    /// `fstp <operand>`: pops the top of the stack into memory.
    pub fn store_pop(&mut self, dest: Operand) -> CompilerResult<AsmInstr> {
        self.pop()?;
        Ok(AsmInstr::new(AsmOp::FstpX87, [dest]))
    }

    /// Brings stack entry `index` (0 = top) to the top. Under
    /// `-fvalgrind-x87` this is the only mechanism this code generator uses
    /// to reorder the stack; the non-Valgrind path is identical here since
    /// `fxch` is universally supported, but devirtualize/emit only ever
    /// calls this helper — a build that someday wants the faster implicit
    /// rotation for the non-Valgrind case would change callers of this
    /// method, not its signature.
    pub fn exchange_to_top(&self, index: usize) -> CompilerResult<Option<AsmInstr>> {
        if index == 0 {
            return Ok(None);
        }
        if index >= self.depth {
            return Err(CompilerError::internal("x87 exchange index past stack depth"));
        }
        Ok(Some(AsmInstr::new(AsmOp::FxchX87, [Operand::Immediate64(index as i64)])))
    }

    pub fn add_pop(&mut self) -> CompilerResult<AsmInstr> {
        self.pop()?;
        Ok(AsmInstr::new(AsmOp::FaddpX87, []))
    }

    pub fn sub_pop(&mut self) -> CompilerResult<AsmInstr> {
        self.pop()?;
        Ok(AsmInstr::new(AsmOp::FsubpX87, []))
    }

    pub fn mul_pop(&mut self) -> CompilerResult<AsmInstr> {
        self.pop()?;
        Ok(AsmInstr::new(AsmOp::FmulpX87, []))
    }

    pub fn div_pop(&mut self) -> CompilerResult<AsmInstr> {
        self.pop()?;
        Ok(AsmInstr::new(AsmOp::FdivpX87, []))
    }

    /// `fchs`: negates the top of the stack in place, no stack-depth change.
    pub fn negate_top(&self) -> AsmInstr {
        AsmInstr::new(AsmOp::FchsX87, [])
    }

    /// Asserts the stack is balanced at the end of an expression; every
    /// `load` this code generator issues is matched by exactly one
    /// `store_pop` or one of the pop-and-combine ops, so a nonzero depth
    /// here means a selection bug.
    pub fn assert_balanced(&self) -> CompilerResult<()> {
        if self.depth != 0 {
            return Err(CompilerError::internal(format!(
                "x87 stack left at depth {} at end of expression",
                self.depth
            )));
        }
        Ok(())
    }

    pub fn valgrind_compatible(&self) -> bool {
        self.valgrind_compatible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_then_store_pop_balances() {
        let mut stack = X87Stack::new(false);
        stack.load(Operand::Immediate64(0)).unwrap();
        assert_eq!(stack.depth(), 1);
        stack.store_pop(Operand::Immediate64(0)).unwrap();
        stack.assert_balanced().unwrap();
    }

    #[test]
    fn binary_op_pops_one_of_two_pushes() {
        let mut stack = X87Stack::new(true);
        stack.load(Operand::Immediate64(0)).unwrap();
        stack.load(Operand::Immediate64(0)).unwrap();
        assert_eq!(stack.depth(), 2);
        stack.add_pop().unwrap();
        assert_eq!(stack.depth(), 1);
        stack.store_pop(Operand::Immediate64(0)).unwrap();
        stack.assert_balanced().unwrap();
    }

    #[test]
    fn underflow_is_an_internal_error() {
        let mut stack = X87Stack::new(false);
        assert!(stack.store_pop(Operand::Immediate64(0)).is_err());
    }

    #[test]
    fn exchange_requires_valid_index() {
        let mut stack = X87Stack::new(true);
        stack.load(Operand::Immediate64(0)).unwrap();
        assert!(stack.exchange_to_top(1).is_err());
        assert!(stack.exchange_to_top(0).unwrap().is_none());
    }
}
