//! The per-function SSA container (spec §3, "Optimization function
//! container"). Owns blocks, instructions, phis, calls, and inline-asm
//! nodes in a strict tree; every cross-link is an integer reference (spec
//! §9, "cyclic references... broken by using dense integer ids").

use crate::common::arena::Arena;
use crate::common::error::{CompilerError, CompilerResult};
use crate::ir::module::FunctionDeclId;
use crate::opt::block::{Block, BlockRef};
use crate::opt::call::{CallNode, CallRef};
use crate::opt::inline_asm::{InlineAsmNode, InlineAsmRef};
use crate::opt::instr::{Instruction, InstrRef};
use crate::opt::operation::Operation;
use crate::opt::phi::{PhiNode, PhiRef};
use crate::opt::use_index::UseIndex;

/// A per-function SSA container. See module docs and spec §3/§4.3.
#[derive(Debug, Clone)]
pub struct OptFunction {
    pub name: String,
    pub entry: Option<BlockRef>,
    pub blocks: Arena<Block>,
    pub instructions: Arena<Instruction>,
    pub phis: Arena<PhiNode>,
    pub calls: Arena<CallNode>,
    pub inline_asms: Arena<InlineAsmNode>,
    pub use_index: UseIndex,
}

impl OptFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            blocks: Arena::new(),
            instructions: Arena::new(),
            phis: Arena::new(),
            calls: Arena::new(),
            inline_asms: Arena::new(),
            use_index: UseIndex::new(),
        }
    }

    pub fn new_block(&mut self) -> BlockRef {
        let r = self.blocks.push(Block::new());
        if self.entry.is_none() {
            self.entry = Some(r);
        }
        r
    }

    /// Resolve an instruction reference, failing if it was dropped or never
    /// existed (spec §3 invariant 5: a dropped instruction "resolves to not
    /// found for all accessors").
    pub fn instr(&self, r: InstrRef) -> CompilerResult<&Instruction> {
        match self.instructions.get(r) {
            Some(i) if !i.is_dropped() => Ok(i),
            _ => Err(CompilerError::not_found(format!("instruction {:?}", r))),
        }
    }

    pub fn instr_mut(&mut self, r: InstrRef) -> CompilerResult<&mut Instruction> {
        match self.instructions.get_mut(r) {
            Some(i) if !i.is_dropped() => Ok(i),
            _ => Err(CompilerError::not_found(format!("instruction {:?}", r))),
        }
    }

    pub fn block(&self, r: BlockRef) -> CompilerResult<&Block> {
        self.blocks.get(r).ok_or_else(|| CompilerError::not_found(format!("block {:?}", r)))
    }

    pub fn block_mut(&mut self, r: BlockRef) -> CompilerResult<&mut Block> {
        self.blocks.get_mut(r).ok_or_else(|| CompilerError::not_found(format!("block {:?}", r)))
    }

    /// `new-instruction(block, operation) -> ref` (spec §4.3): appends to the
    /// block's data list, records input-operand back-edges in the use
    /// index, returns a monotonically increasing reference. Does not touch
    /// the control-flow list.
    pub fn new_instruction(
        &mut self,
        block: BlockRef,
        operation: Operation,
        side_effect_free: bool,
    ) -> CompilerResult<InstrRef> {
        self.block(block)?; // validate existence
        let operands = operation.operand_refs();
        let instr = Instruction::new(operation, block, side_effect_free);
        let r = self.instructions.push(instr);

        // Splice onto the tail of the block's data list.
        let tail = self.block(block)?.data_tail;
        self.instr_mut(r)?.data_prev = tail;
        if let Some(tail) = tail {
            self.instr_mut(tail)?.data_next = Some(r);
        }
        let b = self.block_mut(block)?;
        b.data_tail = Some(r);
        if b.data_head.is_none() {
            b.data_head = Some(r);
        }

        for operand in operands {
            self.use_index.add_instr_use(operand, r);
        }
        Ok(r)
    }

    /// Appends `instr` to the tail of its own block's control-flow list.
    pub fn add_control(&mut self, instr: InstrRef) -> CompilerResult<()> {
        let block = self
            .instr(instr)?
            .block
            .ok_or_else(|| CompilerError::internal("add_control on dropped instruction"))?;
        if self.instr(instr)?.on_control_flow_list() || self.block(block)?.is_control_head_or_tail(instr)
        {
            return Err(CompilerError::already_exists("instruction already on control-flow list"));
        }
        let tail = self.block(block)?.control_tail;
        self.instr_mut(instr)?.control_prev = tail;
        if let Some(tail) = tail {
            self.instr_mut(tail)?.control_next = Some(instr);
        }
        let b = self.block_mut(block)?;
        b.control_tail = Some(instr);
        if b.control_head.is_none() {
            b.control_head = Some(instr);
        }
        Ok(())
    }

    /// Inserts `instr` into its block's control-flow list immediately after
    /// `after` (or at the head, when `after` is `None`).
    pub fn insert_control(&mut self, instr: InstrRef, after: Option<InstrRef>) -> CompilerResult<()> {
        let block = self
            .instr(instr)?
            .block
            .ok_or_else(|| CompilerError::internal("insert_control on dropped instruction"))?;
        match after {
            None => {
                let old_head = self.block(block)?.control_head;
                self.instr_mut(instr)?.control_next = old_head;
                self.instr_mut(instr)?.control_prev = None;
                if let Some(h) = old_head {
                    self.instr_mut(h)?.control_prev = Some(instr);
                }
                let b = self.block_mut(block)?;
                b.control_head = Some(instr);
                if b.control_tail.is_none() {
                    b.control_tail = Some(instr);
                }
            }
            Some(after) => {
                let next = self.instr(after)?.control_next;
                self.instr_mut(instr)?.control_prev = Some(after);
                self.instr_mut(instr)?.control_next = next;
                self.instr_mut(after)?.control_next = Some(instr);
                if let Some(n) = next {
                    self.instr_mut(n)?.control_prev = Some(instr);
                } else {
                    self.block_mut(block)?.control_tail = Some(instr);
                }
            }
        }
        Ok(())
    }

    /// `drop-instr(ref)` (spec §4.3): requires no control-flow links and no
    /// retained use. Sets the block-id sentinel and unlinks data siblings.
    pub fn drop_instr(&mut self, r: InstrRef) -> CompilerResult<()> {
        let instr = self.instr(r)?;
        if instr.on_control_flow_list() {
            return Err(CompilerError::internal("cannot drop instruction still on control-flow list"));
        }
        if !self.use_index.is_unused(r) {
            return Err(CompilerError::internal("cannot drop instruction with live uses"));
        }
        let operands = instr.operation.operand_refs();
        let (prev, next) = (instr.data_prev, instr.data_next);
        let block = instr.block.unwrap();

        for operand in operands {
            self.use_index.remove_instr_use(operand, r);
        }

        if let Some(p) = prev {
            self.instr_mut(p)?.data_next = next;
        } else {
            self.block_mut(block)?.data_head = next;
        }
        if let Some(n) = next {
            self.instr_mut(n)?.data_prev = prev;
        } else {
            self.block_mut(block)?.data_tail = prev;
        }

        let instr = self.instr_mut(r)?;
        instr.block = None;
        instr.data_prev = None;
        instr.data_next = None;
        Ok(())
    }

    /// `drop-control(ref)`: unlinks control-flow siblings only.
    pub fn drop_control(&mut self, r: InstrRef) -> CompilerResult<()> {
        let instr = self.instr(r)?;
        let block = instr.block.unwrap();
        let (prev, next) = (instr.control_prev, instr.control_next);
        if let Some(p) = prev {
            self.instr_mut(p)?.control_next = next;
        } else if self.block(block)?.control_head == Some(r) {
            self.block_mut(block)?.control_head = next;
        }
        if let Some(n) = next {
            self.instr_mut(n)?.control_prev = prev;
        } else if self.block(block)?.control_tail == Some(r) {
            self.block_mut(block)?.control_tail = prev;
        }
        let instr = self.instr_mut(r)?;
        instr.control_prev = None;
        instr.control_next = None;
        Ok(())
    }

    /// `replace-references(to, from)` (spec §4.3): walk every consumer
    /// recorded in `from`'s use-index entry and rewrite every operand
    /// matching `from` to `to`, updating the use index incrementally.
    /// Precondition (caller's responsibility, verified explicitly by GVN):
    /// `to` dominates every rewritten use.
    pub fn replace_references(&mut self, from: InstrRef, to: InstrRef) -> CompilerResult<()> {
        if from == to {
            return Ok(());
        }
        let site = match self.use_index.site(from) {
            Some(s) => s.clone(),
            None => return Ok(()),
        };

        for user in site.instrs.iter().copied().collect::<Vec<_>>() {
            if let Ok(instr) = self.instr_mut(user) {
                if instr.operation.replace_references(from, to) {
                    self.use_index.remove_instr_use(from, user);
                    self.use_index.add_instr_use(to, user);
                }
            }
        }
        for user in site.phis.iter().copied().collect::<Vec<_>>() {
            if let Some(phi) = self.phis.get_mut(user) {
                if phi.replace_references(from, to) {
                    self.use_index.remove_phi_use(from, user);
                    self.use_index.add_phi_use(to, user);
                }
            }
        }
        for user in site.calls.iter().copied().collect::<Vec<_>>() {
            if let Some(call) = self.calls.get_mut(user) {
                if call.replace_references(from, to) {
                    self.use_index.remove_call_use(from, user);
                    self.use_index.add_call_use(to, user);
                }
            }
        }
        for user in site.asms.iter().copied().collect::<Vec<_>>() {
            if let Some(asm) = self.inline_asms.get_mut(user) {
                if asm.replace_references(from, to) {
                    self.use_index.remove_asm_use(from, user);
                    self.use_index.add_asm_use(to, user);
                }
            }
        }
        Ok(())
    }

    /// Moves a data-list-only instruction (never on the control-flow list)
    /// from its current block to the tail of `new_block`'s data list.
    /// Used by GVN's hoist-then-substitute step and by local-allocation
    /// sinking; does not touch the use index, since moving does not change
    /// who uses whom.
    pub fn move_to_block(&mut self, instr: InstrRef, new_block: BlockRef) -> CompilerResult<()> {
        let node = self.instr(instr)?;
        if node.on_control_flow_list() {
            return Err(CompilerError::internal("cannot move a control-flow-listed instruction between blocks"));
        }
        let old_block = node.block.expect("instr() already rejects dropped instructions");
        if old_block == new_block {
            return Ok(());
        }
        let (prev, next) = (node.data_prev, node.data_next);

        if let Some(p) = prev {
            self.instr_mut(p)?.data_next = next;
        } else {
            self.block_mut(old_block)?.data_head = next;
        }
        if let Some(n) = next {
            self.instr_mut(n)?.data_prev = prev;
        } else {
            self.block_mut(old_block)?.data_tail = prev;
        }

        let tail = self.block(new_block)?.data_tail;
        self.instr_mut(instr)?.data_prev = tail;
        self.instr_mut(instr)?.data_next = None;
        if let Some(t) = tail {
            self.instr_mut(t)?.data_next = Some(instr);
        }
        let nb = self.block_mut(new_block)?;
        nb.data_tail = Some(instr);
        if nb.data_head.is_none() {
            nb.data_head = Some(instr);
        }
        self.instr_mut(instr)?.block = Some(new_block);
        Ok(())
    }

    /// Like [`OptFunction::move_to_block`], but splices `instr` onto the
    /// *head* of `new_block`'s data list instead of the tail. Used by
    /// local-allocation sinking, whose moved `alloc-local` must precede
    /// every instruction already resident in the sink target.
    pub fn move_to_block_front(&mut self, instr: InstrRef, new_block: BlockRef) -> CompilerResult<()> {
        let node = self.instr(instr)?;
        if node.on_control_flow_list() {
            return Err(CompilerError::internal("cannot move a control-flow-listed instruction between blocks"));
        }
        let old_block = node.block.expect("instr() already rejects dropped instructions");
        if old_block == new_block {
            return Ok(());
        }
        let (prev, next) = (node.data_prev, node.data_next);

        if let Some(p) = prev {
            self.instr_mut(p)?.data_next = next;
        } else {
            self.block_mut(old_block)?.data_head = next;
        }
        if let Some(n) = next {
            self.instr_mut(n)?.data_prev = prev;
        } else {
            self.block_mut(old_block)?.data_tail = prev;
        }

        let head = self.block(new_block)?.data_head;
        self.instr_mut(instr)?.data_next = head;
        self.instr_mut(instr)?.data_prev = None;
        if let Some(h) = head {
            self.instr_mut(h)?.data_prev = Some(instr);
        }
        let nb = self.block_mut(new_block)?;
        nb.data_head = Some(instr);
        if nb.data_tail.is_none() {
            nb.data_tail = Some(instr);
        }
        self.instr_mut(instr)?.block = Some(new_block);
        Ok(())
    }

    pub fn new_phi(&mut self, block: BlockRef, output: InstrRef) -> CompilerResult<PhiRef> {
        self.block(block)?;
        let r = self.phis.push(PhiNode::new(block, output));
        self.block_mut(block)?.phis.push(r);
        Ok(r)
    }

    /// Removes a phi: unregisters its link uses from the use index, unlists
    /// it from its block, and drops its output instruction (which must have
    /// no remaining consumers — callers redirect those first, typically via
    /// `replace_references(phi.output, value)`).
    pub fn drop_phi(&mut self, phi: PhiRef) -> CompilerResult<()> {
        let node = self.phis.get(phi).ok_or_else(|| CompilerError::not_found("phi"))?.clone();
        for (_, value) in &node.links {
            self.use_index.remove_phi_use(*value, phi);
        }
        self.block_mut(node.block)?.phis.retain(|p| *p != phi);
        self.drop_instr(node.output)
    }

    pub fn set_phi_link(&mut self, phi: PhiRef, pred: BlockRef, value: InstrRef) -> CompilerResult<()> {
        let node = self.phis.get_mut(phi).ok_or_else(|| CompilerError::not_found("phi"))?;
        if let Some(old) = node.value_from(pred) {
            self.use_index.remove_phi_use(old, phi);
        }
        node.set_link(pred, value);
        self.use_index.add_phi_use(value, phi);
        Ok(())
    }

    pub fn new_call(&mut self, block: BlockRef, decl: FunctionDeclId) -> CompilerResult<CallRef> {
        self.block(block)?;
        let r = self.calls.push(CallNode::new(decl));
        self.block_mut(block)?.calls.push(r);
        Ok(r)
    }

    pub fn push_call_argument(&mut self, call: CallRef, arg: InstrRef) -> CompilerResult<()> {
        let node = self.calls.get_mut(call).ok_or_else(|| CompilerError::not_found("call"))?;
        node.arguments.push(arg);
        self.use_index.add_call_use(arg, call);
        Ok(())
    }

    /// All reachable (non-dropped) instructions in a block's data-list
    /// order.
    pub fn block_data_instrs(&self, block: BlockRef) -> CompilerResult<Vec<InstrRef>> {
        let mut out = Vec::new();
        let mut cur = self.block(block)?.data_head;
        while let Some(r) = cur {
            out.push(r);
            cur = self.instructions[r].data_next;
        }
        Ok(out)
    }

    pub fn block_control_instrs(&self, block: BlockRef) -> CompilerResult<Vec<InstrRef>> {
        let mut out = Vec::new();
        let mut cur = self.block(block)?.control_head;
        while let Some(r) = cur {
            out.push(r);
            cur = self.instructions[r].control_next;
        }
        Ok(out)
    }

    pub fn terminator(&self, block: BlockRef) -> CompilerResult<InstrRef> {
        self.block(block)?
            .control_tail
            .ok_or_else(|| CompilerError::internal(format!("block {:?} has no terminator", block)))
    }

    pub fn all_block_refs(&self) -> Vec<BlockRef> {
        self.blocks.iter().map(|(r, _)| r).collect()
    }
}
