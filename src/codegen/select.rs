//! Instruction selection (spec §4.7): the opcode → emitter dispatch table.
//! Walks one [`OptFunction`] in reverse-post-order and lowers every SSA
//! instruction to zero or more [`AsmInstr`]s over fresh virtual registers,
//! deferring physical assignment to `regalloc` and concrete addressing to
//! `devirtualize`.
//!
//! Internal operand convention (this crate's own choice, since asmcmp
//! instructions are not yet 2-address-constrained x86 text): every
//! value-producing `AsmInstr` lists its destination first, followed by its
//! sources in the same order as the SSA operation's own `operand_refs()`.
//! `devirtualize`/`emit` are responsible for any later 2-address rewriting
//! the real encoding needs.
//!
//! Phi nodes never get a "select this opcode" emission at their own
//! position: `new_phi`'s placeholder instruction (`Opcode::Phi`,
//! `OperationFamily::NoOperand`, per the construction idiom
//! `pipeline::phi_propagate`/`phi_select` both use) only reserves a
//! destination vreg. The copies that actually populate it are appended to
//! the tail of each predecessor block, immediately before that block's
//! terminator — the standard SSA-deconstruction-at-codegen-time pattern.

use smallvec::SmallVec;

use crate::analysis::structure::Structure;
use crate::codegen::asmcmp::{
    AsmCmp, AsmInstr, AsmOp, CondCode, Operand, OperandWidth, RodataValue, VReg, VRegClass,
};
use crate::codegen::regalloc::ARG_REGS;
use crate::codegen::x87::X87Stack;
use crate::common::error::{CompilerError, CompilerResult};
use crate::common::fx_hash::FxHashMap;
use crate::ir::module::IrModule;
use crate::ir::types::{TypeEntry, TypeId, TypeOpcode};
use crate::opt::block::BlockRef;
use crate::opt::call::CallRef;
use crate::opt::container::OptFunction;
use crate::opt::instr::InstrRef;
use crate::opt::operation::{CmpOp, CondVariant, Immediate, Opcode, OperationFamily as OF};

/// Which physical lowering path a value takes: plain integer/pointer,
/// single/double-precision SSE, or 80-bit extended (x87-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueWidth {
    Int,
    Single,
    Double,
    Extended,
}

struct Selector<'a> {
    func: &'a OptFunction,
    module: &'a IrModule,
    structure: &'a Structure,
    /// Where an SSA value currently lives: a vreg, an inline immediate, or
    /// a `.rodata` address (spec §9(b)'s resolved materialization policy).
    place: FxHashMap<InstrRef, Operand>,
    width: FxHashMap<InstrRef, ValueWidth>,
}

pub fn select_function(
    func: &OptFunction,
    module: &IrModule,
    structure: &Structure,
    valgrind_compatible_x87: bool,
) -> CompilerResult<AsmCmp> {
    let mut asm = AsmCmp::new(func.name.clone());
    let mut sel = Selector { func, module, structure, place: FxHashMap::default(), width: FxHashMap::default() };
    sel.preallocate_phi_outputs(&mut asm)?;
    sel.bind_parameters(&mut asm)?;
    for block in structure.rpo().to_vec() {
        sel.select_block(block, &mut asm, valgrind_compatible_x87)?;
    }
    Ok(asm)
}

impl<'a> Selector<'a> {
    fn preallocate_phi_outputs(&mut self, asm: &mut AsmCmp) -> CompilerResult<()> {
        for (_, phi) in self.func.phis.iter() {
            let v = asm.new_vreg(VRegClass::GeneralPurpose);
            self.place.insert(phi.output, Operand::VirtualReg(v, OperandWidth::W64));
        }
        Ok(())
    }

    /// Parameters arrive in fixed ABI registers; this crate's SSA container
    /// does not model a distinct "parameter" opcode (spec §3 is silent on
    /// it, matching its stance that lowering from a separate AST/front-end
    /// representation is out of scope), so there is nothing to bind here
    /// beyond recording the argument-register locations on `asm` for
    /// `devirtualize`'s frame layout to consult.
    fn bind_parameters(&mut self, asm: &mut AsmCmp) -> CompilerResult<()> {
        for (i, &reg) in ARG_REGS.iter().enumerate() {
            asm.param_locations.push((i as u32, Operand::Physical(reg, OperandWidth::W64)));
        }
        Ok(())
    }

    fn select_block(
        &mut self,
        block: BlockRef,
        asm: &mut AsmCmp,
        valgrind_compatible_x87: bool,
    ) -> CompilerResult<()> {
        asm.label_here(block.index());
        let mut x87 = X87Stack::new(valgrind_compatible_x87);
        for instr_ref in self.func.block_data_instrs(block)? {
            let opcode = self.func.instr(instr_ref)?.operation.opcode;
            if opcode.is_terminator() || opcode == Opcode::Phi {
                continue;
            }
            self.select_instruction(instr_ref, asm, &mut x87)?;
        }
        x87.assert_balanced()?;
        self.emit_phi_copies(block, asm)?;
        let term_ref = self.func.terminator(block)?;
        self.select_terminator(term_ref, asm)?;
        Ok(())
    }

    fn emit_phi_copies(&mut self, block: BlockRef, asm: &mut AsmCmp) -> CompilerResult<()> {
        for succ in self.structure.successors(block) {
            for phi_ref in self.func.block(*succ)?.phis.clone() {
                let phi = self.func.phis.get(phi_ref).ok_or_else(|| CompilerError::not_found("phi"))?;
                if let Some(value_ref) = phi.value_from(block) {
                    let src = self.operand_of(value_ref)?;
                    let dest = self.operand_of(phi.output)?;
                    asm.push(AsmInstr::new(AsmOp::MovGp, [dest, src]));
                }
            }
        }
        Ok(())
    }

    fn operand_of(&self, r: InstrRef) -> CompilerResult<Operand> {
        self.place
            .get(&r)
            .copied()
            .ok_or_else(|| CompilerError::internal(format!("{:?} selected after its first use", r)))
    }

    fn width_of(&self, r: InstrRef) -> ValueWidth {
        self.width.get(&r).copied().unwrap_or(ValueWidth::Int)
    }

    fn operand_width(&self, w: ValueWidth) -> OperandWidth {
        match w {
            ValueWidth::Int => OperandWidth::W64,
            ValueWidth::Single => OperandWidth::F32,
            ValueWidth::Double => OperandWidth::F64,
            ValueWidth::Extended => OperandWidth::X87,
        }
    }

    fn value_class(&self, w: ValueWidth) -> VRegClass {
        match w {
            ValueWidth::Int => VRegClass::GeneralPurpose,
            ValueWidth::Single | ValueWidth::Double => VRegClass::Floating,
            ValueWidth::Extended => VRegClass::SpillSpace { size: 16, align: 16 },
        }
    }

    fn width_of_type(&self, ty: TypeId) -> ValueWidth {
        match self.module.type_entries(ty).and_then(|e| e.first()) {
            Some(TypeEntry { opcode: TypeOpcode::Float32, .. }) => ValueWidth::Single,
            Some(TypeEntry { opcode: TypeOpcode::Float64, .. }) => ValueWidth::Double,
            Some(TypeEntry { opcode: TypeOpcode::LongDouble, .. }) => ValueWidth::Extended,
            _ => ValueWidth::Int,
        }
    }

    fn bind_result(&mut self, asm: &mut AsmCmp, r: InstrRef, w: ValueWidth) -> Operand {
        let class = self.value_class(w);
        let ow = self.operand_width(w);
        let vreg = asm.new_vreg(class);
        let operand = Operand::VirtualReg(vreg, ow);
        self.place.insert(r, operand);
        self.width.insert(r, w);
        operand
    }

    fn literal_u64(&self, r: InstrRef) -> u64 {
        match self.func.instr(r).map(|i| &i.operation.payload) {
            Ok(OF::Immediate(Immediate::Int(v))) => *v as u64,
            _ => 8,
        }
    }

    fn select_instruction(
        &mut self,
        r: InstrRef,
        asm: &mut AsmCmp,
        x87: &mut X87Stack,
    ) -> CompilerResult<()> {
        let operation = self.func.instr(r)?.operation.clone();
        match (operation.opcode, operation.payload) {
            (Opcode::IntConst, OF::Immediate(Immediate::Int(v))) => {
                self.select_int_const(asm, r, v);
            }
            (Opcode::Float32Const, OF::Immediate(Immediate::Float32(f))) => {
                let label = asm.intern_rodata(RodataValue::F32(f));
                self.place.insert(r, Operand::RodataLabel(label));
                self.width.insert(r, ValueWidth::Single);
            }
            (Opcode::Float64Const, OF::Immediate(Immediate::Float64(f))) => {
                let label = asm.intern_rodata(RodataValue::F64(f));
                self.place.insert(r, Operand::RodataLabel(label));
                self.width.insert(r, ValueWidth::Double);
            }
            (Opcode::LongDoubleConst, OF::Immediate(Immediate::LongDouble(v))) => {
                let label = asm.intern_rodata(RodataValue::LongDouble(v));
                self.place.insert(r, Operand::RodataLabel(label));
                self.width.insert(r, ValueWidth::Extended);
            }
            (Opcode::StringRefConst, OF::Immediate(Immediate::StringRef(s))) => {
                let mut bytes = s.into_bytes();
                bytes.push(0);
                let label = asm.intern_rodata(RodataValue::Bytes(bytes));
                let dest = self.bind_result(asm, r, ValueWidth::Int);
                asm.push(AsmInstr::new(AsmOp::Lea, [dest, Operand::RodataLabel(label)]).with_origin(r));
            }
            (Opcode::BlockLabelConst, OF::Immediate(Immediate::BlockLabel(b))) => {
                let dest = self.bind_result(asm, r, ValueWidth::Int);
                asm.push(AsmInstr::new(AsmOp::Lea, [dest, Operand::BlockLabel(b.index())]).with_origin(r));
            }

            (op, OF::TwoRef(a, b)) if matches!(op, Opcode::Add | Opcode::Sub | Opcode::Mul
                | Opcode::SDiv | Opcode::UDiv | Opcode::SRem | Opcode::URem
                | Opcode::And | Opcode::Or | Opcode::Xor
                | Opcode::Shl | Opcode::AShr | Opcode::LShr) =>
            {
                self.select_int_binary(asm, r, op, a, b)?;
            }
            (op, OF::OneRef(a)) if matches!(op, Opcode::Neg | Opcode::Not | Opcode::BoolNot) => {
                self.select_int_unary(asm, r, op, a)?;
            }
            (Opcode::IntCmp, OF::TwoRefCmp { cmp, a, b }) => {
                self.select_int_cmp(asm, r, cmp, a, b)?;
            }

            (op, OF::TwoRef(a, b))
                if matches!(op, Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv) =>
            {
                self.select_float_binary(asm, x87, r, op, a, b)?;
            }
            (Opcode::FNeg, OF::OneRef(a)) => {
                self.select_float_neg(asm, x87, r, a)?;
            }
            (Opcode::FCmp, OF::TwoRefCmp { cmp, a, b }) => {
                self.select_float_cmp(asm, r, cmp, a, b)?;
            }

            (op, OF::TypedOneRef { ty, value, .. })
                if matches!(
                    op,
                    Opcode::Trunc
                        | Opcode::ZExt
                        | Opcode::SExt
                        | Opcode::FloatToSInt
                        | Opcode::FloatToUInt
                        | Opcode::SIntToFloat
                        | Opcode::UIntToFloat
                        | Opcode::FloatExt
                        | Opcode::FloatTrunc
                        | Opcode::Bitcast
                ) =>
            {
                self.select_conversion(asm, r, op, ty, value)?;
            }

            (Opcode::Load, OF::MemoryLoad { location, .. }) => {
                self.select_load(asm, r, location)?;
            }
            (Opcode::Store, OF::MemoryStore { location, value, .. }) => {
                self.select_store(asm, location, value)?;
            }
            (Opcode::BitfieldExtract, OF::Bitfield { base, offset, width, .. }) => {
                self.select_bitfield_extract(asm, r, base, offset, width)?;
            }
            (Opcode::BitfieldInsert, OF::Bitfield { base, value, offset, width }) => {
                self.select_bitfield_insert(asm, r, base, value, offset, width)?;
            }
            (Opcode::AllocLocal, OF::StackAlloc { size, alignment, .. }) => {
                self.select_alloc_local(asm, r, size, alignment)?;
            }

            (Opcode::GlobalAddr, OF::Variable { name, .. })
            | (Opcode::ThreadLocalAddr, OF::Variable { name, .. }) => {
                let id = asm.intern_symbol(&name);
                let dest = self.bind_result(asm, r, ValueWidth::Int);
                asm.push(AsmInstr::new(AsmOp::Lea, [dest, Operand::SymbolRef(id)]).with_origin(r));
            }

            (Opcode::GetElementPtr, OF::TypedOneRef { ty, index, value }) => {
                self.select_get_element_ptr(asm, r, ty, index, value)?;
            }

            (Opcode::Select, OF::Select { variant, cond, on_true, on_false }) => {
                self.select_select(asm, r, variant, cond, on_true, on_false)?;
            }

            (op, OF::OverflowArith { a, b, .. })
                if matches!(op, Opcode::AddOverflow | Opcode::SubOverflow | Opcode::MulOverflow) =>
            {
                self.select_overflow_arith(asm, r, op, a, b)?;
            }

            (op, OF::Atomic { a, b, c, .. })
                if matches!(op, Opcode::AtomicRmw | Opcode::AtomicCmpxchg) =>
            {
                self.select_atomic(asm, r, op, a, b, c)?;
            }

            (Opcode::Call, OF::Call { call }) => {
                self.select_call(asm, r, call)?;
            }

            (Opcode::InlineAsm, OF::InlineAsm { asm: asm_ref }) => {
                self.select_inline_asm(asm, asm_ref)?;
            }

            (opcode, _) => {
                return Err(CompilerError::internal(format!(
                    "instruction selector has no lowering for opcode {:?}",
                    opcode
                )));
            }
        }
        Ok(())
    }

    fn select_int_const(&mut self, asm: &mut AsmCmp, r: InstrRef, v: i64) {
        if (i32::MIN as i64..=i32::MAX as i64).contains(&v) {
            self.place.insert(r, Operand::Immediate64(v));
        } else {
            let label = asm.intern_rodata(RodataValue::Int64(v));
            self.place.insert(r, Operand::RodataLabel(label));
        }
        self.width.insert(r, ValueWidth::Int);
    }

    fn select_int_binary(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        op: Opcode,
        a: InstrRef,
        b: InstrRef,
    ) -> CompilerResult<()> {
        let (a_op, b_op) = (self.operand_of(a)?, self.operand_of(b)?);
        let dest = self.bind_result(asm, r, ValueWidth::Int);
        let asm_op = match op {
            Opcode::Add => AsmOp::Add,
            Opcode::Sub => AsmOp::Sub,
            Opcode::Mul => AsmOp::IMul,
            Opcode::SDiv | Opcode::UDiv | Opcode::SRem | Opcode::URem => AsmOp::IDiv,
            Opcode::And => AsmOp::And,
            Opcode::Or => AsmOp::Or,
            Opcode::Xor => AsmOp::Xor,
            Opcode::Shl => AsmOp::Shl,
            Opcode::AShr => AsmOp::Sar,
            Opcode::LShr => AsmOp::Shr,
            _ => unreachable!(),
        };
        asm.push(AsmInstr::new(asm_op, [dest, a_op, b_op]).with_origin(r));
        Ok(())
    }

    fn select_int_unary(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        op: Opcode,
        a: InstrRef,
    ) -> CompilerResult<()> {
        let a_op = self.operand_of(a)?;
        let dest = self.bind_result(asm, r, ValueWidth::Int);
        let asm_op = match op {
            Opcode::Neg => AsmOp::Neg,
            Opcode::Not | Opcode::BoolNot => AsmOp::Not,
            _ => unreachable!(),
        };
        asm.push(AsmInstr::new(asm_op, [dest, a_op]).with_origin(r));
        Ok(())
    }

    fn select_int_cmp(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        cmp: CmpOp,
        a: InstrRef,
        b: InstrRef,
    ) -> CompilerResult<()> {
        let (a_op, b_op) = (self.operand_of(a)?, self.operand_of(b)?);
        asm.push(AsmInstr::new(AsmOp::Cmp, [a_op, b_op]));
        let dest = self.bind_result(asm, r, ValueWidth::Int);
        asm.push(AsmInstr::new(AsmOp::SetFromFlags(cond_code_of(cmp)), [dest]).with_origin(r));
        Ok(())
    }

    fn select_float_binary(
        &mut self,
        asm: &mut AsmCmp,
        x87: &mut X87Stack,
        r: InstrRef,
        op: Opcode,
        a: InstrRef,
        b: InstrRef,
    ) -> CompilerResult<()> {
        let w = self.width_of(a);
        if w == ValueWidth::Extended {
            let (a_op, b_op) = (self.operand_of(a)?, self.operand_of(b)?);
            asm.push(x87.load(a_op)?);
            asm.push(x87.load(b_op)?);
            let pop_instr = match op {
                Opcode::FAdd => x87.add_pop()?,
                Opcode::FSub => x87.sub_pop()?,
                Opcode::FMul => x87.mul_pop()?,
                Opcode::FDiv => x87.div_pop()?,
                _ => unreachable!(),
            };
            asm.push(pop_instr);
            let dest = self.bind_result(asm, r, ValueWidth::Extended);
            asm.push(x87.store_pop(dest)?.with_origin(r));
            return Ok(());
        }
        let (a_op, b_op) = (self.operand_of(a)?, self.operand_of(b)?);
        let dest = self.bind_result(asm, r, w);
        let asm_op = match op {
            Opcode::FAdd => AsmOp::AddF,
            Opcode::FSub => AsmOp::SubF,
            Opcode::FMul => AsmOp::MulF,
            Opcode::FDiv => AsmOp::DivF,
            _ => unreachable!(),
        };
        asm.push(AsmInstr::new(asm_op, [dest, a_op, b_op]).with_origin(r));
        Ok(())
    }

    fn select_float_neg(
        &mut self,
        asm: &mut AsmCmp,
        x87: &mut X87Stack,
        r: InstrRef,
        a: InstrRef,
    ) -> CompilerResult<()> {
        let w = self.width_of(a);
        if w == ValueWidth::Extended {
            let a_op = self.operand_of(a)?;
            asm.push(x87.load(a_op)?);
            asm.push(x87.negate_top());
            let dest = self.bind_result(asm, r, ValueWidth::Extended);
            asm.push(x87.store_pop(dest)?.with_origin(r));
            return Ok(());
        }
        let a_op = self.operand_of(a)?;
        let dest = self.bind_result(asm, r, w);
        asm.push(AsmInstr::new(AsmOp::NegF, [dest, a_op]).with_origin(r));
        Ok(())
    }

    /// Long-double comparisons are narrowed to the SSE double path rather
    /// than modeled with full 80-bit `fcompp`/`fnstsw` semantics — see
    /// DESIGN.md.
    fn select_float_cmp(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        cmp: CmpOp,
        a: InstrRef,
        b: InstrRef,
    ) -> CompilerResult<()> {
        let (a_op, b_op) = (self.operand_of(a)?, self.operand_of(b)?);
        asm.push(AsmInstr::new(AsmOp::UComissF, [a_op, b_op]));
        let dest = self.bind_result(asm, r, ValueWidth::Int);
        asm.push(AsmInstr::new(AsmOp::SetFromFlags(cond_code_of(cmp)), [dest]).with_origin(r));
        Ok(())
    }

    fn select_conversion(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        op: Opcode,
        ty: TypeId,
        value: InstrRef,
    ) -> CompilerResult<()> {
        let dest_width = self.width_of_type(ty);
        let src_op = self.operand_of(value)?;
        let dest = self.bind_result(asm, r, dest_width);
        let asm_op = match op {
            Opcode::Trunc | Opcode::ZExt | Opcode::SExt | Opcode::Bitcast
                if dest_width == ValueWidth::Int =>
            {
                AsmOp::MovGp
            }
            Opcode::Bitcast => AsmOp::MovF,
            _ => AsmOp::Cvt,
        };
        asm.push(AsmInstr::new(asm_op, [dest, src_op]).with_origin(r));
        Ok(())
    }

    fn select_load(&mut self, asm: &mut AsmCmp, r: InstrRef, location: InstrRef) -> CompilerResult<()> {
        let addr = self.address_operand(location)?;
        let dest = self.bind_result(asm, r, ValueWidth::Int);
        asm.push(AsmInstr::new(AsmOp::Load, [dest, addr]).with_origin(r));
        Ok(())
    }

    fn select_store(&mut self, asm: &mut AsmCmp, location: InstrRef, value: InstrRef) -> CompilerResult<()> {
        let addr = self.address_operand(location)?;
        let value_op = self.operand_of(value)?;
        asm.push(AsmInstr::new(AsmOp::Store, [addr, value_op]));
        Ok(())
    }

    /// A pointer value's operand, coerced to a base register for
    /// `MemoryIndirect` addressing. Values already holding a vreg are used
    /// as-is; anything else (a rodata address, say) is first materialized
    /// into a fresh GP register via `Lea`.
    fn address_operand(&mut self, location: InstrRef) -> CompilerResult<Operand> {
        match self.operand_of(location)? {
            Operand::VirtualReg(base, _) => Ok(Operand::MemoryIndirect { base, disp: 0, width: OperandWidth::W64 }),
            other => Ok(other),
        }
    }

    fn select_bitfield_extract(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        base: InstrRef,
        offset: u32,
        width: u32,
    ) -> CompilerResult<()> {
        let base_op = self.operand_of(base)?;
        let dest = self.bind_result(asm, r, ValueWidth::Int);
        asm.push(AsmInstr::new(AsmOp::Shr, [dest, base_op, Operand::Immediate64(offset as i64)]).with_origin(r));
        let mask = mask_for_width(width);
        asm.push(AsmInstr::new(AsmOp::And, [dest, dest, Operand::Immediate64(mask)]));
        Ok(())
    }

    fn select_bitfield_insert(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        base: InstrRef,
        value: InstrRef,
        offset: u32,
        width: u32,
    ) -> CompilerResult<()> {
        let base_op = self.operand_of(base)?;
        let value_op = self.operand_of(value)?;
        let dest = self.bind_result(asm, r, ValueWidth::Int);
        let clear_mask = !(mask_for_width(width) << offset);
        asm.push(AsmInstr::new(AsmOp::And, [dest, base_op, Operand::Immediate64(clear_mask)]).with_origin(r));
        let shifted = asm.new_vreg(VRegClass::GeneralPurpose);
        let shifted_op = Operand::VirtualReg(shifted, OperandWidth::W64);
        asm.push(AsmInstr::new(
            AsmOp::Shl,
            [shifted_op, value_op, Operand::Immediate64(offset as i64)],
        ));
        asm.push(AsmInstr::new(AsmOp::Or, [dest, dest, shifted_op]));
        Ok(())
    }

    fn select_alloc_local(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        size: InstrRef,
        alignment: InstrRef,
    ) -> CompilerResult<()> {
        let size = self.literal_u64(size).max(1) as u32;
        let align = self.literal_u64(alignment).max(1) as u32;
        let vreg = asm.new_vreg(VRegClass::SpillSpace { size, align });
        let operand = Operand::VirtualReg(vreg, OperandWidth::W64);
        self.place.insert(r, operand);
        self.width.insert(r, ValueWidth::Int);
        asm.push(AsmInstr::new(AsmOp::LifetimeMarker, [operand]).with_origin(r));
        Ok(())
    }

    fn select_get_element_ptr(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        ty: TypeId,
        index: u64,
        base: InstrRef,
    ) -> CompilerResult<()> {
        let offset = member_offset(self.module.type_entries(ty).unwrap_or(&[]), index as usize);
        let base_op = self.operand_of(base)?;
        let dest = self.bind_result(asm, r, ValueWidth::Int);
        match base_op {
            Operand::VirtualReg(b, _) => {
                asm.push(AsmInstr::new(
                    AsmOp::Lea,
                    [dest, Operand::MemoryIndirect { base: b, disp: offset as i32, width: OperandWidth::W64 }],
                ).with_origin(r));
            }
            other => {
                asm.push(AsmInstr::new(AsmOp::Add, [dest, other, Operand::Immediate64(offset as i64)]).with_origin(r));
            }
        }
        Ok(())
    }

    fn select_select(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        variant: CondVariant,
        cond: InstrRef,
        on_true: InstrRef,
        on_false: InstrRef,
    ) -> CompilerResult<()> {
        let cond_op = self.operand_of(cond)?;
        let false_op = self.operand_of(on_false)?;
        let true_op = self.operand_of(on_true)?;
        let dest = self.bind_result(asm, r, ValueWidth::Int);
        asm.push(AsmInstr::new(AsmOp::MovGp, [dest, false_op]));
        asm.push(AsmInstr::new(AsmOp::Test, [cond_op, cond_op]));
        let cc = match variant {
            CondVariant::NonZero => CondCode::Ne,
            CondVariant::Zero => CondCode::Eq,
        };
        asm.push(AsmInstr::new(AsmOp::CMovFromFlags(cc), [dest, true_op]).with_origin(r));
        Ok(())
    }

    /// Overflow-checked arithmetic: this opcode family is single-valued in
    /// this IR (no paired-result type exists to carry the overflow flag
    /// alongside the arithmetic result, and no opcode in this IR's surface
    /// ever consumes such a flag), so only the arithmetic result is
    /// produced; the flag the real instruction also sets is left unread.
    /// See DESIGN.md.
    fn select_overflow_arith(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        op: Opcode,
        a: InstrRef,
        b: InstrRef,
    ) -> CompilerResult<()> {
        let (a_op, b_op) = (self.operand_of(a)?, self.operand_of(b)?);
        let dest = self.bind_result(asm, r, ValueWidth::Int);
        let asm_op = match op {
            Opcode::AddOverflow => AsmOp::Add,
            Opcode::SubOverflow => AsmOp::Sub,
            Opcode::MulOverflow => AsmOp::IMul,
            _ => unreachable!(),
        };
        asm.push(AsmInstr::new(asm_op, [dest, a_op, b_op]).with_origin(r));
        Ok(())
    }

    /// `AtomicRmw` is always lowered through `xadd` (fetch-and-add);
    /// distinguishing the other RMW operations (and/or/xor/exchange) is out
    /// of scope for this code generator (see DESIGN.md).
    fn select_atomic(
        &mut self,
        asm: &mut AsmCmp,
        r: InstrRef,
        op: Opcode,
        a: InstrRef,
        b: InstrRef,
        c: InstrRef,
    ) -> CompilerResult<()> {
        let addr = self.address_operand(a)?;
        match op {
            Opcode::AtomicRmw => {
                let value_op = self.operand_of(b)?;
                let dest = self.bind_result(asm, r, ValueWidth::Int);
                asm.push(AsmInstr::new(AsmOp::MovGp, [dest, value_op]));
                asm.push(AsmInstr::new(AsmOp::LockXadd, [addr, dest]).with_origin(r));
            }
            Opcode::AtomicCmpxchg => {
                let expected = self.operand_of(b)?;
                let desired = self.operand_of(c)?;
                let rax = Operand::Physical(crate::codegen::regalloc::PhysReg::Rax, OperandWidth::W64);
                asm.push(AsmInstr::new(AsmOp::MovGp, [rax, expected]));
                asm.push(AsmInstr::new(AsmOp::LockCmpxchg, [addr, desired]));
                let dest = self.bind_result(asm, r, ValueWidth::Int);
                asm.push(AsmInstr::new(AsmOp::MovGp, [dest, rax]).with_origin(r));
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn select_call(&mut self, asm: &mut AsmCmp, r: InstrRef, call: CallRef) -> CompilerResult<()> {
        let node = self.func.calls.get(call).ok_or_else(|| CompilerError::not_found("call node"))?.clone();

        for (i, &arg) in node.arguments.iter().enumerate() {
            let arg_op = self.operand_of(arg)?;
            if let Some(&reg) = ARG_REGS.get(i) {
                asm.push(AsmInstr::new(AsmOp::MovGp, [Operand::Physical(reg, OperandWidth::W64), arg_op]));
            } else {
                asm.push(AsmInstr::new(AsmOp::Push, [arg_op]));
            }
        }

        if let Some(callee) = node.indirect_callee {
            let callee_op = self.operand_of(callee)?;
            asm.push(AsmInstr::new(AsmOp::CallIndirect, [callee_op]));
        } else {
            let decl = self.module.declaration(node.declaration);
            let name = decl.and_then(|d| d.name.clone()).unwrap_or_else(|| format!("fn{}", node.declaration.0));
            let id = asm.intern_symbol(&name);
            asm.push(AsmInstr::new(AsmOp::Call, [Operand::SymbolRef(id)]));
        }

        if let Some(return_value) = node.return_value {
            let dest = self.bind_result(asm, return_value, ValueWidth::Int);
            asm.push(AsmInstr::new(
                AsmOp::MovGp,
                [dest, Operand::Physical(crate::codegen::regalloc::PhysReg::Rax, OperandWidth::W64)],
            ).with_origin(r));
        }
        Ok(())
    }

    /// Inline-asm operand substitution is out of scope; the template is
    /// emitted verbatim (see DESIGN.md and `AsmOp::InlineAsmTemplate`'s doc
    /// comment).
    fn select_inline_asm(
        &mut self,
        asm: &mut AsmCmp,
        asm_ref: crate::opt::inline_asm::InlineAsmRef,
    ) -> CompilerResult<()> {
        let node = self
            .func
            .inline_asms
            .get(asm_ref)
            .ok_or_else(|| CompilerError::not_found("inline asm node"))?;
        let record = self
            .module
            .inline_asm(node.template)
            .ok_or_else(|| CompilerError::not_found("inline asm record"))?;
        let id = asm.intern_inline_asm_template(&record.template);
        asm.push(AsmInstr::new(AsmOp::InlineAsmTemplate(id), SmallVec::<[Operand; 3]>::new()));
        Ok(())
    }

    fn select_terminator(&mut self, r: InstrRef, asm: &mut AsmCmp) -> CompilerResult<()> {
        let operation = self.func.instr(r)?.operation.clone();
        match operation.payload {
            OF::Jump { target } => {
                asm.push(AsmInstr::new(AsmOp::Jmp, [Operand::BlockLabel(target.index())]));
            }
            OF::Branch { variant, cond, target, alternative } => {
                let cond_op = self.operand_of(cond)?;
                asm.push(AsmInstr::new(AsmOp::Test, [cond_op, cond_op]));
                let cc = match variant {
                    CondVariant::NonZero => CondCode::Ne,
                    CondVariant::Zero => CondCode::Eq,
                };
                asm.push(AsmInstr::new(AsmOp::JmpCc(cc), [Operand::BlockLabel(target.index())]));
                asm.push(AsmInstr::new(AsmOp::Jmp, [Operand::BlockLabel(alternative.index())]));
            }
            OF::BranchCompare { cmp, a, b, target, alternative } => {
                let (a_op, b_op) = (self.operand_of(a)?, self.operand_of(b)?);
                asm.push(AsmInstr::new(AsmOp::Cmp, [a_op, b_op]));
                asm.push(AsmInstr::new(AsmOp::JmpCc(cond_code_of(cmp)), [Operand::BlockLabel(target.index())]));
                asm.push(AsmInstr::new(AsmOp::Jmp, [Operand::BlockLabel(alternative.index())]));
            }
            OF::IndirectJump { target } => {
                let target_op = self.operand_of(target)?;
                asm.push(AsmInstr::new(AsmOp::CallIndirect, [target_op]));
            }
            OF::Return(value) => {
                if let Some(value) = value {
                    let value_op = self.operand_of(value)?;
                    asm.push(AsmInstr::new(
                        AsmOp::MovGp,
                        [Operand::Physical(crate::codegen::regalloc::PhysReg::Rax, OperandWidth::W64), value_op],
                    ));
                }
                asm.push(AsmInstr::new(AsmOp::Ret, SmallVec::<[Operand; 3]>::new()));
            }
            OF::NoOperand => {
                // `Unreachable`: no well-defined successor; emitted as a
                // trap-free `ret` so the block still ends validly.
                asm.push(AsmInstr::new(AsmOp::Ret, SmallVec::<[Operand; 3]>::new()));
            }
            _ => return Err(CompilerError::internal("non-terminator payload on a terminator instruction")),
        }
        Ok(())
    }
}

fn cond_code_of(cmp: CmpOp) -> CondCode {
    match cmp {
        CmpOp::Eq => CondCode::Eq,
        CmpOp::Ne => CondCode::Ne,
        CmpOp::SLt => CondCode::SLt,
        CmpOp::SLe => CondCode::SLe,
        CmpOp::SGt => CondCode::SGt,
        CmpOp::SGe => CondCode::SGe,
        CmpOp::ULt => CondCode::ULt,
        CmpOp::ULe => CondCode::ULe,
        CmpOp::UGt => CondCode::UGt,
        CmpOp::UGe => CondCode::UGe,
    }
}

fn mask_for_width(width: u32) -> i64 {
    if width >= 64 {
        -1
    } else {
        (1i64 << width) - 1
    }
}

/// Byte offset of member `index` within a flat type-entry sequence
/// (spec §4.2's entry-sequence layout; see `regalloc::layout_of` for the
/// sibling whole-type sizing helper).
fn member_offset(entries: &[TypeEntry], index: usize) -> u64 {
    let mut offset = 0u64;
    for entry in entries.iter().take(index) {
        offset += match entry.opcode {
            TypeOpcode::Int8 | TypeOpcode::Bool => 1,
            TypeOpcode::Int16 => 2,
            TypeOpcode::Int32 | TypeOpcode::Float32 => 4,
            TypeOpcode::Int64 | TypeOpcode::Float64 | TypeOpcode::Pointer => 8,
            TypeOpcode::LongDouble => 16,
            TypeOpcode::Pad => entry.param,
            _ => 8,
        };
    }
    offset
}
