//! Devirtualization (spec §4.7): rewrites every `Operand::VirtualReg`/
//! `Operand::MemoryIndirect` left by `select`+`schedule` into a concrete
//! physical-register or `%rbp`-relative operand, using the assignments
//! `regalloc` computed. Also computes the function's [`FrameDescriptor`]
//! and splices in the prologue/epilogue.
//!
//! Three vreg classes reach this pass: a `Physical` assignment becomes
//! `Operand::Physical`; a `DirectSpill`/`SpillSpace` assignment (the common
//! case — every `alloc-local` and every register-allocator spill) becomes a
//! direct `%rbp`-relative operand, since the slot itself holds the value.
//! `IndirectSpill` (the `LocalVariable` class; spec §4.7's "variable
//! allocator") is reached through one more level of indirection: the slot
//! holds a pointer, so devirtualize loads it into the scratch register
//! (`R11`, withheld from `regalloc`'s allocation pool for exactly this)
//! before substituting it as a memory base.

use smallvec::SmallVec;

use crate::codegen::asmcmp::{AsmCmp, AsmInstr, AsmOp, FrameDescriptor, Operand, OperandWidth};
use crate::codegen::regalloc::{Assignment, PhysReg, RegisterAllocator};
use crate::common::error::CompilerResult;

const SCRATCH: PhysReg = PhysReg::R11;

/// Rewrites `asm` in place: every virtual operand becomes concrete, and a
/// standard push-rbp/sub-rsp prologue plus matching epilogue (one per `ret`)
/// is spliced in.
pub fn run(asm: &mut AsmCmp, regs: &RegisterAllocator) -> CompilerResult<()> {
    let frame_size = align_up(max_frame_size(regs), 16);
    let used_callee_saved = callee_saved_in_use(regs);

    let mut rewritten: Vec<AsmInstr> = Vec::with_capacity(asm.instructions.len());
    let mut index_map: Vec<usize> = Vec::with_capacity(asm.instructions.len() + 1);

    for instr in &asm.instructions {
        index_map.push(rewritten.len());
        devirtualize_instr(instr, regs, &mut rewritten);
    }
    index_map.push(rewritten.len()); // one-past-the-end, for a label on the last block

    asm.frame = FrameDescriptor {
        frame_size: frame_size as u32,
        alignment: 16,
        preserved_registers: used_callee_saved.clone(),
        saves_mxcsr: false,
        saves_x87_control_word: false,
        vararg_save_area: None,
    };

    let prologue = build_prologue(frame_size, &used_callee_saved);
    let prologue_len = prologue.len();
    let mut final_instrs = prologue;
    for instr in rewritten {
        if instr.op == AsmOp::Ret {
            final_instrs.extend(build_epilogue(frame_size, &used_callee_saved));
        }
        final_instrs.push(instr);
    }

    asm.labels = asm.labels.iter().map(|(&block, &pos)| (block, index_map[pos] + prologue_len)).collect();
    asm.instructions = final_instrs;
    Ok(())
}

fn max_frame_size(regs: &RegisterAllocator) -> i32 {
    regs.assignments
        .values()
        .filter_map(|a| match a {
            Assignment::DirectSpill { offset, .. } | Assignment::IndirectSpill { offset, .. } => Some(-offset),
            Assignment::Physical(_) => None,
        })
        .max()
        .unwrap_or(0)
}

fn callee_saved_in_use(regs: &RegisterAllocator) -> Vec<PhysReg> {
    let mut used: Vec<PhysReg> = regs
        .assignments
        .values()
        .filter_map(|a| match a {
            Assignment::Physical(p) if p.is_callee_saved() => Some(*p),
            _ => None,
        })
        .collect();
    used.sort();
    used.dedup();
    used
}

fn build_prologue(frame_size: i32, preserved: &[PhysReg]) -> Vec<AsmInstr> {
    let mut out = vec![push(PhysReg::Rbp), mov64(PhysReg::Rbp, PhysReg::Rsp)];
    for &reg in preserved {
        out.push(push(reg));
    }
    if frame_size > 0 {
        out.push(AsmInstr::new(
            AsmOp::Sub,
            [phys(PhysReg::Rsp), phys(PhysReg::Rsp), Operand::Immediate64(frame_size as i64)],
        ));
    }
    out
}

fn build_epilogue(frame_size: i32, preserved: &[PhysReg]) -> Vec<AsmInstr> {
    let mut out = Vec::new();
    if frame_size > 0 {
        out.push(AsmInstr::new(
            AsmOp::Add,
            [phys(PhysReg::Rsp), phys(PhysReg::Rsp), Operand::Immediate64(frame_size as i64)],
        ));
    }
    for &reg in preserved.iter().rev() {
        out.push(pop(reg));
    }
    out.push(pop(PhysReg::Rbp));
    out
}

fn phys(reg: PhysReg) -> Operand {
    Operand::Physical(reg, OperandWidth::W64)
}

fn push(reg: PhysReg) -> AsmInstr {
    AsmInstr::new(AsmOp::Push, [phys(reg)])
}

fn pop(reg: PhysReg) -> AsmInstr {
    AsmInstr::new(AsmOp::Pop, [phys(reg)])
}

fn mov64(dest: PhysReg, src: PhysReg) -> AsmInstr {
    AsmInstr::new(AsmOp::MovGp, [phys(dest), phys(src)])
}

/// Resolves one vreg used as a plain value operand, with the
/// `IndirectSpill` case materialised as a scratch-register load appended to
/// `pre`.
fn resolve_value(v: crate::codegen::asmcmp::VReg, width: OperandWidth, regs: &RegisterAllocator, pre: &mut Vec<AsmInstr>) -> Operand {
    match regs.assignment(v) {
        Some(Assignment::Physical(p)) => Operand::Physical(p, width),
        Some(Assignment::DirectSpill { offset, .. }) => {
            Operand::MemoryIndirectPhys { base: PhysReg::Rbp, disp: offset, width }
        }
        Some(Assignment::IndirectSpill { offset, .. }) => {
            pre.push(AsmInstr::new(
                AsmOp::MovGp,
                [phys(SCRATCH), Operand::MemoryIndirectPhys { base: PhysReg::Rbp, disp: offset, width: OperandWidth::W64 }],
            ));
            Operand::Physical(SCRATCH, width)
        }
        None => Operand::Immediate64(0),
    }
}

/// Resolves one vreg used as a memory base (`MemoryIndirect { base, disp,
/// .. }`). `DirectSpill` collapses straight to `%rbp`-relative addressing —
/// the slot *is* the addressed storage, so the base vreg and the disp add —
/// matching `select.rs::select_alloc_local`'s convention that an
/// `alloc-local` vreg's "value" is its own stack address.
fn resolve_base(
    v: crate::codegen::asmcmp::VReg,
    disp: i32,
    width: OperandWidth,
    regs: &RegisterAllocator,
    pre: &mut Vec<AsmInstr>,
) -> Operand {
    match regs.assignment(v) {
        Some(Assignment::Physical(p)) => Operand::MemoryIndirectPhys { base: p, disp, width },
        Some(Assignment::DirectSpill { offset, .. }) => {
            Operand::MemoryIndirectPhys { base: PhysReg::Rbp, disp: offset + disp, width }
        }
        Some(Assignment::IndirectSpill { offset, .. }) => {
            pre.push(AsmInstr::new(
                AsmOp::MovGp,
                [phys(SCRATCH), Operand::MemoryIndirectPhys { base: PhysReg::Rbp, disp: offset, width: OperandWidth::W64 }],
            ));
            Operand::MemoryIndirectPhys { base: SCRATCH, disp, width }
        }
        None => Operand::MemoryIndirectPhys { base: PhysReg::Rbp, disp, width },
    }
}

fn devirtualize_instr(instr: &AsmInstr, regs: &RegisterAllocator, out: &mut Vec<AsmInstr>) {
    let mut pre: Vec<AsmInstr> = Vec::new();
    let mut operands: SmallVec<[Operand; 3]> = SmallVec::new();
    for op in &instr.operands {
        let resolved = match *op {
            Operand::VirtualReg(v, width) => resolve_value(v, width, regs, &mut pre),
            Operand::MemoryIndirect { base, disp, width } => resolve_base(base, disp, width, regs, &mut pre),
            other => other,
        };
        operands.push(resolved);
    }
    out.extend(pre);
    out.push(AsmInstr { op: instr.op, operands, origin: instr.origin });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::asmcmp::{AsmInstr, AsmOp, VReg, VRegClass};
    use crate::common::fx_hash::FxHashMap;

    fn allocator(assignments: &[(u32, Assignment)]) -> RegisterAllocator {
        RegisterAllocator { assignments: assignments.iter().cloned().collect::<FxHashMap<_, _>>() }
    }

    #[test]
    fn physical_vreg_rewrites_to_physical_operand() {
        let regs = allocator(&[(0, Assignment::Physical(PhysReg::Rax))]);
        let instr = AsmInstr::new(AsmOp::MovGp, [Operand::VirtualReg(VReg(0), OperandWidth::W64)]);
        let mut out = Vec::new();
        devirtualize_instr(&instr, &regs, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].operands[0], Operand::Physical(PhysReg::Rax, OperandWidth::W64));
    }

    #[test]
    fn direct_spill_rewrites_to_rbp_relative_operand() {
        let regs = allocator(&[(0, Assignment::DirectSpill { offset: -8, size: 8, align: 8 })]);
        let instr = AsmInstr::new(AsmOp::MovGp, [Operand::VirtualReg(VReg(0), OperandWidth::W64)]);
        let mut out = Vec::new();
        devirtualize_instr(&instr, &regs, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].operands[0],
            Operand::MemoryIndirectPhys { base: PhysReg::Rbp, disp: -8, width: OperandWidth::W64 }
        );
    }

    #[test]
    fn indirect_spill_inserts_scratch_load_before_the_instruction() {
        let regs = allocator(&[(0, Assignment::IndirectSpill { offset: -16, size: 8, align: 8 })]);
        let instr = AsmInstr::new(AsmOp::MovGp, [Operand::VirtualReg(VReg(0), OperandWidth::W64)]);
        let mut out = Vec::new();
        devirtualize_instr(&instr, &regs, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].op, AsmOp::MovGp);
        assert_eq!(
            out[0].operands[1],
            Operand::MemoryIndirectPhys { base: PhysReg::Rbp, disp: -16, width: OperandWidth::W64 }
        );
        assert_eq!(out[1].operands[0], Operand::Physical(SCRATCH, OperandWidth::W64));
    }

    #[test]
    fn prologue_and_epilogue_bracket_every_return() {
        let regs = allocator(&[
            (0, Assignment::Physical(PhysReg::Rbx)),
            (1, Assignment::DirectSpill { offset: -8, size: 8, align: 8 }),
        ]);
        let mut asm = crate::codegen::asmcmp::AsmCmp::new("f");
        asm.push(AsmInstr::new(AsmOp::Ret, []));
        let _ = asm.new_vreg(VRegClass::GeneralPurpose);
        let _ = asm.new_vreg(VRegClass::GeneralPurpose);

        run(&mut asm, &regs).expect("devirtualize succeeds");

        assert_eq!(asm.instructions.first().map(|i| i.op), Some(AsmOp::Push));
        assert!(asm.instructions.iter().any(|i| i.op == AsmOp::Sub));
        let ret_pos = asm.instructions.iter().position(|i| i.op == AsmOp::Ret).expect("ret present");
        assert_eq!(asm.instructions[ret_pos - 1].op, AsmOp::Pop);
        assert!(used_callee_saved_contains_rbx(&regs));
    }

    fn used_callee_saved_contains_rbx(regs: &RegisterAllocator) -> bool {
        callee_saved_in_use(regs).contains(&PhysReg::Rbx)
    }
}
