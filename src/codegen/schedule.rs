//! Per-block instruction scheduling (spec §4.7, §9(a)): reorders the
//! virtual-register instructions `select.rs` emitted for one function,
//! operating directly on [`AsmCmp::instructions`] between consecutive
//! label offsets.
//!
//! The resolved open question (spec §11(a)) is "definition order within the
//! block, tie-broken by ascending instruction reference" — which is already
//! what `select.rs` produces, since it walks the SSA data list in order and
//! every asmcmp instruction it emits inherits a strictly increasing
//! position. This pass's job is the three named special cases (spec §8):
//! pulling a value-producing instruction to sit immediately before the
//! first anchor that consumes it (covering both "float-compare-against-
//! constant" and "tail-call argument announcement" as instances of the same
//! rule), and eliding [`AsmOp::LifetimeMarker`] before devirtualization.
//!
//! "Anchor" instructions — calls, memory ops, flag producers/consumers, the
//! x87 stack ops, and block terminators — keep their original relative
//! order; the scheduler never reorders across two anchors, only pulls
//! movable data ops forward to meet the anchor that needs them.

use smallvec::SmallVec;

use crate::codegen::asmcmp::{AsmCmp, AsmInstr, AsmOp, Operand, VReg};
use crate::common::error::CompilerResult;

fn is_anchor(op: AsmOp) -> bool {
    use AsmOp::*;
    matches!(
        op,
        Call | CallIndirect
            | Load
            | Store
            | Push
            | Pop
            | IDiv
            | Cmp
            | Test
            | SetFromFlags(_)
            | CMovFromFlags(_)
            | Jmp
            | JmpCc(_)
            | Ret
            | UComissF
            | FldX87
            | FstpX87
            | FxchX87
            | FaddpX87
            | FsubpX87
            | FmulpX87
            | FdivpX87
            | FchsX87
            | LockXadd
            | LockCmpxchg
            | MFence
    )
}

/// The single vreg a movable instruction defines, by the destination-first
/// convention `select.rs` uses. `None` for instructions that do not define
/// one (covered by `is_anchor` instead, in practice).
fn defined_vreg(instr: &AsmInstr) -> Option<VReg> {
    use AsmOp::*;
    match instr.op {
        MovGp | MovF | Lea | Add | Sub | IMul | Neg | Not | And | Or | Xor | Shl | Sar | Shr
        | Cvt | AddF | SubF | MulF | DivF | NegF => match instr.operands.first() {
            Some(Operand::VirtualReg(v, _)) => Some(*v),
            _ => None,
        },
        _ => None,
    }
}

fn used_vregs(instr: &AsmInstr) -> SmallVec<[VReg; 3]> {
    let mut out = SmallVec::new();
    for op in &instr.operands {
        match op {
            Operand::VirtualReg(v, _) => out.push(*v),
            Operand::MemoryIndirect { base, .. } => out.push(*base),
            _ => {}
        }
    }
    out
}

/// Runs the scheduler over every block of `asm` in place.
pub fn run(asm: &mut AsmCmp) -> CompilerResult<()> {
    let mut boundaries: Vec<usize> = asm.labels.values().copied().collect();
    boundaries.push(0);
    boundaries.sort_unstable();
    boundaries.dedup();
    boundaries.push(asm.instructions.len());

    let mut scheduled: Vec<AsmInstr> = Vec::with_capacity(asm.instructions.len());
    let mut new_labels: Vec<(u32, usize)> = Vec::new();
    let label_at: std::collections::BTreeMap<usize, u32> =
        asm.labels.iter().map(|(&block, &pos)| (pos, block)).collect();

    for window in boundaries.windows(2) {
        let (start, end) = (window[0], window[1]);
        if let Some(&block_id) = label_at.get(&start) {
            new_labels.push((block_id, scheduled.len()));
        }
        schedule_block(&asm.instructions[start..end], &mut scheduled);
    }

    asm.instructions = scheduled;
    asm.labels = new_labels.into_iter().collect();
    Ok(())
}

fn schedule_block(slice: &[AsmInstr], out: &mut Vec<AsmInstr>) {
    let mut pending: Vec<AsmInstr> = Vec::new();

    for instr in slice {
        if instr.op == AsmOp::LifetimeMarker {
            continue;
        }
        if is_anchor(instr.op) {
            let used = used_vregs(instr);
            let mut remaining = Vec::with_capacity(pending.len());
            for p in pending.drain(..) {
                if let Some(v) = defined_vreg(&p) {
                    if used.contains(&v) {
                        out.push(p);
                        continue;
                    }
                }
                remaining.push(p);
            }
            pending = remaining;
            out.push(instr.clone());
        } else {
            pending.push(instr.clone());
        }
    }
    out.extend(pending);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::asmcmp::{CondCode, OperandWidth, VRegClass};

    #[test]
    fn pulls_constant_load_next_to_its_comparison() {
        let mut asm = AsmCmp::new("f");
        let a = asm.new_vreg(VRegClass::GeneralPurpose);
        let b = asm.new_vreg(VRegClass::GeneralPurpose);
        let unrelated = asm.new_vreg(VRegClass::GeneralPurpose);
        asm.label_here(0);
        asm.push(AsmInstr::new(
            AsmOp::MovGp,
            [Operand::VirtualReg(b, OperandWidth::W64), Operand::Immediate64(7)],
        ));
        asm.push(AsmInstr::new(
            AsmOp::MovGp,
            [Operand::VirtualReg(unrelated, OperandWidth::W64), Operand::Immediate64(1)],
        ));
        asm.push(AsmInstr::new(
            AsmOp::Cmp,
            [Operand::VirtualReg(a, OperandWidth::W64), Operand::VirtualReg(b, OperandWidth::W64)],
        ));
        asm.push(AsmInstr::new(
            AsmOp::SetFromFlags(CondCode::Eq),
            [Operand::VirtualReg(a, OperandWidth::W64)],
        ));

        run(&mut asm).unwrap();

        assert_eq!(asm.instructions.len(), 4);
        assert_eq!(asm.instructions[1].op, AsmOp::MovGp);
        if let Operand::VirtualReg(v, _) = asm.instructions[1].operands[0] {
            assert_eq!(v, b);
        } else {
            panic!("expected the constant load immediately before the compare");
        }
        assert_eq!(asm.instructions[2].op, AsmOp::Cmp);
    }

    #[test]
    fn elides_lifetime_markers() {
        let mut asm = AsmCmp::new("g");
        asm.label_here(0);
        asm.push(AsmInstr::new(AsmOp::LifetimeMarker, []));
        asm.push(AsmInstr::new(AsmOp::Ret, []));
        run(&mut asm).unwrap();
        assert_eq!(asm.instructions.len(), 1);
        assert_eq!(asm.instructions[0].op, AsmOp::Ret);
    }
}
