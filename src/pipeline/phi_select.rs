//! Phi-to-select conversion (spec §4.6.4): a two-incoming-link phi whose
//! immediate dominator ends in `branch(cond, Tt, Tf)` becomes a `select`
//! when each branch side is either the phi's own block or a single-jump
//! block exclusively reached from the dominator. Link values computed in a
//! hoisted-away side block are moved into the phi's block first; the side
//! block itself is left as an (now likely empty) jump, for a later
//! block-merge pass to fold away as a passthrough.

use crate::analysis::structure::Structure;
use crate::common::error::CompilerResult;
use crate::common::fx_hash::FxHashSet;
use crate::opt::block::BlockRef;
use crate::opt::container::OptFunction;
use crate::opt::instr::InstrRef;
use crate::opt::operation::{CondVariant, Operation, OperationFamily};
use crate::opt::phi::PhiRef;

pub fn run(func: &mut OptFunction) -> CompilerResult<bool> {
    let mut changed_overall = false;
    loop {
        let structure = Structure::build(func)?;
        let mut applied = false;
        'blocks: for block in func.all_block_refs() {
            let phis = func.block(block)?.phis.clone();
            for phi in phis {
                if try_convert(func, &structure, block, phi)? {
                    applied = true;
                    changed_overall = true;
                    break 'blocks;
                }
            }
        }
        if !applied {
            break;
        }
    }
    Ok(changed_overall)
}

fn try_convert(func: &mut OptFunction, structure: &Structure, block: BlockRef, phi: PhiRef) -> CompilerResult<bool> {
    let Some(node) = func.phis.get(phi).cloned() else { return Ok(false) };
    if node.links.len() != 2 {
        return Ok(false);
    }
    let Some(dom) = structure.immediate_dominator(block) else { return Ok(false) };
    let term = func.terminator(dom)?;
    let (variant, cond, target, alternative) = match &func.instr(term)?.operation.payload {
        OperationFamily::Branch { variant, cond, target, alternative } => (*variant, *cond, *target, *alternative),
        // BranchCompare carries no materialised condition value to feed a
        // select; only the explicit-cond `Branch` form qualifies.
        _ => return Ok(false),
    };

    let Some((value_t, hoist_t)) = resolve_side(func, structure, dom, block, target, &node)? else { return Ok(false) };
    let Some((value_f, hoist_f)) = resolve_side(func, structure, dom, block, alternative, &node)? else { return Ok(false) };

    if let Some(side) = hoist_t {
        hoist_chain(func, side, block, value_t)?;
    }
    if let Some(side) = hoist_f {
        hoist_chain(func, side, block, value_f)?;
    }

    let select_op = Operation::new(
        crate::opt::operation::Opcode::Select,
        OperationFamily::Select { variant, cond, on_true: value_t, on_false: value_f },
    );
    let select_instr = func.new_instruction(block, select_op, true)?;
    func.replace_references(node.output, select_instr)?;
    func.drop_phi(phi)?;
    Ok(true)
}

/// Resolves one branch side: `Ok(Some((value, hoist_from)))` when the side
/// qualifies, `hoist_from` naming the intermediate block its value must be
/// hoisted out of (`None` when the side *is* the phi's own block, so the
/// link value already lives there).
fn resolve_side(
    func: &OptFunction,
    structure: &Structure,
    dom: BlockRef,
    phi_block: BlockRef,
    side: BlockRef,
    node: &crate::opt::phi::PhiNode,
) -> CompilerResult<Option<(InstrRef, Option<BlockRef>)>> {
    if side == phi_block {
        return Ok(node.value_from(dom).map(|v| (v, None)));
    }
    if !structure.block_exclusive_direct_predecessor(dom, side) {
        return Ok(None);
    }
    let ctrl = func.block_control_instrs(side)?;
    if ctrl.len() != 1 {
        return Ok(None);
    }
    match &func.instr(ctrl[0])?.operation.payload {
        OperationFamily::Jump { target } if *target == phi_block => {}
        _ => return Ok(None),
    }
    Ok(node.value_from(side).map(|v| (v, Some(side))))
}

/// Moves `value`'s dependency closure that physically resides in `from`
/// into `into`, preserving their relative data-list order (which already
/// encodes def-before-use within `from`, per the container's invariant).
/// Anything the closure depends on outside `from` is, by construction,
/// defined in a block dominating `from`'s exclusive predecessor and so
/// already dominates `into` — no further dominance check is needed.
fn hoist_chain(func: &mut OptFunction, from: BlockRef, into: BlockRef, value: InstrRef) -> CompilerResult<()> {
    let mut in_from: FxHashSet<InstrRef> = FxHashSet::default();
    let mut stack = vec![value];
    while let Some(i) = stack.pop() {
        let Ok(instr) = func.instr(i) else { continue };
        if instr.block != Some(from) {
            continue;
        }
        if !in_from.insert(i) {
            continue;
        }
        stack.extend(instr.operation.operand_refs());
    }
    if in_from.is_empty() {
        return Ok(());
    }
    let ordered: Vec<InstrRef> = func.block_data_instrs(from)?.into_iter().filter(|i| in_from.contains(i)).collect();
    for instr in ordered {
        func.move_to_block(instr, into)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::builder::FunctionBuilder;
    use crate::opt::operation::{Immediate, Opcode, OperationFamily as OF};

    #[test]
    fn converts_diamond_constant_phi_to_select() {
        // spec §8 scenario 3.
        let mut b = FunctionBuilder::new("diamond_select");
        let entry = b.current_block();
        let t = b.start_block();
        let f = b.start_block();
        let merge = b.start_block();

        b.set_current(entry);
        let cond = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(1))).unwrap();
        b.push_control(
            Opcode::Branch,
            OF::Branch { variant: CondVariant::NonZero, cond, target: t, alternative: f },
            false,
        )
        .unwrap();

        b.set_current(t);
        let k1 = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(10))).unwrap();
        b.push_control(Opcode::Jump, OF::Jump { target: merge }, false).unwrap();

        b.set_current(f);
        let k2 = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(20))).unwrap();
        b.push_control(Opcode::Jump, OF::Jump { target: merge }, false).unwrap();

        b.set_current(merge);
        let placeholder = b.push_with_effects(Opcode::Phi, OF::NoOperand, true).unwrap();
        let phi = b.new_phi(merge, placeholder).unwrap();
        b.set_phi_link(phi, t, k1).unwrap();
        b.set_phi_link(phi, f, k2).unwrap();
        b.push_control(Opcode::Return, OF::Return(Some(placeholder)), false).unwrap();

        let mut func = b.finish();
        let changed = run(&mut func).unwrap();
        assert!(changed);
        assert!(func.instr(placeholder).is_err());

        let term = func.terminator(merge).unwrap();
        match &func.instr(term).unwrap().operation.payload {
            OF::Return(Some(r)) => match &func.instr(*r).unwrap().operation.payload {
                OF::Select { on_true, on_false, .. } => {
                    assert_eq!(*on_true, k1);
                    assert_eq!(*on_false, k2);
                }
                other => panic!("expected select, got {other:?}"),
            },
            other => panic!("expected return, got {other:?}"),
        }
    }
}
