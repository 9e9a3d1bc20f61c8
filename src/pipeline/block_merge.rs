//! Block merging (spec §4.6.1): folds a block into its exclusive
//! predecessor, and collapses constant-only passthrough branch targets
//! directly into their branching block.

use crate::analysis::structure::Structure;
use crate::common::error::CompilerResult;
use crate::opt::block::BlockRef;
use crate::opt::container::OptFunction;
use crate::opt::operation::{Opcode, OperationFamily};

pub fn run(func: &mut OptFunction) -> CompilerResult<bool> {
    let mut changed_overall = false;
    loop {
        let structure = Structure::build(func)?;
        let mut applied = false;
        for block in structure.rpo().to_vec() {
            if try_jump_merge(func, &structure, block)? {
                applied = true;
                break;
            }
            if try_passthrough_merge(func, &structure, block)? {
                applied = true;
                break;
            }
        }
        if !applied {
            break;
        }
        changed_overall = true;
    }
    Ok(changed_overall)
}

/// `T = jump target` where `target`'s exclusive direct predecessor is `B`.
fn try_jump_merge(func: &mut OptFunction, structure: &Structure, block: BlockRef) -> CompilerResult<bool> {
    let Ok(term) = func.terminator(block) else { return Ok(false) };
    let target = match &func.instr(term)?.operation.payload {
        OperationFamily::Jump { target } => *target,
        _ => return Ok(false),
    };
    if !structure.block_exclusive_direct_predecessor(block, target) {
        return Ok(false);
    }

    structure.redirect_edges(func, target, block)?;
    func.drop_control(term)?;
    func.drop_instr(term)?;
    merge_block_into(func, target, block)?;
    Ok(true)
}

/// `T = branch(...)`: fold constant-only passthrough sides into `B`.
fn try_passthrough_merge(func: &mut OptFunction, structure: &Structure, block: BlockRef) -> CompilerResult<bool> {
    let Ok(term) = func.terminator(block) else { return Ok(false) };
    let (tt, tf) = match &func.instr(term)?.operation.payload {
        OperationFamily::Branch { target, alternative, .. } => (*target, *alternative),
        OperationFamily::BranchCompare { target, alternative, .. } => (*target, *alternative),
        _ => return Ok(false),
    };

    let tt_pass = if structure.block_exclusive_direct_predecessor(block, tt) {
        passthrough_ultimate_target(func, tt)?
    } else {
        None
    };
    let tf_pass = if structure.block_exclusive_direct_predecessor(block, tf) {
        passthrough_ultimate_target(func, tf)?
    } else {
        None
    };

    if let Some(tt_ultimate) = tt_pass {
        let other_ultimate = tf_pass.unwrap_or(tf);
        if tt_ultimate != other_ultimate {
            fold_passthrough_side(func, block, tt, tt_ultimate)?;
            return Ok(true);
        }
    }
    if let Some(tf_ultimate) = tf_pass {
        let other_ultimate = tt_pass.unwrap_or(tt);
        if tf_ultimate != other_ultimate {
            fold_passthrough_side(func, block, tf, tf_ultimate)?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// A passthrough block: exactly one control instruction (a `jump`), and
/// every data instruction constant-producing. Returns the jump's target
/// when `block` qualifies.
fn passthrough_ultimate_target(func: &OptFunction, block: BlockRef) -> CompilerResult<Option<BlockRef>> {
    let b = func.block(block)?;
    if b.control_head.is_none() || b.control_head != b.control_tail {
        return Ok(None);
    }
    let term = b.control_head.unwrap();
    let target = match &func.instr(term)?.operation.payload {
        OperationFamily::Jump { target } => *target,
        _ => return Ok(None),
    };
    for instr in func.block_data_instrs(block)? {
        let opcode = func.instr(instr)?.operation.opcode;
        if !matches!(
            opcode,
            Opcode::IntConst
                | Opcode::Float32Const
                | Opcode::Float64Const
                | Opcode::LongDoubleConst
                | Opcode::StringRefConst
                | Opcode::BlockLabelConst
        ) {
            return Ok(None);
        }
    }
    Ok(Some(target))
}

/// Merges passthrough block `side` into `block` and retargets `block`'s
/// branch from `side` to `ultimate`, dropping `side`'s own jump.
fn fold_passthrough_side(
    func: &mut OptFunction,
    block: BlockRef,
    side: BlockRef,
    ultimate: BlockRef,
) -> CompilerResult<()> {
    let structure = Structure::build(func)?;
    // Rewrites phi links in `ultimate` and every terminator in the function
    // (including `block`'s own branch) that names `side`.
    structure.redirect_edges(func, side, ultimate)?;

    let side_term = func.block(side)?.control_head.expect("passthrough has exactly one control instr");
    func.drop_control(side_term)?;
    func.drop_instr(side_term)?;

    merge_block_into(func, side, block)?;
    Ok(())
}

/// Splices `from`'s data list, control list, phis, calls, and inline-asm
/// nodes onto the tail of `into`'s, reassigning the `block` field of every
/// moved instruction/phi. `from` is left empty (a dead block, no longer
/// reachable once its inbound edges have been redirected).
fn merge_block_into(func: &mut OptFunction, from: BlockRef, into: BlockRef) -> CompilerResult<()> {
    let from_data_head = func.block(from)?.data_head;
    let from_data_tail = func.block(from)?.data_tail;
    if let Some(head) = from_data_head {
        let into_tail = func.block(into)?.data_tail;
        if let Some(t) = into_tail {
            func.instr_mut(t)?.data_next = Some(head);
        }
        func.instr_mut(head)?.data_prev = into_tail;
        func.block_mut(into)?.data_tail = from_data_tail;
        if func.block(into)?.data_head.is_none() {
            func.block_mut(into)?.data_head = Some(head);
        }
        let mut cur = Some(head);
        while let Some(c) = cur {
            let next = func.instr(c)?.data_next;
            func.instr_mut(c)?.block = Some(into);
            if Some(c) == from_data_tail {
                break;
            }
            cur = next;
        }
    }

    let from_control_head = func.block(from)?.control_head;
    let from_control_tail = func.block(from)?.control_tail;
    if let Some(head) = from_control_head {
        let into_tail = func.block(into)?.control_tail;
        if let Some(t) = into_tail {
            func.instr_mut(t)?.control_next = Some(head);
        }
        func.instr_mut(head)?.control_prev = into_tail;
        func.block_mut(into)?.control_tail = from_control_tail;
        if func.block(into)?.control_head.is_none() {
            func.block_mut(into)?.control_head = Some(head);
        }
        let mut cur = Some(head);
        while let Some(c) = cur {
            let next = func.instr(c)?.control_next;
            if Some(c) == from_control_tail {
                break;
            }
            cur = next;
        }
    }

    let phis = std::mem::take(&mut func.block_mut(from)?.phis);
    for phi in &phis {
        if let Some(node) = func.phis.get_mut(*phi) {
            node.block = into;
        }
    }
    func.block_mut(into)?.phis.extend(phis);

    let calls = std::mem::take(&mut func.block_mut(from)?.calls);
    func.block_mut(into)?.calls.extend(calls);

    let asms = std::mem::take(&mut func.block_mut(from)?.inline_asms);
    func.block_mut(into)?.inline_asms.extend(asms);

    let from_block = func.block_mut(from)?;
    from_block.data_head = None;
    from_block.data_tail = None;
    from_block.control_head = None;
    from_block.control_tail = None;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::builder::FunctionBuilder;
    use crate::opt::operation::{CondVariant, Immediate, Opcode, OperationFamily as OF};

    #[test]
    fn merges_through_exclusive_predecessor() {
        // A -> B (jump), B is A's only successor and A is B's only predecessor.
        let mut b = FunctionBuilder::new("chain");
        let a = b.current_block();
        let tail = b.start_block();

        b.set_current(a);
        b.push_control(Opcode::Jump, OF::Jump { target: tail }, false).unwrap();
        b.set_current(tail);
        b.push_control(Opcode::Return, OF::Return(None), false).unwrap();

        let mut func = b.finish();
        let changed = run(&mut func).unwrap();
        assert!(changed);

        let structure = Structure::build(&func).unwrap();
        assert_eq!(func.block_control_instrs(a).unwrap().len(), 1);
        assert!(structure.is_reachable_from_entry(a));
    }

    #[test]
    fn merges_passthrough_through_branch() {
        // A branches on c to B or C; B is a passthrough to D; C jumps to E != D.
        let mut fb = FunctionBuilder::new("passthrough");
        let entry = fb.current_block();
        let side_b = fb.start_block();
        let side_c = fb.start_block();
        let d = fb.start_block();
        let e = fb.start_block();

        fb.set_current(entry);
        let c = fb.push(Opcode::IntConst, OF::Immediate(Immediate::Int(1))).unwrap();
        fb.push_control(
            Opcode::Branch,
            OF::Branch { variant: CondVariant::NonZero, cond: c, target: side_b, alternative: side_c },
            false,
        )
        .unwrap();

        fb.set_current(side_b);
        fb.push_control(Opcode::Jump, OF::Jump { target: d }, false).unwrap();
        fb.set_current(side_c);
        fb.push_control(Opcode::Jump, OF::Jump { target: e }, false).unwrap();
        fb.set_current(d);
        fb.push_control(Opcode::Return, OF::Return(None), false).unwrap();
        fb.set_current(e);
        fb.push_control(Opcode::Return, OF::Return(None), false).unwrap();

        let mut func = fb.finish();
        let changed = run(&mut func).unwrap();
        assert!(changed);

        let term = func.terminator(entry).unwrap();
        match &func.instr(term).unwrap().operation.payload {
            OF::Branch { target, alternative, .. } => {
                assert_eq!(*target, d);
                assert_eq!(*alternative, e);
            }
            other => panic!("expected branch, got {other:?}"),
        }
    }
}
