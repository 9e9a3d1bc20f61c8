//! Local-allocation sinking (spec §4.6.5): every `alloc-local` moves to the
//! closest common dominator of all its use sites (including phi link
//! sources), shrinking its live range ahead of register allocation's spill
//! decisions.

use crate::analysis::structure::Structure;
use crate::common::error::CompilerResult;
use crate::opt::block::BlockRef;
use crate::opt::call::CallRef;
use crate::opt::container::OptFunction;
use crate::opt::inline_asm::InlineAsmRef;
use crate::opt::instr::InstrRef;
use crate::opt::operation::Opcode;

pub fn run(func: &mut OptFunction) -> CompilerResult<bool> {
    let mut changed = false;
    let structure = Structure::build(func)?;

    let mut allocs = Vec::new();
    for block in func.all_block_refs() {
        for instr in func.block_data_instrs(block)? {
            if func.instr(instr)?.operation.opcode == Opcode::AllocLocal {
                allocs.push(instr);
            }
        }
    }

    for alloc in allocs {
        let Ok(node) = func.instr(alloc) else { continue };
        let current_block = node.block.expect("instr() rejects dropped refs");
        let Some(ccd) = use_sites_ccd(func, &structure, alloc)? else { continue };
        if ccd != current_block {
            // Head insertion: the allocation must precede every instruction
            // already resident in the sink target, including any that use
            // it (tail insertion would place it after them).
            func.move_to_block_front(alloc, ccd)?;
            changed = true;
        }
    }

    Ok(changed)
}

/// Closest common dominator of every recorded use site of `r`: ordinary
/// instruction operands, phi link sources (the *predecessor* block, not
/// the phi's own block), and call/inline-asm argument sites.
fn use_sites_ccd(func: &OptFunction, structure: &Structure, r: InstrRef) -> CompilerResult<Option<BlockRef>> {
    let mut acc: Option<BlockRef> = None;
    let Some(site) = func.use_index.site(r) else { return Ok(None) };

    for user in site.instrs.iter() {
        if let Ok(n) = func.instr(*user) {
            acc = structure.find_closest_common_dominator(acc, n.block);
        }
    }
    for user in site.phis.iter() {
        if let Some(phi) = func.phis.get(*user) {
            for (pred, value) in &phi.links {
                if *value == r {
                    acc = structure.find_closest_common_dominator(acc, Some(*pred));
                }
            }
        }
    }
    for user in site.calls.iter() {
        if let Some(block) = find_call_block(func, *user) {
            acc = structure.find_closest_common_dominator(acc, Some(block));
        }
    }
    for user in site.asms.iter() {
        if let Some(block) = find_asm_block(func, *user) {
            acc = structure.find_closest_common_dominator(acc, Some(block));
        }
    }
    Ok(acc)
}

fn find_call_block(func: &OptFunction, call: CallRef) -> Option<BlockRef> {
    func.all_block_refs().into_iter().find(|b| func.block(*b).map(|blk| blk.calls.contains(&call)).unwrap_or(false))
}

fn find_asm_block(func: &OptFunction, asm: InlineAsmRef) -> Option<BlockRef> {
    func.all_block_refs()
        .into_iter()
        .find(|b| func.block(*b).map(|blk| blk.inline_asms.contains(&asm)).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::builder::FunctionBuilder;
    use crate::opt::operation::{CondVariant, Immediate, Opcode, OperationFamily as OF};

    #[test]
    fn sinks_alloc_to_closest_common_dominator_of_its_uses() {
        // spec §8 scenario 4: alloc-local in entry, used only in one arm of
        // a diamond, sinks down to that arm's block.
        let mut b = FunctionBuilder::new("sink_alloc");
        let entry = b.current_block();
        let t = b.start_block();
        let f = b.start_block();
        let merge = b.start_block();

        b.set_current(entry);
        let size = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(8))).unwrap();
        let align = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(8))).unwrap();
        let alloc = b.push(Opcode::AllocLocal, OF::StackAlloc { size, alignment: align, local: true }).unwrap();
        let cond = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(1))).unwrap();
        b.push_control(
            Opcode::Branch,
            OF::Branch { variant: CondVariant::NonZero, cond, target: t, alternative: f },
            false,
        )
        .unwrap();

        b.set_current(t);
        let val = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(42))).unwrap();
        b.push_with_effects(
            Opcode::Store,
            OF::MemoryStore { location: alloc, value: val, flags: crate::opt::operation::MemoryFlags::empty() },
            false,
        )
        .unwrap();
        b.push_control(Opcode::Jump, OF::Jump { target: merge }, false).unwrap();

        b.set_current(f);
        b.push_control(Opcode::Jump, OF::Jump { target: merge }, false).unwrap();
        b.set_current(merge);
        b.push_control(Opcode::Return, OF::Return(None), false).unwrap();

        let mut func = b.finish();
        let changed = run(&mut func).unwrap();
        assert!(changed);
        assert_eq!(func.instr(alloc).unwrap().block, Some(t));
    }

    #[test]
    fn leaves_alloc_in_place_when_already_at_the_dominator() {
        let mut b = FunctionBuilder::new("no_sink");
        let entry = b.current_block();
        let size = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(8))).unwrap();
        let align = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(8))).unwrap();
        let alloc = b.push(Opcode::AllocLocal, OF::StackAlloc { size, alignment: align, local: true }).unwrap();
        let val = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(1))).unwrap();
        b.push_with_effects(
            Opcode::Store,
            OF::MemoryStore { location: alloc, value: val, flags: crate::opt::operation::MemoryFlags::empty() },
            false,
        )
        .unwrap();
        b.push_control(Opcode::Return, OF::Return(None), false).unwrap();

        let mut func = b.finish();
        let changed = run(&mut func).unwrap();
        assert!(!changed);
        assert_eq!(func.instr(alloc).unwrap().block, Some(entry));
    }
}
