//! Liveness of the whole program graph from the entry point: spec §4.3's
//! `trace(container, callback)`. Visits exactly the instructions that may
//! contribute to externally observable behavior, which is what drives both
//! symbol reachability (`ir::compact`) and dead-instruction elimination.

use crate::common::bitset::BitSet;
use crate::common::fx_hash::FxHashSet;
use crate::common::queue::Queue;
use crate::opt::block::BlockRef;
use crate::opt::container::OptFunction;
use crate::opt::instr::InstrRef;
use crate::opt::operation::{Immediate, OperationFamily};

/// Walks live control flow from `func`'s entry block, invoking `on_instr`
/// exactly once for every reached [`InstrRef`].
///
/// Follows the five enqueue rules verbatim:
/// 1. control instructions of the entry block are seeded first;
/// 2. every jump/branch/branch-compare target block is enqueued;
/// 3. every block an inline-asm instruction may jump to is enqueued;
/// 4. the first indirect jump seen enqueues every block with a public label,
///    plus blocks named by pending block-label immediates;
/// 5. every visited instruction's non-control-flow input operands are
///    enqueued (operands are always instructions, so always "non-control-flow"
///    in the sense of not needing separate control-list traversal).
pub fn trace(func: &OptFunction, mut on_instr: impl FnMut(InstrRef)) {
    let Some(entry) = func.entry else { return };

    let mut visited_instrs: FxHashSet<InstrRef> = FxHashSet::default();
    let mut visited_blocks = BitSet::new();
    let mut seen_indirect_jump = false;
    let mut pending_block_labels: Vec<BlockRef> = Vec::new();

    let mut block_queue: Queue<BlockRef> = Queue::new();
    let mut instr_queue: Queue<InstrRef> = Queue::new();

    block_queue.push(entry);

    while let Some(block) = block_queue.pop_first() {
        if visited_blocks.contains(block.index() as usize) {
            continue;
        }
        visited_blocks.insert(block.index() as usize);

        let Ok(controls) = func.block_control_instrs(block) else { continue };
        for instr in controls {
            instr_queue.push(instr);
        }

        if let Ok(b) = func.block(block) {
            for asm in &b.inline_asms {
                if let Some(node) = func.inline_asms.get(*asm) {
                    for (_, target) in &node.jump_targets {
                        block_queue.push(*target);
                    }
                }
            }
        }
    }

    while let Some(instr) = instr_queue.pop() {
        if !visited_instrs.insert(instr) {
            continue;
        }
        on_instr(instr);

        let Ok(node) = func.instr(instr) else { continue };

        for target in node.operation.branch_targets() {
            if !visited_blocks.contains(target.index() as usize) {
                visited_blocks.insert(target.index() as usize);
                if let Ok(controls) = func.block_control_instrs(target) {
                    for c in controls {
                        instr_queue.push(c);
                    }
                }
            }
        }

        if matches!(node.operation.opcode, crate::opt::operation::Opcode::IndirectJump) {
            if !seen_indirect_jump {
                seen_indirect_jump = true;
                for block_ref in func.all_block_refs() {
                    if let Ok(b) = func.block(block_ref) {
                        if !b.public_labels.is_empty() && !visited_blocks.contains(block_ref.index() as usize) {
                            visited_blocks.insert(block_ref.index() as usize);
                            if let Ok(controls) = func.block_control_instrs(block_ref) {
                                for c in controls {
                                    instr_queue.push(c);
                                }
                            }
                        }
                    }
                }
                for target in pending_block_labels.drain(..) {
                    if !visited_blocks.contains(target.index() as usize) {
                        visited_blocks.insert(target.index() as usize);
                        if let Ok(controls) = func.block_control_instrs(target) {
                            for c in controls {
                                instr_queue.push(c);
                            }
                        }
                    }
                }
            }
        }

        if let OperationFamily::Immediate(Immediate::BlockLabel(target)) = &node.operation.payload {
            if seen_indirect_jump {
                if !visited_blocks.contains(target.index() as usize) {
                    visited_blocks.insert(target.index() as usize);
                    if let Ok(controls) = func.block_control_instrs(*target) {
                        for c in controls {
                            instr_queue.push(c);
                        }
                    }
                }
            } else {
                pending_block_labels.push(*target);
            }
        }

        for operand in node.operation.operand_refs() {
            instr_queue.push(operand);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::builder::FunctionBuilder;
    use crate::opt::operation::{Immediate, Opcode};

    #[test]
    fn trace_skips_dead_instruction() {
        let mut b = FunctionBuilder::new("f");
        let live = b.push(Opcode::IntConst, OperationFamily::Immediate(Immediate::Int(1))).unwrap();
        let _dead = b.push(Opcode::IntConst, OperationFamily::Immediate(Immediate::Int(2))).unwrap();
        b.push_control(Opcode::Return, OperationFamily::Return(Some(live)), false).unwrap();
        let func = b.finish();

        let mut seen = Vec::new();
        trace(&func, |r| seen.push(r));
        assert!(seen.contains(&live));
        assert_eq!(seen.len(), 2); // the Return terminator plus its operand
    }
}
