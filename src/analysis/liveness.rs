//! Liveness analysis (spec §4.5): a conservative per-block live-through set
//! suitable for the register allocator, computed in two stages from
//! structure + the use index.

use crate::common::bitset::BitSet;
use crate::common::error::CompilerResult;
use crate::common::fx_hash::FxHashMap;
use crate::common::queue::Queue;
use crate::opt::block::BlockRef;
use crate::opt::container::OptFunction;
use crate::opt::instr::InstrRef;

use crate::analysis::structure::Structure;

/// Per-block alive-instruction sets, keyed by block.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    alive: FxHashMap<BlockRef, Vec<InstrRef>>,
}

impl Liveness {
    /// Stage one: for every instruction reference, insert it into the
    /// alive-set of its defining block and every block that syntactically
    /// references it (the use index gives this directly). Stage two: walk
    /// predecessor chains breadth-first from every syntactic-use block back
    /// toward the definition block, marking every traversed block alive,
    /// using a scratch bit-set keyed by block index to avoid revisiting.
    pub fn build(func: &OptFunction, structure: &Structure) -> CompilerResult<Self> {
        let mut alive_sets: FxHashMap<BlockRef, std::collections::BTreeSet<u32>> = FxHashMap::default();

        for block in func.all_block_refs() {
            for instr in func.block_data_instrs(block)? {
                let def_block = block;
                alive_sets.entry(def_block).or_default().insert(instr.index());

                if let Some(site) = func.use_index.site(instr) {
                    let mut use_blocks: Vec<BlockRef> = Vec::new();
                    for user in site.instrs.iter() {
                        if let Ok(u) = func.instr(*user) {
                            if let Some(b) = u.block {
                                use_blocks.push(b);
                            }
                        }
                    }
                    for user in site.phis.iter() {
                        if let Some(phi) = func.phis.get(*user) {
                            for (pred, value) in &phi.links {
                                if *value == instr {
                                    use_blocks.push(*pred);
                                }
                            }
                        }
                    }
                    for user in site.calls.iter() {
                        if let Ok(block_of_call) = find_call_block(func, *user) {
                            use_blocks.push(block_of_call);
                        }
                    }

                    for use_block in use_blocks {
                        if use_block != def_block {
                            alive_sets.entry(use_block).or_default().insert(instr.index());

                            let mut visited = BitSet::new();
                            let mut queue: Queue<BlockRef> = Queue::new();
                            visited.insert(use_block.index() as usize);
                            for pred in structure.predecessors(use_block) {
                                if visited.insert(pred.index() as usize) {
                                    queue.push(*pred);
                                }
                            }
                            while let Some(cur) = queue.pop_first() {
                                if cur == def_block {
                                    continue;
                                }
                                alive_sets.entry(cur).or_default().insert(instr.index());
                                for pred in structure.predecessors(cur) {
                                    if visited.insert(pred.index() as usize) {
                                        queue.push(*pred);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let alive = alive_sets
            .into_iter()
            .map(|(b, set)| (b, set.into_iter().map(crate::common::arena::ArenaRef::new).collect()))
            .collect();
        Ok(Self { alive })
    }

    pub fn alive_at(&self, block: BlockRef) -> &[InstrRef] {
        self.alive.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_alive(&self, block: BlockRef, instr: InstrRef) -> bool {
        self.alive.get(&block).is_some_and(|v| v.contains(&instr))
    }
}

/// Finds the block a call node's enclosing instruction lives in by scanning
/// the block it was registered against; calls are tracked per-block in
/// `Block::calls`, so this is a small linear lookup rather than a reverse
/// index (calls are comparatively rare per function).
fn find_call_block(func: &OptFunction, call: crate::opt::call::CallRef) -> CompilerResult<BlockRef> {
    for block in func.all_block_refs() {
        if let Ok(b) = func.block(block) {
            if b.calls.contains(&call) {
                return Ok(block);
            }
        }
    }
    Err(crate::common::error::CompilerError::not_found("call not registered to any block"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::builder::FunctionBuilder;
    use crate::opt::operation::{Immediate, Opcode, OperationFamily as OF};

    #[test]
    fn value_crossing_blocks_is_alive_through_intermediate() {
        let mut b = FunctionBuilder::new("cross");
        let entry = b.current_block();
        let mid = b.start_block();
        let tail = b.start_block();

        b.set_current(entry);
        let v = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(7))).unwrap();
        b.push_control(Opcode::Jump, OF::Jump { target: mid }, false).unwrap();

        b.set_current(mid);
        b.push_control(Opcode::Jump, OF::Jump { target: tail }, false).unwrap();

        b.set_current(tail);
        b.push_control(Opcode::Return, OF::Return(Some(v)), false).unwrap();

        let func = b.finish();
        let structure = Structure::build(&func).unwrap();
        let liveness = Liveness::build(&func, &structure).unwrap();

        assert!(liveness.is_alive(mid, v));
        assert!(liveness.is_alive(tail, v));
    }
}
