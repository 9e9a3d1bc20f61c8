//! Control-flow structure analysis (spec §4.4): successors, predecessors,
//! reverse post-order, immediate dominators, and the derived queries built
//! on top of them. Derived from a container snapshot; callers must
//! recompute after any mutation (no incremental update is attempted, matching
//! the spec's "invalidated when the container mutates" wording).

use crate::common::error::{CompilerError, CompilerResult};
use crate::common::fx_hash::FxHashMap;
use crate::opt::block::BlockRef;
use crate::opt::container::OptFunction;

/// Per-function CFG facts: successors/predecessors, RPO numbering,
/// immediate dominators, plus a lazily built sequencing cache.
#[derive(Debug, Clone)]
pub struct Structure {
    successors: FxHashMap<BlockRef, Vec<BlockRef>>,
    predecessors: FxHashMap<BlockRef, Vec<BlockRef>>,
    rpo: Vec<BlockRef>,
    rpo_index: FxHashMap<BlockRef, usize>,
    idom: FxHashMap<BlockRef, BlockRef>,
    entry: BlockRef,
    /// `(block -> (instr -> position))`, built on first `is_sequenced_before`
    /// call and thrown away by [`Structure::invalidate_sequencing`].
    sequencing: std::cell::RefCell<Option<FxHashMap<BlockRef, FxHashMap<crate::opt::instr::InstrRef, usize>>>>,
}

impl Structure {
    /// Builds successors/predecessors/RPO/idom in one pass over `func`,
    /// starting from its entry block.
    pub fn build(func: &OptFunction) -> CompilerResult<Self> {
        let entry = func.entry.ok_or_else(|| CompilerError::internal("function has no entry block"))?;

        let mut successors: FxHashMap<BlockRef, Vec<BlockRef>> = FxHashMap::default();
        let mut predecessors: FxHashMap<BlockRef, Vec<BlockRef>> = FxHashMap::default();

        for block in func.all_block_refs() {
            let terminator = func.terminator(block);
            let succs = match terminator {
                Ok(t) => func.instr(t)?.operation.branch_targets().to_vec(),
                Err(_) => Vec::new(),
            };
            successors.insert(block, succs);
        }
        for (&block, succs) in successors.iter() {
            for &s in succs {
                predecessors.entry(s).or_default().push(block);
            }
            predecessors.entry(block).or_default();
        }

        let rpo = reverse_post_order(&successors, entry);
        let mut rpo_index = FxHashMap::default();
        for (i, &b) in rpo.iter().enumerate() {
            rpo_index.insert(b, i);
        }

        let idom = compute_idom(&predecessors, &rpo, &rpo_index, entry);

        Ok(Self {
            successors,
            predecessors,
            rpo,
            rpo_index,
            idom,
            entry,
            sequencing: std::cell::RefCell::new(None),
        })
    }

    pub fn successors(&self, block: BlockRef) -> &[BlockRef] {
        self.successors.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, block: BlockRef) -> &[BlockRef] {
        self.predecessors.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rpo(&self) -> &[BlockRef] {
        &self.rpo
    }

    pub fn immediate_dominator(&self, block: BlockRef) -> Option<BlockRef> {
        self.idom.get(&block).copied()
    }

    pub fn is_reachable_from_entry(&self, block: BlockRef) -> bool {
        self.rpo_index.contains_key(&block)
    }

    /// True iff `a` dominates `b` (reflexive: every block dominates itself).
    pub fn is_dominator(&self, a: BlockRef, b: BlockRef) -> bool {
        if a == b {
            return true;
        }
        if !self.is_reachable_from_entry(b) {
            return false;
        }
        let mut cur = b;
        while let Some(&idom) = self.idom.get(&cur) {
            if idom == a {
                return true;
            }
            if idom == cur {
                break;
            }
            cur = idom;
        }
        false
    }

    /// Closest common dominator of `a` and `b`. The sentinel "no block"
    /// (`None`) combined with any block yields that block (spec §4.4).
    pub fn find_closest_common_dominator(&self, a: Option<BlockRef>, b: Option<BlockRef>) -> Option<BlockRef> {
        match (a, b) {
            (None, x) | (x, None) => x,
            (Some(a), Some(b)) => {
                if a == b {
                    return Some(a);
                }
                let mut finger_a = self.rpo_index.get(&a).copied()?;
                let mut finger_b = self.rpo_index.get(&b).copied()?;
                let mut node_a = a;
                let mut node_b = b;
                while node_a != node_b {
                    while finger_a > finger_b {
                        node_a = self.idom.get(&node_a).copied()?;
                        finger_a = self.rpo_index.get(&node_a).copied()?;
                    }
                    while finger_b > finger_a {
                        node_b = self.idom.get(&node_b).copied()?;
                        finger_b = self.rpo_index.get(&node_b).copied()?;
                    }
                }
                Some(node_a)
            }
        }
    }

    /// True iff `pred`'s only successor is `succ` and `succ`'s only
    /// predecessor is `pred` (spec §4.4).
    pub fn block_exclusive_direct_predecessor(&self, pred: BlockRef, succ: BlockRef) -> bool {
        let succs = self.successors(pred);
        let preds = self.predecessors(succ);
        succs.len() == 1 && succs[0] == succ && preds.len() == 1 && preds[0] == pred
    }

    /// Whether `a` is sequenced before `b` within the same block, using a
    /// lazily built per-block positional cache over the data list.
    pub fn is_sequenced_before(
        &self,
        func: &OptFunction,
        block: BlockRef,
        a: crate::opt::instr::InstrRef,
        b: crate::opt::instr::InstrRef,
    ) -> CompilerResult<bool> {
        if self.sequencing.borrow().is_none() {
            *self.sequencing.borrow_mut() = Some(FxHashMap::default());
        }
        let needs_build = !self.sequencing.borrow().as_ref().unwrap().contains_key(&block);
        if needs_build {
            // Data-sibling order is insertion order and is what defines
            // sequencing (spec §5), not the control-flow sublist.
            let mut positions = FxHashMap::default();
            for (i, instr) in func.block_data_instrs(block)?.into_iter().enumerate() {
                positions.insert(instr, i);
            }
            self.sequencing.borrow_mut().as_mut().unwrap().insert(block, positions);
        }
        let cache = self.sequencing.borrow();
        let positions = cache.as_ref().unwrap().get(&block).ok_or_else(|| {
            CompilerError::not_found("block missing from sequencing cache")
        })?;
        let pa = positions.get(&a).ok_or_else(|| CompilerError::not_found("instruction not on control-flow list"))?;
        let pb = positions.get(&b).ok_or_else(|| CompilerError::not_found("instruction not on control-flow list"))?;
        Ok(pa < pb)
    }

    /// Discards the sequencing cache. Callers must invoke this after any
    /// control-flow-list mutation of the blocks this `Structure` describes.
    pub fn invalidate_sequencing(&self) {
        *self.sequencing.borrow_mut() = None;
    }

    /// `redirect-edges(from, to)` (spec §4.4): moves every reference to
    /// `from` in successor blocks' phi link-maps to `to`. Operates on the
    /// live container, not just this snapshot, so callers must rebuild the
    /// `Structure` afterwards.
    pub fn redirect_edges(&self, func: &mut OptFunction, from: BlockRef, to: BlockRef) -> CompilerResult<()> {
        for &succ in self.successors(from) {
            for phi in func.block(succ)?.phis.clone() {
                if let Some(node) = func.phis.get_mut(phi) {
                    node.redirect_predecessor(from, to);
                }
            }
        }
        for block in func.all_block_refs() {
            if let Ok(term) = func.terminator(block) {
                if let Ok(instr) = func.instr_mut(term) {
                    instr.operation.redirect_target(from, to);
                }
            }
        }
        Ok(())
    }

    pub fn entry(&self) -> BlockRef {
        self.entry
    }
}

/// Iterative DFS from `entry`, post-order then reversed (spec §4.4).
fn reverse_post_order(successors: &FxHashMap<BlockRef, Vec<BlockRef>>, entry: BlockRef) -> Vec<BlockRef> {
    let mut visited = crate::common::bitset::BitSet::new();
    let mut post_order = Vec::new();
    // explicit stack of (block, next-child-index) to avoid recursion
    let mut stack: Vec<(BlockRef, usize)> = vec![(entry, 0)];
    visited.insert(entry.index() as usize);

    while let Some((block, idx)) = stack.pop() {
        let succs = successors.get(&block).map(Vec::as_slice).unwrap_or(&[]);
        if idx < succs.len() {
            stack.push((block, idx + 1));
            let next = succs[idx];
            if visited.insert(next.index() as usize) {
                stack.push((next, 0));
            }
        } else {
            post_order.push(block);
        }
    }
    post_order.reverse();
    post_order
}

/// Iterative two-finger intersection over RPO (spec §4.4, Cooper/Harvey/
/// Kennedy's algorithm), with the defensive lowest-numbered-predecessor
/// tie-break the spec calls out (unreachable in practice once RPO numbers
/// are assigned, since RPO numbering is itself unique per block).
fn compute_idom(
    predecessors: &FxHashMap<BlockRef, Vec<BlockRef>>,
    rpo: &[BlockRef],
    rpo_index: &FxHashMap<BlockRef, usize>,
    entry: BlockRef,
) -> FxHashMap<BlockRef, BlockRef> {
    let mut idom: FxHashMap<BlockRef, BlockRef> = FxHashMap::default();
    idom.insert(entry, entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &block in rpo.iter() {
            if block == entry {
                continue;
            }
            let preds = predecessors.get(&block).map(Vec::as_slice).unwrap_or(&[]);
            let mut processed_preds: Vec<BlockRef> =
                preds.iter().copied().filter(|p| idom.contains_key(p)).collect();
            processed_preds.sort_by_key(|p| rpo_index.get(p).copied().unwrap_or(usize::MAX));
            let Some(&first) = processed_preds.first() else { continue };
            let mut new_idom = first;
            for &p in &processed_preds[1..] {
                new_idom = intersect(&idom, rpo_index, new_idom, p);
            }
            if idom.get(&block) != Some(&new_idom) {
                idom.insert(block, new_idom);
                changed = true;
            }
        }
    }
    idom.remove(&entry);
    idom
}

fn intersect(
    idom: &FxHashMap<BlockRef, BlockRef>,
    rpo_index: &FxHashMap<BlockRef, usize>,
    mut a: BlockRef,
    mut b: BlockRef,
) -> BlockRef {
    while a != b {
        while rpo_index.get(&a).copied().unwrap_or(usize::MAX) > rpo_index.get(&b).copied().unwrap_or(usize::MAX) {
            a = *idom.get(&a).unwrap_or(&a);
        }
        while rpo_index.get(&b).copied().unwrap_or(usize::MAX) > rpo_index.get(&a).copied().unwrap_or(usize::MAX) {
            b = *idom.get(&b).unwrap_or(&b);
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::builder::FunctionBuilder;
    use crate::opt::operation::{CondVariant, Immediate, Opcode, OperationFamily as OF};

    #[test]
    fn diamond_cfg_dominators() {
        // entry -> {t, f} -> merge
        let mut b = FunctionBuilder::new("diamond");
        let entry = b.current_block();
        let t = b.start_block();
        let f = b.start_block();
        let merge = b.start_block();

        b.set_current(entry);
        let c = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(1))).unwrap();
        b.push_control(
            Opcode::Branch,
            OF::Branch { variant: CondVariant::NonZero, cond: c, target: t, alternative: f },
            false,
        )
        .unwrap();

        b.set_current(t);
        b.push_control(Opcode::Jump, OF::Jump { target: merge }, false).unwrap();
        b.set_current(f);
        b.push_control(Opcode::Jump, OF::Jump { target: merge }, false).unwrap();
        b.set_current(merge);
        b.push_control(Opcode::Return, OF::Return(None), false).unwrap();

        let func = b.finish();
        let structure = Structure::build(&func).unwrap();

        assert_eq!(structure.immediate_dominator(t), Some(entry));
        assert_eq!(structure.immediate_dominator(f), Some(entry));
        assert_eq!(structure.immediate_dominator(merge), Some(entry));
        assert!(structure.is_dominator(entry, merge));
        assert!(!structure.is_dominator(t, merge));
        assert_eq!(structure.find_closest_common_dominator(Some(t), Some(f)), Some(entry));
    }
}
