//! Global value numbering (spec §4.6.2). Canonical hashing mirrors the
//! donor compiler's own `gvn.c`: a splitmix64-mixed pair of operand
//! references, commutative operations hashed by `(min, max)` of their refs.

use std::collections::VecDeque;

use crate::analysis::structure::Structure;
use crate::common::error::CompilerResult;
use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::opt::block::BlockRef;
use crate::opt::container::OptFunction;
use crate::opt::instr::InstrRef;
use crate::opt::operation::{GvnClass, Operation, OperationFamily};

const MAGIC1: u64 = 0x9e3779b97f4a7c15;
const MAGIC2: u64 = 0xbf58476d1ce4e5b9;
const MAGIC3: u64 = 0x94d049bb133111eb;

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(MAGIC1);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(MAGIC2);
    z = (z ^ (z >> 27)).wrapping_mul(MAGIC3);
    z ^ (z >> 31)
}

fn canonical_hash(op: &Operation) -> u64 {
    let mut hash = splitmix64(op.opcode as u64);
    let refs = op.operand_refs();
    if refs.len() == 2 && op.opcode.is_commutative(&op.payload) {
        let (a, b) = (refs[0].index() as u64, refs[1].index() as u64);
        let (lo, hi) = (a.min(b), a.max(b));
        hash ^= splitmix64(lo.wrapping_add(MAGIC1));
        hash ^= splitmix64(hi.wrapping_add(MAGIC2));
    } else {
        for (i, r) in refs.iter().enumerate() {
            let magic = if i == 0 { MAGIC1 } else { MAGIC2 };
            hash ^= splitmix64((r.index() as u64).wrapping_add(magic));
        }
    }
    match &op.payload {
        OperationFamily::TwoRefCmp { cmp, .. } => hash ^= splitmix64((*cmp as u64) ^ MAGIC3),
        OperationFamily::TypedOneRef { ty, index, .. } => {
            hash ^= splitmix64((ty.0 as u64) ^ index.wrapping_mul(MAGIC3))
        }
        _ => {}
    }
    hash
}

/// Structural equality under the same commutative canonicalisation the
/// hash uses.
fn canonically_equal(a: &Operation, b: &Operation) -> bool {
    if a.opcode != b.opcode {
        return false;
    }
    let ra = a.operand_refs();
    let rb = b.operand_refs();
    if ra.len() != rb.len() {
        return false;
    }
    let commutative = a.opcode.is_commutative(&a.payload);
    let refs_equal = if commutative && ra.len() == 2 {
        (ra[0] == rb[0] && ra[1] == rb[1]) || (ra[0] == rb[1] && ra[1] == rb[0])
    } else {
        ra.as_slice() == rb.as_slice()
    };
    if !refs_equal {
        return false;
    }
    match (&a.payload, &b.payload) {
        (OperationFamily::TwoRefCmp { cmp: ca, .. }, OperationFamily::TwoRefCmp { cmp: cb, .. }) => ca == cb,
        (
            OperationFamily::TypedOneRef { ty: ta, index: ia, .. },
            OperationFamily::TypedOneRef { ty: tb, index: ib, .. },
        ) => ta == tb && ia == ib,
        (OperationFamily::OneRef(_), OperationFamily::OneRef(_)) => true,
        (OperationFamily::TwoRef(_, _), OperationFamily::TwoRef(_, _)) => true,
        _ => a.payload == b.payload,
    }
}

pub fn run(func: &mut OptFunction) -> CompilerResult<bool> {
    let mut changed = false;
    let structure = Structure::build(func)?;

    let mut queue: VecDeque<InstrRef> = VecDeque::new();
    let mut enqueued: FxHashSet<InstrRef> = FxHashSet::default();
    let mut processed: FxHashSet<InstrRef> = FxHashSet::default();
    let mut buckets: FxHashMap<u64, Vec<InstrRef>> = FxHashMap::default();

    for block in func.all_block_refs() {
        for instr in func.block_control_instrs(block)? {
            if enqueued.insert(instr) {
                queue.push_back(instr);
            }
        }
    }

    while let Some(instr) = queue.pop_front() {
        let Ok(node) = func.instr(instr) else { continue };
        let operands = node.operation.operand_refs();

        let mut any_unprocessed = false;
        for op in &operands {
            if func.instr(*op).is_err() {
                continue; // dropped (e.g. already replaced away)
            }
            if !processed.contains(op) {
                any_unprocessed = true;
                if enqueued.insert(*op) {
                    queue.push_back(*op);
                }
            }
        }
        if any_unprocessed {
            queue.push_back(instr);
            continue;
        }

        let class = node.operation.opcode.gvn_class();
        if class == GvnClass::Skip {
            processed.insert(instr);
            continue;
        }

        let hash = canonical_hash(&node.operation);
        let op_snapshot = node.operation.clone();
        let bucket = buckets.entry(hash).or_default();
        let candidates: Vec<InstrRef> = bucket.clone();

        let mut replaced = false;
        for candidate in candidates {
            if candidate == instr {
                continue;
            }
            let Ok(cand_node) = func.instr(candidate) else { continue };
            if !canonically_equal(&op_snapshot, &cand_node.operation) {
                continue;
            }

            if try_replace(func, &structure, class, instr, candidate)? {
                changed = true;
                replaced = true;
                break;
            }
            if try_replace(func, &structure, class, candidate, instr)? {
                changed = true;
                replaced = true;
                break;
            }
            if class == GvnClass::Global && try_hoist_and_replace(func, &structure, instr, candidate)? {
                changed = true;
                replaced = true;
                break;
            }
        }

        if !replaced {
            buckets.entry(hash).or_default().push(instr);
        }
        processed.insert(instr);
    }

    Ok(changed)
}

/// Attempts to eliminate `from` in favor of `to`: admissible iff `to`
/// dominates every use of `from` (global) or is sequenced before every
/// same-block use of `from` (local).
fn try_replace(
    func: &mut OptFunction,
    structure: &Structure,
    class: GvnClass,
    from: InstrRef,
    to: InstrRef,
) -> CompilerResult<bool> {
    if !admissible(func, structure, class, to, from)? {
        return Ok(false);
    }
    func.replace_references(from, to)?;
    func.drop_instr(from)?;
    Ok(true)
}

fn admissible(
    func: &OptFunction,
    structure: &Structure,
    class: GvnClass,
    to: InstrRef,
    from: InstrRef,
) -> CompilerResult<bool> {
    let to_block = func.instr(to)?.block.expect("instr() rejects dropped refs");
    let Some(site) = func.use_index.site(from) else { return Ok(true) };

    for user in site.instrs.iter() {
        let Ok(user_node) = func.instr(*user) else { continue };
        let user_block = user_node.block.expect("instr() rejects dropped refs");
        if !admissible_for_site(func, structure, class, to, to_block, user_block, Some(*user))? {
            return Ok(false);
        }
    }
    for user in site.phis.iter() {
        let Some(phi) = func.phis.get(*user) else { continue };
        for (pred, value) in &phi.links {
            if *value == from && !admissible_for_site(func, structure, class, to, to_block, *pred, None)? {
                return Ok(false);
            }
        }
    }
    if !site.calls.is_empty() || !site.asms.is_empty() {
        // Calls/inline-asm consumers are conservatively treated like a
        // global, whole-block use: fall back to dominance only.
        if class != GvnClass::Global {
            return Ok(false);
        }
    }
    Ok(true)
}

fn admissible_for_site(
    func: &OptFunction,
    structure: &Structure,
    class: GvnClass,
    to: InstrRef,
    to_block: BlockRef,
    user_block: BlockRef,
    user_instr: Option<InstrRef>,
) -> CompilerResult<bool> {
    match class {
        GvnClass::Global => Ok(structure.is_dominator(to_block, user_block)),
        GvnClass::Local => {
            if user_block != to_block {
                return Ok(false);
            }
            match user_instr {
                Some(u) if u != to => structure.is_sequenced_before(func, to_block, to, u),
                _ => Ok(true),
            }
        }
        GvnClass::Skip => Ok(false),
    }
}

/// Hoists `instr` to the closest common dominator of its block and
/// `candidate`'s block, provided that does not violate dominance of
/// `instr`'s own inputs, then retries substitution with `instr` surviving.
fn try_hoist_and_replace(
    func: &mut OptFunction,
    structure: &Structure,
    instr: InstrRef,
    candidate: InstrRef,
) -> CompilerResult<bool> {
    let self_block = func.instr(instr)?.block.expect("live instr");
    let cand_block = func.instr(candidate)?.block.expect("live instr");
    let Some(ccd) = structure.find_closest_common_dominator(Some(self_block), Some(cand_block)) else {
        return Ok(false);
    };
    if ccd == self_block {
        return Ok(false);
    }
    for operand in func.instr(instr)?.operation.operand_refs() {
        let operand_block = func.instr(operand)?.block.expect("live operand");
        if !structure.is_dominator(operand_block, ccd) {
            return Ok(false);
        }
    }

    func.move_to_block(instr, ccd)?;
    structure.invalidate_sequencing();
    try_replace(func, structure, GvnClass::Global, candidate, instr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::builder::FunctionBuilder;
    use crate::opt::operation::{Immediate, Opcode, OperationFamily as OF};
    use pretty_assertions::assert_eq;

    #[test]
    fn dedups_identical_adds_in_common_dominator_successor() {
        // spec §8 scenario 1: two blocks each compute `add 1, 2` into
        // distinct refs in a common dominator's successor.
        let mut b = FunctionBuilder::new("gvn_dup");
        let entry = b.current_block();
        let one = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(1))).unwrap();
        let two = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(2))).unwrap();
        let add_a = b.push(Opcode::Add, OF::TwoRef(one, two)).unwrap();
        let add_b = b.push(Opcode::Add, OF::TwoRef(one, two)).unwrap();
        b.push_control(Opcode::Return, OF::Return(Some(add_a)), false).unwrap();
        let mut func = b.finish();

        // keep add_b alive by making it a "use" too (return only references
        // add_a, so fold a second consumer in referencing add_b via the
        // container directly is unnecessary — GVN still visits add_b since
        // it's on the entry block's data list... but only control-flow-
        // reachable instructions are seeded. Wire add_b in as the operand of
        // a second, discarded instruction so it is traced.)
        let discard = func.new_instruction(entry, crate::opt::operation::Operation::new(Opcode::Neg, OF::OneRef(add_b)), true).unwrap();
        func.add_control(discard).ok();

        let changed = run(&mut func).unwrap();
        assert!(changed);
        assert!(func.instr(add_b).is_err() || func.instr(add_a).is_err());

        // spec §8 invariant: a second application finds nothing left to
        // number together — the surviving add is already the sole
        // canonical representative, so the entry block's data list is
        // byte-for-byte the same before and after.
        let before = func.block_data_instrs(entry).unwrap();
        let changed_again = run(&mut func).unwrap();
        let after = func.block_data_instrs(entry).unwrap();
        assert!(!changed_again);
        assert_eq!(before, after);
    }
}
