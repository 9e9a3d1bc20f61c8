//! Phi propagation (spec §4.6.3): a phi whose incoming links carry exactly
//! one distinct value (ignoring self-references) is redundant — every use
//! of its output is replaced by that value and the phi is dropped. Iterated
//! to a fixpoint since propagating one phi away can make its consumers'
//! phis trivial in turn.

use crate::common::error::CompilerResult;
use crate::opt::container::OptFunction;
use crate::opt::phi::PhiRef;

pub fn run(func: &mut OptFunction) -> CompilerResult<bool> {
    let mut changed_overall = false;
    loop {
        let live_phis: Vec<PhiRef> = func
            .all_block_refs()
            .into_iter()
            .filter_map(|b| func.block(b).ok().map(|blk| blk.phis.clone()))
            .flatten()
            .collect();

        let mut applied = false;
        for phi in live_phis {
            let Some(node) = func.phis.get(phi) else { continue };
            let distinct = node.distinct_non_self_values();
            if distinct.len() != 1 {
                continue;
            }
            let output = node.output;
            let value = distinct[0];
            func.replace_references(output, value)?;
            func.drop_phi(phi)?;
            applied = true;
            changed_overall = true;
            break;
        }
        if !applied {
            break;
        }
    }
    Ok(changed_overall)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::builder::FunctionBuilder;
    use crate::opt::operation::{CondVariant, Immediate, Opcode, OperationFamily as OF};

    #[test]
    fn drops_phi_with_single_distinct_incoming_value() {
        let mut b = FunctionBuilder::new("trivial_phi");
        let entry = b.current_block();
        let b1 = b.start_block();
        let b2 = b.start_block();
        let merge = b.start_block();

        b.set_current(entry);
        let v = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(5))).unwrap();
        let cond = b.push(Opcode::IntConst, OF::Immediate(Immediate::Int(1))).unwrap();
        b.push_control(
            Opcode::Branch,
            OF::Branch { variant: CondVariant::NonZero, cond, target: b1, alternative: b2 },
            false,
        )
        .unwrap();

        b.set_current(b1);
        b.push_control(Opcode::Jump, OF::Jump { target: merge }, false).unwrap();
        b.set_current(b2);
        b.push_control(Opcode::Jump, OF::Jump { target: merge }, false).unwrap();

        b.set_current(merge);
        let placeholder = b.push_with_effects(Opcode::Phi, OF::NoOperand, true).unwrap();
        let phi = b.new_phi(merge, placeholder).unwrap();
        b.set_phi_link(phi, b1, v).unwrap();
        b.set_phi_link(phi, b2, v).unwrap();
        b.push_control(Opcode::Return, OF::Return(Some(placeholder)), false).unwrap();

        let mut func = b.finish();
        let changed = run(&mut func).unwrap();
        assert!(changed);
        assert!(func.instr(placeholder).is_err());

        let term = func.terminator(merge).unwrap();
        match &func.instr(term).unwrap().operation.payload {
            OF::Return(Some(r)) => assert_eq!(*r, v),
            other => panic!("expected return of propagated value, got {other:?}"),
        }
    }
}
