//! Instructions: dense-ref-identified, owning an [`Operation`] plus their
//! position in the block's data and control-flow doubly-linked lists
//! (spec §3).

use crate::common::arena::ArenaRef;
use crate::opt::block::BlockRef;
use crate::opt::operation::Operation;

pub type InstrRef = ArenaRef<Instruction>;

#[derive(Debug, Clone)]
pub struct Instruction {
    pub operation: Operation,
    /// `None` is the "dropped" sentinel (invariant 5): the instruction is
    /// syntactically valid but resolves to not-found for every accessor.
    pub block: Option<BlockRef>,
    pub data_prev: Option<InstrRef>,
    pub data_next: Option<InstrRef>,
    pub control_prev: Option<InstrRef>,
    pub control_next: Option<InstrRef>,
    /// Side-effect-free instructions may be freely reordered/rematerialised
    /// by GVN and the scheduler; side-effecting ones (loads with volatile
    /// flag, stores, calls, atomics) may not.
    pub side_effect_free: bool,
}

impl Instruction {
    pub fn new(operation: Operation, block: BlockRef, side_effect_free: bool) -> Self {
        Self {
            operation,
            block: Some(block),
            data_prev: None,
            data_next: None,
            control_prev: None,
            control_next: None,
            side_effect_free,
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.block.is_none()
    }

    pub fn on_control_flow_list(&self) -> bool {
        self.control_prev.is_some() || self.control_next.is_some()
    }
}
