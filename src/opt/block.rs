//! Blocks: the head/tail pointers of an instruction's two doubly-linked
//! lists, plus the phi/call/inline-asm nodes and public labels local to the
//! block (spec §3).

use smallvec::SmallVec;

use crate::common::arena::ArenaRef;
use crate::opt::call::CallRef;
use crate::opt::inline_asm::InlineAsmRef;
use crate::opt::instr::InstrRef;
use crate::opt::phi::PhiRef;

pub type BlockRef = ArenaRef<Block>;

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub data_head: Option<InstrRef>,
    pub data_tail: Option<InstrRef>,
    pub control_head: Option<InstrRef>,
    pub control_tail: Option<InstrRef>,
    pub phis: Vec<PhiRef>,
    pub calls: Vec<CallRef>,
    pub inline_asms: Vec<InlineAsmRef>,
    /// Labels this block is addressable by from outside ordinary fall-through
    /// control flow (computed-goto / indirect-jump targets, spec §4.3's
    /// tracing rule).
    pub public_labels: SmallVec<[String; 1]>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_control_head_or_tail(&self, r: InstrRef) -> bool {
        self.control_head == Some(r) || self.control_tail == Some(r)
    }

    pub fn data_is_empty(&self) -> bool {
        self.data_head.is_none()
    }
}
