//! SSA-level inline-assembly nodes: an IR inline-asm id plus a parameters
//! array (each with read-ref, load/store-ref, and type refs) and a
//! jump-targets map (spec §3).

use smallvec::SmallVec;

use crate::common::arena::ArenaRef;
use crate::ir::inline_asm::InlineAsmId;
use crate::ir::types::TypeId;
use crate::opt::block::BlockRef;
use crate::opt::instr::InstrRef;

pub type InlineAsmRef = ArenaRef<InlineAsmNode>;

#[derive(Debug, Clone)]
pub struct AsmParamUse {
    pub ty: TypeId,
    pub read_ref: Option<InstrRef>,
    pub load_store_ref: Option<InstrRef>,
}

#[derive(Debug, Clone)]
pub struct InlineAsmNode {
    pub template: InlineAsmId,
    pub parameters: SmallVec<[AsmParamUse; 4]>,
    /// Target blocks this inline-asm instruction may jump to, keyed by the
    /// template's symbolic jump-target name.
    pub jump_targets: Vec<(String, BlockRef)>,
}

impl InlineAsmNode {
    pub fn new(template: InlineAsmId) -> Self {
        Self { template, parameters: SmallVec::new(), jump_targets: Vec::new() }
    }

    pub fn replace_references(&mut self, from: InstrRef, to: InstrRef) -> bool {
        let mut changed = false;
        for param in self.parameters.iter_mut() {
            if param.read_ref == Some(from) {
                param.read_ref = Some(to);
                changed = true;
            }
            if param.load_store_ref == Some(from) {
                param.load_store_ref = Some(to);
                changed = true;
            }
        }
        changed
    }

    pub fn referenced_instrs(&self) -> impl Iterator<Item = InstrRef> + '_ {
        self.parameters
            .iter()
            .flat_map(|p| p.read_ref.into_iter().chain(p.load_store_ref))
    }
}
