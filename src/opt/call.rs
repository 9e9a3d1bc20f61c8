//! Call nodes: a function-declaration id, an arguments array, and an
//! optional return-space reference (spec §3).

use smallvec::SmallVec;

use crate::common::arena::ArenaRef;
use crate::ir::module::FunctionDeclId;
use crate::opt::instr::InstrRef;

pub type CallRef = ArenaRef<CallNode>;

#[derive(Debug, Clone)]
pub struct CallNode {
    pub declaration: FunctionDeclId,
    /// Present for indirect calls: the callee-address value, in addition to
    /// `declaration` describing the expected signature.
    pub indirect_callee: Option<InstrRef>,
    pub arguments: SmallVec<[InstrRef; 4]>,
    pub return_value: Option<InstrRef>,
}

impl CallNode {
    pub fn new(declaration: FunctionDeclId) -> Self {
        Self { declaration, indirect_callee: None, arguments: SmallVec::new(), return_value: None }
    }

    pub fn replace_references(&mut self, from: InstrRef, to: InstrRef) -> bool {
        let mut changed = false;
        for arg in self.arguments.iter_mut() {
            if *arg == from {
                *arg = to;
                changed = true;
            }
        }
        if self.indirect_callee == Some(from) {
            self.indirect_callee = Some(to);
            changed = true;
        }
        changed
    }
}
