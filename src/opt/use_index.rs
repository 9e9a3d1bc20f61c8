//! The use index: the reverse map from a value's definition to every
//! syntactic site referring to it — four sets per reference, exactly as
//! spec §3 describes (instructions, phis, calls, inline-asm nodes).

use crate::common::fx_hash::FxHashMap;
use crate::opt::call::CallRef;
use crate::opt::inline_asm::InlineAsmRef;
use crate::opt::instr::InstrRef;
use crate::opt::phi::PhiRef;
use crate::common::hash_tree::HashTreeSet;

#[derive(Debug, Clone, Default)]
pub struct UseSite {
    pub instrs: HashTreeSet<InstrRef>,
    pub phis: HashTreeSet<PhiRef>,
    pub calls: HashTreeSet<CallRef>,
    pub asms: HashTreeSet<InlineAsmRef>,
}

impl UseSite {
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty() && self.phis.is_empty() && self.calls.is_empty() && self.asms.is_empty()
    }
}

/// `use_index[r]` holds every site that reads `r` as an operand.
#[derive(Debug, Clone, Default)]
pub struct UseIndex {
    sites: FxHashMap<InstrRef, UseSite>,
}

impl UseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn site(&self, r: InstrRef) -> Option<&UseSite> {
        self.sites.get(&r)
    }

    fn entry(&mut self, r: InstrRef) -> &mut UseSite {
        self.sites.entry(r).or_default()
    }

    pub fn add_instr_use(&mut self, operand: InstrRef, user: InstrRef) {
        self.entry(operand).instrs.insert(user);
    }

    pub fn remove_instr_use(&mut self, operand: InstrRef, user: InstrRef) {
        if let Some(site) = self.sites.get_mut(&operand) {
            site.instrs.remove(&user);
        }
    }

    pub fn add_phi_use(&mut self, operand: InstrRef, user: PhiRef) {
        self.entry(operand).phis.insert(user);
    }

    pub fn remove_phi_use(&mut self, operand: InstrRef, user: PhiRef) {
        if let Some(site) = self.sites.get_mut(&operand) {
            site.phis.remove(&user);
        }
    }

    pub fn add_call_use(&mut self, operand: InstrRef, user: CallRef) {
        self.entry(operand).calls.insert(user);
    }

    pub fn remove_call_use(&mut self, operand: InstrRef, user: CallRef) {
        if let Some(site) = self.sites.get_mut(&operand) {
            site.calls.remove(&user);
        }
    }

    pub fn add_asm_use(&mut self, operand: InstrRef, user: InlineAsmRef) {
        self.entry(operand).asms.insert(user);
    }

    pub fn remove_asm_use(&mut self, operand: InstrRef, user: InlineAsmRef) {
        if let Some(site) = self.sites.get_mut(&operand) {
            site.asms.remove(&user);
        }
    }

    pub fn is_unused(&self, r: InstrRef) -> bool {
        self.sites.get(&r).map_or(true, |s| s.is_empty())
    }
}
