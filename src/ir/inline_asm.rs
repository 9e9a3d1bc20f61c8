//! Module-level inline-assembly records (spec §3): a template string, a
//! parameter list, and jump targets. The SSA container's own
//! [`crate::opt::inline_asm::InlineAsmNode`] references one of these by id.

use crate::ir::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InlineAsmId(pub u32);

#[derive(Debug, Clone)]
pub struct AsmParameter {
    pub type_id: TypeId,
    /// Name of the global symbol this parameter reads from, if any (global
    /// inline-asm parameters are reachability roots, spec §4.2).
    pub global_symbol: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InlineAsmRecord {
    pub template: String,
    pub parameters: Vec<AsmParameter>,
    /// Labels this assembly block may jump to, outside the linear flow —
    /// each may in principle reference a global symbol for a computed-goto
    /// style construct.
    pub jump_targets: Vec<String>,
}

impl InlineAsmRecord {
    pub fn new(template: impl Into<String>) -> Self {
        Self { template: template.into(), parameters: Vec::new(), jump_targets: Vec::new() }
    }

    pub fn referenced_symbols(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter_map(|p| p.global_symbol.as_deref())
            .chain(self.jump_targets.iter().map(|s| s.as_str()))
    }
}
