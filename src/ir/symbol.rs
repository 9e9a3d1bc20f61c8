//! Symbol table: a mapping from symbol name to scope and optional alias
//! (spec §3). The "IR identifier" a symbol resolves to is, in this crate,
//! simply the symbol's own name used as the key into
//! [`crate::ir::module::IrModule`]'s `functions`/`data`/`declarations`
//! tables — see DESIGN.md for why a separate identifier indirection layer
//! was not introduced.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Import,
    Export,
    ExportWeak,
    Local,
    ThreadLocalImport,
    ThreadLocalExport,
}

impl Scope {
    pub fn is_export(self) -> bool {
        matches!(self, Scope::Export | Scope::ExportWeak | Scope::ThreadLocalExport)
    }

    pub fn is_weak(self) -> bool {
        matches!(self, Scope::ExportWeak)
    }

    pub fn is_thread_local(self) -> bool {
        matches!(self, Scope::ThreadLocalImport | Scope::ThreadLocalExport)
    }

    pub fn has_body(self) -> bool {
        !matches!(self, Scope::Import | Scope::ThreadLocalImport)
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub scope: Scope,
    pub alias: Option<String>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        Self { name: name.into(), scope, alias: None }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}
