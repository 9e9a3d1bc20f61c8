//! The driver (spec §6, §8): configuration parsing and the glue that wires
//! pipeline passes, compaction, and code generation over a whole
//! [`crate::ir::module::IrModule`]. Front-end construction of that module is
//! an external collaborator (spec §1); this crate starts at the module.

pub mod compile;
pub mod config;

pub use compile::{compile_module, CompileStats};
pub use config::{AbiVariant, CompilerConfig};
