//! Pipeline passes (spec §4.6): block merging, GVN, phi-propagation,
//! phi-to-select conversion, and local-allocation sinking, plus the pass
//! registry the driver selects from by name.
//!
//! The registry is the one piece of genuinely global state this crate
//! carries (spec §9, "Global state is limited to the pass registry"): a
//! compile-time constant table of `{name, apply}` pairs.

pub mod block_merge;
pub mod gvn;
pub mod local_alloc_sink;
pub mod phi_propagate;
pub mod phi_select;

use crate::common::error::CompilerResult;
use crate::opt::container::OptFunction;

/// A single named rewrite. `apply` mutates `func` in place and reports
/// whether anything changed (used by the driver's `--pass` fixpoint loop
/// and by tests).
pub struct Pass {
    pub name: &'static str,
    pub apply: fn(&mut OptFunction) -> CompilerResult<bool>,
}

/// The compile-time pass table (spec §9). Order here is also the default
/// pipeline order when the driver is not given an explicit `--pass` list.
pub const PASSES: &[Pass] = &[
    Pass { name: "block-merge", apply: block_merge::run },
    Pass { name: "gvn", apply: gvn::run },
    Pass { name: "phi-propagate", apply: phi_propagate::run },
    Pass { name: "phi-select", apply: phi_select::run },
    Pass { name: "local-alloc-sink", apply: local_alloc_sink::run },
];

pub fn find_pass(name: &str) -> Option<&'static Pass> {
    PASSES.iter().find(|p| p.name == name)
}

/// Runs `names` in order over `func`, once each (the driver decides
/// whether to loop the whole list to a fixpoint).
pub fn run_pipeline(func: &mut OptFunction, names: &[&str]) -> CompilerResult<()> {
    for name in names {
        let pass = find_pass(name)
            .ok_or_else(|| crate::common::error::CompilerError::invalid_parameter(format!("unknown pass {name}")))?;
        (pass.apply)(func)?;
    }
    Ok(())
}
