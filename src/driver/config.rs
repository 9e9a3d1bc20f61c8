//! `CompilerConfig` (spec §6, §9): the driver's command-surface flags,
//! parsed by `clap` the way the donor's sibling crates parse their own CLI
//! surfaces rather than the donor's own hand-rolled `while i < args.len()`
//! loop (see `driver/mod.rs`'s removed `Driver::run` — see DESIGN.md).

use clap::{Parser, ValueEnum};

/// Target ABI variant. Spec §6: "currently only `system-v-amd64`" — the
/// enum exists so a second variant is a future non-breaking addition rather
/// than a config format change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AbiVariant {
    SystemVAmd64,
}

impl Default for AbiVariant {
    fn default() -> Self {
        AbiVariant::SystemVAmd64
    }
}

/// Parsed command line for the `ccc-opt` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "ccc-opt", about = "SSA mid-end optimizer and AMD64 code generator")]
pub struct CompilerConfig {
    /// Target ABI variant.
    #[arg(long = "abi", value_enum, default_value_t = AbiVariant::SystemVAmd64)]
    pub abi: AbiVariant,

    /// Emit position-independent code (RIP-relative addressing for
    /// `.rodata`/data references).
    #[arg(long = "fpic")]
    pub position_independent: bool,

    /// Emit `<name>_begin`/`<name>_end` debug-scope labels per function.
    #[arg(short = 'g', long = "debug-info")]
    pub debug_info: bool,

    /// Use explicit `fxch`+`fstp` instead of `fdecstp` in the x87 stack
    /// model, so Valgrind's x87 emulation accepts the generated code.
    #[arg(long = "fvalgrind-x87")]
    pub valgrind_x87: bool,

    /// Ordered pass list to run, repeatable (`--pass gvn --pass block-merge`).
    /// Empty means "run the default pipeline order once".
    #[arg(long = "pass")]
    pub passes: Vec<String>,

    /// Repeat the full pass list to a fixpoint (bounded) instead of once.
    #[arg(long = "fixpoint")]
    pub fixpoint: bool,

    /// Verbosity, repeatable (`-v`, `-vv`) — raises the `log` level the way
    /// the donor's single `verbose: bool` used to gate `eprintln!` calls.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Input file (reserved: this crate's scope starts at the IR module, so
    /// there is no source file to lex/parse — kept only so the CLI shape
    /// matches the donor's positional-arg convention; see DESIGN.md).
    pub input: Option<String>,

    /// Output path for the assembled `.s` text.
    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,
}

impl CompilerConfig {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbosity {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    pub fn emit_config(&self) -> crate::codegen::emit::EmitConfig {
        crate::codegen::emit::EmitConfig {
            position_independent: self.position_independent,
            debug_info: self.debug_info,
        }
    }
}
