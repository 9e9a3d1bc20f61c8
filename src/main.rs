//! `ccc-opt`: the command-line entry point (spec §6, §8). Parses the
//! compiler configuration, builds (or, once a front end exists upstream,
//! receives) an [`IrModule`], and runs it through the pipeline/codegen glue
//! in `driver::compile`.
//!
//! This crate's scope begins at the IR module (spec §1: the C front end and
//! AST-to-IR lowering are external collaborators), so there is no source
//! file for this binary to lex and parse. No `--input` producer is wired up
//! yet, so when `input` is absent this binary builds a small self-contained
//! module with `opt::builder::FunctionBuilder` so the full pipeline →
//! codegen → emission path has something real to exercise end to end.

use clap::Parser;
use log::info;

use ccc_opt::common::error::CompilerError;
use ccc_opt::driver::{compile_module, CompilerConfig};
use ccc_opt::ir::module::IrModule;
use ccc_opt::opt::builder::FunctionBuilder;
use ccc_opt::opt::operation::{Immediate, Opcode, OperationFamily};

fn main() {
    let config = CompilerConfig::parse();

    env_logger::Builder::new().filter_level(config.log_level()).init();

    if let Err(err) = run(&config) {
        eprintln!("{}", render_top_level_error(&err));
        std::process::exit(1);
    }
}

fn run(config: &CompilerConfig) -> anyhow::Result<()> {
    let mut module = IrModule::new();

    if config.input.is_none() {
        info!("no input module producer wired up; building the --demo module");
        build_demo_module(&mut module)?;
    }

    let (assembly, stats) = compile_module(&mut module, config)?;
    info!(
        "{} function(s) compiled, {} pass application(s), {} -> {} named types after compaction",
        stats.functions_compiled,
        stats.pass_applications,
        stats.stats_before.named_types,
        stats.stats_after.named_types,
    );

    match &config.output {
        Some(path) => std::fs::write(path, assembly)?,
        None => print!("{assembly}"),
    }
    Ok(())
}

/// A single function, `identity`, that returns the integer constant `42` —
/// enough to exercise select → schedule → regalloc → devirtualize → emit
/// without a front end.
fn build_demo_module(module: &mut IrModule) -> Result<(), CompilerError> {
    let mut builder = FunctionBuilder::new("identity");
    let c = builder.push(Opcode::IntConst, OperationFamily::Immediate(Immediate::Int(42)))?;
    builder.push_control(Opcode::Return, OperationFamily::Return(Some(c)), false)?;
    let func = builder.finish();
    module.functions.insert(func.name.clone(), func);
    Ok(())
}

fn render_top_level_error(err: &anyhow::Error) -> String {
    format!("error: {err}")
}
