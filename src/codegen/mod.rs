//! The AMD64 code generator (spec §4.7): instruction selection, scheduling,
//! register allocation, devirtualization, and emission, wired together by
//! [`compile_function`].

pub mod asmcmp;
pub mod devirtualize;
pub mod emit;
pub mod regalloc;
pub mod schedule;
pub mod select;
pub mod x87;

use crate::analysis::structure::Structure;
use crate::codegen::emit::EmitConfig;
use crate::codegen::regalloc::{Hint, RegisterAllocator};
use crate::common::error::CompilerResult;
use crate::common::fx_hash::FxHashMap;
use crate::ir::module::IrModule;
use crate::opt::container::OptFunction;

/// Runs the full function-level codegen pipeline: select, schedule,
/// register-allocate, devirtualize. Returns the assembled virtual-register
/// program with concrete operands, ready for `emit`.
pub fn compile_function(
    func: &OptFunction,
    module: &IrModule,
    valgrind_compatible_x87: bool,
) -> CompilerResult<asmcmp::AsmCmp> {
    let structure = Structure::build(func)?;
    let mut asm = select::select_function(func, module, &structure, valgrind_compatible_x87)?;
    schedule::run(&mut asm)?;
    let hints: FxHashMap<u32, Vec<Hint>> = FxHashMap::default();
    let regs = RegisterAllocator::run(&asm, module, &hints)?;
    devirtualize::run(&mut asm, &regs)?;
    Ok(asm)
}

/// Runs codegen and emission for one function, returning `(text, rodata)`
/// assembly fragments (spec §6: `.text` body, `.rodata` constants).
pub fn compile_and_emit_function(
    func: &OptFunction,
    module: &IrModule,
    config: EmitConfig,
    valgrind_compatible_x87: bool,
) -> CompilerResult<(String, String)> {
    let asm = compile_function(func, module, valgrind_compatible_x87)?;
    let text = emit::emit_function(&asm, config)?;
    let rodata = emit::emit_function_rodata(&asm);
    Ok((text, rodata))
}
