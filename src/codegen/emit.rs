//! Assembly emission (spec §4.7's final stage, spec §6 External Interfaces):
//! turns a devirtualized [`AsmCmp`] plus the module's data/symbol tables into
//! AT&T-syntax assembly text, following the donor's own section/directive
//! conventions (`backend/x86/codegen/codegen.rs`) lifted from its
//! AST-driven, one-opcode-per-line style to this crate's virtual-register
//! container.
//!
//! Mirrors the donor's `.globl`/`.type ... @function`/`pushq %rbp` habits
//! exactly; adds PIC-mode RIP-relative addressing and the `<name>_begin`/
//! `<name>_end` debug-scoping labels spec §6 calls for, neither of which the
//! donor emitter had a use for.

use std::fmt::Write as _;

use crate::codegen::asmcmp::{AsmCmp, AsmInstr, AsmOp, CondCode, Operand, OperandWidth, RodataValue};
use crate::codegen::regalloc::PhysReg;
use crate::common::error::CompilerResult;
use crate::ir::data::DataValue;
use crate::ir::module::IrModule;
use crate::ir::symbol::Scope;

/// Emission-time options threaded down from the driver's configuration
/// (spec §6's ABI/PIC/debug-info/Valgrind-compatibility flags).
#[derive(Debug, Clone, Copy, Default)]
pub struct EmitConfig {
    pub position_independent: bool,
    pub debug_info: bool,
}

/// Emits one function's final assembly text. Label ids are block indices
/// from the function's `Structure`, turned into `.L<name>_<id>` local
/// labels; `name` is reused for the `_begin`/`_end` debug-scope labels.
pub fn emit_function(asm: &AsmCmp, config: EmitConfig) -> CompilerResult<String> {
    let mut out = String::new();
    writeln!(out, ".globl {}", asm.name).ok();
    writeln!(out, ".type {}, @function", asm.name).ok();
    writeln!(out, "{}:", asm.name).ok();
    if config.debug_info {
        writeln!(out, "{}_begin:", asm.name).ok();
    }

    let label_at: std::collections::BTreeMap<usize, u32> =
        asm.labels.iter().map(|(&block, &pos)| (pos, block)).collect();

    for (i, instr) in asm.instructions.iter().enumerate() {
        if let Some(&block) = label_at.get(&i) {
            writeln!(out, "{}:", block_label(&asm.name, block)).ok();
        }
        emit_instr(&mut out, asm, instr, config);
    }
    if let Some(&block) = label_at.get(&asm.instructions.len()) {
        writeln!(out, "{}:", block_label(&asm.name, block)).ok();
    }

    if config.debug_info {
        writeln!(out, "{}_end:", asm.name).ok();
    }
    writeln!(out, ".size {}, .-{}", asm.name, asm.name).ok();
    out.push('\n');
    Ok(out)
}

fn block_label(func: &str, block: u32) -> String {
    format!(".L{}_{}", func, block)
}

fn emit_instr(out: &mut String, asm: &AsmCmp, instr: &AsmInstr, config: EmitConfig) {
    let mnemonic = mnemonic_of(instr.op);
    match instr.op {
        AsmOp::Ret => {
            writeln!(out, "    ret").ok();
        }
        AsmOp::InlineAsmTemplate(id) => {
            if let Some(template) = asm.inline_asm_templates.get(id as usize) {
                for line in template.lines() {
                    writeln!(out, "    {}", line).ok();
                }
            }
        }
        AsmOp::Jmp => {
            writeln!(out, "    jmp {}", operand_text(asm, &instr.operands[0], &asm.name, config)).ok();
        }
        AsmOp::JmpCc(cc) => {
            writeln!(out, "    j{} {}", cc_suffix(cc), operand_text(asm, &instr.operands[0], &asm.name, config)).ok();
        }
        AsmOp::Call => {
            writeln!(out, "    call {}", operand_text(asm, &instr.operands[0], &asm.name, config)).ok();
        }
        AsmOp::CallIndirect => {
            writeln!(out, "    call *{}", operand_text(asm, &instr.operands[0], &asm.name, config)).ok();
        }
        AsmOp::SetFromFlags(cc) => {
            writeln!(out, "    set{} {}", cc_suffix(cc), operand_text(asm, &instr.operands[0], &asm.name, config)).ok();
        }
        AsmOp::CMovFromFlags(cc) => {
            writeln!(
                out,
                "    cmov{} {}, {}",
                cc_suffix(cc),
                operand_text(asm, &instr.operands[1], &asm.name, config),
                operand_text(asm, &instr.operands[0], &asm.name, config),
            )
            .ok();
        }
        AsmOp::LifetimeMarker => {}
        _ if instr.operands.len() == 3 => {
            // Three-operand asmcmp form (dest, a, b) for a two-address real
            // instruction: move a into dest first when dest differs from a.
            let dest = operand_text(asm, &instr.operands[0], &asm.name, config);
            let a = operand_text(asm, &instr.operands[1], &asm.name, config);
            let b = operand_text(asm, &instr.operands[2], &asm.name, config);
            if dest != a {
                writeln!(out, "    mov {}, {}", a, dest).ok();
            }
            writeln!(out, "    {} {}, {}", mnemonic, b, dest).ok();
        }
        _ if instr.operands.len() == 2 => {
            let dest = operand_text(asm, &instr.operands[0], &asm.name, config);
            let src = operand_text(asm, &instr.operands[1], &asm.name, config);
            writeln!(out, "    {} {}, {}", mnemonic, src, dest).ok();
        }
        _ if instr.operands.len() == 1 => {
            writeln!(out, "    {} {}", mnemonic, operand_text(asm, &instr.operands[0], &asm.name, config)).ok();
        }
        _ => {
            writeln!(out, "    {}", mnemonic).ok();
        }
    }
}

fn mnemonic_of(op: AsmOp) -> &'static str {
    use AsmOp::*;
    match op {
        MovGp | MovF => "mov",
        Lea => "lea",
        Add => "add",
        Sub => "sub",
        IMul => "imul",
        IDiv => "idiv",
        Neg => "neg",
        Not => "not",
        And => "and",
        Or => "or",
        Xor => "xor",
        Shl => "shl",
        Sar => "sar",
        Shr => "shr",
        Cmp => "cmp",
        Test => "test",
        Push => "push",
        Pop => "pop",
        Load => "mov",
        Store => "mov",
        AddF => "addsd",
        SubF => "subsd",
        MulF => "mulsd",
        DivF => "divsd",
        NegF => "xorpd",
        UComissF => "ucomisd",
        Cvt => "cvt",
        FldX87 => "fld",
        FstpX87 => "fstp",
        FxchX87 => "fxch",
        FaddpX87 => "faddp",
        FsubpX87 => "fsubp",
        FmulpX87 => "fmulp",
        FdivpX87 => "fdivp",
        FchsX87 => "fchs",
        LockXadd => "lock xadd",
        LockCmpxchg => "lock cmpxchg",
        MFence => "mfence",
        Ret | Jmp | JmpCc(_) | Call | CallIndirect | SetFromFlags(_) | CMovFromFlags(_)
        | LifetimeMarker | InlineAsmTemplate(_) => "",
    }
}

fn cc_suffix(cc: CondCode) -> &'static str {
    match cc {
        CondCode::Eq => "e",
        CondCode::Ne => "ne",
        CondCode::SLt => "l",
        CondCode::SLe => "le",
        CondCode::SGt => "g",
        CondCode::SGe => "ge",
        CondCode::ULt => "b",
        CondCode::ULe => "be",
        CondCode::UGt => "a",
        CondCode::UGe => "ae",
        CondCode::Overflow => "o",
        CondCode::NotOverflow => "no",
    }
}

fn width_suffix(w: OperandWidth) -> &'static str {
    match w {
        OperandWidth::W8 => "b",
        OperandWidth::W16 => "w",
        OperandWidth::W32 => "l",
        OperandWidth::W64 => "q",
        OperandWidth::F32 | OperandWidth::F64 | OperandWidth::X87 => "",
    }
}

fn operand_text(asm: &AsmCmp, op: &Operand, func_name: &str, config: EmitConfig) -> String {
    match *op {
        Operand::Physical(reg, width) => format!("%{}", reg_name(reg, width)),
        Operand::Immediate64(v) => format!("${}", v),
        Operand::RodataLabel(id) => {
            let label = format!(".Lconst_{}_{}", func_name, id);
            if config.position_independent {
                format!("{}(%rip)", label)
            } else {
                label
            }
        }
        Operand::BlockLabel(b) => block_label(func_name, b),
        Operand::SymbolRef(id) => asm.symbol_names.get(id as usize).cloned().unwrap_or_default(),
        Operand::MemoryIndirectPhys { base, disp, width } => {
            let _ = width;
            if disp == 0 {
                format!("(%{})", reg_name(base, OperandWidth::W64))
            } else {
                format!("{}(%{})", disp, reg_name(base, OperandWidth::W64))
            }
        }
        Operand::MemoryIndirect { .. } => {
            "<virtual-memory-operand>".to_string()
        }
        Operand::VirtualReg(v, _) => format!("<v{}>", v.0),
    }
}

fn reg_name(reg: PhysReg, width: OperandWidth) -> String {
    if reg.is_floating() {
        return reg.name64().to_string();
    }
    let base = reg.name64();
    match width_suffix(width) {
        "q" | "" => base.to_string(),
        "l" => gp32(base),
        "w" => gp16(base),
        "b" => gp8(base),
        _ => base.to_string(),
    }
}

fn gp32(name64: &str) -> String {
    match name64 {
        "rax" => "eax".into(),
        "rbx" => "ebx".into(),
        "rcx" => "ecx".into(),
        "rdx" => "edx".into(),
        "rsi" => "esi".into(),
        "rdi" => "edi".into(),
        "rbp" => "ebp".into(),
        "rsp" => "esp".into(),
        other if other.starts_with('r') => format!("{}d", other),
        other => other.into(),
    }
}

fn gp16(name64: &str) -> String {
    match name64 {
        "rax" => "ax".into(),
        "rbx" => "bx".into(),
        "rcx" => "cx".into(),
        "rdx" => "dx".into(),
        "rsi" => "si".into(),
        "rdi" => "di".into(),
        "rbp" => "bp".into(),
        "rsp" => "sp".into(),
        other if other.starts_with('r') => format!("{}w", other),
        other => other.into(),
    }
}

fn gp8(name64: &str) -> String {
    match name64 {
        "rax" => "al".into(),
        "rbx" => "bl".into(),
        "rcx" => "cl".into(),
        "rdx" => "dl".into(),
        "rsi" => "sil".into(),
        "rdi" => "dil".into(),
        "rbp" => "bpl".into(),
        "rsp" => "spl".into(),
        other if other.starts_with('r') => format!("{}b", other),
        other => other.into(),
    }
}

/// Emits this function's interned `.rodata` constants, labelled
/// `.Lconst_<func>_<id>` to match [`operand_text`]'s `RodataLabel` lowering.
pub fn emit_function_rodata(asm: &AsmCmp) -> String {
    if asm.rodata.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    writeln!(out, ".section .rodata").ok();
    for (id, value) in asm.rodata.iter().enumerate() {
        let label = format!(".Lconst_{}_{}", asm.name, id);
        writeln!(out, "{}:", label).ok();
        match value {
            RodataValue::F32(f) => {
                writeln!(out, "    .long {}", f.to_bits()).ok();
            }
            RodataValue::F64(f) => {
                writeln!(out, "    .quad {}", f.to_bits()).ok();
            }
            RodataValue::LongDouble(bits) => {
                writeln!(out, "    .quad {}", *bits as u64).ok();
                writeln!(out, "    .quad {}", (*bits >> 64) as u64).ok();
            }
            RodataValue::Int64(v) => {
                writeln!(out, "    .quad {}", v).ok();
            }
            RodataValue::Bytes(bytes) => {
                let escaped: String = bytes.iter().map(|b| format!("\\{:03o}", b)).collect();
                writeln!(out, "    .ascii \"{}\"", escaped).ok();
            }
        }
    }
    out
}

/// Emits the module's named data objects to `.data`/`.bss` (spec §3's
/// `NamedData`), and the symbol table's export/weak/alias directives
/// (spec §3's `Symbol`).
pub fn emit_module_data(module: &IrModule) -> String {
    let mut out = String::new();
    let mut names: Vec<&String> = module.data.keys().collect();
    names.sort();
    if !names.is_empty() {
        writeln!(out, ".section .data").ok();
    }
    for name in names {
        let data = &module.data[name];
        writeln!(out, ".globl {}", name).ok();
        writeln!(out, "{}:", name).ok();
        let mut cursor = 0u64;
        for (offset, value) in data.initializers.iter() {
            if *offset > cursor {
                writeln!(out, "    .zero {}", offset - cursor).ok();
            }
            cursor = *offset + emit_data_value(&mut out, value);
        }
    }

    let mut symbol_names: Vec<&String> = module.symbols.keys().collect();
    symbol_names.sort();
    for name in symbol_names {
        let symbol = &module.symbols[name];
        if symbol.scope.is_weak() {
            writeln!(out, ".weak {}", name).ok();
        } else if symbol.scope.is_export() {
            writeln!(out, ".globl {}", name).ok();
        }
        if let Some(alias) = &symbol.alias {
            writeln!(out, ".set {}, {}", name, alias).ok();
        }
    }
    out
}

fn emit_data_value(out: &mut String, value: &DataValue) -> u64 {
    match value {
        DataValue::Undefined => {
            writeln!(out, "    .zero 1").ok();
            1
        }
        DataValue::Integer(v) => {
            writeln!(out, "    .quad {}", v).ok();
            8
        }
        DataValue::Float32(f) => {
            writeln!(out, "    .long {}", f.to_bits()).ok();
            4
        }
        DataValue::Float64(f) => {
            writeln!(out, "    .quad {}", f.to_bits()).ok();
            8
        }
        DataValue::LongDouble(bits) => {
            writeln!(out, "    .quad {}", *bits as u64).ok();
            writeln!(out, "    .quad {}", (*bits >> 64) as u64).ok();
            16
        }
        DataValue::Complex { real, imag } => {
            writeln!(out, "    .quad {}", real.to_bits()).ok();
            writeln!(out, "    .quad {}", imag.to_bits()).ok();
            16
        }
        DataValue::String(s) => {
            writeln!(out, "    .asciz \"{}\"", s.escape_default()).ok();
            s.len() as u64 + 1
        }
        DataValue::RawBytes(bytes) => {
            let escaped: String = bytes.iter().map(|b| format!("\\{:03o}", b)).collect();
            writeln!(out, "    .ascii \"{}\"", escaped).ok();
            bytes.len() as u64
        }
        DataValue::Aggregate(members) => members.iter().map(|m| emit_data_value(out, m)).sum(),
        DataValue::BitPattern(bits) => {
            writeln!(out, "    .quad {}", bits).ok();
            8
        }
        DataValue::Pointer { symbol, offset } | DataValue::StringPointer { symbol, offset } => {
            if *offset == 0 {
                writeln!(out, "    .quad {}", symbol).ok();
            } else {
                writeln!(out, "    .quad {}+{}", symbol, offset).ok();
            }
            8
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::asmcmp::AsmInstr;

    #[test]
    fn two_operand_instr_emits_src_then_dest() {
        let asm = AsmCmp::new("f");
        let instr = AsmInstr::new(
            AsmOp::MovGp,
            [Operand::Physical(PhysReg::Rax, OperandWidth::W64), Operand::Immediate64(7)],
        );
        let mut out = String::new();
        emit_instr(&mut out, &asm, &instr, EmitConfig::default());
        assert_eq!(out, "    mov $7, %rax\n");
    }

    #[test]
    fn three_operand_instr_moves_into_dest_when_it_differs_from_a() {
        let asm = AsmCmp::new("f");
        let instr = AsmInstr::new(
            AsmOp::Add,
            [
                Operand::Physical(PhysReg::Rax, OperandWidth::W64),
                Operand::Physical(PhysReg::Rbx, OperandWidth::W64),
                Operand::Immediate64(1),
            ],
        );
        let mut out = String::new();
        emit_instr(&mut out, &asm, &instr, EmitConfig::default());
        assert_eq!(out, "    mov %rbx, %rax\n    add $1, %rax\n");
    }

    #[test]
    fn three_operand_instr_skips_the_extra_mov_when_dest_is_a() {
        let asm = AsmCmp::new("f");
        let instr = AsmInstr::new(
            AsmOp::Add,
            [
                Operand::Physical(PhysReg::Rax, OperandWidth::W64),
                Operand::Physical(PhysReg::Rax, OperandWidth::W64),
                Operand::Immediate64(1),
            ],
        );
        let mut out = String::new();
        emit_instr(&mut out, &asm, &instr, EmitConfig::default());
        assert_eq!(out, "    add $1, %rax\n");
    }

    #[test]
    fn sub_register_widths_follow_the_amd64_naming_scheme() {
        assert_eq!(reg_name(PhysReg::Rax, OperandWidth::W32), "eax");
        assert_eq!(reg_name(PhysReg::Rax, OperandWidth::W16), "ax");
        assert_eq!(reg_name(PhysReg::Rax, OperandWidth::W8), "al");
        assert_eq!(reg_name(PhysReg::R12, OperandWidth::W32), "r12d");
        assert_eq!(reg_name(PhysReg::R12, OperandWidth::W8), "r12b");
    }

    #[test]
    fn rodata_label_gains_rip_suffix_only_under_pic() {
        let asm = AsmCmp::new("f");
        let op = Operand::RodataLabel(3);
        assert_eq!(operand_text(&asm, &op, "f", EmitConfig::default()), ".Lconst_f_3");
        let pic = EmitConfig { position_independent: true, debug_info: false };
        assert_eq!(operand_text(&asm, &op, "f", pic), ".Lconst_f_3(%rip)");
    }

    #[test]
    fn function_rodata_labels_match_operand_text_labels() {
        let mut asm = AsmCmp::new("f");
        asm.intern_rodata(RodataValue::F64(1.5));
        let rodata = emit_function_rodata(&asm);
        assert!(rodata.contains(".Lconst_f_0:"));
        assert!(rodata.contains(".quad"));
    }
}
