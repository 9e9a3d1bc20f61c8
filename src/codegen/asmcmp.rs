//! The virtual-register assembly container ("asmcmp", spec §4.7): a linear
//! sequence of AMD64 instructions addressed by dense integer indices, plus
//! a label table, a stack-frame descriptor, and a debug-info map. Mirrors
//! the donor's own instruction-as-struct-with-dense-index habit
//! (`backend/x86/codegen/codegen.rs`'s emitted instruction list), lifted
//! from physical to virtual registers.

use smallvec::SmallVec;

use crate::common::arena::ArenaRef;
use crate::common::source::Span;
use crate::ir::types::TypeId;
use crate::opt::instr::InstrRef;

/// Dense reference into an [`AsmCmp`]'s instruction list.
pub type AsmInstrRef = ArenaRef<AsmInstr>;

/// A virtual register: an abstract operand slot `regalloc` assigns to a
/// physical register or a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VReg(pub u32);

/// What kind of value a virtual register holds — constrains which physical
/// register file (or spill-area shape) it may be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VRegClass {
    GeneralPurpose,
    Floating,
    /// A real/imaginary SSE pair for complex arithmetic, tagged with the
    /// scalar width of each half.
    FloatingPair(FloatWidth),
    /// Explicit-size, explicit-alignment spill-only storage (e.g. an i128
    /// temporary that never lives in a register).
    SpillSpace { size: u32, align: u32 },
    /// Backs a source-level local variable; laid out by the variable
    /// allocator from the IR type table rather than by generic regalloc.
    LocalVariable { ty: TypeId },
    Immediate,
    MemoryPointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    Single,
    Double,
}

/// An operand to an asmcmp instruction. Widths mirror AMD64 operand sizes;
/// `VirtualReg` is resolved away by `devirtualize`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    VirtualReg(VReg, OperandWidth),
    Physical(PhysReg, OperandWidth),
    Immediate64(i64),
    /// A `.rodata`-resident constant, addressed by label index.
    RodataLabel(u32),
    /// A symbolic jump/call target, resolved at emission to a label.
    BlockLabel(u32),
    SymbolRef(u32),
    /// `[base + disp]`, base still virtual until devirtualized.
    MemoryIndirect { base: VReg, disp: i32, width: OperandWidth },
    MemoryIndirectPhys { base: PhysReg, disp: i32, width: OperandWidth },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandWidth {
    W8,
    W16,
    W32,
    W64,
    /// Packed/scalar SSE width, distinguished from GP widths since the
    /// encoding and register file differ.
    F32,
    F64,
    /// x87 80-bit extended precision; never register-allocated, always
    /// addressed through the x87 stack model.
    X87,
}

pub use crate::codegen::regalloc::PhysReg;

/// Virtual-register AMD64 mnemonics the instruction selector emits. One
/// mnemonic per distinct encoding shape (spec's "opcode -> emitter" table
/// targets this enum, not SSA `Opcode` directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsmOp {
    MovGp,
    MovF,
    Lea,
    Add,
    Sub,
    IMul,
    IDiv,
    Neg,
    Not,
    And,
    Or,
    Xor,
    Shl,
    Sar,
    Shr,
    Cmp,
    Test,
    SetFromFlags(CondCode),
    CMovFromFlags(CondCode),
    Jmp,
    JmpCc(CondCode),
    Call,
    CallIndirect,
    Ret,
    Push,
    Pop,
    Load,
    Store,
    AddF,
    SubF,
    MulF,
    DivF,
    NegF,
    UComissF,
    Cvt,
    FldX87,
    FstpX87,
    FxchX87,
    FaddpX87,
    FsubpX87,
    FmulpX87,
    FdivpX87,
    FchsX87,
    LockXadd,
    LockCmpxchg,
    MFence,
    /// A no-op marker the scheduler elides before devirtualization (local
    /// stack-lifetime hints carried through from the SSA `alloc-local`).
    LifetimeMarker,
    /// Emits the raw template text of `AsmCmp::inline_asm_templates[.0]`
    /// verbatim (spec §3's inline-asm record, passed through rather than
    /// operand-substituted — see DESIGN.md).
    InlineAsmTemplate(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondCode {
    Eq,
    Ne,
    SLt,
    SLe,
    SGt,
    SGe,
    ULt,
    ULe,
    UGt,
    UGe,
    /// Carries the `OF` flag directly; used by the overflow-checked
    /// arithmetic family (`AddOverflow`/`SubOverflow`/`MulOverflow`).
    Overflow,
    NotOverflow,
}

/// One asmcmp instruction: opcode plus up to three operands (destination
/// first, matching AT&T-reversed-but-dest-first internal convention used
/// throughout the rest of this crate's operation payloads).
#[derive(Debug, Clone)]
pub struct AsmInstr {
    pub op: AsmOp,
    pub operands: SmallVec<[Operand; 3]>,
    /// The SSA instruction this asmcmp instruction was selected from, kept
    /// for liveness-driven register allocation and debug-info attachment.
    pub origin: Option<InstrRef>,
}

impl AsmInstr {
    pub fn new(op: AsmOp, operands: impl Into<SmallVec<[Operand; 3]>>) -> Self {
        Self { op, operands: operands.into(), origin: None }
    }

    pub fn with_origin(mut self, origin: InstrRef) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Stack-frame shape, filled in by `devirtualize` (spec §4.7's
/// "computes the stack-frame size and alignment").
#[derive(Debug, Clone, Default)]
pub struct FrameDescriptor {
    pub frame_size: u32,
    pub alignment: u32,
    pub preserved_registers: Vec<PhysReg>,
    pub saves_mxcsr: bool,
    pub saves_x87_control_word: bool,
    pub vararg_save_area: Option<u32>,
}

/// One entry in the debug-info source-location map (spec §4.7 "debug
/// tracker"): which asmcmp instruction range corresponds to which source
/// span.
#[derive(Debug, Clone)]
pub struct DebugLocation {
    pub instr: AsmInstrRef,
    pub span: Span,
}

/// A value that only needs to exist once per function and is addressed by
/// label rather than inlined (spec §9(b)'s "materialize to `.rodata`" side
/// of the resolved constant-materialization policy; see DESIGN.md).
#[derive(Debug, Clone)]
pub enum RodataValue {
    F32(f32),
    F64(f64),
    LongDouble(u128),
    Int64(i64),
    Bytes(Vec<u8>),
}

fn rodata_eq(a: &RodataValue, b: &RodataValue) -> bool {
    match (a, b) {
        (RodataValue::F32(x), RodataValue::F32(y)) => x.to_bits() == y.to_bits(),
        (RodataValue::F64(x), RodataValue::F64(y)) => x.to_bits() == y.to_bits(),
        (RodataValue::LongDouble(x), RodataValue::LongDouble(y)) => x == y,
        (RodataValue::Int64(x), RodataValue::Int64(y)) => x == y,
        (RodataValue::Bytes(x), RodataValue::Bytes(y)) => x == y,
        _ => false,
    }
}

/// The code generator's output for one function: virtual-register
/// instructions, labels, frame shape, and debug info — everything needed
/// by `devirtualize` and then `emit`.
#[derive(Debug, Clone, Default)]
pub struct AsmCmp {
    pub name: String,
    pub instructions: Vec<AsmInstr>,
    /// Block-entry label positions, indexed by the SSA `BlockRef`'s raw id.
    pub labels: std::collections::BTreeMap<u32, usize>,
    pub next_vreg: u32,
    pub vreg_classes: std::collections::BTreeMap<u32, VRegClass>,
    pub frame: FrameDescriptor,
    pub debug_locations: Vec<DebugLocation>,
    pub param_locations: Vec<(u32, Operand)>,
    /// This function's own `.rodata` constants, interned by value so two
    /// identical float immediates share one label (spec §9(b)).
    pub rodata: Vec<RodataValue>,
    /// Symbol names referenced by `Operand::SymbolRef`/`AsmOp::Call`,
    /// interned so operands stay `Copy`.
    pub symbol_names: Vec<String>,
    /// Raw inline-asm template text, interned so `AsmOp` stays `Copy`.
    pub inline_asm_templates: Vec<String>,
}

impl AsmCmp {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn new_vreg(&mut self, class: VRegClass) -> VReg {
        let id = self.next_vreg;
        self.next_vreg += 1;
        self.vreg_classes.insert(id, class);
        VReg(id)
    }

    pub fn intern_rodata(&mut self, value: RodataValue) -> u32 {
        if let Some(i) = self.rodata.iter().position(|v| rodata_eq(v, &value)) {
            return i as u32;
        }
        let id = self.rodata.len() as u32;
        self.rodata.push(value);
        id
    }

    pub fn intern_symbol(&mut self, name: &str) -> u32 {
        if let Some(i) = self.symbol_names.iter().position(|s| s == name) {
            return i as u32;
        }
        let id = self.symbol_names.len() as u32;
        self.symbol_names.push(name.to_string());
        id
    }

    pub fn intern_inline_asm_template(&mut self, template: &str) -> u32 {
        let id = self.inline_asm_templates.len() as u32;
        self.inline_asm_templates.push(template.to_string());
        id
    }

    pub fn push(&mut self, instr: AsmInstr) -> AsmInstrRef {
        let idx = self.instructions.len() as u32;
        self.instructions.push(instr);
        AsmInstrRef::new(idx)
    }

    pub fn label_here(&mut self, block_id: u32) {
        self.labels.insert(block_id, self.instructions.len());
    }

    pub fn instr(&self, r: AsmInstrRef) -> &AsmInstr {
        &self.instructions[r.as_usize()]
    }

    pub fn instr_mut(&mut self, r: AsmInstrRef) -> &mut AsmInstr {
        &mut self.instructions[r.as_usize()]
    }
}
