//! The target-independent IR surface this backend consumes.
//!
//! This module is an *interface*, not an implementation: the dataflow
//! graph, the type system, and the block/instruction layout all belong to
//! the front end and the rest of the compiler, which are out of scope for
//! this crate. What follows is the minimal shape [`crate::isa::aarch64`]
//! needs in order to pattern-match and lower a function -- close enough to
//! what a real SSA IR exposes (values, blocks, a closed instruction-data
//! union, a signature) that the lowering engine can be exercised and tested
//! standalone, without pulling in a whole front end.

use alloc::vec::Vec;
use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};

/// An SSA value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// A basic block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// A reference to an instruction within a function's dataflow graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// The target-independent value types a [`Value`] may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// A pointer-sized integer; this backend always treats it as 64-bit.
    Ptr,
    I8X16,
    I16X8,
    I32X4,
    I64X2,
    F32X4,
    F64X2,
}

impl Type {
    pub fn bits(self) -> u32 {
        match self {
            Type::I8 => 8,
            Type::I16 => 16,
            Type::I32 | Type::F32 => 32,
            Type::I64 | Type::F64 | Type::Ptr => 64,
            Type::I8X16 | Type::I16X8 | Type::I32X4 | Type::I64X2 | Type::F32X4 | Type::F64X2 => {
                128
            }
        }
    }

    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }

    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64 | Type::F32X4 | Type::F64X2)
    }

    pub fn is_vector(self) -> bool {
        matches!(
            self,
            Type::I8X16 | Type::I16X8 | Type::I32X4 | Type::I64X2 | Type::F32X4 | Type::F64X2
        )
    }

    /// Width of one lane of a vector type, in bits; for scalars, same as
    /// [`Type::bits`].
    pub fn lane_bits(self) -> u32 {
        match self {
            Type::I8X16 => 8,
            Type::I16X8 => 16,
            Type::I32X4 | Type::F32X4 => 32,
            Type::I64X2 | Type::F64X2 => 64,
            other => other.bits(),
        }
    }
}

/// Integer comparison codes for `icmp`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntCC {
    Equal,
    NotEqual,
    SignedLessThan,
    SignedGreaterThanOrEqual,
    SignedGreaterThan,
    SignedLessThanOrEqual,
    UnsignedLessThan,
    UnsignedGreaterThanOrEqual,
    UnsignedGreaterThan,
    UnsignedLessThanOrEqual,
}

/// Floating-point comparison codes for `fcmp`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatCC {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Unordered,
}

/// The opcodes this backend's lowering pattern table knows how to match.
/// A real IR's opcode set is much larger; this is the subset the AArch64
/// lowering engine's pattern table covers (an unmatched opcode is a fatal
/// lowering-coverage gap, not silently skipped).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Iconst,
    Iadd,
    Isub,
    Imul,
    Sdiv,
    Udiv,
    Band,
    Bor,
    Bxor,
    Ishl,
    Ushr,
    Sshr,
    Rotr,
    Uextend,
    Sextend,
    Ireduce,
    Load,
    Store,
    Icmp,
    Select,
    Brif,
    Jump,
    Return,
    Call,
    CallIndirect,
    FuncAddr,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Fneg,
    Fabs,
    Fmin,
    Fmax,
    Fcmp,
    Fcvt,
    FcvtToSint,
    FcvtFromSint,
    Bitcast,
}

/// The closed tagged union of instruction payloads. Every shape carries its
/// own `opcode` (several distinct opcodes share one payload shape, e.g.
/// `Iadd`/`Isub`/`Imul` are all `Binary`, so the shape alone does not
/// disambiguate -- lowering always dispatches on [`InstructionData::opcode`],
/// never on the shape by itself).
#[derive(Clone, Debug)]
pub enum InstructionData {
    Nullary { opcode: Opcode },
    Unary { opcode: Opcode, arg: Value },
    UnaryImm { opcode: Opcode, imm: i64 },
    UnaryIeee { opcode: Opcode, bits: u64 },
    Binary { opcode: Opcode, args: [Value; 2] },
    IntCompare { opcode: Opcode, cc: IntCC, args: [Value; 2] },
    FloatCompare { opcode: Opcode, cc: FloatCC, args: [Value; 2] },
    Select { opcode: Opcode, cc: Value, args: [Value; 2] },
    Branch { opcode: Opcode, cond: Value, then: Block, else_: Block },
    Jump { opcode: Opcode, dest: Block },
    Call { opcode: Opcode, target: CallTarget, args: Vec<Value> },
    Return { opcode: Opcode, args: Vec<Value> },
    /// `load Ti, [arg+offset]`.
    Load { opcode: Opcode, arg: Value, offset: i32 },
    /// `store args[0], [args[1]+offset]`: `args[0]` is the value being
    /// stored, `args[1]` the base address, matching the real IR's own
    /// `Store` instruction-data shape (value first, address second).
    Store { opcode: Opcode, args: [Value; 2], offset: i32 },
}

impl InstructionData {
    pub fn opcode(&self) -> Opcode {
        match *self {
            InstructionData::Nullary { opcode }
            | InstructionData::Unary { opcode, .. }
            | InstructionData::UnaryImm { opcode, .. }
            | InstructionData::UnaryIeee { opcode, .. }
            | InstructionData::Binary { opcode, .. }
            | InstructionData::IntCompare { opcode, .. }
            | InstructionData::FloatCompare { opcode, .. }
            | InstructionData::Select { opcode, .. }
            | InstructionData::Branch { opcode, .. }
            | InstructionData::Jump { opcode, .. }
            | InstructionData::Call { opcode, .. }
            | InstructionData::Return { opcode, .. }
            | InstructionData::Load { opcode, .. }
            | InstructionData::Store { opcode, .. } => opcode,
        }
    }
}

/// The callee of a `call` instruction.
#[derive(Clone, Debug)]
pub enum CallTarget {
    Direct(ExternalName),
    Indirect(Value),
}

/// An external symbol name, as referenced by a direct call or a
/// relocatable address load.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExternalName(pub alloc::string::String);

/// Which procedure-call convention a [`Signature`] follows. This backend
/// only implements `AppleAarch64`/`SystemV`-style AAPCS64.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallConv {
    AppleAarch64,
}

/// One parameter or return value slot in a [`Signature`].
#[derive(Clone, Copy, Debug)]
pub struct AbiParam {
    pub value_type: Type,
}

impl AbiParam {
    pub fn new(value_type: Type) -> Self {
        AbiParam { value_type }
    }
}

/// A function signature: calling convention plus ordered parameter and
/// return-value types.
#[derive(Clone, Debug)]
pub struct Signature {
    pub call_conv: CallConv,
    pub params: Vec<AbiParam>,
    pub returns: Vec<AbiParam>,
}

/// The dataflow graph: per-value types, per-instruction payloads, and the
/// instruction that defines each value.
#[derive(Default)]
pub struct DataFlowGraph {
    pub insts: PrimaryMap<Inst, InstructionData>,
    pub results: SecondaryMap<Inst, Vec<Value>>,
    pub value_types: SecondaryMap<Value, Type>,
    values: PrimaryMap<Value, ()>,
}

impl DataFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_inst(&mut self, data: InstructionData) -> Inst {
        self.insts.push(data)
    }

    pub fn make_value(&mut self, ty: Type) -> Value {
        let v = self.values.push(());
        self.value_types[v] = ty;
        v
    }

    pub fn append_result(&mut self, inst: Inst, ty: Type) -> Value {
        let v = self.make_value(ty);
        self.results[inst].push(v);
        v
    }

    pub fn inst_data(&self, inst: Inst) -> &InstructionData {
        &self.insts[inst]
    }

    pub fn value_type(&self, value: Value) -> Type {
        self.value_types[value]
    }

    pub fn first_result(&self, inst: Inst) -> Option<Value> {
        self.results[inst].first().copied()
    }
}

/// Program order within one basic block, and block order within the
/// function, plus each block's parameter list.
#[derive(Default)]
pub struct Layout {
    pub block_order: Vec<Block>,
    pub block_insts: SecondaryMap<Block, Vec<Inst>>,
    pub block_params: SecondaryMap<Block, Vec<Value>>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_block(&mut self, block: Block) {
        self.block_order.push(block);
    }

    pub fn append_inst(&mut self, block: Block, inst: Inst) {
        self.block_insts[block].push(inst);
    }

    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.block_order.iter().copied()
    }

    pub fn block_insts(&self, block: Block) -> impl Iterator<Item = Inst> + '_ {
        self.block_insts[block].iter().copied()
    }

    pub fn block_params(&self, block: Block) -> &[Value] {
        &self.block_params[block]
    }
}

/// A complete function: signature, dataflow graph, and block layout.
pub struct Function {
    pub name: ExternalName,
    pub signature: Signature,
    pub dfg: DataFlowGraph,
    pub layout: Layout,
    blocks: PrimaryMap<Block, ()>,
}

impl Function {
    pub fn new(name: &str, signature: Signature) -> Self {
        Function {
            name: ExternalName(name.into()),
            signature,
            dfg: DataFlowGraph::new(),
            layout: Layout::new(),
            blocks: PrimaryMap::new(),
        }
    }

    pub fn make_block(&mut self) -> Block {
        let b = self.blocks.push(());
        self.layout.append_block(b);
        b
    }
}
