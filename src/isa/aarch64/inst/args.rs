//! Operand types shared across `Inst` variants: shift/extend operators,
//! condition codes, addressing modes, and branch targets.

use crate::buffer::MachLabel;
use crate::isa::aarch64::inst::imms::SImm7Scaled;
use crate::isa::aarch64::inst::imms::SImm9;
use crate::reg::{Reg, WritableReg};

/// A shift operator for a register operand or a shifted-register ALU form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Lsl = 0b00,
    Lsr = 0b01,
    Asr = 0b10,
    Ror = 0b11,
}

impl ShiftOp {
    pub fn bits(self) -> u32 {
        self as u32
    }
}

/// A shift amount, checked to fit a 6-bit encoding field (0..=63).
#[derive(Clone, Copy, Debug)]
pub struct ShiftOpShiftImm(u8);

impl ShiftOpShiftImm {
    pub const MAX_SHIFT: u8 = 63;

    pub fn maybe_from_shift(shift: u64) -> Option<Self> {
        if shift <= u64::from(Self::MAX_SHIFT) {
            Some(ShiftOpShiftImm(shift as u8))
        } else {
            None
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

/// A shift operator together with its (range-checked) amount.
#[derive(Clone, Copy, Debug)]
pub struct ShiftOpAndAmt {
    op: ShiftOp,
    amt: ShiftOpShiftImm,
}

impl ShiftOpAndAmt {
    pub fn new(op: ShiftOp, amt: ShiftOpShiftImm) -> Self {
        ShiftOpAndAmt { op, amt }
    }

    pub fn op(self) -> ShiftOp {
        self.op
    }

    pub fn amt(self) -> ShiftOpShiftImm {
        self.amt
    }
}

/// A register-extend operator, as used by `ADD`/`SUB` extended-register
/// forms and by register-offset addressing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtendOp {
    Uxtb = 0b000,
    Uxth = 0b001,
    Uxtw = 0b010,
    Uxtx = 0b011,
    Sxtb = 0b100,
    Sxth = 0b101,
    Sxtw = 0b110,
    Sxtx = 0b111,
}

impl ExtendOp {
    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn is_signed(self) -> bool {
        (self as u8) & 0b100 != 0
    }
}

/// The 4-bit AArch64 condition field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CondCode {
    Eq = 0,
    Ne = 1,
    Hs = 2,
    Lo = 3,
    Mi = 4,
    Pl = 5,
    Vs = 6,
    Vc = 7,
    Hi = 8,
    Ls = 9,
    Ge = 10,
    Lt = 11,
    Gt = 12,
    Le = 13,
    Al = 14,
    Nv = 15,
}

impl CondCode {
    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn invert(self) -> CondCode {
        match self {
            CondCode::Eq => CondCode::Ne,
            CondCode::Ne => CondCode::Eq,
            CondCode::Hs => CondCode::Lo,
            CondCode::Lo => CondCode::Hs,
            CondCode::Mi => CondCode::Pl,
            CondCode::Pl => CondCode::Mi,
            CondCode::Vs => CondCode::Vc,
            CondCode::Vc => CondCode::Vs,
            CondCode::Hi => CondCode::Ls,
            CondCode::Ls => CondCode::Hi,
            CondCode::Ge => CondCode::Lt,
            CondCode::Lt => CondCode::Ge,
            CondCode::Gt => CondCode::Le,
            CondCode::Le => CondCode::Gt,
            CondCode::Al => CondCode::Nv,
            CondCode::Nv => CondCode::Al,
        }
    }
}

/// A conditional-branch condition: the common-case "register is zero/
/// nonzero" tests (which compile to `CBZ`/`CBNZ` and need no flags), or a
/// generic flags-based [`CondCode`] test.
#[derive(Clone, Copy, Debug)]
pub enum CondBrKind {
    Zero(Reg),
    NotZero(Reg),
    Cond(CondCode),
}

impl CondBrKind {
    pub fn invert(self) -> CondBrKind {
        match self {
            CondBrKind::Zero(r) => CondBrKind::NotZero(r),
            CondBrKind::NotZero(r) => CondBrKind::Zero(r),
            CondBrKind::Cond(c) => CondBrKind::Cond(c.invert()),
        }
    }
}

/// The `DMB`/`DSB` `<option>` operand; values match the `CRm` encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierKind {
    Sy,
    Ish,
    IshSt,
    IshLd,
}

impl BarrierKind {
    pub fn crm_bits(self) -> u32 {
        match self {
            BarrierKind::Sy => 0b1111,
            BarrierKind::Ish => 0b1011,
            BarrierKind::IshSt => 0b1010,
            BarrierKind::IshLd => 0b1001,
        }
    }
}

/// The callee of a `call`/`call_indirect` lowering: a direct symbol (a
/// fixup against a symbol table, resolved by the linking layer) or an
/// indirect register holding the callee's address.
#[derive(Clone, Debug)]
pub enum CallTarget {
    Direct(alloc::string::String),
    Indirect(Reg),
}

/// A scalar load/store addressing mode. By the time an `Inst` is built,
/// lowering has already picked the concrete form (unsigned-offset,
/// unscaled 9-bit, register-offset, or pre/post-index) -- the encoder
/// never "falls back" to a different one.
#[derive(Clone, Debug)]
pub enum AMode {
    /// Scaled 12-bit unsigned offset from `rn` (`LDR`/`STR` "unsigned
    /// offset" form). Offset is pre-divided by the access size.
    UnsignedOffset {
        rn: Reg,
        uimm12: crate::isa::aarch64::inst::imms::UImm12Scaled,
    },
    /// Unscaled 9-bit signed offset from `rn` (`LDUR`/`STUR`).
    Unscaled { rn: Reg, simm9: SImm9 },
    /// `rn + rm`, optionally scaled by the access size (the `S` bit) and
    /// optionally sign/zero-extending `rm` first. `shift` must be `Lsl`
    /// (or absent) -- any other `ShiftOp` is a fatal encoding error, since
    /// the architecture's register-offset form only has an `LSL`/extend
    /// slot, not a general shift.
    RegOffset {
        rn: Reg,
        rm: Reg,
        extend: Option<ExtendOp>,
        shift: Option<ShiftOp>,
        scaled: bool,
    },
    /// `[rn, #simm9]!`: update `rn` before the access.
    PreIndexed { rn: WritableReg, simm9: SImm9 },
    /// `[rn], #simm9`: update `rn` after the access.
    PostIndexed { rn: WritableReg, simm9: SImm9 },
    /// An offset from the stack pointer, resolved to a concrete form by
    /// the ABI frame-layout pass immediately before emission.
    SPOffset { off: i64 },
    /// An offset from the frame pointer, resolved the same way.
    FPOffset { off: i64 },
}

impl AMode {
    pub fn reg(rn: Reg) -> AMode {
        AMode::UnsignedOffset {
            rn,
            uimm12: crate::isa::aarch64::inst::imms::UImm12Scaled::zero(8),
        }
    }
}

/// An `LDP`/`STP` addressing mode: the pair forms only support a signed,
/// element-scaled 7-bit offset, pre-indexed, or post-indexed.
#[derive(Clone, Debug)]
pub enum PairAMode {
    SignedOffset { rn: Reg, simm7: SImm7Scaled },
    PreIndexed { rn: WritableReg, simm7: SImm7Scaled },
    PostIndexed { rn: WritableReg, simm7: SImm7Scaled },
}

/// A control-flow target: either a not-yet-placed [`MachLabel`] (the
/// normal case during lowering) or a raw resolved word offset (used by a
/// few fixed-distance internal branches).
#[derive(Clone, Copy, Debug)]
pub enum BranchTarget {
    Label(MachLabel),
    ResolvedOffset(i32),
}

/// The three `LD<op>` LSE atomic-RMW operations this backend encodes
/// (`ADD`, `CLR` i.e. bic, `SET` i.e. orr, `EOR`), each with acquire/
/// release/acquire-release variants selected separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomicRMWOp {
    Add,
    Clr,
    Eor,
    Set,
}

/// Acquire/release ordering for an LSE atomic or exclusive access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomicOrdering {
    Relaxed,
    Acquire,
    Release,
    AcquireRelease,
}

impl AtomicOrdering {
    pub fn ar_bits(self) -> (u32, u32) {
        // (A, R) bits as used by LDADD*/STADD*/CAS* et al.
        match self {
            AtomicOrdering::Relaxed => (0, 0),
            AtomicOrdering::Acquire => (1, 0),
            AtomicOrdering::Release => (0, 1),
            AtomicOrdering::AcquireRelease => (1, 1),
        }
    }
}

/// `MOVZ` vs `MOVN`: which identity the move-wide immediate's bits are
/// relative to (literal vs bitwise-complemented).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveWideOp {
    MovZ,
    MovN,
}
