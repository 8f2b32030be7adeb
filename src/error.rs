//! Error taxonomy for the backend.
//!
//! Per the design, almost everything here is fatal: legalization happens
//! during lowering, before any instruction is handed to the encoder, so by
//! the time an encoding or ABI error surfaces it indicates a bug in the
//! compiler rather than something a caller can retry around. The one
//! recoverable case is allocation failure (growing the code buffer, or
//! mapping JIT memory), which is returned up rather than panicking.

use alloc::string::String;
use thiserror::Error;

/// Errors produced by the encoder, lowering engine, ABI layer, or JIT
/// loader.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// An operand value does not fit the bit width the instruction form
    /// requires (e.g. a 9-bit signed offset outside -256..255). Always a
    /// lowering bug: lowering is responsible for legalizing operands
    /// before constructing an `Inst`.
    #[error("operand out of range for encoding: {0}")]
    OperandOutOfRange(String),

    /// A load/store register-offset form was asked to use a shift operator
    /// other than `LSL`. The architecture does not support this; it is not
    /// silently rewritten.
    #[error("unsupported shift/extend for this addressing mode: {0}")]
    UnsupportedShiftOrExtend(String),

    /// An addressing mode reached the encoder in a form it cannot emit
    /// directly: an unsupported register-offset shift/extend, or an
    /// `SPOffset`/`FPOffset` that the ABI frame-layout pass was supposed to
    /// resolve to a concrete form before emission.
    #[error("invalid addressing mode: {0}")]
    InvalidAddressingMode(String),

    /// A floating-point immediate could not be represented in the
    /// instruction's encoding.
    #[error("floating-point immediate not encodable: {0}")]
    UnencodableFpImmediate(String),

    /// A vector instruction was asked to operate on an element width or
    /// arrangement the form does not support (e.g. `FADD` on a byte lane).
    #[error("unsupported vector element shape for this op: {0}")]
    UnsupportedVectorShape(String),

    /// `finalize` was called with a label use whose target label was
    /// never bound.
    #[error("unbound label referenced at finalize: {0:?}")]
    UnboundLabel(crate::buffer::MachLabel),

    /// The ABI classifier was asked to place a signature it cannot
    /// represent directly (e.g. more than two non-indirect return values).
    #[error("ABI violation: {0}")]
    AbiViolation(String),

    /// Growing the code buffer, or mapping/protecting JIT memory, failed.
    /// The only variant here that is not a programmer-error bug.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// The lowering engine's pattern table has no entry matching an IR
    /// instruction's opcode and operand shape.
    #[error("no lowering pattern for {0}")]
    LoweringCoverageGap(String),
}

/// The result type used throughout the backend.
pub type CodegenResult<T> = Result<T, CodegenError>;
