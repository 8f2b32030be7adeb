//! AAPCS64 calling convention and frame-layout engine.
//!
//! This is the component both the lowering engine (argument placement at
//! call sites and at function entry) and the final prologue/epilogue
//! synthesis step consult. It is deliberately self-contained: unlike a
//! full multi-target compiler, which shares one generic `ABIMachineSpec`
//! trait across architectures, this crate only ever targets AArch64, so
//! the classifier and frame-layout state machine are written directly in
//! terms of [`super::inst::Inst`] rather than behind that abstraction.
//!
//! The frame this module builds looks like, from low to high address
//! (matching the post-prologue stack pointer upward):
//!
//! ```text
//! SP+0                dynamic-alloca area (if any; not modeled here --
//!                      owned by whatever IR op requests it)
//! locals_offset        local variable / spill slots
//! locals_offset
//!   + locals_size      callee-save register pairs (ints, then FP/vector)
//! frame_size - 16      the reserved FP,LR slot (always reserved, even
//!                      when `uses_frame_pointer` is false -- see
//!                      DESIGN.md for why the offset arithmetic is kept
//!                      flat rather than conditional on that flag)
//! frame_size           caller's SP
//! ```

use crate::buffer::MachLabel;
use crate::error::{CodegenError, CodegenResult};
use crate::isa::aarch64::inst::*;
use crate::ir::{AbiParam, CallConv, Signature, Type};
use crate::reg::{preg, writable, Reg, RegClass, WritableReg};
use alloc::vec::Vec;

/// `X0..X7`: integer/pointer argument and first-two-results registers.
const INT_ARG_REGS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
/// `V0..V7`: floating-point/vector argument registers.
const FLOAT_ARG_REGS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
/// `X8`: the indirect-result-location register, used when a signature
/// returns more values than fit in `X0`/`X1`/`V0`.
const INDIRECT_RESULT_REG: u8 = 8;
/// `X19..X28`: callee-saved general-purpose registers available to the
/// register allocator for spilling across calls.
pub const CALLEE_SAVED_GPRS: [u8; 10] = [19, 20, 21, 22, 23, 24, 25, 26, 27, 28];
/// `V8..V15`: callee-saved FP/vector registers (only the low 64 bits are
/// callee-saved by AAPCS64; this backend never widens a spill beyond
/// that).
pub const CALLEE_SAVED_FPRS: [u8; 8] = [8, 9, 10, 11, 12, 13, 14, 15];

/// Reserved stack bytes for the FP,LR slot, present in the frame layout
/// whether or not a frame pointer is actually pushed (see module docs).
const FP_LR_SLOT_BYTES: u32 = 16;
/// Above this frame size, a `SUB sp,sp,#imm12` can no longer represent the
/// adjustment directly and a frame pointer is forced so callee-save/locals
/// offsets stay reachable from a stable base.
const LARGE_FRAME_THRESHOLD: u32 = 4096;

fn round_up_16(x: u32) -> u32 {
    (x + 15) & !15
}

/// Where one argument or return value lives after classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgLoc {
    Reg(Reg),
    /// Byte offset from the start of the (callee's incoming / caller's
    /// outgoing) stack argument area.
    Stack(u32),
}

/// The result of walking a [`Signature`]'s parameters or returns.
#[derive(Clone, Debug)]
pub struct ArgClassification {
    pub locs: Vec<ArgLoc>,
    /// Total bytes of outgoing/incoming stack argument space, already a
    /// multiple of 8 (callers additionally round the whole frame to 16).
    pub stack_bytes: u32,
    /// Set when a `Signature` has more than two non-float (or more than
    /// one float) return values and needs the indirect-result-register
    /// convention; the classifier exposes this rather than silently
    /// picking a representation, per the ABI-violation contract.
    pub uses_indirect_result: bool,
}

/// Classify a parameter or return-value list per AAPCS64: integer-class
/// values consume the next free integer register, float/vector values the
/// next free float register, and anything that doesn't fit spills to the
/// stack in declaration order.
fn classify(params: &[AbiParam]) -> ArgClassification {
    let mut locs = Vec::with_capacity(params.len());
    let mut int_idx = 0usize;
    let mut float_idx = 0usize;
    let mut stack_bytes = 0u32;

    for p in params {
        let is_float = p.value_type.is_float() || p.value_type.is_vector();
        if is_float {
            if float_idx < FLOAT_ARG_REGS.len() {
                locs.push(ArgLoc::Reg(preg(RegClass::Float, FLOAT_ARG_REGS[float_idx])));
                float_idx += 1;
                continue;
            }
        } else if int_idx < INT_ARG_REGS.len() {
            locs.push(ArgLoc::Reg(preg(RegClass::Int, INT_ARG_REGS[int_idx])));
            int_idx += 1;
            continue;
        }
        // Spill: every slot is a flat 8 bytes regardless of the value's
        // natural width, in declaration order.
        locs.push(ArgLoc::Stack(stack_bytes));
        stack_bytes += 8;
    }

    ArgClassification {
        locs,
        stack_bytes,
        uses_indirect_result: false,
    }
}

/// Classify a signature's return values. More than one float return, or
/// more than two total returns, requires the indirect-result-register
/// (`X8`) convention; this function reports that rather than emitting
/// anything, since synthesizing the out-pointer store is a lowering-time
/// concern.
pub fn classify_returns(returns: &[AbiParam]) -> CodegenResult<ArgClassification> {
    let float_count = returns.iter().filter(|p| p.value_type.is_float()).count();
    let int_count = returns.len() - float_count;

    if float_count > 1 || int_count > 2 || returns.len() > 2 {
        return Ok(ArgClassification {
            locs: Vec::new(),
            stack_bytes: 0,
            uses_indirect_result: true,
        });
    }

    let mut locs = Vec::with_capacity(returns.len());
    let mut int_idx = 0usize;
    let mut float_idx = 0usize;
    for p in returns {
        if p.value_type.is_float() || p.value_type.is_vector() {
            locs.push(ArgLoc::Reg(preg(RegClass::Float, FLOAT_ARG_REGS[float_idx])));
            float_idx += 1;
        } else {
            locs.push(ArgLoc::Reg(preg(RegClass::Int, INT_ARG_REGS[int_idx])));
            int_idx += 1;
        }
    }
    Ok(ArgClassification {
        locs,
        stack_bytes: 0,
        uses_indirect_result: false,
    })
}

pub fn classify_params(params: &[AbiParam]) -> ArgClassification {
    classify(params)
}

pub fn indirect_result_reg() -> Reg {
    preg(RegClass::Int, INDIRECT_RESULT_REG)
}

/// Validate that a [`Signature`] is one this backend can place directly
/// (AAPCS64 only; out-of-scope conventions are an ABI violation).
pub fn check_call_conv(sig: &Signature) -> CodegenResult<()> {
    match sig.call_conv {
        CallConv::AppleAarch64 => Ok(()),
    }
}

/// Per-function frame descriptor: the inputs the ABI layer needs to
/// derive frame size, frame-pointer necessity, callee-save pairing, and
/// the locals offset.
#[derive(Clone, Debug)]
pub struct FrameDescriptor {
    pub locals_size: u32,
    pub clobbered_int: Vec<Reg>,
    pub clobbered_float: Vec<Reg>,
    pub has_dynamic_alloc: bool,
    pub is_leaf: bool,
    /// Debugger/profiling opt-in or an explicit `preserve_frame_pointer`
    /// request on the IR function -- forces a frame pointer regardless of
    /// size or leaf-ness.
    pub force_frame_pointer: bool,
    pub num_int_args: u32,
    pub num_float_args: u32,
    pub num_rets: u32,
}

impl FrameDescriptor {
    pub fn new(locals_size: u32, is_leaf: bool) -> Self {
        FrameDescriptor {
            locals_size,
            clobbered_int: Vec::new(),
            clobbered_float: Vec::new(),
            has_dynamic_alloc: false,
            is_leaf,
            force_frame_pointer: false,
            num_int_args: 0,
            num_float_args: 0,
            num_rets: 0,
        }
    }

    fn callee_save_count(&self) -> usize {
        self.clobbered_int.len() + self.clobbered_float.len()
    }

    fn callee_save_pair_bytes(&self) -> u32 {
        let n = self.callee_save_count() as u32;
        FP_LR_SLOT_BYTES * ((n + 1) / 2)
    }

    /// Offset of the locals/spill area from the post-prologue stack
    /// pointer: the reserved FP,LR slot plus one 16-byte chunk per
    /// callee-save pair. Present unconditionally (see module docs).
    pub fn locals_offset(&self) -> u32 {
        FP_LR_SLOT_BYTES + self.callee_save_pair_bytes()
    }

    /// Total frame size, always rounded to a 16-byte multiple.
    pub fn frame_size(&self) -> u32 {
        round_up_16(self.locals_offset() + self.locals_size)
    }

    /// Is a frame pointer mandatory? Any of: an explicit request, a
    /// dynamic allocation, a non-leaf function (it must preserve its
    /// caller's frame chain across the calls it makes), or a frame large
    /// enough that invariant 3 (`frame_size > 4096 => uses_frame_pointer`)
    /// kicks in.
    pub fn uses_frame_pointer(&self) -> bool {
        self.force_frame_pointer
            || self.has_dynamic_alloc
            || !self.is_leaf
            || self.frame_size() > LARGE_FRAME_THRESHOLD
    }

    /// Pair up the clobbered callee-saves: ints first, then floats, each
    /// list chunked two at a time with an unpaired final register (odd
    /// cardinality) left alone.
    fn save_pairs(&self) -> Vec<(GroupKind, Reg, Option<Reg>)> {
        let mut pairs = Vec::new();
        for chunk in self.clobbered_int.chunks(2) {
            pairs.push((GroupKind::Int, chunk[0], chunk.get(1).copied()));
        }
        for chunk in self.clobbered_float.chunks(2) {
            pairs.push((GroupKind::Float, chunk[0], chunk.get(1).copied()));
        }
        pairs
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GroupKind {
    Int,
    Float,
}

/// The AAPCS64 callee-side ABI object: a frame descriptor plus the
/// prologue/epilogue synthesis that reads it.
pub struct Aarch64ABICallee {
    pub frame: FrameDescriptor,
}

impl Aarch64ABICallee {
    pub fn new(frame: FrameDescriptor) -> Self {
        Aarch64ABICallee { frame }
    }

    /// Materialize an arbitrary signed SP adjustment (`SUB`/`ADD sp,sp,#n`),
    /// synthesizing the immediate into a scratch register first when it
    /// does not fit a 12-bit (optionally `LSL #12`) immediate.
    fn gen_sp_adjust(&self, delta: i64) -> Vec<Inst> {
        let mut insts = Vec::new();
        let (op, magnitude) = if delta < 0 {
            (ALUOp::Sub, (-delta) as u64)
        } else {
            (ALUOp::Add, delta as u64)
        };
        if magnitude == 0 {
            return insts;
        }
        if let Some(imm12) = Imm12::maybe_from_u64(magnitude) {
            insts.push(Inst::AluRRImm12 {
                op,
                size: OperandSize::Size64,
                rd: writable(stack_reg()),
                rn: stack_reg(),
                imm12,
            });
        } else {
            // Large frame: synthesize the magnitude into a scratch
            // register (X16, the architecturally-reserved "IP0" veneer
            // register, never allocated to IR values) and use the
            // register-register form.
            let scratch = preg(RegClass::Int, 16);
            insts.extend(gen_mov_imm(writable(scratch), magnitude));
            insts.push(Inst::AluRRR {
                op,
                size: OperandSize::Size64,
                rd: writable(stack_reg()),
                rn: stack_reg(),
                rm: scratch,
            });
        }
        insts
    }

    /// Emit the function prologue: push FP/LR (if used), establish the
    /// frame pointer, save clobbered callee-saves, and (if the function
    /// has a dynamic allocation) snapshot the post-prologue SP into `X19`.
    pub fn gen_prologue(&self) -> CodegenResult<Vec<Inst>> {
        let mut insts = Vec::new();
        let frame_size = self.frame.frame_size();
        let uses_fp = self.frame.uses_frame_pointer();

        if uses_fp {
            if let Some(simm7) = SImm7Scaled::maybe_from_i64(-i64::from(frame_size), 8) {
                insts.push(Inst::StoreP64 {
                    rt: fp_reg(),
                    rt2: link_reg(),
                    mem: PairAMode::PreIndexed {
                        rn: writable(stack_reg()),
                        simm7,
                    },
                });
            } else {
                insts.extend(self.gen_sp_adjust(-i64::from(frame_size)));
                insts.push(Inst::StoreP64 {
                    rt: fp_reg(),
                    rt2: link_reg(),
                    mem: PairAMode::SignedOffset {
                        rn: stack_reg(),
                        simm7: SImm7Scaled::zero(8),
                    },
                });
            }
            insts.push(Inst::Mov {
                size: OperandSize::Size64,
                rd: writable(fp_reg()),
                rm: stack_reg(),
            });
        } else if frame_size > 0 {
            insts.extend(self.gen_sp_adjust(-i64::from(frame_size)));
        }

        let mut offset = i64::from(FP_LR_SLOT_BYTES);
        for (kind, a, b) in self.frame.save_pairs() {
            insts.push(gen_save_pair(kind, a, b, offset)?);
            offset += 16;
        }

        if self.frame.has_dynamic_alloc {
            insts.push(Inst::Mov {
                size: OperandSize::Size64,
                rd: writable(dyn_stack_reg()),
                rm: stack_reg(),
            });
        }

        Ok(insts)
    }

    /// Emit the function epilogue: restore callee-saves, tear down the
    /// frame pointer, pop FP/LR, and return. The mirror image of
    /// [`Self::gen_prologue`].
    pub fn gen_epilogue(&self) -> CodegenResult<Vec<Inst>> {
        let mut insts = Vec::new();
        let frame_size = self.frame.frame_size();
        let uses_fp = self.frame.uses_frame_pointer();

        let mut offset = i64::from(FP_LR_SLOT_BYTES);
        let mut restores = Vec::new();
        for (kind, a, b) in self.frame.save_pairs() {
            restores.push(gen_restore_pair(kind, a, b, offset)?);
            offset += 16;
        }
        insts.extend(restores);

        if uses_fp {
            if let Some(simm7) = SImm7Scaled::maybe_from_i64(i64::from(frame_size), 8) {
                insts.push(Inst::LoadP64 {
                    rt: writable(fp_reg()),
                    rt2: writable(link_reg()),
                    mem: PairAMode::PostIndexed {
                        rn: writable(stack_reg()),
                        simm7,
                    },
                });
            } else {
                insts.push(Inst::LoadP64 {
                    rt: writable(fp_reg()),
                    rt2: writable(link_reg()),
                    mem: PairAMode::SignedOffset {
                        rn: stack_reg(),
                        simm7: SImm7Scaled::zero(8),
                    },
                });
                insts.extend(self.gen_sp_adjust(i64::from(frame_size)));
            }
        } else if frame_size > 0 {
            insts.extend(self.gen_sp_adjust(i64::from(frame_size)));
        }

        insts.push(Inst::Ret);
        Ok(insts)
    }

    /// Rewrite every `AMode::SPOffset`/`FPOffset` in `inst` to a concrete
    /// addressing mode now that the frame layout (and hence every local's
    /// final offset) is known. Lowering emits the symbolic form because
    /// it runs before the clobber set (and hence `frame_size`) is final.
    pub fn resolve_frame_refs(&self, inst: &mut Inst) -> CodegenResult<()> {
        let frame_size = i64::from(self.frame.frame_size());
        let resolve = |off: i64, base: Reg, is_sp: bool| -> CodegenResult<AMode> {
            let from_sp = if is_sp { off } else { off + frame_size };
            if let Some(simm9) = SImm9::maybe_from_i64(from_sp) {
                Ok(AMode::Unscaled { rn: base, simm9 })
            } else {
                Err(CodegenError::OperandOutOfRange(alloc::format!(
                    "frame offset {} does not fit a 9-bit unscaled immediate",
                    from_sp
                )))
            }
        };
        visit_inst_amode(inst, &mut |mem| {
            let replacement = match *mem {
                AMode::SPOffset { off } => Some(resolve(off, stack_reg(), true)?),
                AMode::FPOffset { off } => Some(resolve(off, fp_reg(), false)?),
                _ => None,
            };
            if let Some(r) = replacement {
                *mem = r;
            }
            Ok(())
        })
    }

    /// Turn a lowered instruction stream into a complete function body:
    /// prepend the prologue, replace each placeholder `Ret` at
    /// `return_points` with the full epilogue, and resolve every
    /// `SPOffset`/`FPOffset` now that `self.frame` reflects the clobber set
    /// the register allocator actually reported. Lowering cannot do this
    /// itself -- the clobbered callee-saves, and hence `frame_size`, are
    /// only known once virtual registers have been assigned to physical
    /// ones (see the data-flow diagram in the module docs).
    ///
    /// `block_starts` are rewritten in lockstep so label offsets recorded
    /// before finalization still point at the right instruction once the
    /// prologue and epilogues have shifted everything after them.
    pub fn finalize(
        &self,
        mut insts: Vec<Inst>,
        return_points: &[usize],
        block_starts: &[(usize, MachLabel)],
    ) -> CodegenResult<(Vec<Inst>, Vec<(usize, MachLabel)>)> {
        let prologue = self.gen_prologue()?;
        let epilogue_len = self.gen_epilogue()?.len();

        let mut sorted_points = return_points.to_vec();
        sorted_points.sort_unstable();
        for &ret_idx in sorted_points.iter().rev() {
            let epilogue = self.gen_epilogue()?;
            insts.splice(ret_idx..=ret_idx, epilogue);
        }
        for inst in insts.iter_mut() {
            self.resolve_frame_refs(inst)?;
        }

        let shift_for = |flat_idx: usize| -> usize {
            let preceding_returns = sorted_points.iter().filter(|&&r| r < flat_idx).count();
            prologue.len() + preceding_returns * (epilogue_len - 1)
        };
        let adjusted_starts = block_starts
            .iter()
            .map(|&(idx, label)| (idx + shift_for(idx), label))
            .collect();

        let mut body = prologue;
        body.extend(insts);
        Ok((body, adjusted_starts))
    }
}

fn gen_mov_imm(rd: WritableReg, value: u64) -> Vec<Inst> {
    let mut insts = Vec::new();
    if let Some(c) = MoveWideConst::maybe_from_u64(value) {
        insts.push(Inst::MovZ {
            size: OperandSize::Size64,
            rd,
            imm: c,
        });
        return insts;
    }
    // `value` is nonzero here (the all-zero case returned above via the
    // single-lane fast path), so at least one iteration below fires.
    let mut first = true;
    for shift in 0..4u8 {
        let lane = ((value >> (shift * 16)) & 0xffff) as u16;
        if lane == 0 {
            continue;
        }
        let imm = MoveWideConst::maybe_with_shift(lane, shift).unwrap();
        if first {
            insts.push(Inst::MovZ {
                size: OperandSize::Size64,
                rd,
                imm,
            });
            first = false;
        } else {
            insts.push(Inst::MovK {
                size: OperandSize::Size64,
                rd,
                imm,
            });
        }
    }
    insts
}

fn gen_save_pair(kind: GroupKind, a: Reg, b: Option<Reg>, offset: i64) -> CodegenResult<Inst> {
    let simm7 = SImm7Scaled::maybe_from_i64(offset, 8).ok_or_else(|| {
        CodegenError::OperandOutOfRange(alloc::format!("callee-save offset {} out of STP range", offset))
    })?;
    let mem = PairAMode::SignedOffset { rn: stack_reg(), simm7 };
    let second = b.unwrap_or(xzr());
    Ok(match kind {
        GroupKind::Int => Inst::StoreP64 { rt: a, rt2: second, mem },
        GroupKind::Float => Inst::FpuStoreP64 { rt: a, rt2: second, mem },
    })
}

fn gen_restore_pair(kind: GroupKind, a: Reg, b: Option<Reg>, offset: i64) -> CodegenResult<Inst> {
    let simm7 = SImm7Scaled::maybe_from_i64(offset, 8).ok_or_else(|| {
        CodegenError::OperandOutOfRange(alloc::format!("callee-save offset {} out of LDP range", offset))
    })?;
    let mem = PairAMode::SignedOffset { rn: stack_reg(), simm7 };
    // A saved odd register's partner slot held XZR; we still need a
    // destination for the paired LDP, so reload into itself (dead write).
    let second = b.unwrap_or(a);
    Ok(match kind {
        GroupKind::Int => Inst::LoadP64 {
            rt: writable(a),
            rt2: writable(second),
            mem,
        },
        GroupKind::Float => Inst::FpuLoadP64 {
            rt: writable(a),
            rt2: writable(second),
            mem,
        },
    })
}

/// Visit the single [`AMode`] embedded in a load/store `Inst` variant, if
/// any, letting the callback replace it in place.
fn visit_inst_amode(
    inst: &mut Inst,
    f: &mut dyn FnMut(&mut AMode) -> CodegenResult<()>,
) -> CodegenResult<()> {
    match inst {
        Inst::ULoad8 { mem, .. }
        | Inst::ULoad16 { mem, .. }
        | Inst::ULoad32 { mem, .. }
        | Inst::ULoad64 { mem, .. }
        | Inst::SLoad8 { mem, .. }
        | Inst::SLoad16 { mem, .. }
        | Inst::SLoad32 { mem, .. }
        | Inst::Store8 { mem, .. }
        | Inst::Store16 { mem, .. }
        | Inst::Store32 { mem, .. }
        | Inst::Store64 { mem, .. }
        | Inst::FpuLoad32 { mem, .. }
        | Inst::FpuLoad64 { mem, .. }
        | Inst::FpuStore32 { mem, .. }
        | Inst::FpuStore64 { mem, .. }
        | Inst::VecLoad1 { mem, .. }
        | Inst::VecStore1 { mem, .. } => f(mem),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::AbiParam;
    use proptest::prelude::*;

    #[test]
    fn leaf_function_small_locals_frame_size() {
        let frame = FrameDescriptor::new(10, true);
        assert_eq!(frame.frame_size(), 32);
        assert_eq!(frame.locals_offset(), 16);
        assert!(!frame.uses_frame_pointer());
    }

    #[test]
    fn frame_size_always_multiple_of_16() {
        for locals in [0u32, 1, 7, 16, 17, 10240] {
            for saves in 0u32..=10 {
                let mut frame = FrameDescriptor::new(locals, true);
                for i in 0..saves {
                    frame.clobbered_int.push(preg(RegClass::Int, 19 + i as u8));
                }
                assert_eq!(frame.frame_size() % 16, 0);
            }
        }
    }

    #[test]
    fn large_frame_forces_frame_pointer() {
        let frame = FrameDescriptor::new(8192, true);
        assert!(frame.frame_size() > 4096);
        assert!(frame.uses_frame_pointer());
    }

    #[test]
    fn dynamic_alloc_forces_frame_pointer_and_x19() {
        let mut frame = FrameDescriptor::new(0, true);
        frame.has_dynamic_alloc = true;
        assert!(frame.uses_frame_pointer());
    }

    #[test]
    fn non_leaf_forces_frame_pointer() {
        let frame = FrameDescriptor::new(0, false);
        assert!(frame.uses_frame_pointer());
    }

    #[test]
    fn classify_params_spills_after_eight_registers() {
        let params: Vec<AbiParam> = (0..10).map(|_| AbiParam::new(Type::I64)).collect();
        let c = classify_params(&params);
        assert_eq!(c.locs[7], ArgLoc::Reg(preg(RegClass::Int, 7)));
        assert_eq!(c.locs[8], ArgLoc::Stack(0));
        assert_eq!(c.locs[9], ArgLoc::Stack(8));
        assert_eq!(c.stack_bytes, 16);
    }

    #[test]
    fn classify_returns_over_two_is_indirect() {
        let returns = vec![AbiParam::new(Type::I64); 3];
        let c = classify_returns(&returns).unwrap();
        assert!(c.uses_indirect_result);
    }

    #[test]
    fn odd_callee_save_count_pairs_with_xzr() {
        let mut frame = FrameDescriptor::new(0, true);
        frame.clobbered_int.push(preg(RegClass::Int, 19));
        let abi = Aarch64ABICallee::new(frame);
        let prologue = abi.gen_prologue().unwrap();
        assert!(prologue.iter().any(|i| matches!(i, Inst::StoreP64 { rt2, .. } if *rt2 == xzr())));
    }

    proptest! {
        #[test]
        fn prop_frame_size_is_always_16_byte_aligned(
            locals in 0u32..10240,
            callee_saves in 0u32..10,
        ) {
            let mut frame = FrameDescriptor::new(locals, true);
            for i in 0..callee_saves {
                frame.clobbered_int.push(preg(RegClass::Int, 19 + i as u8));
            }
            prop_assert_eq!(frame.frame_size() % 16, 0);
        }

        #[test]
        fn prop_large_frame_always_forces_a_frame_pointer(locals in 0u32..8192) {
            let frame = FrameDescriptor::new(locals, true);
            if frame.frame_size() > 4096 {
                prop_assert!(frame.uses_frame_pointer());
            }
        }
    }
}
