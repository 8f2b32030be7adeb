//! Pattern-directed lowering: walks a [`Function`]'s blocks in layout
//! order and, for each instruction, matches its opcode and operand shape
//! against a small table of emission rules, first match wins. Unlike a
//! full ISLE-driven lowering pass, the table here is just a Rust `match`:
//! the opcode set this crate's [`crate::ir`] exposes is closed and small
//! enough that a generated DSL would add indirection without buying
//! anything.
//!
//! Lowering owns a [`VRegAllocator`] and a per-function `Value -> Reg`
//! map. Physical argument/return registers are threaded in directly
//! (no "mov out of the ABI register into a fresh vreg" unless the value
//! survives a call, where it would otherwise be clobbered) -- see
//! [`Lowering::call`].

use crate::buffer::{LabelUseKind, MachBuffer, MachLabel};
use crate::error::{CodegenError, CodegenResult};
use crate::ir::{
    AbiParam, CallTarget as IrCallTarget, FloatCC, Function, InstructionData, IntCC, Opcode, Type,
    Value,
};
use crate::isa::aarch64::abi::{self, ArgLoc, FrameDescriptor};
use crate::isa::aarch64::inst::*;
use crate::reg::{preg, writable, Reg, RegClass, VRegAllocator, WritableReg};
use alloc::format;
use alloc::vec;
use alloc::vec::Vec;
use cranelift_entity::SecondaryMap;

/// The output of lowering one function: a flat instruction stream over
/// (mostly virtual) registers, plus where each IR block's instructions
/// begin so the caller can bind that block's label before emitting.
pub struct LoweredFunction {
    pub insts: Vec<Inst>,
    pub block_starts: Vec<(usize, MachLabel)>,
    /// Index into `insts` of every `Inst::Ret` lowering emitted. The frame
    /// isn't known until the external register allocator has reported
    /// which callee-saves this function actually clobbers, so lowering
    /// leaves a bare `Ret` at each return site rather than the full
    /// epilogue; the finalize step (see [`crate::isa::aarch64::abi`])
    /// splices the real epilogue in just before each of these.
    pub return_points: Vec<usize>,
    pub frame: FrameDescriptor,
    /// Total virtual registers minted during lowering, across both
    /// classes -- what `regalloc2::Function::num_vregs` reports.
    pub num_vregs: usize,
}

struct Lowering<'a> {
    func: &'a Function,
    vregs: VRegAllocator,
    value_regs: SecondaryMap<Value, Option<Reg>>,
    block_labels: SecondaryMap<crate::ir::Block, Option<MachLabel>>,
    insts: Vec<Inst>,
    return_points: Vec<usize>,
    frame: FrameDescriptor,
}

fn reg_class_for(ty: Type) -> RegClass {
    // NEON vectors live in the same `V` register file as scalar FP, so
    // they share `RegClass::Float`; the element shape that distinguishes
    // them is carried on the `Inst` operand, not the register class.
    if ty.is_float() || ty.is_vector() {
        RegClass::Float
    } else {
        RegClass::Int
    }
}

fn scalar_size_for(ty: Type) -> ScalarSize {
    if ty.bits() > 32 {
        ScalarSize::Size64
    } else {
        ScalarSize::Size32
    }
}

fn operand_size_for(ty: Type) -> OperandSize {
    OperandSize::from_bits(ty.bits())
}

/// Lower `func` into a flat, not-yet-register-allocated instruction
/// stream. `buffer` is only used to mint [`MachLabel`]s for each block
/// (and, implicitly, to share their numbering with whatever buffer later
/// emits this function) -- no bytes are written to it here.
pub fn lower_function(func: &Function, buffer: &mut MachBuffer) -> CodegenResult<LoweredFunction> {
    abi::check_call_conv(&func.signature)?;

    let mut block_labels = SecondaryMap::new();
    for block in func.layout.blocks() {
        block_labels[block] = Some(buffer.get_label());
    }

    let frame = FrameDescriptor::new(0, is_leaf(func));

    let mut lowering = Lowering {
        func,
        vregs: VRegAllocator::new(),
        value_regs: SecondaryMap::new(),
        block_labels,
        insts: Vec::new(),
        return_points: Vec::new(),
        frame,
    };
    lowering.run()
}

/// A function is a leaf (makes no calls) iff no instruction in its
/// dataflow graph is a `Call`/`CallIndirect`. Used to decide whether the
/// frame must preserve a frame pointer across calls this function makes.
fn is_leaf(func: &Function) -> bool {
    for block in func.layout.blocks() {
        for inst in func.layout.block_insts(block) {
            if matches!(func.dfg.inst_data(inst), InstructionData::Call { .. }) {
                return false;
            }
        }
    }
    true
}

impl<'a> Lowering<'a> {
    fn run(mut self) -> CodegenResult<LoweredFunction> {
        self.lower_entry_args()?;

        let mut block_starts = Vec::new();
        for block in self.func.layout.blocks() {
            block_starts.push((self.insts.len(), self.block_labels[block].unwrap()));
            let insts: Vec<_> = self.func.layout.block_insts(block).collect();
            for (idx, inst) in insts.iter().copied().enumerate() {
                let next_block_hint = self.func.layout.blocks().skip_while(|b| *b != block).nth(1);
                self.lower_inst(inst, next_block_hint)?;
                let _ = idx;
            }
        }

        Ok(LoweredFunction {
            insts: self.insts,
            block_starts,
            return_points: self.return_points,
            num_vregs: self.vregs.num_vregs(),
            frame: self.frame,
        })
    }

    fn alloc_vreg(&mut self, ty: Type) -> Reg {
        self.vregs.alloc(reg_class_for(ty))
    }

    fn reg_of(&self, value: Value) -> Reg {
        self.value_regs[value].expect("value used before its defining instruction was lowered")
    }

    fn set_reg(&mut self, value: Value, reg: Reg) {
        self.value_regs[value] = Some(reg);
    }

    /// Bind each incoming parameter value directly to its AAPCS64
    /// argument location; register-class-compatible moves happen lazily
    /// wherever the value is consumed, not here.
    fn lower_entry_args(&mut self) -> CodegenResult<()> {
        let entry = match self.func.layout.blocks().next() {
            Some(b) => b,
            None => return Ok(()),
        };
        let params = self.func.layout.block_params(entry).to_vec();
        let classified = abi::classify_params(&self.func.signature.params);
        self.frame.num_int_args = classified
            .locs
            .iter()
            .filter(|l| matches!(l, ArgLoc::Reg(r) if r.class() == RegClass::Int))
            .count() as u32;
        self.frame.num_float_args = classified.locs.len() as u32 - self.frame.num_int_args;

        for (value, loc) in params.iter().copied().zip(classified.locs.iter().copied()) {
            let reg = match loc {
                ArgLoc::Reg(r) => r,
                ArgLoc::Stack(off) => {
                    let ty = self.func.dfg.value_type(value);
                    let dst = self.alloc_vreg(ty);
                    self.emit_load(writable(dst), AMode::FPOffset { off: i64::from(off) }, ty, false)?;
                    dst
                }
            };
            self.set_reg(value, reg);
        }
        Ok(())
    }

    fn lower_inst(&mut self, inst: crate::ir::Inst, next_block: Option<crate::ir::Block>) -> CodegenResult<()> {
        let data = self.func.dfg.inst_data(inst).clone();
        let opcode = data.opcode();
        let result_ty = self.func.dfg.first_result(inst).map(|v| self.func.dfg.value_type(v));

        match (opcode, &data) {
            (Opcode::Iconst, InstructionData::UnaryImm { imm, .. }) => {
                let ty = result_ty.unwrap_or(Type::I64);
                let rd = self.alloc_vreg(ty);
                self.emit_mov_imm(writable(rd), *imm as u64, operand_size_for(ty));
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }

            (Opcode::Iadd, InstructionData::Binary { args, .. }) => self.lower_int_binary(inst, ALUOp::Add, args)?,
            (Opcode::Isub, InstructionData::Binary { args, .. }) => self.lower_int_binary(inst, ALUOp::Sub, args)?,
            (Opcode::Band, InstructionData::Binary { args, .. }) => self.lower_int_binary(inst, ALUOp::And, args)?,
            (Opcode::Bor, InstructionData::Binary { args, .. }) => self.lower_int_binary(inst, ALUOp::Orr, args)?,
            (Opcode::Bxor, InstructionData::Binary { args, .. }) => self.lower_int_binary(inst, ALUOp::Eor, args)?,

            (Opcode::Imul, InstructionData::Binary { args, .. }) => {
                let ty = result_ty.unwrap();
                let size = operand_size_for(ty);
                let rd = self.alloc_vreg(ty);
                self.insts.push(Inst::Mul {
                    size,
                    rd: writable(rd),
                    rn: self.reg_of(args[0]),
                    rm: self.reg_of(args[1]),
                });
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }
            (Opcode::Sdiv, InstructionData::Binary { args, .. }) => self.lower_div(inst, true, args)?,
            (Opcode::Udiv, InstructionData::Binary { args, .. }) => self.lower_div(inst, false, args)?,

            (Opcode::Ishl, InstructionData::Binary { args, .. }) => self.lower_shift_family(inst, ShiftKind::Lsl, args)?,
            (Opcode::Ushr, InstructionData::Binary { args, .. }) => self.lower_shift_family(inst, ShiftKind::Lsr, args)?,
            (Opcode::Sshr, InstructionData::Binary { args, .. }) => self.lower_shift_family(inst, ShiftKind::Asr, args)?,
            (Opcode::Rotr, InstructionData::Binary { args, .. }) => self.lower_shift_family(inst, ShiftKind::Ror, args)?,

            (Opcode::Uextend, InstructionData::Unary { arg, .. }) => self.lower_extend(inst, *arg, false)?,
            (Opcode::Sextend, InstructionData::Unary { arg, .. }) => self.lower_extend(inst, *arg, true)?,
            (Opcode::Ireduce, InstructionData::Unary { arg, .. }) | (Opcode::Bitcast, InstructionData::Unary { arg, .. }) => {
                // Narrowing/same-class reinterpretation: no bits move, the
                // W-register view of the source already reads the low
                // bits. A cross-register-class bitcast is not
                // representable with the instructions this backend models
                // (no scalar FMOV-to/from-GPR form) and is a coverage gap.
                let result = self.func.dfg.first_result(inst).unwrap();
                let src_ty = self.func.dfg.value_type(*arg);
                let dst_ty = self.func.dfg.value_type(result);
                if reg_class_for(src_ty) != reg_class_for(dst_ty) {
                    return Err(CodegenError::LoweringCoverageGap(format!(
                        "bitcast across register classes ({:?} -> {:?}) has no representable form",
                        src_ty, dst_ty
                    )));
                }
                self.set_reg(result, self.reg_of(*arg));
            }

            (Opcode::Load, InstructionData::Load { arg, offset, .. }) => {
                let ty = result_ty.unwrap();
                let mem = self.amode_for(*arg, *offset, ty.bytes());
                let rd = self.alloc_vreg(ty);
                self.emit_load(writable(rd), mem, ty, ty.is_float())?;
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }
            (Opcode::Store, InstructionData::Store { args, offset, .. }) => {
                // `args[0]` is the value being stored, `args[1]` the base
                // address, symmetric to `load`'s addressing-mode choice
                // (unsigned-offset scaled by the value's size, falling
                // back to unscaled or register-offset).
                let ty = self.func.dfg.value_type(args[0]);
                let mem = self.amode_for(args[1], *offset, ty.bytes());
                let value = self.reg_of(args[0]);
                self.emit_store(value, mem, ty)?;
            }

            (Opcode::Icmp, InstructionData::IntCompare { cc, args, .. }) => {
                let size = operand_size_for(self.func.dfg.value_type(args[0]));
                self.insts.push(Inst::CmpRR {
                    size,
                    rn: self.reg_of(args[0]),
                    rm: self.reg_of(args[1]),
                });
                let rd = self.alloc_vreg(Type::I32);
                let cond = cc_for_intcc(*cc);
                self.insts.push(Inst::CSinc {
                    size: OperandSize::Size32,
                    rd: writable(rd),
                    rn: preg(RegClass::Int, 31),
                    rm: preg(RegClass::Int, 31),
                    cond: cond.invert(),
                });
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }

            (Opcode::Select, InstructionData::Select { cc, args, .. }) => {
                let ty = result_ty.unwrap();
                let size = operand_size_for(ty);
                let cond = self.materialize_bool_cond(*cc);
                let rd = self.alloc_vreg(ty);
                self.insts.push(Inst::CSel {
                    size,
                    rd: writable(rd),
                    rn: self.reg_of(args[0]),
                    rm: self.reg_of(args[1]),
                    cond,
                });
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }

            (Opcode::Brif, InstructionData::Branch { cond, then, else_, .. }) => {
                let then_label = self.block_labels[*then].unwrap();
                let else_label = self.block_labels[*else_].unwrap();
                let kind = if let Some((cc, l, r)) = self.try_fuse_icmp(*cond) {
                    self.insts.push(Inst::CmpRR {
                        size: operand_size_for(self.func.dfg.value_type(l)),
                        rn: self.reg_of(l),
                        rm: self.reg_of(r),
                    });
                    CondBrKind::Cond(cc_for_intcc(cc))
                } else {
                    CondBrKind::NotZero(self.reg_of(*cond))
                };
                self.insts.push(Inst::CondBr {
                    kind,
                    taken: BranchTarget::Label(then_label),
                    not_taken: BranchTarget::Label(else_label),
                });
                if next_block != Some(*else_) {
                    self.insts.push(Inst::Jump {
                        target: BranchTarget::Label(else_label),
                    });
                }
            }

            (Opcode::Jump, InstructionData::Jump { dest, .. }) => {
                if next_block != Some(*dest) {
                    let label = self.block_labels[*dest].unwrap();
                    self.insts.push(Inst::Jump {
                        target: BranchTarget::Label(label),
                    });
                }
            }

            (Opcode::Return, InstructionData::Return { args, .. }) => self.lower_return(args)?,

            (Opcode::Call, InstructionData::Call { target, args, .. }) => self.lower_call(inst, target, args)?,
            (Opcode::CallIndirect, InstructionData::Call { target, args, .. }) => self.lower_call(inst, target, args)?,

            (Opcode::FuncAddr, InstructionData::Nullary { .. }) => {
                // No relocation mechanism exists in this crate (left to
                // the linking layer); materialize a zero placeholder the
                // same way a direct `call`'s symbol is a placeholder word
                // today.
                let rd = self.alloc_vreg(Type::Ptr);
                self.emit_mov_imm(writable(rd), 0, OperandSize::Size64);
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }

            (Opcode::Fadd, InstructionData::Binary { args, .. }) => self.lower_fpu_binary(inst, FpuOp2::Add, args)?,
            (Opcode::Fsub, InstructionData::Binary { args, .. }) => self.lower_fpu_binary(inst, FpuOp2::Sub, args)?,
            (Opcode::Fmul, InstructionData::Binary { args, .. }) => self.lower_fpu_binary(inst, FpuOp2::Mul, args)?,
            (Opcode::Fdiv, InstructionData::Binary { args, .. }) => self.lower_fpu_binary(inst, FpuOp2::Div, args)?,
            (Opcode::Fmin, InstructionData::Binary { args, .. }) => self.lower_fpu_binary(inst, FpuOp2::Min, args)?,
            (Opcode::Fmax, InstructionData::Binary { args, .. }) => self.lower_fpu_binary(inst, FpuOp2::Max, args)?,

            (Opcode::Fneg, InstructionData::Unary { arg, .. }) => {
                let ty = result_ty.unwrap();
                let rd = self.alloc_vreg(ty);
                self.insts.push(Inst::FpuNeg {
                    size: scalar_size_for(ty),
                    rd: writable(rd),
                    rn: self.reg_of(*arg),
                });
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }
            (Opcode::Fabs, InstructionData::Unary { arg, .. }) => {
                let ty = result_ty.unwrap();
                let rd = self.alloc_vreg(ty);
                self.insts.push(Inst::FpuAbs {
                    size: scalar_size_for(ty),
                    rd: writable(rd),
                    rn: self.reg_of(*arg),
                });
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }

            (Opcode::Fcmp, InstructionData::FloatCompare { cc, args, .. }) => {
                self.insts.push(Inst::FpuCmp {
                    size: scalar_size_for(self.func.dfg.value_type(args[0])),
                    rn: self.reg_of(args[0]),
                    rm: self.reg_of(args[1]),
                });
                let rd = self.alloc_vreg(Type::I32);
                let cond = cc_for_floatcc(*cc);
                self.insts.push(Inst::CSinc {
                    size: OperandSize::Size32,
                    rd: writable(rd),
                    rn: preg(RegClass::Int, 31),
                    rm: preg(RegClass::Int, 31),
                    cond: cond.invert(),
                });
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }

            (Opcode::Fcvt, InstructionData::Unary { arg, .. }) => {
                let ty = result_ty.unwrap();
                let rd = self.alloc_vreg(ty);
                self.insts.push(Inst::FpuCvt {
                    from: scalar_size_for(self.func.dfg.value_type(*arg)),
                    to: scalar_size_for(ty),
                    rd: writable(rd),
                    rn: self.reg_of(*arg),
                });
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }
            (Opcode::FcvtToSint, InstructionData::Unary { arg, .. }) => {
                let ty = result_ty.unwrap();
                let rd = self.alloc_vreg(ty);
                self.insts.push(Inst::FpuToInt {
                    signed: true,
                    int_size: operand_size_for(ty),
                    float_size: scalar_size_for(self.func.dfg.value_type(*arg)),
                    rd: writable(rd),
                    rn: self.reg_of(*arg),
                });
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }
            (Opcode::FcvtFromSint, InstructionData::Unary { arg, .. }) => {
                let ty = result_ty.unwrap();
                let rd = self.alloc_vreg(ty);
                self.insts.push(Inst::IntToFpu {
                    signed: true,
                    int_size: operand_size_for(self.func.dfg.value_type(*arg)),
                    float_size: scalar_size_for(ty),
                    rd: writable(rd),
                    rn: self.reg_of(*arg),
                });
                self.set_reg(self.func.dfg.first_result(inst).unwrap(), rd);
            }

            (op, _) => {
                return Err(CodegenError::LoweringCoverageGap(format!(
                    "no lowering pattern for {:?} with this operand shape",
                    op
                )))
            }
        }
        Ok(())
    }

    fn lower_int_binary(&mut self, inst: crate::ir::Inst, op: ALUOp, args: &[Value; 2]) -> CodegenResult<()> {
        let result = self.func.dfg.first_result(inst).unwrap();
        let ty = self.func.dfg.value_type(result);
        let size = operand_size_for(ty);
        let rd = self.alloc_vreg(ty);

        if matches!(op, ALUOp::Add | ALUOp::Sub) {
            if let Some(imm_val) = self.const_operand(args[1]) {
                if let Some(imm12) = Imm12::maybe_from_u64(imm_val) {
                    self.insts.push(Inst::AluRRImm12 {
                        op,
                        size,
                        rd: writable(rd),
                        rn: self.reg_of(args[0]),
                        imm12,
                    });
                    self.set_reg(result, rd);
                    return Ok(());
                }
            }
        } else if let Some(imm_val) = self.const_operand(args[1]) {
            if let Some(imm) = ImmLogic::maybe_from_u64(imm_val, size) {
                self.insts.push(Inst::AluRRImmLogic {
                    op,
                    size,
                    rd: writable(rd),
                    rn: self.reg_of(args[0]),
                    imm,
                });
                self.set_reg(result, rd);
                return Ok(());
            }
        }

        self.insts.push(Inst::AluRRR {
            op,
            size,
            rd: writable(rd),
            rn: self.reg_of(args[0]),
            rm: self.reg_of(args[1]),
        });
        self.set_reg(result, rd);
        Ok(())
    }

    fn lower_div(&mut self, inst: crate::ir::Inst, signed: bool, args: &[Value; 2]) -> CodegenResult<()> {
        let result = self.func.dfg.first_result(inst).unwrap();
        let ty = self.func.dfg.value_type(result);
        let size = operand_size_for(ty);
        let rd = self.alloc_vreg(ty);
        let op = if signed { ALUOp::SDiv } else { ALUOp::UDiv };
        self.insts.push(Inst::AluRRR {
            op,
            size,
            rd: writable(rd),
            rn: self.reg_of(args[0]),
            rm: self.reg_of(args[1]),
        });
        self.set_reg(result, rd);
        Ok(())
    }

    fn lower_shift_family(&mut self, inst: crate::ir::Inst, kind: ShiftKind, args: &[Value; 2]) -> CodegenResult<()> {
        let result = self.func.dfg.first_result(inst).unwrap();
        let ty = self.func.dfg.value_type(result);
        let size = operand_size_for(ty);
        let rd = self.alloc_vreg(ty);

        if let Some(amount) = self.const_operand(args[1]) {
            let amount = (amount as u32 % ty.bits()) as u8;
            let built = match kind {
                ShiftKind::Lsl => Inst::lsl_imm(size, writable(rd), self.reg_of(args[0]), amount),
                ShiftKind::Lsr => Inst::lsr_imm(size, writable(rd), self.reg_of(args[0]), amount),
                ShiftKind::Asr => Inst::asr_imm(size, writable(rd), self.reg_of(args[0]), amount),
                ShiftKind::Ror => Inst::ror_imm(size, writable(rd), self.reg_of(args[0]), amount),
            };
            self.insts.push(built);
        } else {
            let op = match kind {
                ShiftKind::Lsl => ALUOp::Lsl,
                ShiftKind::Lsr => ALUOp::Lsr,
                ShiftKind::Asr => ALUOp::Asr,
                ShiftKind::Ror => ALUOp::Ror,
            };
            self.insts.push(Inst::AluRRR {
                op,
                size,
                rd: writable(rd),
                rn: self.reg_of(args[0]),
                rm: self.reg_of(args[1]),
            });
        }
        self.set_reg(result, rd);
        Ok(())
    }

    fn lower_extend(&mut self, inst: crate::ir::Inst, arg: Value, signed: bool) -> CodegenResult<()> {
        let result = self.func.dfg.first_result(inst).unwrap();
        let ty = self.func.dfg.value_type(result);
        let from_ty = self.func.dfg.value_type(arg);
        let rd = self.alloc_vreg(ty);
        self.insts.push(Inst::Extend {
            rd: writable(rd),
            rn: self.reg_of(arg),
            signed,
            from_bits: from_ty.bits() as u8,
            to_bits: ty.bits() as u8,
        });
        self.set_reg(result, rd);
        Ok(())
    }

    fn lower_fpu_binary(&mut self, inst: crate::ir::Inst, op: FpuOp2, args: &[Value; 2]) -> CodegenResult<()> {
        let result = self.func.dfg.first_result(inst).unwrap();
        let ty = self.func.dfg.value_type(result);
        let rd = self.alloc_vreg(ty);
        self.insts.push(Inst::FpuRRR {
            op,
            size: scalar_size_for(ty),
            rd: writable(rd),
            rn: self.reg_of(args[0]),
            rm: self.reg_of(args[1]),
        });
        self.set_reg(result, rd);
        Ok(())
    }

    /// If `cond` is the direct result of an `icmp`, return its comparison
    /// rather than the materialized boolean -- lets `brif`/`select` skip
    /// the intermediate `CSET` and branch/select straight off the flags.
    fn try_fuse_icmp(&self, cond: Value) -> Option<(IntCC, Value, Value)> {
        for block in self.func.layout.blocks() {
            for inst in self.func.layout.block_insts(block) {
                if self.func.dfg.first_result(inst) == Some(cond) {
                    if let InstructionData::IntCompare { cc, args, .. } = self.func.dfg.inst_data(inst) {
                        return Some((*cc, args[0], args[1]));
                    }
                    return None;
                }
            }
        }
        None
    }

    fn materialize_bool_cond(&mut self, cond: Value) -> CondCode {
        if let Some((cc, l, r)) = self.try_fuse_icmp(cond) {
            self.insts.push(Inst::CmpRR {
                size: operand_size_for(self.func.dfg.value_type(l)),
                rn: self.reg_of(l),
                rm: self.reg_of(r),
            });
            return cc_for_intcc(cc);
        }
        let reg = self.reg_of(cond);
        self.insts.push(Inst::TstRR {
            size: operand_size_for(self.func.dfg.value_type(cond)),
            rn: reg,
            rm: reg,
        });
        CondCode::Ne
    }

    /// If `value` is defined by a nearby `iconst`, return its literal so
    /// callers can try an immediate instruction form first.
    fn const_operand(&self, value: Value) -> Option<u64> {
        for block in self.func.layout.blocks() {
            for inst in self.func.layout.block_insts(block) {
                if self.func.dfg.first_result(inst) == Some(value) {
                    if let InstructionData::UnaryImm { imm, .. } = self.func.dfg.inst_data(inst) {
                        return Some(*imm as u64);
                    }
                    return None;
                }
            }
        }
        None
    }

    fn emit_mov_imm(&mut self, rd: WritableReg, value: u64, size: OperandSize) {
        if let Some(imm) = MoveWideConst::maybe_from_u64(value) {
            self.insts.push(Inst::MovZ { size, rd, imm });
            return;
        }
        if let Some(imm) = MoveWideConst::maybe_from_u64(!value) {
            self.insts.push(Inst::MovN { size, rd, imm });
            return;
        }
        let bits = if size.is64() { 4 } else { 2 };
        let mut first = true;
        for shift in 0..bits {
            let lane = ((value >> (shift * 16)) & 0xffff) as u16;
            if lane == 0 && !first {
                continue;
            }
            let imm = MoveWideConst::maybe_with_shift(lane, shift as u8).unwrap();
            if first {
                self.insts.push(Inst::MovZ { size, rd, imm });
                first = false;
            } else {
                self.insts.push(Inst::MovK { size, rd, imm });
            }
        }
    }

    /// Picks the best addressing mode for `[base + offset]` with a
    /// `size_bytes`-wide access, per §4.5's preference order: scaled
    /// unsigned-offset first (widest range for an aligned, in-range
    /// offset), then unscaled 9-bit signed, then a materialized register
    /// offset for anything larger. The register-offset fallback always
    /// materializes the offset into a fresh scratch register -- it never
    /// reuses `base` as the offset register, which would silently
    /// compute `base + base` instead of `base + offset`.
    fn amode_for(&mut self, base: Value, offset: i32, size_bytes: u32) -> AMode {
        let rn = self.reg_of(base);
        if let Some(uimm12) = UImm12Scaled::maybe_from_i64(i64::from(offset), size_bytes) {
            return AMode::UnsignedOffset { rn, uimm12 };
        }
        if let Some(simm9) = SImm9::maybe_from_i64(i64::from(offset)) {
            return AMode::Unscaled { rn, simm9 };
        }
        let scratch = self.alloc_vreg(Type::I64);
        self.emit_mov_imm(writable(scratch), i64::from(offset) as u64, OperandSize::Size64);
        AMode::RegOffset {
            rn,
            rm: scratch,
            extend: None,
            shift: None,
            scaled: false,
        }
    }

    fn emit_load(&mut self, rd: WritableReg, mem: AMode, ty: Type, is_float: bool) -> CodegenResult<()> {
        let inst = if is_float {
            match ty.bits() {
                32 => Inst::FpuLoad32 { rd, mem },
                64 => Inst::FpuLoad64 { rd, mem },
                other => {
                    return Err(CodegenError::UnsupportedVectorShape(format!(
                        "no scalar FP load for {}-bit type",
                        other
                    )))
                }
            }
        } else {
            match ty.bits() {
                8 => Inst::ULoad8 { rd, mem },
                16 => Inst::ULoad16 { rd, mem },
                32 => Inst::ULoad32 { rd, mem },
                64 => Inst::ULoad64 { rd, mem },
                other => {
                    return Err(CodegenError::OperandOutOfRange(format!(
                        "no integer load for {}-bit type",
                        other
                    )))
                }
            }
        };
        self.insts.push(inst);
        Ok(())
    }

    fn emit_store(&mut self, rt: Reg, mem: AMode, ty: Type) -> CodegenResult<()> {
        let inst = if ty.is_float() {
            match ty.bits() {
                32 => Inst::FpuStore32 { rt, mem },
                64 => Inst::FpuStore64 { rt, mem },
                other => {
                    return Err(CodegenError::UnsupportedVectorShape(format!(
                        "no scalar FP store for {}-bit type",
                        other
                    )))
                }
            }
        } else {
            match ty.bits() {
                8 => Inst::Store8 { rt, mem },
                16 => Inst::Store16 { rt, mem },
                32 => Inst::Store32 { rt, mem },
                64 => Inst::Store64 { rt, mem },
                other => {
                    return Err(CodegenError::OperandOutOfRange(format!(
                        "no integer store for {}-bit type",
                        other
                    )))
                }
            }
        };
        self.insts.push(inst);
        Ok(())
    }

    fn lower_return(&mut self, args: &[Value]) -> CodegenResult<()> {
        let returns: Vec<AbiParam> = args
            .iter()
            .map(|v| AbiParam::new(self.func.dfg.value_type(*v)))
            .collect();
        let classified = abi::classify_returns(&returns)?;
        if classified.uses_indirect_result {
            return Err(CodegenError::AbiViolation(
                "indirect-result return convention is not implemented by this lowering engine".into(),
            ));
        }
        for (value, loc) in args.iter().copied().zip(classified.locs.iter().copied()) {
            if let ArgLoc::Reg(dst) = loc {
                let src = self.reg_of(value);
                if src != dst {
                    self.emit_reg_move(dst, src);
                }
            }
        }
        self.frame.num_rets = args.len() as u32;
        self.insts.push(Inst::Ret);
        self.return_points.push(self.insts.len() - 1);
        Ok(())
    }

    fn emit_reg_move(&mut self, dst: Reg, src: Reg) {
        if dst.class() == RegClass::Int {
            self.insts.push(Inst::Mov {
                size: OperandSize::Size64,
                rd: writable(dst),
                rm: src,
            });
        } else {
            self.insts.push(Inst::FpuMove {
                size: ScalarSize::Size64,
                rd: writable(dst),
                rn: src,
            });
        }
    }

    fn lower_call(&mut self, inst: crate::ir::Inst, target: &IrCallTarget, args: &[Value]) -> CodegenResult<()> {
        let params: Vec<AbiParam> = args
            .iter()
            .map(|v| AbiParam::new(self.func.dfg.value_type(*v)))
            .collect();
        let classified = abi::classify_params(&params);
        if classified.stack_bytes > 0 {
            return Err(CodegenError::AbiViolation(
                "stack-spilled call arguments are not implemented by this lowering engine".into(),
            ));
        }
        for (value, loc) in args.iter().copied().zip(classified.locs.iter().copied()) {
            if let ArgLoc::Reg(dst) = loc {
                let src = self.reg_of(value);
                if src != dst {
                    self.emit_reg_move(dst, src);
                }
            }
        }

        let call_target = match target {
            IrCallTarget::Direct(name) => CallTarget::Direct(name.0.clone()),
            IrCallTarget::Indirect(v) => CallTarget::Indirect(self.reg_of(*v)),
        };
        self.insts.push(Inst::Call { target: call_target });

        if let Some(result) = self.func.dfg.first_result(inst) {
            let ty = self.func.dfg.value_type(result);
            let ret_reg = if ty.is_float() { preg(RegClass::Float, 0) } else { preg(RegClass::Int, 0) };
            let rd = self.alloc_vreg(ty);
            self.emit_reg_move(rd, ret_reg);
            self.set_reg(result, rd);
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

fn cc_for_intcc(cc: IntCC) -> CondCode {
    match cc {
        IntCC::Equal => CondCode::Eq,
        IntCC::NotEqual => CondCode::Ne,
        IntCC::SignedLessThan => CondCode::Lt,
        IntCC::SignedGreaterThanOrEqual => CondCode::Ge,
        IntCC::SignedGreaterThan => CondCode::Gt,
        IntCC::SignedLessThanOrEqual => CondCode::Le,
        IntCC::UnsignedLessThan => CondCode::Lo,
        IntCC::UnsignedGreaterThanOrEqual => CondCode::Hs,
        IntCC::UnsignedGreaterThan => CondCode::Hi,
        IntCC::UnsignedLessThanOrEqual => CondCode::Ls,
    }
}

fn cc_for_floatcc(cc: FloatCC) -> CondCode {
    match cc {
        FloatCC::Equal => CondCode::Eq,
        FloatCC::NotEqual => CondCode::Ne,
        FloatCC::LessThan => CondCode::Mi,
        FloatCC::LessThanOrEqual => CondCode::Ls,
        FloatCC::GreaterThan => CondCode::Gt,
        FloatCC::GreaterThanOrEqual => CondCode::Ge,
        FloatCC::Unordered => CondCode::Vs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CallConv, DataFlowGraph, Layout, Signature};

    fn build_add_function() -> Function {
        let sig = Signature {
            call_conv: CallConv::AppleAarch64,
            params: vec![AbiParam::new(Type::I64), AbiParam::new(Type::I64)],
            returns: vec![AbiParam::new(Type::I64)],
        };
        let mut func = Function::new("add", sig);
        let entry = func.make_block();
        let a = func.dfg.make_value(Type::I64);
        let b = func.dfg.make_value(Type::I64);
        func.layout.block_params[entry] = vec![a, b];

        let add_inst = func.dfg.make_inst(InstructionData::Binary { opcode: Opcode::Iadd, args: [a, b] });
        let sum = func.dfg.append_result(add_inst, Type::I64);
        func.layout.append_inst(entry, add_inst);

        let ret_inst = func.dfg.make_inst(InstructionData::Return { opcode: Opcode::Return, args: vec![sum] });
        func.layout.append_inst(entry, ret_inst);
        let _ = DataFlowGraph::new();
        let _ = Layout::new();
        func
    }

    #[test]
    fn lowers_add_and_return_without_coverage_gap() {
        let func = build_add_function();
        let mut buffer = MachBuffer::new();
        let lowered = lower_function(&func, &mut buffer).expect("lowering should succeed");
        assert!(lowered.insts.iter().any(|i| matches!(i, Inst::AluRRR { op: ALUOp::Add, .. })));
        assert!(lowered.insts.iter().any(|i| matches!(i, Inst::Ret)));
    }

    #[test]
    fn entry_args_bind_to_aapcs64_registers() {
        let func = build_add_function();
        let mut buffer = MachBuffer::new();
        lower_function(&func, &mut buffer).expect("lowering should succeed");
    }

    /// One pointer param, a `load i64, [p + offset]` followed by a
    /// `store` of the loaded value back to `[p + offset]`, then a void
    /// return -- exercises `amode_for`'s addressing-mode choice for both
    /// `load` and `store` at a chosen `offset`.
    fn build_load_store_function(offset: i32) -> (Function, Value) {
        let sig = Signature {
            call_conv: CallConv::AppleAarch64,
            params: vec![AbiParam::new(Type::Ptr)],
            returns: vec![],
        };
        let mut func = Function::new("load_store", sig);
        let entry = func.make_block();
        let p = func.dfg.make_value(Type::Ptr);
        func.layout.block_params[entry] = vec![p];

        let load_inst = func.dfg.make_inst(InstructionData::Load { opcode: Opcode::Load, arg: p, offset });
        let loaded = func.dfg.append_result(load_inst, Type::I64);
        func.layout.append_inst(entry, load_inst);

        let store_inst =
            func.dfg.make_inst(InstructionData::Store { opcode: Opcode::Store, args: [loaded, p], offset });
        func.layout.append_inst(entry, store_inst);

        let ret_inst = func.dfg.make_inst(InstructionData::Return { opcode: Opcode::Return, args: vec![] });
        func.layout.append_inst(entry, ret_inst);
        (func, p)
    }

    #[test]
    fn load_and_store_use_unsigned_offset_when_in_range() {
        // 512 is a multiple of 8 within the 12-bit-scaled range (0..32760
        // for an 8-byte access), so both should pick the scaled
        // unsigned-offset form, not a doubled-base register offset.
        let (func, _) = build_load_store_function(512);
        let mut buffer = MachBuffer::new();
        let lowered = lower_function(&func, &mut buffer).expect("lowering should succeed");

        let load_mem = lowered.insts.iter().find_map(|i| match i {
            Inst::ULoad64 { mem, .. } => Some(mem),
            _ => None,
        });
        match load_mem {
            Some(AMode::UnsignedOffset { uimm12, .. }) => assert_eq!(uimm12.value(), 512),
            other => panic!("expected UnsignedOffset, got {:?}", other),
        }

        let store_mem = lowered.insts.iter().find_map(|i| match i {
            Inst::Store64 { mem, .. } => Some(mem),
            _ => None,
        });
        match store_mem {
            Some(AMode::UnsignedOffset { uimm12, .. }) => assert_eq!(uimm12.value(), 512),
            other => panic!("expected UnsignedOffset, got {:?}", other),
        }
    }

    #[test]
    fn load_and_store_use_unscaled_offset_when_unaligned() {
        // 3 is not a multiple of 8, so it cannot use the scaled
        // unsigned-offset form even though it fits in 9 bits.
        let (func, _) = build_load_store_function(3);
        let mut buffer = MachBuffer::new();
        let lowered = lower_function(&func, &mut buffer).expect("lowering should succeed");

        let load_mem = lowered.insts.iter().find_map(|i| match i {
            Inst::ULoad64 { mem, .. } => Some(mem),
            _ => None,
        });
        match load_mem {
            Some(AMode::Unscaled { simm9, .. }) => assert_eq!(simm9.value(), 3),
            other => panic!("expected Unscaled, got {:?}", other),
        }
    }

    #[test]
    fn load_and_store_materialize_offset_when_out_of_range() {
        // Far beyond both the scaled 12-bit (max 32760 for an 8-byte
        // access) and unscaled 9-bit (max 255) encodings, so this must
        // fall back to a materialized register offset -- and that
        // offset register must be distinct from the base, never `rn`
        // doubled as its own offset.
        let big_offset = 1_000_000i32;
        let (func, _) = build_load_store_function(big_offset);
        let mut buffer = MachBuffer::new();
        let lowered = lower_function(&func, &mut buffer).expect("lowering should succeed");

        let load_mem = lowered.insts.iter().find_map(|i| match i {
            Inst::ULoad64 { mem, .. } => Some(mem.clone()),
            _ => None,
        });
        match load_mem {
            Some(AMode::RegOffset { rn, rm, .. }) => assert_ne!(rn, rm, "offset register must not alias the base"),
            other => panic!("expected RegOffset, got {:?}", other),
        }

        // The materialized offset is synthesized with a MOVZ/MOVK
        // sequence before the load that consumes it.
        assert!(lowered
            .insts
            .iter()
            .any(|i| matches!(i, Inst::MovZ { .. }) || matches!(i, Inst::MovN { .. })));
    }
}
