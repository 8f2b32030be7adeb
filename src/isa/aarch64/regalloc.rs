//! Bridges the lowered `Inst` stream to `regalloc2`, the external register
//! allocator. This module owns no allocation algorithm of its own -- it
//! exposes (def, use) operand lists and a block CFG, then rewrites
//! virtual registers to whatever
//! `regalloc2` decided.
//!
//! Scope, deliberately narrowed for this backend:
//! - No IR instruction this crate lowers passes a value to a successor
//!   block through a block parameter (every cross-block value is either
//!   an entry argument already bound to a fixed ABI register, or recomputed
//!   from flags/`CSEL` at the point of use), so `branch_blockparams` is
//!   always empty.
//! - This backend does not model spill slots in `AMode` yet. A solution
//!   that spills a virtual register to the stack is reported as an
//!   allocation failure rather than silently miscompiled; see
//!   `CodegenError::Allocation` below and the note in `DESIGN.md`.
//! - Physical-register operands (AAPCS64 argument/return/call-target
//!   registers, which lowering already binds directly rather than through
//!   a virtual register) are not reported to `regalloc2` as operands --
//!   they are fixed by construction, not something the allocator chooses.
//!   `Call`/`CondBr`/`Ret` instructions that need pristine caller-saved
//!   registers declare them as clobbers instead so nothing the allocator
//!   placed survives across the boundary unexpectedly.

use crate::error::{CodegenError, CodegenResult};
use crate::isa::aarch64::abi::{CALLEE_SAVED_FPRS, CALLEE_SAVED_GPRS};
use crate::isa::aarch64::inst::{BranchTarget, Inst, RegMapper, RegVisitor};
use crate::isa::aarch64::lower::LoweredFunction;
use crate::reg::{Reg, WritableReg};
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::vec;
use alloc::vec::Vec;
use regalloc2::{
    Allocation, Block as RaBlock, Edit, Function as RaFunction, Inst as RaInst, InstRange,
    MachineEnv, Operand, PReg as RaPReg, PRegSet, RegClass as RaRegClass, VReg as RaVReg,
};
use smallvec::SmallVec;

/// Per-instruction operand lists are almost always 0-3 entries (the
/// widest forms here are three-register ALU ops and `LDP`/`STP`);
/// `regalloc2::Function::inst_operands` returns a slice, so a small
/// inline buffer avoids a heap allocation per instruction during
/// collection.
type OperandList = SmallVec<[Operand; 4]>;

fn caller_saved_clobbers() -> PRegSet {
    let mut set = PRegSet::empty();
    // X0..X17: argument/result and scratch (IP0/IP1) registers, all
    // caller-saved under AAPCS64.
    for hw in 0..18u8 {
        set.add(RaPReg::new(hw as usize, RaRegClass::Int));
    }
    // V0..V7 (args/results) and V16..V31 are caller-saved; V8..V15 are
    // callee-saved (low 64 bits only) and excluded.
    for hw in 0..8u8 {
        set.add(RaPReg::new(hw as usize, RaRegClass::Float));
    }
    for hw in 16..32u8 {
        set.add(RaPReg::new(hw as usize, RaRegClass::Float));
    }
    set
}

/// The physical registers this backend offers `regalloc2` to choose among:
/// every GPR/FPR except `SP`/`XZR` (31), the link register (`X30`) and
/// frame pointer (`X29`), and `X16`/`X17`/`X18` (reserved as IP0/IP1 and
/// the platform register).
fn machine_env() -> MachineEnv {
    let mut int_pregs = Vec::new();
    for hw in 0..29u8 {
        if hw == 16 || hw == 17 || hw == 18 {
            continue;
        }
        int_pregs.push(RaPReg::new(hw as usize, RaRegClass::Int));
    }
    let mut float_pregs = Vec::new();
    for hw in 0..32u8 {
        float_pregs.push(RaPReg::new(hw as usize, RaRegClass::Float));
    }

    // Caller-saved first so the allocator prefers them (cheaper: no
    // callee-save STP/LDP needed unless a value truly outlives a call).
    let (int_preferred, int_non_preferred): (Vec<_>, Vec<_>) =
        int_pregs.into_iter().partition(|p| !CALLEE_SAVED_GPRS.contains(&(p.hw_enc() as u8)));
    let (float_preferred, float_non_preferred): (Vec<_>, Vec<_>) =
        float_pregs.into_iter().partition(|p| !CALLEE_SAVED_FPRS.contains(&(p.hw_enc() as u8)));

    MachineEnv {
        preferred_regs_by_class: [int_preferred, float_preferred],
        non_preferred_regs_by_class: [int_non_preferred, float_non_preferred],
        scratch_by_class: [None, None],
        fixed_stack_slots: Vec::new(),
    }
}

/// One lowered function's `regalloc2::Function` view: block ranges and CFG
/// edges derived from `LoweredFunction::block_starts` plus each block's
/// terminator, and a precomputed operand/clobber list per instruction.
struct VCodeAdapter<'a> {
    insts: &'a [Inst],
    block_ranges: Vec<(usize, usize)>,
    successors: Vec<Vec<RaBlock>>,
    predecessors: Vec<Vec<RaBlock>>,
    operands: Vec<OperandList>,
    clobbers: Vec<PRegSet>,
    num_vregs: usize,
}

struct OperandCollector {
    ops: OperandList,
}

impl RegVisitor for OperandCollector {
    fn reg_use(&mut self, reg: Reg) {
        if let Some(v) = reg.as_vreg() {
            self.ops.push(Operand::reg_use(v));
        }
    }

    fn reg_def(&mut self, reg: WritableReg) {
        if let Some(v) = reg.to_reg().as_vreg() {
            self.ops.push(Operand::reg_def(v));
        }
    }
}

fn block_target(target: &BranchTarget, label_to_block: &BTreeMap<u32, usize>) -> Option<usize> {
    match target {
        BranchTarget::Label(l) => label_to_block.get(&l.as_u32()).copied(),
        BranchTarget::ResolvedOffset(_) => None,
    }
}

impl<'a> VCodeAdapter<'a> {
    fn new(lowered: &'a LoweredFunction) -> Self {
        let insts = lowered.insts.as_slice();
        let mut block_ranges = Vec::with_capacity(lowered.block_starts.len());
        let mut label_to_block = BTreeMap::new();
        for (i, &(start, label)) in lowered.block_starts.iter().enumerate() {
            let end = lowered
                .block_starts
                .get(i + 1)
                .map(|&(next, _)| next)
                .unwrap_or(insts.len());
            block_ranges.push((start, end));
            label_to_block.insert(label.as_u32(), i);
        }

        let mut successors = vec![Vec::new(); block_ranges.len()];
        for (block_idx, &(_, end)) in block_ranges.iter().enumerate() {
            if end == 0 {
                continue;
            }
            match insts.get(end - 1) {
                Some(Inst::Jump { target }) => {
                    if let Some(b) = block_target(target, &label_to_block) {
                        successors[block_idx].push(RaBlock::new(b));
                    }
                }
                Some(Inst::CondBr { taken, not_taken, .. }) => {
                    if let Some(b) = block_target(taken, &label_to_block) {
                        successors[block_idx].push(RaBlock::new(b));
                    }
                    if let Some(b) = block_target(not_taken, &label_to_block) {
                        successors[block_idx].push(RaBlock::new(b));
                    }
                }
                _ => {
                    // Falls through (or `Ret`/`Call`-without-a-terminator,
                    // which only happens at the very last block).
                    if block_idx + 1 < block_ranges.len() {
                        successors[block_idx].push(RaBlock::new(block_idx + 1));
                    }
                }
            }
        }

        let mut predecessors = vec![Vec::new(); block_ranges.len()];
        for (block_idx, succs) in successors.iter().enumerate() {
            for &s in succs {
                predecessors[s.index()].push(RaBlock::new(block_idx));
            }
        }

        let mut operands = Vec::with_capacity(insts.len());
        let mut clobbers = Vec::with_capacity(insts.len());
        for inst in insts {
            let mut collector = OperandCollector { ops: OperandList::new() };
            inst.visit_regs(&mut collector);
            operands.push(collector.ops);
            clobbers.push(if matches!(inst, Inst::Call { .. }) {
                caller_saved_clobbers()
            } else {
                PRegSet::empty()
            });
        }

        VCodeAdapter {
            insts,
            block_ranges,
            successors,
            predecessors,
            operands,
            clobbers,
            num_vregs: lowered.num_vregs,
        }
    }
}

impl<'a> RaFunction for VCodeAdapter<'a> {
    fn num_insts(&self) -> usize {
        self.insts.len()
    }

    fn num_blocks(&self) -> usize {
        self.block_ranges.len()
    }

    fn entry_block(&self) -> RaBlock {
        RaBlock::new(0)
    }

    fn block_insns(&self, block: RaBlock) -> InstRange {
        let (start, end) = self.block_ranges[block.index()];
        InstRange::new(RaInst::new(start), RaInst::new(end))
    }

    fn block_succs(&self, block: RaBlock) -> &[RaBlock] {
        &self.successors[block.index()]
    }

    fn block_preds(&self, block: RaBlock) -> &[RaBlock] {
        &self.predecessors[block.index()]
    }

    fn block_params(&self, _block: RaBlock) -> &[RaVReg] {
        &[]
    }

    fn is_ret(&self, insn: RaInst) -> bool {
        matches!(self.insts[insn.index()], Inst::Ret)
    }

    fn is_branch(&self, insn: RaInst) -> bool {
        matches!(self.insts[insn.index()], Inst::Jump { .. } | Inst::CondBr { .. })
    }

    fn branch_blockparams(&self, _block: RaBlock, _insn: RaInst, _succ_idx: usize) -> &[RaVReg] {
        &[]
    }

    fn inst_operands(&self, insn: RaInst) -> &[Operand] {
        &self.operands[insn.index()]
    }

    fn inst_clobbers(&self, insn: RaInst) -> PRegSet {
        self.clobbers[insn.index()]
    }

    fn num_vregs(&self) -> usize {
        self.num_vregs
    }

    fn spillslot_size(&self, _regclass: RaRegClass) -> usize {
        1
    }
}

/// A small per-instruction lookup: which physical register each operand's
/// virtual register was finally assigned. Built fresh for every
/// instruction from `Output::inst_allocs`, since the same `VReg` can land
/// in different `PReg`s across its lifetime once `regalloc2` has inserted
/// moves to bridge split live ranges.
struct InstAllocMap {
    entries: Vec<(RaVReg, RaPReg)>,
}

impl RegMapper for InstAllocMap {
    fn get_use(&self, reg: Reg) -> Reg {
        match reg.as_vreg() {
            Some(v) => {
                let preg = self
                    .entries
                    .iter()
                    .find(|(vr, _)| *vr == v)
                    .map(|(_, p)| *p)
                    .expect("regalloc2 did not allocate a use it was told about");
                Reg::from_preg(preg)
            }
            None => reg,
        }
    }

    fn get_def(&self, reg: WritableReg) -> WritableReg {
        match reg.to_reg().as_vreg() {
            Some(v) => {
                let preg = self
                    .entries
                    .iter()
                    .find(|(vr, _)| *vr == v)
                    .map(|(_, p)| *p)
                    .expect("regalloc2 did not allocate a def it was told about");
                crate::reg::writable(Reg::from_preg(preg))
            }
            None => reg,
        }
    }
}

fn alloc_to_preg(alloc: Allocation) -> CodegenResult<RaPReg> {
    alloc
        .as_reg()
        .ok_or_else(|| CodegenError::Allocation("regalloc2 spilled a value to the stack, which this backend's AMode does not yet model".into()))
}

fn move_inst(from: RaPReg, to: RaPReg) -> Inst {
    let rd = crate::reg::writable(Reg::from_preg(to));
    let rm = Reg::from_preg(from);
    match from.class() {
        RaRegClass::Int => Inst::Mov {
            size: crate::isa::aarch64::inst::OperandSize::Size64,
            rd,
            rm,
        },
        RaRegClass::Float => Inst::FpuMove {
            size: crate::isa::aarch64::inst::ScalarSize::Size64,
            rd,
            rn: rm,
        },
    }
}

/// Run `regalloc2` over a lowered function and return the same instruction
/// stream with every virtual register rewritten to the physical register
/// the allocator chose, plus the set of callee-saved registers it
/// actually used (for [`crate::isa::aarch64::abi::Aarch64ABICallee::finalize`]).
pub fn allocate(lowered: &LoweredFunction) -> CodegenResult<(Vec<Inst>, Vec<Reg>, Vec<Reg>)> {
    let adapter = VCodeAdapter::new(lowered);
    let env = machine_env();
    let opts = regalloc2::RegallocOptions::default();
    let output = regalloc2::run(&adapter, &env, &opts)
        .map_err(|e| CodegenError::Allocation(format!("regalloc2 failed: {:?}", e)))?;

    let mut used_int = vec![false; CALLEE_SAVED_GPRS.len()];
    let mut used_float = vec![false; CALLEE_SAVED_FPRS.len()];
    let mut note_clobber = |p: RaPReg| match p.class() {
        RaRegClass::Int => {
            if let Some(i) = CALLEE_SAVED_GPRS.iter().position(|&hw| hw as usize == p.hw_enc()) {
                used_int[i] = true;
            }
        }
        RaRegClass::Float => {
            if let Some(i) = CALLEE_SAVED_FPRS.iter().position(|&hw| hw as usize == p.hw_enc()) {
                used_float[i] = true;
            }
        }
    };

    let mut before_edits: BTreeMap<usize, Vec<Edit>> = BTreeMap::new();
    let mut after_edits: BTreeMap<usize, Vec<Edit>> = BTreeMap::new();
    for (point, edit) in output.edits.iter() {
        let idx = point.inst().index();
        let bucket = if point.pos() == regalloc2::InstPosition::Before {
            &mut before_edits
        } else {
            &mut after_edits
        };
        bucket.entry(idx).or_default().push(edit.clone());
    }

    let mut out = Vec::with_capacity(lowered.insts.len());
    for (idx, inst) in lowered.insts.iter().enumerate() {
        let ra_inst = RaInst::new(idx);
        if let Some(edits) = before_edits.get(&idx) {
            for edit in edits {
                match edit {
                    Edit::Move { from, to } => {
                        let from_preg = alloc_to_preg(*from)?;
                        let to_preg = alloc_to_preg(*to)?;
                        note_clobber(to_preg);
                        out.push(move_inst(from_preg, to_preg));
                    }
                    #[allow(unreachable_patterns)]
                    _ => {}
                }
            }
        }

        let operand_count = adapter.operands[idx].len();
        let allocs = output.inst_allocs(ra_inst);
        let mut entries = Vec::with_capacity(operand_count);
        for (operand, alloc) in adapter.operands[idx].iter().zip(allocs.iter()) {
            let preg = alloc_to_preg(*alloc)?;
            note_clobber(preg);
            entries.push((operand.vreg(), preg));
        }
        let mapper = InstAllocMap { entries };
        let mut mapped = inst.clone();
        mapped.map_regs(&mapper);
        out.push(mapped);

        if let Some(edits) = after_edits.get(&idx) {
            for edit in edits {
                match edit {
                    Edit::Move { from, to } => {
                        let from_preg = alloc_to_preg(*from)?;
                        let to_preg = alloc_to_preg(*to)?;
                        note_clobber(to_preg);
                        out.push(move_inst(from_preg, to_preg));
                    }
                    #[allow(unreachable_patterns)]
                    _ => {}
                }
            }
        }
    }

    let clobbered_int = CALLEE_SAVED_GPRS
        .iter()
        .zip(used_int.iter())
        .filter(|(_, &used)| used)
        .map(|(&hw, _)| Reg::from_preg(RaPReg::new(hw as usize, RaRegClass::Int)))
        .collect();
    let clobbered_float = CALLEE_SAVED_FPRS
        .iter()
        .zip(used_float.iter())
        .filter(|(_, &used)| used)
        .map(|(&hw, _)| Reg::from_preg(RaPReg::new(hw as usize, RaRegClass::Float)))
        .collect();

    Ok((out, clobbered_int, clobbered_float))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MachBuffer;
    use crate::ir::{AbiParam, CallConv, Function, InstructionData, Opcode, Signature, Type};
    use crate::isa::aarch64::lower::lower_function;

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
        func
    }

    #[test]
    fn allocates_every_virtual_register_to_a_physical_one() {
        let func = build_add_function();
        let mut buffer = MachBuffer::new();
        let lowered = lower_function(&func, &mut buffer).unwrap();
        let (insts, _clobbered_int, _clobbered_float) = allocate(&lowered).unwrap();
        for inst in &insts {
            let mut collector = OperandCollector { ops: OperandList::new() };
            inst.visit_regs(&mut collector);
            assert!(collector.ops.is_empty(), "found an unallocated virtual register in {:?}", inst);
        }
    }
}
