//! The post-lowering peephole pass: load/store-pair combining and dead
//! (identity) move elimination.
//!
//! Runs after register allocation, directly over the physical-register
//! `Inst` stream `crate::isa::aarch64::regalloc::allocate` produces --
//! running post-allocation turns "do these two loads/stores alias the
//! same register" into plain `PReg` equality rather than an interference
//! question the allocator hasn't answered yet. See `DESIGN.md`.
//!
//! Only strictly adjacent instructions are ever combined. That keeps the
//! "no intervening write" and "no reordering across a barrier" conditions
//! trivially true: there is nothing between the two instructions to
//! intervene.

use crate::isa::aarch64::inst::{AMode, Inst, PairAMode};
use crate::isa::aarch64::inst::imms::SImm7Scaled;
use alloc::vec::Vec;

/// Counts of transformations the pass actually performed, so tests can
/// assert it fired rather than just that output is still correct.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PeepholeStats {
    pub load_pairs_formed: u32,
    pub store_pairs_formed: u32,
    pub dead_moves_eliminated: u32,
}

/// Two adjacent `UnsignedOffset` accesses off the same base at offsets
/// `off` and `off + 8`, eligible to combine into one `LDP`/`STP`.
fn adjacent_offsets(a: &AMode, b: &AMode) -> Option<(crate::reg::Reg, i64)> {
    match (a, b) {
        (AMode::UnsignedOffset { rn: rn_a, uimm12: off_a }, AMode::UnsignedOffset { rn: rn_b, uimm12: off_b })
            if rn_a == rn_b =>
        {
            let off_a = i64::from(off_a.value());
            let off_b = i64::from(off_b.value());
            if off_b == off_a + 8 {
                Some((*rn_a, off_a))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn pair_amode(rn: crate::reg::Reg, off: i64) -> Option<PairAMode> {
    SImm7Scaled::maybe_from_i64(off, 8).map(|simm7| PairAMode::SignedOffset { rn, simm7 })
}

fn is_identity_move(inst: &Inst) -> bool {
    match inst {
        Inst::Mov { rd, rm, .. } => rd.to_reg() == *rm,
        Inst::FpuMove { rd, rn, .. } => rd.to_reg() == *rn,
        _ => false,
    }
}

/// Run the peephole pass over one function's instruction stream in place,
/// returning the counters for whichever transformations fired.
pub fn run(insts: Vec<Inst>) -> (Vec<Inst>, PeepholeStats) {
    let mut stats = PeepholeStats::default();
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    while i < insts.len() {
        if is_identity_move(&insts[i]) {
            stats.dead_moves_eliminated += 1;
            i += 1;
            continue;
        }

        if i + 1 < insts.len() {
            if let Some(combined) = try_combine_loads(&insts[i], &insts[i + 1]) {
                out.push(combined);
                stats.load_pairs_formed += 1;
                i += 2;
                continue;
            }
            if let Some(combined) = try_combine_stores(&insts[i], &insts[i + 1]) {
                out.push(combined);
                stats.store_pairs_formed += 1;
                i += 2;
                continue;
            }
        }

        out.push(insts[i].clone());
        i += 1;
    }
    (out, stats)
}

fn try_combine_loads(first: &Inst, second: &Inst) -> Option<Inst> {
    let (rt, rt2, mem_a, mem_b) = match (first, second) {
        (Inst::ULoad64 { rd: rd1, mem: mem_a }, Inst::ULoad64 { rd: rd2, mem: mem_b }) => {
            (*rd1, *rd2, mem_a, mem_b)
        }
        _ => return None,
    };
    if rt.to_reg() == rt2.to_reg() {
        return None;
    }
    let (base, off) = adjacent_offsets(mem_a, mem_b)?;
    // Base clobber: the first load must not overwrite the register the
    // second load's address depends on.
    if rt.to_reg() == base {
        return None;
    }
    let mem = pair_amode(base, off)?;
    Some(Inst::LoadP64 { rt, rt2, mem })
}

fn try_combine_stores(first: &Inst, second: &Inst) -> Option<Inst> {
    let (rt, rt2, mem_a, mem_b) = match (first, second) {
        (Inst::Store64 { rt: rt1, mem: mem_a }, Inst::Store64 { rt: rt2, mem: mem_b }) => {
            (*rt1, *rt2, mem_a, mem_b)
        }
        _ => return None,
    };
    let (base, off) = adjacent_offsets(mem_a, mem_b)?;
    let mem = pair_amode(base, off)?;
    Some(Inst::StoreP64 { rt, rt2, mem })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::aarch64::inst::imms::{OperandSize, UImm12Scaled};
    use crate::reg::{preg, writable, RegClass};

    fn gpr(hw: u8) -> crate::reg::Reg {
        preg(RegClass::Int, hw)
    }

    fn uoff(rn: crate::reg::Reg, bytes: i64) -> AMode {
        AMode::UnsignedOffset {
            rn,
            uimm12: UImm12Scaled::maybe_from_i64(bytes, 8).unwrap(),
        }
    }

    #[test]
    fn combines_adjacent_loads_into_ldp() {
        let base = gpr(0);
        let insts = alloc::vec![
            Inst::ULoad64 { rd: writable(gpr(1)), mem: uoff(base, 0) },
            Inst::ULoad64 { rd: writable(gpr(2)), mem: uoff(base, 8) },
        ];
        let (out, stats) = run(insts);
        assert_eq!(stats.load_pairs_formed, 1);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Inst::LoadP64 { .. }));
    }

    #[test]
    fn refuses_to_pair_when_first_load_clobbers_second_loads_base() {
        let base = gpr(0);
        let insts = alloc::vec![
            Inst::ULoad64 { rd: writable(base), mem: uoff(base, 0) },
            Inst::ULoad64 { rd: writable(gpr(2)), mem: uoff(base, 8) },
        ];
        let (out, stats) = run(insts);
        assert_eq!(stats.load_pairs_formed, 0);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn combines_adjacent_stores_into_stp() {
        let base = gpr(0);
        let insts = alloc::vec![
            Inst::Store64 { rt: gpr(1), mem: uoff(base, 16) },
            Inst::Store64 { rt: gpr(2), mem: uoff(base, 24) },
        ];
        let (out, stats) = run(insts);
        assert_eq!(stats.store_pairs_formed, 1);
        assert!(matches!(out[0], Inst::StoreP64 { .. }));
    }

    #[test]
    fn eliminates_identity_move() {
        let r = gpr(3);
        let insts = alloc::vec![
            Inst::Mov { size: OperandSize::Size64, rd: writable(r), rm: r },
            Inst::Ret,
        ];
        let (out, stats) = run(insts);
        assert_eq!(stats.dead_moves_eliminated, 1);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Inst::Ret));
    }

    #[test]
    fn does_not_pair_loads_with_a_stride_other_than_eight() {
        let base = gpr(0);
        let insts = alloc::vec![
            Inst::ULoad64 { rd: writable(gpr(1)), mem: uoff(base, 0) },
            Inst::ULoad64 { rd: writable(gpr(2)), mem: uoff(base, 4) },
        ];
        let (out, stats) = run(insts);
        assert_eq!(stats.load_pairs_formed, 0);
        assert_eq!(out.len(), 2);
    }
}
