//! The machine buffer: an append-only code image plus the label table and
//! fixup list that let branches and PC-relative loads refer to labels that
//! are not yet bound when they are emitted.
//!
//! Labels start `Pending` and become `Bound(offset)` via [`MachBuffer::bind_label`].
//! Every emission that references an unbound label records a
//! `(use_offset, label, kind)` triple; [`MachBuffer::finalize`] walks that
//! list once, computes each displacement now that every label is bound,
//! range-checks it, and patches the already-emitted word in place. Nothing
//! ever moves once written -- finalize only flips previously-zeroed
//! immediate bits.

use crate::error::{CodegenError, CodegenResult};
use alloc::vec::Vec;
use cranelift_entity::entity_impl;

/// Byte offset from the start of the function. `u32`, not `usize`: the
/// backend may cross-compile, so code offsets are sized for the *target*.
pub type CodeOffset = u32;

/// A yet-to-be-placed branch or PC-relative reference target.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachLabel(u32);
entity_impl!(MachLabel, "label");

/// What bits of the referencing instruction a [`LabelUse`] patches, and how
/// the displacement is computed and range-checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelUseKind {
    /// `B`/`BL`: 26-bit signed word (4-byte-unit) displacement at bits
    /// `[25:0]`.
    Branch26,
    /// `B.cond`, `CBZ`/`CBNZ`: 19-bit signed word displacement at bits
    /// `[23:5]`.
    Branch19,
    /// `TBZ`/`TBNZ`: 14-bit signed word displacement at bits `[18:5]`.
    Branch14,
    /// `ADR`: 21-bit signed *byte* displacement split into `immlo` (bits
    /// `[30:29]`) and `immhi` (bits `[23:5]`).
    Adr,
    /// `ADRP`: like `Adr`, but the displacement is to the target's
    /// containing 4KiB page, and both the use site and the target are
    /// masked to their page before subtracting.
    AdrpPage,
    /// The `ADD`/`LDR` immediate that follows an `ADRP` and supplies the
    /// low 12 bits of a full address (the "adrp+add" idiom for addresses
    /// more than 1MiB away). Patches a 12-bit unsigned immediate at bits
    /// `[21:10]`.
    AdrpLo12,
}

impl LabelUseKind {
    fn max_pos_range(self) -> i64 {
        match self {
            LabelUseKind::Branch26 => (1i64 << 27) - 4,
            LabelUseKind::Branch19 => (1i64 << 20) - 4,
            LabelUseKind::Branch14 => (1i64 << 15) - 4,
            LabelUseKind::Adr | LabelUseKind::AdrpPage => (1i64 << 20) - 1,
            LabelUseKind::AdrpLo12 => i64::MAX,
        }
    }

    fn max_neg_range(self) -> i64 {
        match self {
            LabelUseKind::Branch26 => -(1i64 << 27),
            LabelUseKind::Branch19 => -(1i64 << 20),
            LabelUseKind::Branch14 => -(1i64 << 15),
            LabelUseKind::Adr | LabelUseKind::AdrpPage => -(1i64 << 20),
            LabelUseKind::AdrpLo12 => i64::MIN,
        }
    }

    /// Patch `word` (the 32-bit instruction already emitted at the use
    /// site) to encode `delta`.
    fn patch(self, word: u32, delta: i64) -> CodegenResult<u32> {
        if delta > self.max_pos_range() || delta < self.max_neg_range() {
            return Err(CodegenError::OperandOutOfRange(alloc::format!(
                "fixup delta {} out of range for {:?}",
                delta,
                self
            )));
        }
        let patched = match self {
            LabelUseKind::Branch26 => {
                let off = ((delta / 4) as u32) & ((1 << 26) - 1);
                word | off
            }
            LabelUseKind::Branch19 => {
                let off = ((delta / 4) as u32) & ((1 << 19) - 1);
                word | (off << 5)
            }
            LabelUseKind::Branch14 => {
                let off = ((delta / 4) as u32) & ((1 << 14) - 1);
                word | (off << 5)
            }
            LabelUseKind::Adr => {
                let off = (delta as u32) & ((1 << 21) - 1);
                let immlo = off & 0b11;
                let immhi = (off >> 2) & ((1 << 19) - 1);
                word | (immlo << 29) | (immhi << 5)
            }
            LabelUseKind::AdrpPage => {
                let page_delta = delta >> 12;
                let off = (page_delta as u32) & ((1 << 21) - 1);
                let immlo = off & 0b11;
                let immhi = (off >> 2) & ((1 << 19) - 1);
                word | (immlo << 29) | (immhi << 5)
            }
            LabelUseKind::AdrpLo12 => {
                let lo12 = (delta as u32) & 0xfff;
                word | (lo12 << 10)
            }
        };
        Ok(patched)
    }
}

#[derive(Clone, Copy)]
struct LabelUse {
    code_offset: CodeOffset,
    label: MachLabel,
    kind: LabelUseKind,
}

#[derive(Clone, Copy)]
enum LabelState {
    Pending,
    Bound(CodeOffset),
}

/// An append-only code buffer with deferred label/fixup resolution.
///
/// Each `MachBuffer` exclusively owns its byte vector and label tables;
/// nothing about it is shared across functions, so compiling several
/// functions concurrently just means giving each its own buffer.
pub struct MachBuffer {
    data: Vec<u8>,
    labels: Vec<LabelState>,
    uses: Vec<LabelUse>,
}

impl MachBuffer {
    pub fn new() -> Self {
        MachBuffer {
            data: Vec::new(),
            labels: Vec::new(),
            uses: Vec::new(),
        }
    }

    /// Current write position, i.e. the size of the image so far.
    pub fn cur_offset(&self) -> CodeOffset {
        self.data.len() as CodeOffset
    }

    /// Append one 32-bit little-endian instruction word. Every `Inst` the
    /// encoder emits goes through exactly this call, so the "buffer grows
    /// by exactly 4 bytes per instruction" invariant is enforced in one
    /// place.
    pub fn put4(&mut self, word: u32) {
        self.data.extend_from_slice(&word.to_le_bytes());
    }

    /// Allocate a new, as-yet-unbound label.
    pub fn get_label(&mut self) -> MachLabel {
        let idx = self.labels.len() as u32;
        self.labels.push(LabelState::Pending);
        MachLabel::from_u32(idx)
    }

    /// Bind `label` to the current write position. A label may be bound
    /// only once.
    pub fn bind_label(&mut self, label: MachLabel) {
        let slot = &mut self.labels[label.as_u32() as usize];
        assert!(
            matches!(slot, LabelState::Pending),
            "label bound more than once"
        );
        *slot = LabelState::Bound(self.cur_offset());
    }

    /// Record that the 32-bit word just written at `code_offset` (normally
    /// `self.cur_offset() - 4`, i.e. the instruction just emitted)
    /// references `label` and must be patched once `label` is bound.
    pub fn use_label_at_offset(
        &mut self,
        code_offset: CodeOffset,
        label: MachLabel,
        kind: LabelUseKind,
    ) {
        self.uses.push(LabelUse {
            code_offset,
            label,
            kind,
        });
    }

    /// Resolved offset of `label`, if it is already bound -- used by
    /// callers (e.g. the peephole pass) that want to reason about layout
    /// before `finalize`.
    pub fn resolved_offset(&self, label: MachLabel) -> Option<CodeOffset> {
        match self.labels[label.as_u32() as usize] {
            LabelState::Bound(off) => Some(off),
            LabelState::Pending => None,
        }
    }

    /// Resolve every recorded label use, patching the pre-zeroed immediate
    /// field of each referencing word, and return the final byte image.
    /// Fails (without mutating `self.data` further) if any referenced
    /// label was never bound, or if a displacement does not fit the use's
    /// encoding.
    pub fn finalize(mut self) -> CodegenResult<Vec<u8>> {
        for u in &self.uses {
            let target = match self.labels[u.label.as_u32() as usize] {
                LabelState::Bound(off) => off,
                LabelState::Pending => return Err(CodegenError::UnboundLabel(u.label)),
            };
            let delta = match u.kind {
                LabelUseKind::AdrpPage => {
                    (i64::from(target) & !0xfff) - (i64::from(u.code_offset) & !0xfff)
                }
                _ => i64::from(target) - i64::from(u.code_offset),
            };
            let idx = u.code_offset as usize;
            let word = u32::from_le_bytes(self.data[idx..idx + 4].try_into().unwrap());
            let patched = u.kind.patch(word, delta)?;
            self.data[idx..idx + 4].copy_from_slice(&patched.to_le_bytes());
        }
        Ok(self.data)
    }
}

impl Default for MachBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_label_is_fatal() {
        let mut buf = MachBuffer::new();
        let label = buf.get_label();
        buf.put4(0x14000000);
        buf.use_label_at_offset(0, label, LabelUseKind::Branch26);
        assert!(matches!(
            buf.finalize(),
            Err(CodegenError::UnboundLabel(_))
        ));
    }

    #[test]
    fn every_emit_grows_by_four_bytes() {
        let mut buf = MachBuffer::new();
        for i in 0..16u32 {
            let before = buf.cur_offset();
            buf.put4(0xD503201F ^ i);
            assert_eq!(buf.cur_offset(), before + 4);
        }
    }

    #[test]
    fn branch_fixup_resolves_forward_reference() {
        let mut buf = MachBuffer::new();
        let label = buf.get_label();
        let use_off = buf.cur_offset();
        buf.put4(0b000101 << 26); // B, zero displacement placeholder
        buf.use_label_at_offset(use_off, label, LabelUseKind::Branch26);
        buf.put4(0xD503201F); // NOP
        buf.bind_label(label);
        let image = buf.finalize().unwrap();
        let word = u32::from_le_bytes(image[0..4].try_into().unwrap());
        assert_eq!(word & ((1 << 26) - 1), 1);
    }
}
