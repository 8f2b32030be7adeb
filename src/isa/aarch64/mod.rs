//! The AArch64 backend: instruction model and encoder, AAPCS64 frame
//! layout, pattern-directed lowering, and a post-lowering peephole pass.

pub mod abi;
pub mod inst;
pub mod lower;
pub mod peephole;
pub mod regalloc;
