//! AArch64 machine backend for a retargetable compiler.
//!
//! This crate implements the target-specific half of an AArch64 code
//! generator: an instruction model and binary encoder, a pattern-directed
//! lowering pass from a small target-independent IR into that instruction
//! set, an AAPCS64 ABI / frame-layout engine, a load/store-pair and
//! dead-move peephole, and (with the `jit` feature) a loader that makes the
//! resulting bytes directly callable.
//!
//! The register allocator, the IR itself, and the top-level pass pipeline
//! that would normally drive this backend are outside this crate's scope;
//! [`ir`] describes the minimal surface this crate expects from them.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod buffer;
pub mod error;
pub mod ir;
pub mod isa;
pub mod reg;

#[cfg(feature = "jit")]
pub mod jit;

pub use error::{CodegenError, CodegenResult};
