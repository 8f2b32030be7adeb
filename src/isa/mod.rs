//! Target-specific backends. Only AArch64 is implemented; the module
//! split mirrors how a multi-target compiler would add others beside it.

pub mod aarch64;
