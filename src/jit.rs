//! The JIT loader: makes a finished machine-code image directly callable.
//!
//! Pages are never mapped read+write+execute at the same time. A
//! [`JitFunction`] is built read-write, the code image is copied in, and
//! the mapping is then flipped to read-execute before any function
//! pointer into it is handed out -- the W^X discipline `region`'s
//! `Protection` flags exist to express. The mapping is released when the
//! `JitFunction` is dropped; the typed call helpers borrow `self`, so a
//! function pointer cannot outlive the memory it points into.

use crate::error::{CodegenError, CodegenResult};
use alloc::format;
use region::Protection;

/// An executable mapping holding one compiled function's code image.
///
/// Construct with [`JitFunction::new`], then call through one of the
/// typed `call_*` helpers matching the function's AAPCS64 signature.
pub struct JitFunction {
    alloc: region::Allocation,
    len: usize,
}

// SAFETY: the mapping is exclusively owned by this `JitFunction` and
// never mutated after construction (the only writer is `new`, before the
// page is made executable), so sharing a `&JitFunction` across threads or
// moving it to another thread is sound.
unsafe impl Send for JitFunction {}
unsafe impl Sync for JitFunction {}

impl JitFunction {
    /// Map `code.len()` bytes (rounded up to a whole number of pages),
    /// copy `code` in, and transition the mapping to read-execute.
    pub fn new(code: &[u8]) -> CodegenResult<Self> {
        if code.is_empty() {
            return Err(CodegenError::Allocation("cannot JIT an empty code image".into()));
        }

        let mut alloc = region::alloc(code.len(), Protection::READ_WRITE)
            .map_err(|e| CodegenError::Allocation(format!("mapping JIT pages failed: {e}")))?;

        // SAFETY: `alloc` was just mapped read-write by us, is exactly
        // `code.len()` bytes or larger, and no other reference to it
        // exists yet.
        unsafe {
            let dst = alloc.as_mut_ptr::<u8>();
            core::ptr::copy_nonoverlapping(code.as_ptr(), dst, code.len());
        }

        // SAFETY: `alloc`'s address and length come from the mapping we
        // just created; flipping it to read-execute only removes the
        // write permission we no longer need.
        unsafe {
            region::protect(alloc.as_ptr::<u8>(), alloc.len(), Protection::READ_EXECUTE)
                .map_err(|e| CodegenError::Allocation(format!("making JIT pages executable failed: {e}")))?;
        }

        Ok(JitFunction {
            alloc,
            len: code.len(),
        })
    }

    /// The base address of the mapped code, for callers that want to
    /// build their own function-pointer cast.
    pub fn as_ptr(&self) -> *const u8 {
        self.alloc.as_ptr::<u8>()
    }

    /// Size in bytes of the code image this mapping holds (not the
    /// page-rounded mapping size).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Call as `fn() -> i32`.
    pub fn call_i32(&self) -> i32 {
        // SAFETY: the mapping is read-execute and holds a complete,
        // finalized code image whose AAPCS64 signature the caller
        // asserts matches by calling this particular helper.
        unsafe {
            let f: extern "C" fn() -> i32 = core::mem::transmute(self.as_ptr());
            f()
        }
    }

    /// Call as `fn(i32, i32) -> i32`.
    pub fn call_i32_i32_i32(&self, a: i32, b: i32) -> i32 {
        // SAFETY: see `call_i32`.
        unsafe {
            let f: extern "C" fn(i32, i32) -> i32 = core::mem::transmute(self.as_ptr());
            f(a, b)
        }
    }

    /// Call as `fn() -> i64`.
    pub fn call_i64(&self) -> i64 {
        // SAFETY: see `call_i32`.
        unsafe {
            let f: extern "C" fn() -> i64 = core::mem::transmute(self.as_ptr());
            f()
        }
    }

    /// Call as `fn(i64, i64) -> i64`.
    pub fn call_i64_i64_i64(&self, a: i64, b: i64) -> i64 {
        // SAFETY: see `call_i32`.
        unsafe {
            let f: extern "C" fn(i64, i64) -> i64 = core::mem::transmute(self.as_ptr());
            f(a, b)
        }
    }

    /// Call as `fn(f64, f64) -> f64`.
    pub fn call_f64_f64_f64(&self, a: f64, b: f64) -> f64 {
        // SAFETY: see `call_i32`.
        unsafe {
            let f: extern "C" fn(f64, f64) -> f64 = core::mem::transmute(self.as_ptr());
            f(a, b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_constant_return_function() {
        // `MOV W0,#42; RET`.
        let code: &[u8] = &[0x40, 0x05, 0x80, 0x52, 0xC0, 0x03, 0x5F, 0xD6];
        let f = JitFunction::new(code).unwrap();
        assert_eq!(f.call_i32(), 42);
    }

    #[test]
    fn runs_an_integer_add_function() {
        // `ADD X0,X0,X1; RET`.
        let code: &[u8] = &[0x00, 0x00, 0x01, 0x8B, 0xC0, 0x03, 0x5F, 0xD6];
        let f = JitFunction::new(code).unwrap();
        assert_eq!(f.call_i64_i64_i64(100, 200), 300);
    }

    #[test]
    fn rejects_an_empty_image() {
        assert!(matches!(JitFunction::new(&[]), Err(CodegenError::Allocation(_))));
    }

    /// End to end: lower `fn add(a, b) -> i64 { iadd a, b }` through
    /// register allocation, ABI finalization, and the peephole pass, JIT
    /// it, and call it with concrete arguments to check the returned sum.
    /// This sequencing (lower -> regalloc -> finalize -> peephole -> encode
    /// -> JIT) only ever appears here, in
    /// a test: the crate intentionally exposes no driver struct that
    /// chains these stages for a caller, since sequencing the passes is
    /// the embedding compiler's job, not this backend's.
    #[test]
    fn compiles_and_runs_an_add_function() {
        use crate::ir::{AbiParam, CallConv, Function, InstructionData, Opcode, Signature, Type};
        use crate::isa::aarch64::abi::Aarch64ABICallee;
        use crate::isa::aarch64::inst::emit;
        use crate::isa::aarch64::lower::lower_function;
        use crate::isa::aarch64::{peephole, regalloc};

        let sig = Signature {
            call_conv: CallConv::AppleAarch64,
            params: alloc::vec![AbiParam::new(Type::I64), AbiParam::new(Type::I64)],
            returns: alloc::vec![AbiParam::new(Type::I64)],
        };
        let mut func = Function::new("add", sig);
        let entry = func.make_block();
        let a = func.dfg.make_value(Type::I64);
        let b = func.dfg.make_value(Type::I64);
        func.layout.block_params[entry] = alloc::vec![a, b];
        let add_inst = func
            .dfg
            .make_inst(InstructionData::Binary { opcode: Opcode::Iadd, args: [a, b] });
        let sum = func.dfg.append_result(add_inst, Type::I64);
        func.layout.append_inst(entry, add_inst);
        let ret_inst = func
            .dfg
            .make_inst(InstructionData::Return { opcode: Opcode::Return, args: alloc::vec![sum] });
        func.layout.append_inst(entry, ret_inst);

        let mut buffer = crate::buffer::MachBuffer::new();
        let lowered = lower_function(&func, &mut buffer).unwrap();
        let (insts, clobbered_int, clobbered_float) = regalloc::allocate(&lowered).unwrap();

        let mut frame = lowered.frame.clone();
        frame.clobbered_int = clobbered_int;
        frame.clobbered_float = clobbered_float;
        let abi = Aarch64ABICallee::new(frame);
        let (insts, _block_starts) = abi
            .finalize(insts, &lowered.return_points, &lowered.block_starts)
            .unwrap();
        let (insts, _stats) = peephole::run(insts);

        for inst in &insts {
            emit(inst, &mut buffer).unwrap();
        }
        let code = buffer.finalize().unwrap();

        let f = JitFunction::new(&code).unwrap();
        assert_eq!(f.call_i64_i64_i64(100, 200), 300);
    }
}
