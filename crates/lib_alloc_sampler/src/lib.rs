//! Companion crate to [`alloc_sampler`].  Builds a dynamic library that, loaded
//! via `LD_PRELOAD`, samples the `malloc` calls of any program and writes one
//! profile per thread when the thread exits.

use alloc_sampler::native::SamplingAllocator;
use libc::c_void;

/// Interposed `malloc`: offers the call to the current thread's sampler, then
/// forwards it to the next `malloc` in the link chain.
///
/// # Safety
///
/// Same contract as [`libc::malloc`].
#[no_mangle]
pub unsafe extern "C" fn malloc(size: libc::size_t) -> *mut c_void {
    SamplingAllocator::malloc(size)
}
