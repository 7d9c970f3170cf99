//! The C heap symbol surface.
//!
//! These definitions shadow the host allocator's symbols when the library is
//! preloaded (or linked), and route each call to the sanitizer or, when the
//! kill-switch is set, straight through to the host allocator.

use crate::allocator::passthrough;
use crate::init::{self, STATE_DISABLED, STATE_READY};
use core::ffi::c_void;

/// Dispatch macro: check init state and route to the sanitizer or the
/// passthrough.
macro_rules! dispatch {
    ($sanitized:expr, $passthrough:expr) => {{
        match init::state() {
            STATE_READY => $sanitized,
            STATE_DISABLED => $passthrough,
            _ => {
                init::ensure_initialized();
                match init::state() {
                    STATE_READY => $sanitized,
                    _ => $passthrough,
                }
            }
        }
    }};
}

#[no_mangle]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    dispatch!(
        init::sanitizer().malloc(size) as *mut c_void,
        passthrough::malloc(size) as *mut c_void
    )
}

#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    dispatch!(
        init::sanitizer().free(ptr as *mut u8),
        passthrough::free(ptr as *mut u8)
    );
}

#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    dispatch!(
        init::sanitizer().realloc(ptr as *mut u8, size) as *mut c_void,
        passthrough::realloc(ptr as *mut u8, size) as *mut c_void
    )
}

#[no_mangle]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    dispatch!(
        init::sanitizer().calloc(nmemb, size) as *mut c_void,
        passthrough::calloc(nmemb, size) as *mut c_void
    )
}

#[no_mangle]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
    if ptr.is_null() {
        return 0;
    }
    dispatch!(
        init::sanitizer().usable_size(ptr as *mut u8),
        passthrough::malloc_usable_size(ptr as *mut u8)
    )
}

// ============================================================================
// C++ operator new / operator delete (Itanium mangled names)
// ============================================================================

/// operator new(size_t)
#[export_name = "_Znwm"]
pub unsafe extern "C" fn cxx_new(size: usize) -> *mut c_void {
    malloc(size)
}

/// operator new[](size_t)
#[export_name = "_Znam"]
pub unsafe extern "C" fn cxx_new_array(size: usize) -> *mut c_void {
    malloc(size)
}

/// operator new(size_t, nothrow_t const&)
#[export_name = "_ZnwmRKSt9nothrow_t"]
pub unsafe extern "C" fn cxx_new_nothrow(size: usize, _tag: *const c_void) -> *mut c_void {
    malloc(size)
}

/// operator new[](size_t, nothrow_t const&)
#[export_name = "_ZnamRKSt9nothrow_t"]
pub unsafe extern "C" fn cxx_new_array_nothrow(size: usize, _tag: *const c_void) -> *mut c_void {
    malloc(size)
}

/// operator delete(void*)
#[export_name = "_ZdlPv"]
pub unsafe extern "C" fn cxx_delete(ptr: *mut c_void) {
    free(ptr)
}

/// operator delete[](void*)
#[export_name = "_ZdaPv"]
pub unsafe extern "C" fn cxx_delete_array(ptr: *mut c_void) {
    free(ptr)
}
