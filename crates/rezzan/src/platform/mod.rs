#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux as sys;

/// Map anonymous read-write memory at a fixed address. Returns true iff the
/// kernel placed the mapping exactly at `addr`.
///
/// # Safety
/// `addr` and `size` must be page-aligned, `size` non-zero, and the range
/// must not overlap any mapping the caller still needs.
#[inline]
pub unsafe fn map_fixed(addr: usize, size: usize, populate: bool) -> bool {
    sys::map_fixed(addr, size, populate)
}

/// Revoke write access, leaving the region readable.
///
/// # Safety
/// `addr` and `size` must refer to a valid mapped region, page-aligned.
#[inline]
pub unsafe fn protect_read(addr: usize, size: usize) {
    sys::protect_read(addr, size);
}

/// Fill `buf` from the OS entropy source. Returns false on failure.
pub fn fill_random(buf: &mut [u8]) -> bool {
    sys::fill_random(buf)
}

/// Whether stderr is a terminal (enables color diagnostics).
pub fn stderr_is_tty() -> bool {
    sys::stderr_is_tty()
}

/// Kernel thread id of the calling thread.
pub fn thread_id() -> usize {
    sys::thread_id()
}

/// Peak resident set size in bytes and total page faults (minor + major)
/// for this process.
pub fn resource_usage() -> (usize, usize) {
    sys::resource_usage()
}
