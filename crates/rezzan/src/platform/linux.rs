/// Map anonymous read-write memory at a fixed address.
///
/// Uses MAP_FIXED_NOREPLACE so an unexpected occupant of the range shows up
/// as a failed mapping rather than a silent clobber; the caller treats any
/// failure as fatal, which is the same contract either way.
///
/// # Safety
/// `addr` and `size` must be page-aligned and `size` non-zero.
pub unsafe fn map_fixed(addr: usize, size: usize, populate: bool) -> bool {
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE;
    if populate {
        flags |= libc::MAP_POPULATE;
    }
    let result = libc::mmap(
        addr as *mut libc::c_void,
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        flags,
        -1,
        0,
    );
    result != libc::MAP_FAILED && result == addr as *mut libc::c_void
}

/// Revoke write access, leaving the region readable.
///
/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn protect_read(addr: usize, size: usize) {
    libc::mprotect(addr as *mut libc::c_void, size, libc::PROT_READ);
}

/// Fill `buf` from the kernel entropy pool via SYS_getrandom.
/// Loops on short reads; returns false on a hard failure.
pub fn fill_random(buf: &mut [u8]) -> bool {
    let mut off = 0;
    while off < buf.len() {
        let n = unsafe {
            libc::syscall(
                libc::SYS_getrandom,
                buf.as_mut_ptr().add(off) as *mut libc::c_void,
                buf.len() - off,
                0,
            )
        };
        if n <= 0 {
            return false;
        }
        off += n as usize;
    }
    true
}

pub fn stderr_is_tty() -> bool {
    unsafe { libc::isatty(libc::STDERR_FILENO) == 1 }
}

pub fn thread_id() -> usize {
    unsafe { libc::syscall(libc::SYS_gettid) as usize }
}

/// Peak RSS in bytes and total page faults from getrusage(RUSAGE_SELF).
pub fn resource_usage() -> (usize, usize) {
    unsafe {
        let mut usage: libc::rusage = core::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) != 0 {
            return (0, 0);
        }
        // ru_maxrss is reported in kilobytes on Linux.
        let maxrss = (usage.ru_maxrss as usize) * 1024;
        let faults = usage.ru_minflt as usize + usage.ru_majflt as usize;
        (maxrss, faults)
    }
}
