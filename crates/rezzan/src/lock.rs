//! The process-wide allocator lock.
//!
//! One lock covers all heap state (arena cursors, quarantine buckets, node
//! pool); allocation is not a hot path for the sanitizer's workloads.
//! std::sync::Mutex may allocate on contention, which would recurse into the
//! very allocator it is guarding, so this is a raw three-state futex word.

use core::sync::atomic::{AtomicU32, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
/// Locked with at least one sleeper; release must issue a wake.
const CONTENDED: u32 = 2;

pub struct AllocLock {
    state: AtomicU32,
}

impl AllocLock {
    pub const fn new() -> Self {
        AllocLock {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    /// Acquire the lock, sleeping on the futex when contended. The returned
    /// guard releases on drop.
    #[inline]
    pub fn acquire(&self) -> LockGuard<'_> {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.acquire_contended();
        }
        LockGuard { lock: self }
    }

    #[cold]
    fn acquire_contended(&self) {
        // Pin the word at CONTENDED while we sleep, so whoever releases
        // knows a wake is owed. Claiming an UNLOCKED word with CONTENDED is
        // pessimistic but safe: the matching release just wakes nobody.
        while self.state.swap(CONTENDED, Ordering::Acquire) != UNLOCKED {
            futex_wait(&self.state, CONTENDED);
        }
    }

    #[inline]
    fn release(&self) {
        if self.state.swap(UNLOCKED, Ordering::Release) == CONTENDED {
            futex_wake(&self.state);
        }
    }
}

pub struct LockGuard<'a> {
    lock: &'a AllocLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(target_os = "linux")]
fn futex_wait(word: &AtomicU32, expect: u32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32,
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expect,
            core::ptr::null::<libc::timespec>(),
        );
    }
}

#[cfg(target_os = "linux")]
fn futex_wake(word: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            1i32,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn futex_wait(word: &AtomicU32, expect: u32) {
    if word.load(Ordering::Relaxed) == expect {
        core::hint::spin_loop();
    }
}

#[cfg(not(target_os = "linux"))]
fn futex_wake(_word: &AtomicU32) {}
