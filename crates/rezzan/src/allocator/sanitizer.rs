//! The allocator facade: carves instrumented capsules, validates frees, and
//! keeps the redzone tokens consistent around every transition.

use crate::allocator::passthrough;
use crate::diag::{debug_trace, fatal};
use crate::lock::AllocLock;
use crate::pool::{arena, Arena, Quarantine};
use crate::token;
use crate::util::{align_up, TOKEN_SIZE, UNIT_SIZE};
use crate::config;
use core::cell::UnsafeCell;
use core::ptr::{read_volatile, write_volatile};

/// Capsule size in units for a request of `size` bytes: the payload plus at
/// least one full trailing token, rounded up to a whole unit.
#[inline]
pub const fn capsule_units(size: usize) -> usize {
    (size + TOKEN_SIZE + (UNIT_SIZE - 1)) / UNIT_SIZE
}

/// Heap state guarded by the one allocator lock.
struct Heap {
    arena: Arena,
    quarantine: Quarantine,
}

pub struct Sanitizer {
    lock: AllocLock,
    heap: UnsafeCell<Heap>,
}

// Heap is only ever touched through the lock.
unsafe impl Sync for Sanitizer {}

impl Sanitizer {
    pub const fn new() -> Self {
        Sanitizer {
            lock: AllocLock::new(),
            heap: UnsafeCell::new(Heap {
                arena: Arena::new(),
                quarantine: Quarantine::new(),
            }),
        }
    }

    /// Bring up the pool and the quarantine node pool.
    ///
    /// # Safety
    /// Must run once, during single-threaded init, after config and the
    /// nonce page are ready.
    pub unsafe fn init(&self) {
        let _guard = self.lock.acquire();
        let heap = &mut *self.heap.get();
        heap.arena.init();
        heap.quarantine.init();
    }

    /// Allocate `size` bytes. Never returns null; pool exhaustion is fatal.
    ///
    /// # Safety
    /// The sanitizer must be initialized.
    pub unsafe fn malloc(&self, size: usize) -> *mut u8 {
        let size = if size == 0 { 1 } else { size };
        let units = capsule_units(size);

        let (ptr, from_quarantine) = {
            let _guard = self.lock.acquire();
            let heap = &mut *self.heap.get();
            let mut ptr = core::ptr::null_mut();
            if heap.quarantine.usage() > config::quarantine_units() {
                if let Some(p) = heap.quarantine.try_allocate(units) {
                    ptr = p;
                }
            }
            let from_quarantine = !ptr.is_null();
            if ptr.is_null() {
                ptr = match heap.arena.carve(units) {
                    Some(p) => p,
                    None => fatal!("failed to allocate memory: pool of {} bytes exhausted",
                        config::pool_units() * UNIT_SIZE),
                };
            }
            // The last word must hold a valid token before the lock drops:
            // otherwise a concurrent string scan could walk off the capsule.
            let last = (ptr as usize + units * UNIT_SIZE - TOKEN_SIZE) as *mut u64;
            token::poison(last, size);
            (ptr, from_quarantine)
        };

        // A quarantined capsule was poisoned throughout; scrub the payload.
        if from_quarantine {
            let words = align_up(size, TOKEN_SIZE) / TOKEN_SIZE;
            let base = ptr as *mut u64;
            for w in 0..words {
                token::zero_token(base.add(w));
            }
        }

        // Fill the redzone. The lowest redzone token records size % 8 so the
        // checker can police the final partial word; every deeper token is a
        // plain full-word token.
        let capsule_end = ptr as usize + units * UNIT_SIZE;
        let first_redzone = align_up(ptr as usize + size, TOKEN_SIZE);
        token::poison(first_redzone as *mut u64, size);
        let mut word = first_redzone + TOKEN_SIZE;
        while word < capsule_end {
            token::poison(word as *mut u64, 0);
            word += TOKEN_SIZE;
        }

        debug_trace!(
            "malloc({}) = {:p} [units={} ({}), alloc={}]",
            size,
            ptr,
            units,
            units * UNIT_SIZE,
            if from_quarantine { 'Q' } else { 'P' }
        );
        if config::checks() {
            self.self_check(ptr, size, units, from_quarantine);
        }
        ptr
    }

    /// Validate the capsule layout just established by malloc. Failures here
    /// are sanitizer bugs, not application bugs.
    unsafe fn self_check(&self, ptr: *mut u8, size: usize, units: usize, from_quarantine: bool) {
        let tag = if from_quarantine { 'Q' } else { 'P' };
        if ptr as usize % UNIT_SIZE != 0 {
            fatal!("invalid object alignment detected; {:p} % 16 != 0", ptr);
        }
        if size >= units * UNIT_SIZE {
            fatal!(
                "invalid object length detected; {} >= {} [alloc={}]",
                size,
                units * UNIT_SIZE,
                tag
            );
        }
        let base = ptr as *const u64;
        if !token::is_poisoned(base.sub(1)) {
            fatal!(
                "invalid object base detected [ptr={:p}, size={}, alloc={}]",
                ptr,
                size,
                tag
            );
        }
        let payload_words = align_up(size, TOKEN_SIZE) / TOKEN_SIZE;
        for w in 0..payload_words {
            if token::is_poisoned(base.add(w)) {
                fatal!(
                    "invalid object initialization detected [size={}, alloc={}]",
                    size,
                    tag
                );
            }
        }
        if !token::is_poisoned(base.add(payload_words)) {
            fatal!(
                "invalid redzone detected; missing token [size={}, alloc={}]",
                size,
                tag
            );
        }
        for w in payload_words + 1..2 * units {
            if !token::is_poisoned(base.add(w)) {
                fatal!(
                    "invalid redzone detected; missing extra token [size={}, alloc={}]",
                    size,
                    tag
                );
            }
        }
    }

    /// Release an allocation: validate, poison the capsule, park it in the
    /// quarantine. The poisoning walk runs outside the lock; the capsule is
    /// still the caller's until it is inserted, so nobody else can observe
    /// the intermediate state.
    ///
    /// # Safety
    /// `ptr` must be null, foreign, or a live pointer returned by malloc.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        debug_trace!(
            "free({:p}) [usage={}, limit={}]",
            ptr,
            self.quarantined_units(),
            config::quarantine_units()
        );
        if ptr as usize % UNIT_SIZE != 0 {
            fatal!(
                "bad free detected with pointer {:p}; pointer is not 16-byte aligned",
                ptr
            );
        }
        if !arena::contains(ptr) {
            // Not allocated by us.
            passthrough::free(ptr);
            return;
        }
        let base = ptr as *mut u64;
        if token::is_poisoned(base) {
            fatal!(
                "bad or double-free detected with pointer {:p}; memory is already poisoned",
                ptr
            );
        }
        if !token::is_poisoned(base.sub(1)) {
            fatal!(
                "bad free detected with pointer {:p}; pointer does not point to the base of the object",
                ptr
            );
        }

        // Poison forward to the pre-existing trailing sentinel; the distance
        // walked recovers the capsule size.
        let mut w = 0;
        while !token::is_poisoned(base.add(w)) {
            token::poison(base.add(w), 0);
            w += 1;
        }
        let mut words = w + 1;
        if words % 2 == 1 {
            words += 1;
        }
        let units = words / 2;

        let offset = arena::unit_offset(ptr);
        let _guard = self.lock.acquire();
        let heap = &mut *self.heap.get();
        heap.quarantine.insert(offset as u32, units as u32);
    }

    /// Reallocate by scan-copy-release. The old payload bound is recovered
    /// from the token layout, rounded up to the word it ends in.
    ///
    /// # Safety
    /// `ptr` must be null, foreign, or a live pointer returned by malloc.
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.malloc(size);
        }
        if ptr as usize % UNIT_SIZE != 0 {
            fatal!(
                "bad realloc detected with pointer {:p}; pointer is not 16-byte aligned",
                ptr
            );
        }
        if !arena::contains(ptr) {
            // Not allocated by us.
            return passthrough::realloc(ptr, size);
        }

        let base = ptr as *const u64;
        let mut old_words = 0;
        while !token::is_poisoned(base.add(old_words)) {
            old_words += 1;
        }
        let old_size = old_words * TOKEN_SIZE;
        let copy_size = old_size.min(size);

        let new_ptr = self.malloc(size);
        debug_trace!("realloc(old:{:p}, copy:{}) = {:p}", ptr, copy_size, new_ptr);
        for i in 0..copy_size {
            write_volatile(new_ptr.add(i), read_volatile(ptr.add(i)));
        }
        self.free(ptr);
        new_ptr
    }

    /// calloc. The multiplication deliberately wraps rather than reporting
    /// overflow, matching the runtime this reimplements; malloc then sizes
    /// the capsule from the wrapped value.
    ///
    /// # Safety
    /// The sanitizer must be initialized.
    pub unsafe fn calloc(&self, nmemb: usize, size: usize) -> *mut u8 {
        let total = nmemb.wrapping_mul(size);
        // Fresh pool pages are zero by mapping; quarantine reuse is zeroed
        // in malloc. No extra pass needed.
        let ptr = self.malloc(total);
        if config::checks() {
            for i in 0..total {
                if read_volatile(ptr.add(i)) != 0 {
                    fatal!("invalid calloc allocation; byte {} is non-zero", i);
                }
            }
        }
        ptr
    }

    /// Usable payload size: whole non-poisoned words from the base.
    ///
    /// # Safety
    /// `ptr` must be null, foreign, or a live pointer returned by malloc.
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        if ptr.is_null() {
            return 0;
        }
        if !arena::contains(ptr) {
            // Not allocated by us.
            return passthrough::malloc_usable_size(ptr);
        }
        let base = ptr as *const u64;
        let mut words = 0;
        while !token::is_poisoned(base.add(words)) {
            words += 1;
        }
        words * TOKEN_SIZE
    }

    /// Units ever carved from the pool (for the exit statistics).
    pub fn allocated_units(&self) -> usize {
        let _guard = self.lock.acquire();
        unsafe { (*self.heap.get()).arena.allocated_units() }
    }

    /// Units currently parked in the quarantine (for the exit statistics).
    pub fn quarantined_units(&self) -> usize {
        let _guard = self.lock.acquire();
        unsafe { (*self.heap.get()).quarantine.usage() }
    }
}
