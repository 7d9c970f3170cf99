//! Delegation to the host C library.
//!
//! This library exports `malloc`/`free`/... itself, so a delegated call can
//! never go through `libc::` (the PLT would route straight back here).
//! Every host function ReZZan forwards to is resolved with
//! dlsym(RTLD_NEXT, ...) instead, which yields the next definition in link
//! order, i.e. the host allocator behind us.

use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);
type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
type UsableSizeFn = unsafe extern "C" fn(*mut c_void) -> usize;
/// va_list is passed as the pointer it decays to on x86_64.
type VsnprintfFn =
    unsafe extern "C" fn(*mut libc::c_char, usize, *const libc::c_char, *mut c_void) -> libc::c_int;
type VprintfFn = unsafe extern "C" fn(*const libc::c_char, *mut c_void) -> libc::c_int;

/// The host functions ReZZan ever delegates to: the heap entry points (for
/// disabled mode and foreign pointers) and the two formatters behind the
/// variadic interceptors.
#[derive(Clone, Copy)]
enum Host {
    Malloc,
    Free,
    Realloc,
    Calloc,
    UsableSize,
    Vsnprintf,
    Vprintf,
}

const HOST_COUNT: usize = 7;

const HOST_NAMES: [&core::ffi::CStr; HOST_COUNT] = [
    c"malloc",
    c"free",
    c"realloc",
    c"calloc",
    c"malloc_usable_size",
    c"vsnprintf",
    c"vprintf",
];

/// Resolved addresses, 0 while unknown.
static HOST_FNS: [AtomicUsize; HOST_COUNT] = [const { AtomicUsize::new(0) }; HOST_COUNT];

const RTLD_NEXT: *mut c_void = -1isize as *mut c_void;

/// Look up one host function, resolving it on first use. A call can arrive
/// before the constructor has run (another library's constructor touching
/// the heap), so the fast path is just an atomic load.
#[inline]
fn host_fn(which: Host) -> usize {
    let cached = HOST_FNS[which as usize].load(Ordering::Acquire);
    if cached != 0 {
        return cached;
    }
    resolve(which)
}

#[cold]
fn resolve(which: Host) -> usize {
    let addr = unsafe { libc::dlsym(RTLD_NEXT, HOST_NAMES[which as usize].as_ptr()) } as usize;
    if addr == 0 {
        return 0;
    }
    let slot = &HOST_FNS[which as usize];
    // Concurrent resolvers converge on whichever address landed first.
    let _ = slot.compare_exchange(0, addr, Ordering::Release, Ordering::Acquire);
    slot.load(Ordering::Acquire)
}

/// Resolve the whole table eagerly.
///
/// # Safety
/// Must be called from single-threaded context during init.
pub unsafe fn resolve_host_functions() {
    for which in [
        Host::Malloc,
        Host::Free,
        Host::Realloc,
        Host::Calloc,
        Host::UsableSize,
        Host::Vsnprintf,
        Host::Vprintf,
    ] {
        resolve(which);
    }
}

// dlsym itself can allocate (dlerror state) before the host malloc address
// is known. Those few early allocations are served from a small static
// arena with a monotone cursor: nothing in it is ever reclaimed or reused,
// which keeps it trivially thread-safe and keeps unused regions zero.
// One page is far more than glibc's dlerror bookkeeping needs.
const EARLY_HEAP_SIZE: usize = 4096;
static EARLY_HEAP_USED: AtomicUsize = AtomicUsize::new(0);
static mut EARLY_HEAP: [u8; EARLY_HEAP_SIZE] = [0; EARLY_HEAP_SIZE];

unsafe fn early_alloc(size: usize) -> *mut u8 {
    let need = (size + 15) & !15;
    let start = EARLY_HEAP_USED.fetch_add(need, Ordering::Relaxed);
    if start + need > EARLY_HEAP_SIZE {
        return ptr::null_mut();
    }
    core::ptr::addr_of_mut!(EARLY_HEAP).cast::<u8>().add(start)
}

fn is_early_ptr(ptr: *const u8) -> bool {
    let base = core::ptr::addr_of!(EARLY_HEAP) as usize;
    (base..base + EARLY_HEAP_SIZE).contains(&(ptr as usize))
}

/// # Safety
/// Caller must ensure `size` is valid.
#[inline]
pub unsafe fn malloc(size: usize) -> *mut u8 {
    let f = host_fn(Host::Malloc);
    if f == 0 {
        return early_alloc(size);
    }
    let func: MallocFn = core::mem::transmute(f);
    func(size) as *mut u8
}

/// # Safety
/// `ptr` must be null or a valid allocation pointer.
#[inline]
pub unsafe fn free(ptr: *mut u8) {
    if ptr.is_null() || is_early_ptr(ptr) {
        return;
    }
    let f = host_fn(Host::Free);
    if f != 0 {
        let func: FreeFn = core::mem::transmute(f);
        func(ptr as *mut c_void);
    }
}

/// # Safety
/// `ptr` must be null or a valid allocation pointer.
#[inline]
pub unsafe fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    if ptr.is_null() {
        return malloc(size);
    }
    if is_early_ptr(ptr) {
        // Early memory has no recorded size; copy up to the end of the
        // arena so the live prefix survives.
        let new = malloc(size);
        if !new.is_null() {
            let base = core::ptr::addr_of!(EARLY_HEAP) as usize;
            let tail = EARLY_HEAP_SIZE - (ptr as usize - base);
            ptr::copy_nonoverlapping(ptr, new, size.min(tail));
        }
        return new;
    }
    let f = host_fn(Host::Realloc);
    if f == 0 {
        return ptr::null_mut();
    }
    let func: ReallocFn = core::mem::transmute(f);
    func(ptr as *mut c_void, size) as *mut u8
}

/// # Safety
/// Caller must ensure `nmemb` and `size` are valid.
#[inline]
pub unsafe fn calloc(nmemb: usize, size: usize) -> *mut u8 {
    let f = host_fn(Host::Calloc);
    if f == 0 {
        // The early arena is zero-filled and never recycled, so a fresh
        // region needs no extra zeroing.
        let total = match nmemb.checked_mul(size) {
            Some(t) => t,
            None => return ptr::null_mut(),
        };
        return early_alloc(total);
    }
    let func: CallocFn = core::mem::transmute(f);
    func(nmemb, size) as *mut u8
}

/// # Safety
/// `ptr` must be a valid allocation pointer.
#[inline]
pub unsafe fn malloc_usable_size(ptr: *mut u8) -> usize {
    let f = host_fn(Host::UsableSize);
    if f == 0 {
        return 0;
    }
    let func: UsableSizeFn = core::mem::transmute(f);
    func(ptr as *mut c_void)
}

/// Delegate formatting to the host vsnprintf.
///
/// # Safety
/// `ap` must be a valid x86_64 SysV va_list positioned at the variadic args.
#[inline]
pub unsafe fn vsnprintf(
    dst: *mut libc::c_char,
    n: usize,
    format: *const libc::c_char,
    ap: *mut c_void,
) -> libc::c_int {
    let f = host_fn(Host::Vsnprintf);
    if f == 0 {
        return -1;
    }
    let func: VsnprintfFn = core::mem::transmute(f);
    func(dst, n, format, ap)
}

/// Delegate formatting to the host vprintf.
///
/// # Safety
/// `ap` must be a valid x86_64 SysV va_list positioned at the variadic args.
#[inline]
pub unsafe fn vprintf(format: *const libc::c_char, ap: *mut c_void) -> libc::c_int {
    let f = host_fn(Host::Vprintf);
    if f == 0 {
        return -1;
    }
    let func: VprintfFn = core::mem::transmute(f);
    func(format, ap)
}
