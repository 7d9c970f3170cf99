use crate::allocator::passthrough;
use crate::allocator::Sanitizer;
use crate::util::UNIT_SIZE;
use crate::{config, diag, platform, token};
use core::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;
const DISABLED: u8 = 3;

pub static INIT_STATE: AtomicU8 = AtomicU8::new(UNINIT);

/// Thread currently running rezzan_init. dlsym may allocate while the host
/// functions are being resolved; that reentrant call must fall through to
/// the passthrough's early arena instead of spinning on its own init.
static INIT_THREAD: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);

static SANITIZER: Sanitizer = Sanitizer::new();

/// Library constructor -- runs before main().
#[used]
#[cfg_attr(target_os = "linux", link_section = ".init_array")]
static CTOR: unsafe extern "C" fn() = {
    unsafe extern "C" fn init() {
        rezzan_init();
    }
    init
};

/// Library destructor -- runs at process exit, after main().
#[used]
#[cfg_attr(target_os = "linux", link_section = ".fini_array")]
static DTOR: unsafe extern "C" fn() = {
    unsafe extern "C" fn fini() {
        rezzan_fini();
    }
    fini
};

pub unsafe fn rezzan_init() {
    match INIT_STATE.compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {}
        Err(INITIALIZING) => {
            if INIT_THREAD.load(Ordering::Acquire) == platform::thread_id() {
                // Reentrant call from inside init (dlsym allocating); the
                // dispatcher will route it to the passthrough.
                return;
            }
            while INIT_STATE.load(Ordering::Acquire) == INITIALIZING {
                core::hint::spin_loop();
            }
            return;
        }
        Err(_) => return,
    }
    INIT_THREAD.store(platform::thread_id(), Ordering::Release);

    config::detect_tty();

    // Resolve the host allocator first: dispatch needs it in disabled mode,
    // and every later step may allocate through it.
    passthrough::resolve_host_functions();

    // Check the kill-switch. The nonce mode stays 0, so every interceptor
    // check is a no-op and all heap traffic passes through.
    if config::is_disabled() {
        INIT_STATE.store(DISABLED, Ordering::Release);
        return;
    }

    config::read_config();
    token::init_nonce_page();
    SANITIZER.init();

    INIT_STATE.store(READY, Ordering::Release);
}

/// Statistics report, enabled by REZZAN_STATS.
pub unsafe fn rezzan_fini() {
    if state() != READY || !config::stats() {
        return;
    }
    let (maxrss, faults) = platform::resource_usage();
    diag::emit_stdout(format_args!("maxrss          = {} bytes", maxrss));
    diag::emit_stdout(format_args!("pagefaults      = {} faults", faults));
    diag::emit_stdout(format_args!(
        "allocated       = {} bytes",
        SANITIZER.allocated_units() * UNIT_SIZE
    ));
    diag::emit_stdout(format_args!(
        "quarantined     = {} bytes",
        SANITIZER.quarantined_units() * UNIT_SIZE
    ));
}

#[cold]
#[inline(never)]
pub unsafe fn ensure_initialized() {
    rezzan_init();
}

#[inline(always)]
pub fn sanitizer() -> &'static Sanitizer {
    &SANITIZER
}

#[inline(always)]
pub fn state() -> u8 {
    INIT_STATE.load(Ordering::Acquire)
}

pub const STATE_READY: u8 = READY;
pub const STATE_DISABLED: u8 = DISABLED;
