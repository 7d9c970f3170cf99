use crate::diag::fatal;
use crate::util::{
    DEFAULT_POOL_BYTES, DEFAULT_QUARANTINE_BYTES, PAGE_SIZE, POOL_GROW_UNITS, UNIT_SIZE,
};
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// Cached config values (read once at init, never allocate).
static NONCE_MODE: AtomicU8 = AtomicU8::new(0);
static QUARANTINE_UNITS: AtomicUsize = AtomicUsize::new(0);
static POOL_UNITS: AtomicUsize = AtomicUsize::new(0);
static DEBUG: AtomicBool = AtomicBool::new(false);
static CHECKS: AtomicBool = AtomicBool::new(false);
static POPULATE: AtomicBool = AtomicBool::new(false);
static STATS: AtomicBool = AtomicBool::new(false);
static PRINTF: AtomicBool = AtomicBool::new(false);
static TTY: AtomicBool = AtomicBool::new(false);

/// Record whether stderr is a terminal. Called before anything can fail so
/// that startup diagnostics are colored correctly.
pub fn detect_tty() {
    TTY.store(crate::platform::stderr_is_tty(), Ordering::Relaxed);
}

/// Check the kill-switch.
///
/// # Safety
/// Calls libc::getenv, so must run during single-threaded init.
pub unsafe fn is_disabled() -> bool {
    getenv_u64(b"REZZAN_DISABLED\0").unwrap_or(0) != 0
}

/// Read and validate all configuration variables.
/// Unrecognized or impossible values are fatal.
///
/// # Safety
/// Calls libc::getenv, so must run during single-threaded init.
pub unsafe fn read_config() {
    let nonce_size = getenv_u64(b"REZZAN_NONCE_SIZE\0").unwrap_or(61);
    match nonce_size {
        61 | 64 => NONCE_MODE.store(nonce_size as u8, Ordering::Relaxed),
        _ => fatal!(
            "invalid nonce size ({}); must be one of {{61,64}}",
            nonce_size
        ),
    }

    let quarantine_bytes =
        getenv_u64(b"REZZAN_QUARANTINE_SIZE\0").unwrap_or(DEFAULT_QUARANTINE_BYTES as u64) as usize;
    QUARANTINE_UNITS.store(quarantine_bytes / UNIT_SIZE, Ordering::Relaxed);

    let pool_bytes = getenv_u64(b"REZZAN_POOL_SIZE\0").unwrap_or(DEFAULT_POOL_BYTES as u64) as usize;
    if pool_bytes < POOL_GROW_UNITS * UNIT_SIZE {
        fatal!(
            "invalid pool size ({}); must be greater than {}",
            pool_bytes,
            POOL_GROW_UNITS * UNIT_SIZE
        );
    }
    if pool_bytes % PAGE_SIZE != 0 {
        fatal!(
            "invalid pool size ({}); must be divisible by the page size ({})",
            pool_bytes,
            PAGE_SIZE
        );
    }
    // Quarantine nodes index the pool with 32-bit unit offsets.
    if pool_bytes / UNIT_SIZE > u32::MAX as usize {
        fatal!(
            "invalid pool size ({}); must be at most {} bytes",
            pool_bytes,
            u32::MAX as usize * UNIT_SIZE
        );
    }
    POOL_UNITS.store(pool_bytes / UNIT_SIZE, Ordering::Relaxed);

    DEBUG.store(getenv_u64(b"REZZAN_DEBUG\0").unwrap_or(0) != 0, Ordering::Relaxed);
    CHECKS.store(getenv_u64(b"REZZAN_CHECKS\0").unwrap_or(0) != 0, Ordering::Relaxed);
    POPULATE.store(
        getenv_u64(b"REZZAN_POPULATE\0").unwrap_or(0) != 0,
        Ordering::Relaxed,
    );
    STATS.store(getenv_u64(b"REZZAN_STATS\0").unwrap_or(0) != 0, Ordering::Relaxed);
    PRINTF.store(getenv_u64(b"REZZAN_PRINTF\0").unwrap_or(0) != 0, Ordering::Relaxed);
}

/// Nonce mode: 61 or 64 once initialized, 0 beforehand (all poison tests
/// report false until the nonce page exists).
#[inline(always)]
pub fn nonce_mode() -> u8 {
    NONCE_MODE.load(Ordering::Relaxed)
}

pub fn quarantine_units() -> usize {
    QUARANTINE_UNITS.load(Ordering::Relaxed)
}

pub fn pool_units() -> usize {
    POOL_UNITS.load(Ordering::Relaxed)
}

#[inline(always)]
pub fn debug() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

pub fn checks() -> bool {
    CHECKS.load(Ordering::Relaxed)
}

pub fn populate() -> bool {
    POPULATE.load(Ordering::Relaxed)
}

pub fn stats() -> bool {
    STATS.load(Ordering::Relaxed)
}

#[inline(always)]
pub fn printf_check() -> bool {
    PRINTF.load(Ordering::Relaxed)
}

pub fn tty() -> bool {
    TTY.load(Ordering::Relaxed)
}

/// Parse an environment variable as an integer (decimal, 0x-prefixed hex,
/// or 0-prefixed octal, like strtoull with base 0). A set but unparseable
/// value is fatal.
///
/// # Safety
/// Calls libc::getenv.
unsafe fn getenv_u64(key: &[u8]) -> Option<u64> {
    let val = libc::getenv(key.as_ptr() as *const libc::c_char);
    if val.is_null() {
        return None;
    }
    let mut len = 0;
    while *val.add(len) != 0 {
        len += 1;
    }
    let bytes = core::slice::from_raw_parts(val as *const u8, len);
    match parse_u64(bytes) {
        Some(v) => Some(v),
        None => fatal!(
            "failed to parse string \"{}\" into an integer",
            core::str::from_utf8(bytes).unwrap_or("<non-utf8>")
        ),
    }
}

/// strtoull(str, ..., 0)-style integer parse: 0x/0X prefix selects hex, a
/// leading 0 selects octal, otherwise decimal. Rejects empty strings,
/// trailing garbage, and overflow.
fn parse_u64(s: &[u8]) -> Option<u64> {
    let (digits, radix) = if s.len() > 2 && (s.starts_with(b"0x") || s.starts_with(b"0X")) {
        (&s[2..], 16)
    } else if s.len() > 1 && s[0] == b'0' {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    if digits.is_empty() {
        return None;
    }
    let mut result: u64 = 0;
    for &b in digits {
        let digit = match b {
            b'0'..=b'9' => (b - b'0') as u64,
            b'a'..=b'f' if radix == 16 => (b - b'a' + 10) as u64,
            b'A'..=b'F' if radix == 16 => (b - b'A' + 10) as u64,
            _ => return None,
        };
        if digit >= radix {
            return None;
        }
        result = result.checked_mul(radix)?.checked_add(digit)?;
    }
    Some(result)
}
