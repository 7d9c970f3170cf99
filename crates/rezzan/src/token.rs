//! Token primitives and the nonce page.
//!
//! A token is the 8-byte value that marks a word as poisoned. It is derived
//! from a per-process random nonce held in a read-only page at a fixed low
//! address, so testing a word compiles to a load from a literal address plus
//! an add-and-compare against zero; there is no equality test with a known
//! constant that a blind overwrite could satisfy.
//!
//! Encodings:
//! - 64-bit mode: token = -nonce (two's complement).
//! - 61-bit mode: token = ((-nonce) & !7) ^ boundary, where boundary in 0..8
//!   records how many bytes of the preceding partial word are live payload
//!   (0 meaning a full 8). The nonce's low three bits are cleared at startup
//!   so a zero boundary still encodes a valid token.

use crate::config;
use crate::diag::fatal;
use crate::platform;
use crate::util::{NONCE_ADDR, PAGE_SIZE, TOKEN_SIZE};
use core::sync::atomic::{AtomicU64, Ordering};

#[inline(always)]
fn nonce() -> u64 {
    unsafe { *(NONCE_ADDR as *const u64) }
}

// Token stores and loads must be single untearable 8-byte accesses: the
// bulk-routine checkers read words concurrently without the allocator lock.
// Relaxed atomics compile to plain aligned moves.

#[inline(always)]
unsafe fn load(slot: *const u64) -> u64 {
    (*(slot as *const AtomicU64)).load(Ordering::Relaxed)
}

#[inline(always)]
unsafe fn store(slot: *mut u64, value: u64) {
    (*(slot as *const AtomicU64)).store(value, Ordering::Relaxed)
}

/// # Safety
/// `slot` must be 8-byte aligned and writable.
#[inline(always)]
pub unsafe fn set_token64(slot: *mut u64) {
    store(slot, nonce().wrapping_neg());
}

/// # Safety
/// `slot` must be 8-byte aligned and readable.
#[inline(always)]
pub unsafe fn test_token64(slot: *const u64) -> bool {
    load(slot).wrapping_add(nonce()) == 0
}

/// # Safety
/// `slot` must be 8-byte aligned and writable. `boundary < 8`.
#[inline(always)]
pub unsafe fn set_token61(slot: *mut u64, boundary: usize) {
    store(slot, (nonce().wrapping_neg() & !7) ^ boundary as u64);
}

/// # Safety
/// `slot` must be 8-byte aligned and readable.
#[inline(always)]
pub unsafe fn test_token61(slot: *const u64) -> bool {
    (load(slot) & !7).wrapping_add(nonce()) == 0
}

/// Boundary field of a 61-bit token (only meaningful when `test_token61`
/// holds for the slot).
///
/// # Safety
/// `slot` must be 8-byte aligned and readable.
#[inline(always)]
pub unsafe fn boundary(slot: *const u64) -> usize {
    (load(slot) & 7) as usize
}

/// # Safety
/// `slot` must be 8-byte aligned and writable.
#[inline(always)]
pub unsafe fn zero_token(slot: *mut u64) {
    store(slot, 0);
}

/// Write a poison token into `slot`. In 61-bit mode the boundary field
/// records `size % 8`; pass 0 for a full-word token.
///
/// # Safety
/// `slot` must be 8-byte aligned and writable.
#[inline(always)]
pub unsafe fn poison(slot: *mut u64, size: usize) {
    match config::nonce_mode() {
        61 => set_token61(slot, size % TOKEN_SIZE),
        64 => set_token64(slot),
        // Before init there is no nonce page to consult.
        _ => {}
    }
}

/// Test whether `slot` holds a poison token. Reports false before init.
///
/// # Safety
/// `slot` must be 8-byte aligned and readable.
#[inline(always)]
pub unsafe fn is_poisoned(slot: *const u64) -> bool {
    match config::nonce_mode() {
        61 => test_token61(slot),
        64 => test_token64(slot),
        _ => false,
    }
}

/// Map the nonce page, fill the nonce from the OS entropy source, and make
/// the page read-only. Fatal on any failure.
///
/// # Safety
/// Must run once, during single-threaded init, after config is read.
pub unsafe fn init_nonce_page() {
    if !platform::map_fixed(NONCE_ADDR, PAGE_SIZE, false) {
        fatal!("failed to allocate nonce memory of size {}", PAGE_SIZE);
    }
    let page = NONCE_ADDR as *mut u8;
    let buf = core::slice::from_raw_parts_mut(page, TOKEN_SIZE);
    if !platform::fill_random(buf) {
        fatal!("failed to initialize random nonce");
    }
    if config::nonce_mode() == 61 {
        // A zero boundary field must encode a valid token.
        *(page as *mut u64) &= !7;
    }
    platform::protect_read(NONCE_ADDR, PAGE_SIZE);
}
