//! The access checker: the predicate every instrumented bulk routine runs
//! before touching memory.

use crate::config;
use crate::diag::fatal;
use crate::token;
use crate::util::{PAGE_SIZE, TOKEN_SIZE};

/// Verify that no 8-byte word overlapping `[ptr, ptr + n)` is poisoned, and
/// in 61-bit mode that a range ending mid-word does not extend past the
/// boundary recorded in the trailing token. Traps on violation.
///
/// # Safety
/// Every word overlapping the range must be mapped readable.
pub unsafe fn check_range(ptr: *const u8, n: usize) {
    // Before init there is no nonce page; nothing is poisoned yet.
    if n == 0 || config::nonce_mode() == 0 {
        return;
    }
    let addr = ptr as usize;
    let front_delta = addr % TOKEN_SIZE;
    let check_len = n + front_delta;
    let base = (addr - front_delta) as *const u64;
    let end_delta = check_len % TOKEN_SIZE;
    let words = (check_len + TOKEN_SIZE - 1) / TOKEN_SIZE;
    for w in 0..words {
        if token::is_poisoned(base.add(w)) {
            fatal!(
                "out-of-bounds or use-after-free access detected; word {:p} is poisoned [access={:p}, size={}]",
                base.add(w),
                ptr,
                n
            );
        }
    }
    // Byte-accurate tail: when the range ends mid-word, the next word's
    // token (if it is one) records how many bytes of this word are payload.
    if end_delta != 0 && config::nonce_mode() == 61 {
        let tail = base.add(words);
        if (tail as usize) % PAGE_SIZE != 0 && token::test_token61(tail) {
            let boundary = token::boundary(tail);
            if boundary != 0 && boundary < end_delta {
                fatal!(
                    "out-of-bounds access detected; range ends {} byte(s) past the object [access={:p}, size={}]",
                    end_delta - boundary,
                    ptr,
                    n
                );
            }
        }
    }
}
