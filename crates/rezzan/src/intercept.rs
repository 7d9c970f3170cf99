//! Instrumented replacements for the bulk and string routines.
//!
//! Every entry point checks the full byte range it is about to touch before
//! touching it, so aborts are precise and the destination is never left
//! half-written. The operation bodies are self-contained loops: nothing here
//! may re-enter the allocator, and the copy loops use volatile accesses so
//! the compiler cannot collapse them back into calls to the very symbols
//! they implement.

use crate::check::check_range;
use crate::diag::fatal;
use crate::token;
use crate::util::{align_down, TOKEN_SIZE};
use core::ffi::c_void;
use core::ptr::{read_volatile, write_volatile};

#[inline(never)]
unsafe fn copy_forward(dst: *mut u8, src: *const u8, n: usize) {
    let mut i = 0;
    while i < n {
        write_volatile(dst.add(i), read_volatile(src.add(i)));
        i += 1;
    }
}

#[inline(never)]
unsafe fn copy_backward(dst: *mut u8, src: *const u8, n: usize) {
    let mut i = n;
    while i > 0 {
        i -= 1;
        write_volatile(dst.add(i), read_volatile(src.add(i)));
    }
}

/// Trap if the word containing the first byte of `s` is poisoned. Catches a
/// string pointer into freed memory whose first byte happens to be non-NUL
/// (the low byte of a token can be anything, including NUL).
#[inline]
unsafe fn guard_string_start(s: *const u8) {
    let word = align_down(s as usize, TOKEN_SIZE) as *const u64;
    if token::is_poisoned(word) {
        fatal!("string read from poisoned memory detected [str={:p}]", s);
    }
}

/// Word-at-a-time NUL scan (the classic carry-propagation trick: a zero
/// byte in `w` makes `(w - lo) & !w & hi` non-zero).
unsafe fn scan_nul(s: *const u8) -> usize {
    const LO: u64 = 0x0101_0101_0101_0101;
    const HI: u64 = 0x8080_8080_8080_8080;

    let mut p = s;
    while p as usize % TOKEN_SIZE != 0 {
        if read_volatile(p) == 0 {
            return p as usize - s as usize;
        }
        p = p.add(1);
    }
    let mut wp = p as *const u64;
    loop {
        let w = read_volatile(wp);
        if w.wrapping_sub(LO) & !w & HI != 0 {
            let bytes = wp as *const u8;
            let mut i = 0;
            while i < TOKEN_SIZE {
                if read_volatile(bytes.add(i)) == 0 {
                    return bytes.add(i) as usize - s as usize;
                }
                i += 1;
            }
            // Misfire: a carry out of a lower byte; keep scanning.
        }
        wp = wp.add(1);
    }
}

#[no_mangle]
pub unsafe extern "C" fn memcpy(dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
    check_range(dst as *const u8, n);
    check_range(src as *const u8, n);
    copy_forward(dst as *mut u8, src as *const u8, n);
    dst
}

#[no_mangle]
pub unsafe extern "C" fn memmove(dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
    check_range(dst as *const u8, n);
    check_range(src as *const u8, n);
    // Copy direction preserves the overlap semantics.
    if (dst as usize) < (src as usize) {
        copy_forward(dst as *mut u8, src as *const u8, n);
    } else {
        copy_backward(dst as *mut u8, src as *const u8, n);
    }
    dst
}

#[no_mangle]
pub unsafe extern "C" fn strlen(s: *const libc::c_char) -> usize {
    let s = s as *const u8;
    guard_string_start(s);
    let len = scan_nul(s);
    // The string plus its terminator must lie inside the allocation; a
    // terminator found beyond the payload means the scan crossed a redzone
    // word whose low byte happened to be NUL.
    check_range(s, len + 1);
    len
}

#[no_mangle]
pub unsafe extern "C" fn strnlen(s: *const libc::c_char, maxlen: usize) -> usize {
    let s = s as *const u8;
    guard_string_start(s);
    let mut i = 0;
    while i < maxlen {
        if read_volatile(s.add(i)) == 0 {
            break;
        }
        i += 1;
    }
    check_range(s, if i < maxlen { i + 1 } else { i });
    i
}

#[no_mangle]
pub unsafe extern "C" fn strcpy(dst: *mut libc::c_char, src: *const libc::c_char) -> *mut libc::c_char {
    let n = strlen(src) + 1;
    memcpy(dst as *mut c_void, src as *const c_void, n);
    dst
}

#[no_mangle]
pub unsafe extern "C" fn strcat(dst: *mut libc::c_char, src: *const libc::c_char) -> *mut libc::c_char {
    let dst_len = strlen(dst);
    strcpy(dst.add(dst_len), src);
    dst
}

#[no_mangle]
pub unsafe extern "C" fn strncpy(
    dst: *mut libc::c_char,
    src: *const libc::c_char,
    n: usize,
) -> *mut libc::c_char {
    // strncpy writes exactly n bytes.
    check_range(dst as *const u8, n);
    let size = strnlen(src, n);
    copy_forward(dst as *mut u8, src as *const u8, size);
    if size < n {
        core::ptr::write_bytes((dst as *mut u8).add(size), 0, n - size);
    }
    dst
}

#[no_mangle]
pub unsafe extern "C" fn strncat(
    dst: *mut libc::c_char,
    src: *const libc::c_char,
    n: usize,
) -> *mut libc::c_char {
    let dst_len = strlen(dst);
    let tail = dst.add(dst_len);
    let ss = strnlen(src, n);
    check_range(tail as *const u8, ss + 1);
    copy_forward(tail as *mut u8, src as *const u8, ss);
    write_volatile((tail as *mut u8).add(ss), 0);
    dst
}

#[no_mangle]
pub unsafe extern "C" fn wmemcpy(
    dst: *mut libc::wchar_t,
    src: *const libc::wchar_t,
    n: usize,
) -> *mut libc::wchar_t {
    memcpy(
        dst as *mut c_void,
        src as *const c_void,
        n * core::mem::size_of::<libc::wchar_t>(),
    );
    dst
}

#[no_mangle]
pub unsafe extern "C" fn wcslen(s: *const libc::wchar_t) -> usize {
    let mut len = 0;
    while read_volatile(s.add(len)) != 0 {
        len += 1;
    }
    check_range(
        s as *const u8,
        (len + 1) * core::mem::size_of::<libc::wchar_t>(),
    );
    len
}

#[no_mangle]
pub unsafe extern "C" fn wcscpy(
    dst: *mut libc::wchar_t,
    src: *const libc::wchar_t,
) -> *mut libc::wchar_t {
    let n = wcslen(src) + 1;
    wmemcpy(dst, src, n);
    dst
}

// ---------------------------------------------------------------------------
// Variadic interceptors (x86_64 SysV).
//
// Stable Rust cannot define C-variadic functions, so `snprintf` and `printf`
// are entered through file-scope assembly, the same way the original runtime
// defines its token routines. Each trampoline spills the argument registers
// into a genuine va_list register-save area on the stack and calls a Rust
// implementation with a pointer to it; formatting is then delegated to the
// real vsnprintf/vprintf with that same va_list.
// ---------------------------------------------------------------------------

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod variadic {
    use super::*;
    use crate::allocator::passthrough;
    use crate::config;

    /// x86_64 SysV `__va_list_tag`.
    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct VaListTag {
        gp_offset: u32,
        fp_offset: u32,
        overflow_arg_area: *mut c_void,
        reg_save_area: *mut c_void,
    }

    // Frame layout built by the trampolines (200 bytes, keeping the call
    // site 16-byte aligned):
    //   [rsp +   0 ..  48)  rdi rsi rdx rcx r8 r9   (gp save area)
    //   [rsp +  48 .. 176)  xmm0 .. xmm7            (fp save area)
    //   [rsp + 176 .. 200)  __va_list_tag
    //   [rsp + 208 ...   )  the caller's stack arguments
    core::arch::global_asm!(
        ".text",
        ".p2align 4",
        ".globl snprintf",
        ".type snprintf, @function",
        "snprintf:",
        "endbr64",
        "sub rsp, 200",
        "mov [rsp], rdi",
        "mov [rsp + 8], rsi",
        "mov [rsp + 16], rdx",
        "mov [rsp + 24], rcx",
        "mov [rsp + 32], r8",
        "mov [rsp + 40], r9",
        "test al, al",
        "je 2f",
        "movaps [rsp + 48], xmm0",
        "movaps [rsp + 64], xmm1",
        "movaps [rsp + 80], xmm2",
        "movaps [rsp + 96], xmm3",
        "movaps [rsp + 112], xmm4",
        "movaps [rsp + 128], xmm5",
        "movaps [rsp + 144], xmm6",
        "movaps [rsp + 160], xmm7",
        "2:",
        "mov dword ptr [rsp + 176], 24", // gp_offset: dst, n, format consumed
        "mov dword ptr [rsp + 180], 48", // fp_offset
        "lea rax, [rsp + 208]",
        "mov [rsp + 184], rax", // overflow_arg_area
        "mov rax, rsp",
        "mov [rsp + 192], rax", // reg_save_area
        "mov rdi, [rsp]",
        "mov rsi, [rsp + 8]",
        "mov rdx, [rsp + 16]",
        "lea rcx, [rsp + 176]",
        "call rezzan_snprintf_impl",
        "add rsp, 200",
        "ret",
        ".size snprintf, . - snprintf",
    );

    core::arch::global_asm!(
        ".text",
        ".p2align 4",
        ".globl printf",
        ".type printf, @function",
        "printf:",
        "endbr64",
        "sub rsp, 200",
        "mov [rsp], rdi",
        "mov [rsp + 8], rsi",
        "mov [rsp + 16], rdx",
        "mov [rsp + 24], rcx",
        "mov [rsp + 32], r8",
        "mov [rsp + 40], r9",
        "test al, al",
        "je 2f",
        "movaps [rsp + 48], xmm0",
        "movaps [rsp + 64], xmm1",
        "movaps [rsp + 80], xmm2",
        "movaps [rsp + 96], xmm3",
        "movaps [rsp + 112], xmm4",
        "movaps [rsp + 128], xmm5",
        "movaps [rsp + 144], xmm6",
        "movaps [rsp + 160], xmm7",
        "2:",
        "mov dword ptr [rsp + 176], 8", // gp_offset: format consumed
        "mov dword ptr [rsp + 180], 48",
        "lea rax, [rsp + 208]",
        "mov [rsp + 184], rax",
        "mov rax, rsp",
        "mov [rsp + 192], rax",
        "mov rdi, [rsp]",
        "lea rsi, [rsp + 176]",
        "call rezzan_printf_impl",
        "add rsp, 200",
        "ret",
        ".size printf, . - printf",
    );

    /// Fetch the next 8-byte integer/pointer argument.
    unsafe fn va_gp(ap: *mut VaListTag) -> u64 {
        let gp = (*ap).gp_offset;
        if gp + 8 <= 48 {
            let v = *(((*ap).reg_save_area as *const u8).add(gp as usize) as *const u64);
            (*ap).gp_offset = gp + 8;
            v
        } else {
            let v = *((*ap).overflow_arg_area as *const u64);
            (*ap).overflow_arg_area = ((*ap).overflow_arg_area as *mut u8).add(8) as *mut c_void;
            v
        }
    }

    /// Fetch (and discard) the next double argument.
    unsafe fn va_fp(ap: *mut VaListTag) {
        let fp = (*ap).fp_offset;
        if fp + 16 <= 176 {
            (*ap).fp_offset = fp + 16;
        } else {
            (*ap).overflow_arg_area = ((*ap).overflow_arg_area as *mut u8).add(8) as *mut c_void;
        }
    }

    /// Walk the conversions of `fmt`, consuming each one's argument, and
    /// check every `%s` string before it is handed to the formatter.
    unsafe fn walk_format(fmt: *const libc::c_char, ap: *mut VaListTag) {
        let mut p = fmt as *const u8;
        while read_volatile(p) != 0 {
            if read_volatile(p) != b'%' {
                p = p.add(1);
                continue;
            }
            p = p.add(1);
            if read_volatile(p) == b'%' {
                p = p.add(1);
                continue;
            }
            while matches!(read_volatile(p), b'-' | b'+' | b' ' | b'#' | b'0') {
                p = p.add(1);
            }
            if read_volatile(p) == b'*' {
                va_gp(ap);
                p = p.add(1);
            } else {
                while read_volatile(p).is_ascii_digit() {
                    p = p.add(1);
                }
            }
            if read_volatile(p) == b'.' {
                p = p.add(1);
                if read_volatile(p) == b'*' {
                    va_gp(ap);
                    p = p.add(1);
                } else {
                    while read_volatile(p).is_ascii_digit() {
                        p = p.add(1);
                    }
                }
            }
            while matches!(read_volatile(p), b'h' | b'l' | b'j' | b'z' | b't' | b'L' | b'q') {
                p = p.add(1);
            }
            match read_volatile(p) {
                0 => break,
                b's' => {
                    let s = va_gp(ap) as *const libc::c_char;
                    if !s.is_null() {
                        let n = strlen(s);
                        check_range(s as *const u8, n);
                    }
                    p = p.add(1);
                }
                b'd' | b'i' | b'o' | b'u' | b'x' | b'X' | b'c' | b'p' | b'n' => {
                    va_gp(ap);
                    p = p.add(1);
                }
                b'f' | b'F' | b'e' | b'E' | b'g' | b'G' | b'a' | b'A' => {
                    va_fp(ap);
                    p = p.add(1);
                }
                // Unknown conversion: the argument layout is no longer
                // trackable, so stop walking and let the formatter have it.
                _ => break,
            }
        }
    }

    /// # Safety
    /// Called only from the snprintf trampoline.
    #[no_mangle]
    unsafe extern "C" fn rezzan_snprintf_impl(
        dst: *mut libc::c_char,
        n: usize,
        format: *const libc::c_char,
        ap: *mut VaListTag,
    ) -> libc::c_int {
        check_range(dst as *const u8, n);
        passthrough::vsnprintf(dst, n, format, ap as *mut c_void)
    }

    /// # Safety
    /// Called only from the printf trampoline.
    #[no_mangle]
    unsafe extern "C" fn rezzan_printf_impl(
        format: *const libc::c_char,
        ap: *mut VaListTag,
    ) -> libc::c_int {
        if config::printf_check() && config::nonce_mode() != 0 {
            // va_copy: walk a copy, delegate the original.
            let mut walker = *ap;
            walk_format(format, &mut walker);
        }
        passthrough::vprintf(format, ap as *mut c_void)
    }
}
