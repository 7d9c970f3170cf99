/// Microbenchmarks for the sanitizer.
///
/// The interesting numbers are interposition overheads, so this harness
/// measures through the C symbol surface under LD_PRELOAD rather than the
/// Rust API:
///
///   cargo build --release
///   cargo build --release -p rezzan-benches
///   LD_PRELOAD=target/release/librezzan.so target/release/micro

use std::hint::black_box;
use std::time::Instant;

extern "C" {
    fn malloc(size: usize) -> *mut u8;
    fn free(ptr: *mut u8);
    fn calloc(nmemb: usize, size: usize) -> *mut u8;
    fn memcpy(dst: *mut u8, src: *const u8, n: usize) -> *mut u8;
    fn strlen(s: *const i8) -> usize;
}

/// Measure malloc/free latency for a given size, N iterations.
fn bench_malloc_free(size: usize, iterations: usize) -> f64 {
    for _ in 0..1000 {
        unsafe {
            let ptr = malloc(black_box(size));
            std::ptr::write_bytes(ptr, 0xAB, std::cmp::min(size, 64));
            free(black_box(ptr));
        }
    }
    let start = Instant::now();
    for _ in 0..iterations {
        unsafe {
            let ptr = malloc(black_box(size));
            std::ptr::write_bytes(ptr, 0xAB, std::cmp::min(size, 64));
            free(black_box(ptr));
        }
    }
    start.elapsed().as_nanos() as f64 / iterations as f64
}

fn bench_calloc(size: usize, iterations: usize) -> f64 {
    let start = Instant::now();
    for _ in 0..iterations {
        unsafe {
            let ptr = calloc(1, black_box(size));
            free(black_box(ptr));
        }
    }
    start.elapsed().as_nanos() as f64 / iterations as f64
}

/// Instrumented memcpy cost per call at a given size.
fn bench_memcpy(size: usize, iterations: usize) -> f64 {
    unsafe {
        let src = malloc(size);
        let dst = malloc(size);
        std::ptr::write_bytes(src, 0x42, size);
        let start = Instant::now();
        for _ in 0..iterations {
            memcpy(black_box(dst), black_box(src as *const u8), black_box(size));
        }
        let per_call = start.elapsed().as_nanos() as f64 / iterations as f64;
        free(src);
        free(dst);
        per_call
    }
}

/// Instrumented strlen cost for a string of the given length.
fn bench_strlen(len: usize, iterations: usize) -> f64 {
    unsafe {
        let s = malloc(len + 1);
        std::ptr::write_bytes(s, b'a', len);
        *s.add(len) = 0;
        let start = Instant::now();
        for _ in 0..iterations {
            black_box(strlen(black_box(s as *const i8)));
        }
        let per_call = start.elapsed().as_nanos() as f64 / iterations as f64;
        free(s);
        per_call
    }
}

fn main() {
    let iterations = 200_000;

    println!("malloc/free latency (ns/pair):");
    for &size in &[16usize, 64, 256, 1024, 4096, 16384, 65536] {
        println!("  {:>7} B: {:8.1}", size, bench_malloc_free(size, iterations));
    }

    println!("calloc latency (ns/pair):");
    for &size in &[64usize, 1024, 16384] {
        println!("  {:>7} B: {:8.1}", size, bench_calloc(size, iterations));
    }

    println!("memcpy (ns/call):");
    for &size in &[16usize, 256, 4096, 65536] {
        println!("  {:>7} B: {:8.1}", size, bench_memcpy(size, 50_000));
    }

    println!("strlen (ns/call):");
    for &len in &[15usize, 255, 4095] {
        println!("  {:>7} B: {:8.1}", len, bench_strlen(len, 50_000));
    }
}
