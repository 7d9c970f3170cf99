//! C allocator API semantics, exercised through the sanitizer facade.
//!
//! Counter-exact and abort-expecting checks live in sanitizer_detection.rs
//! (they need a single-threaded subprocess); everything here is safe to run
//! concurrently with the other tests in this binary, whose own heap traffic
//! also flows through the sanitizer.

use std::collections::HashSet;
use std::ptr;

/// Helper: initialize the sanitizer and return a reference to it.
unsafe fn sanitizer() -> &'static rezzan::allocator::Sanitizer {
    rezzan::init::ensure_initialized();
    rezzan::init::sanitizer()
}

// ---------------------------------------------------------------------------
// malloc returns 16-byte aligned, writable memory
// ---------------------------------------------------------------------------

#[test]
fn malloc_returns_16_byte_aligned_pointers() {
    unsafe {
        let a = sanitizer();
        for &size in &[1usize, 2, 4, 7, 8, 15, 16, 17, 31, 32, 33, 64, 100, 256, 1024, 4096] {
            let p = a.malloc(size);
            assert!(!p.is_null(), "malloc({}) returned NULL", size);
            assert_eq!(
                (p as usize) % 16,
                0,
                "malloc({}) returned pointer {:?} not aligned to 16 bytes",
                size,
                p
            );
            a.free(p);
        }
    }
}

#[test]
fn various_allocation_sizes_are_usable() {
    unsafe {
        let a = sanitizer();
        let sizes: Vec<usize> = vec![
            1, 2, 3, 4, 7, 8, 15, 16, 17, 31, 32, 33, 48, 63, 64, 65, 100, 128, 200, 255, 256,
            257, 512, 1000, 1024, 2048, 4096, 8192, 10000, 16384, 32768, 65536, 131072, 262144,
            524288, 1048576,
        ];
        for &size in &sizes {
            let p = a.malloc(size);
            assert!(!p.is_null(), "malloc({}) returned NULL", size);

            // Write a pattern and read it back to prove the payload is real.
            ptr::write_bytes(p, 0xAA, size);
            let slice = std::slice::from_raw_parts(p, size);
            assert!(
                slice.iter().all(|&b| b == 0xAA),
                "malloc({}) memory is not writable/readable",
                size
            );

            a.free(p);
        }
    }
}

// ---------------------------------------------------------------------------
// malloc(0) returns a unique, non-NULL, freeable pointer
// ---------------------------------------------------------------------------

#[test]
fn malloc_zero_returns_non_null() {
    unsafe {
        let a = sanitizer();
        let p = a.malloc(0);
        assert!(!p.is_null(), "malloc(0) must return non-NULL");
        a.free(p);
    }
}

#[test]
fn malloc_zero_returns_unique_pointers() {
    unsafe {
        let a = sanitizer();
        let mut ptrs = Vec::new();
        for _ in 0..64 {
            let p = a.malloc(0);
            assert!(!p.is_null());
            ptrs.push(p);
        }
        let unique: HashSet<usize> = ptrs.iter().map(|p| *p as usize).collect();
        assert_eq!(
            unique.len(),
            ptrs.len(),
            "malloc(0) must return unique pointers"
        );
        for p in ptrs {
            a.free(p);
        }
    }
}

// ---------------------------------------------------------------------------
// free(NULL) is a no-op
// ---------------------------------------------------------------------------

#[test]
fn free_null_is_noop() {
    unsafe {
        let a = sanitizer();
        a.free(ptr::null_mut());
    }
}

// ---------------------------------------------------------------------------
// realloc semantics
// ---------------------------------------------------------------------------

#[test]
fn realloc_null_acts_as_malloc() {
    unsafe {
        let a = sanitizer();
        let p = a.realloc(ptr::null_mut(), 128);
        assert!(!p.is_null(), "realloc(NULL, 128) must behave like malloc");
        ptr::write_bytes(p, 0xAB, 128);
        a.free(p);
    }
}

#[test]
fn realloc_grow_preserves_data() {
    unsafe {
        let a = sanitizer();
        let initial_size = 64;
        let p = a.malloc(initial_size);
        assert!(!p.is_null());

        for i in 0..initial_size {
            p.add(i).write((i & 0xFF) as u8);
        }

        let q = a.realloc(p, 256);
        assert!(!q.is_null(), "realloc to larger size returned NULL");
        for i in 0..initial_size {
            assert_eq!(
                q.add(i).read(),
                (i & 0xFF) as u8,
                "data corruption at offset {} after realloc",
                i
            );
        }
        a.free(q);
    }
}

#[test]
fn realloc_shrink_preserves_data() {
    unsafe {
        let a = sanitizer();
        let p = a.malloc(256);
        assert!(!p.is_null());

        for i in 0..256usize {
            p.add(i).write((i & 0xFF) as u8);
        }

        let q = a.realloc(p, 32);
        assert!(!q.is_null());
        for i in 0..32usize {
            assert_eq!(
                q.add(i).read(),
                (i & 0xFF) as u8,
                "data corruption at offset {} after shrinking realloc",
                i
            );
        }
        a.free(q);
    }
}

#[test]
fn realloc_to_zero_returns_minimum_allocation() {
    unsafe {
        let a = sanitizer();
        let p = a.malloc(64);
        assert!(!p.is_null());
        let q = a.realloc(p, 0);
        assert!(!q.is_null(), "realloc(p, 0) must return a valid pointer");
        a.free(q);
    }
}

// ---------------------------------------------------------------------------
// calloc returns zero-filled memory
// ---------------------------------------------------------------------------

#[test]
fn calloc_returns_zeroed_memory() {
    unsafe {
        let a = sanitizer();
        for &size in &[1usize, 16, 64, 256, 1024, 4096] {
            let p = a.calloc(size, 1);
            assert!(!p.is_null(), "calloc({}, 1) returned NULL", size);
            let slice = std::slice::from_raw_parts(p, size);
            assert!(
                slice.iter().all(|&b| b == 0),
                "calloc({}, 1) memory is not zero-filled",
                size
            );
            a.free(p);
        }
    }
}

#[test]
fn calloc_zeroed_with_nmemb_and_size() {
    unsafe {
        let a = sanitizer();
        let p = a.calloc(10, 100);
        assert!(!p.is_null());
        let slice = std::slice::from_raw_parts(p, 1000);
        assert!(
            slice.iter().all(|&b| b == 0),
            "calloc(10, 100) memory is not zero-filled"
        );
        a.free(p);
    }
}

// ---------------------------------------------------------------------------
// usable_size: whole non-poisoned words from the base
// ---------------------------------------------------------------------------

#[test]
fn usable_size_at_least_requested() {
    unsafe {
        let a = sanitizer();
        for &size in &[1usize, 7, 16, 17, 32, 100, 256, 512, 1024, 4096, 8192] {
            let p = a.malloc(size);
            assert!(!p.is_null(), "malloc({}) returned NULL", size);
            let usable = a.usable_size(p);
            assert!(
                usable >= size,
                "usable_size({}) = {} < requested {}",
                size,
                usable,
                size
            );
            a.free(p);
        }
    }
}

#[test]
fn usable_size_rounds_to_words() {
    unsafe {
        let a = sanitizer();
        for &size in &[1usize, 7, 8, 9, 10, 16, 17, 100, 1000] {
            let p = a.malloc(size);
            let usable = a.usable_size(p);
            assert_eq!(
                usable,
                (size + 7) & !7,
                "usable_size for malloc({}) should cover exactly the payload words",
                size
            );
            a.free(p);
        }
    }
}

#[test]
fn usable_size_null_is_zero() {
    unsafe {
        let a = sanitizer();
        assert_eq!(a.usable_size(ptr::null_mut()), 0);
    }
}

// ---------------------------------------------------------------------------
// Quarantine accounting grows as objects are released (exact deltas are
// checked single-threaded in sanitizer_detection.rs)
// ---------------------------------------------------------------------------

#[test]
fn free_parks_capsules_in_quarantine() {
    unsafe {
        let a = sanitizer();
        let before = a.quarantined_units();
        let p = a.malloc(100);
        a.free(p);
        // capsule_units(100) == 7; other tests may add more concurrently,
        // but with the default 256 MiB threshold nothing drains it.
        assert!(
            a.quarantined_units() >= before + 7,
            "quarantine did not grow by the released capsule"
        );
    }
}

// ---------------------------------------------------------------------------
// Rapid malloc/free cycles (single thread, many iterations)
// ---------------------------------------------------------------------------

#[test]
fn rapid_malloc_free_single_thread() {
    unsafe {
        let a = sanitizer();
        for _ in 0..10_000 {
            let p = a.malloc(64);
            assert!(!p.is_null());
            a.free(p);
        }
    }
}

// ---------------------------------------------------------------------------
// Concurrent allocator traffic under the single lock
// ---------------------------------------------------------------------------

#[test]
fn concurrent_malloc_free() {
    let threads: Vec<_> = (0..4)
        .map(|t| {
            std::thread::spawn(move || unsafe {
                let a = sanitizer();
                for i in 0..2000usize {
                    let size = 1 + ((i * 37 + t * 11) % 500);
                    let p = a.malloc(size);
                    assert!(!p.is_null());
                    ptr::write_bytes(p, 0x5A, size);
                    a.free(p);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
}
