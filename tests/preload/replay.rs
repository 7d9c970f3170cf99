/// Trace-driven preload smoke test.
/// Generates a deterministic random op trace and replays it through the
/// interposed C symbols, verifying the core ABI contracts hold with the
/// sanitizer in front of every call.
///
/// Run with: rustc -O tests/preload/replay.rs -o target/replay && \
///           LD_PRELOAD=target/release/librezzan.so target/replay

extern "C" {
    fn malloc(size: usize) -> *mut u8;
    fn free(ptr: *mut u8);
    fn realloc(ptr: *mut u8, size: usize) -> *mut u8;
    fn calloc(nmemb: usize, size: usize) -> *mut u8;
    fn memcpy(dst: *mut u8, src: *const u8, n: usize) -> *mut u8;
}

/// Simple seeded PRNG
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn next_usize(&mut self, max: usize) -> usize {
        (self.next() as usize) % max
    }
}

struct Slot {
    ptr: *mut u8,
    size: usize,
}

fn main() {
    const OPS: usize = 200_000;
    const MAX_LIVE: usize = 4096;

    let mut rng = Rng(0x5EED);
    let mut live: Vec<Slot> = Vec::new();
    let mut allocs = 0usize;
    let mut frees = 0usize;

    for _ in 0..OPS {
        let r = rng.next() % 100;
        if r < 40 || live.is_empty() {
            if live.len() >= MAX_LIVE {
                continue;
            }
            let size = match rng.next() % 4 {
                0 => rng.next_usize(16) + 1,
                1 => rng.next_usize(256) + 1,
                2 => rng.next_usize(4096) + 1,
                _ => rng.next_usize(65536) + 1,
            };
            let ptr = unsafe { malloc(size) };
            assert!(!ptr.is_null(), "malloc({}) failed", size);
            assert_eq!(ptr as usize % 16, 0, "malloc({}) misaligned", size);
            // Fill the full payload; the sanitizer must stay silent.
            unsafe {
                let pattern = [(size & 0xFF) as u8; 64];
                let mut off = 0;
                while off < size {
                    let n = (size - off).min(64);
                    memcpy(ptr.add(off), pattern.as_ptr(), n);
                    off += n;
                }
            }
            live.push(Slot { ptr, size });
            allocs += 1;
        } else if r < 70 {
            let i = rng.next_usize(live.len());
            let slot = live.swap_remove(i);
            unsafe { free(slot.ptr) };
            frees += 1;
        } else if r < 85 {
            let i = rng.next_usize(live.len());
            let new_size = rng.next_usize(8192) + 1;
            let old = &live[i];
            let keep = old.size.min(new_size);
            let expected = unsafe { *old.ptr };
            let p = unsafe { realloc(old.ptr, new_size) };
            assert!(!p.is_null());
            if keep > 0 {
                assert_eq!(unsafe { *p }, expected, "realloc lost data");
            }
            live[i] = Slot {
                ptr: p,
                size: new_size,
            };
        } else {
            if live.len() >= MAX_LIVE {
                continue;
            }
            let n = rng.next_usize(64) + 1;
            let sz = rng.next_usize(64) + 1;
            let p = unsafe { calloc(n, sz) };
            assert!(!p.is_null());
            for off in 0..n * sz {
                assert_eq!(unsafe { *p.add(off) }, 0, "calloc not zeroed");
            }
            live.push(Slot { ptr: p, size: n * sz });
            allocs += 1;
        }
    }

    for slot in live.drain(..) {
        unsafe { free(slot.ptr) };
        frees += 1;
    }

    println!("replay done: {} allocs, {} frees", allocs, frees);
}
