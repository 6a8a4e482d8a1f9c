//! Seedable pseudo-random number generation.
//!
//! A 64-bit xorshift generator backs every random decision in the emulator:
//! synthetic instruction selection, operand values, virtual addresses, and
//! process memory sizes. Each worker thread keeps its own generator, seeded
//! from wall-clock entropy, so cores never contend on a shared RNG. Tests
//! reseed the thread generator to make runs reproducible.

use std::cell::RefCell;
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_SEED: u64 = 0xACE1;

/// Plain xorshift64. Never yields a zero state.
#[derive(Clone, Copy, Debug)]
pub struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    /// Create a generator from an explicit seed. A zero seed is replaced
    /// with a fixed non-zero default (xorshift cannot leave a zero state).
    pub fn with_seed(seed: u64) -> Self {
        let state = if seed == 0 { DEFAULT_SEED } else { seed };
        Self { state }
    }

    /// Create a generator seeded from the wall clock, perturbed with a
    /// stack address so threads seeded in the same tick still diverge.
    pub fn from_entropy() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(DEFAULT_SEED);
        let jitter = (&nanos as *const u64 as u64).rotate_left(32);
        Self::with_seed((nanos ^ jitter) | 1)
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = if x == 0 { 0xfeed_c0de } else { x };
        self.state
    }

    /// Uniform draw from the inclusive range `[lo, hi]`.
    pub fn range_u64(&mut self, lo: u64, hi: u64) -> u64 {
        debug_assert!(lo <= hi);
        let span = hi - lo + 1;
        if span == 0 {
            // lo == 0 and hi == u64::MAX
            return self.next_u64();
        }
        lo + self.next_u64() % span
    }

    pub fn range_usize(&mut self, lo: usize, hi: usize) -> usize {
        self.range_u64(lo as u64, hi as u64) as usize
    }

    /// Pick a random element of a non-empty slice.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.next_u64() as usize % items.len()]
    }
}

thread_local! {
    static THREAD_RNG: RefCell<Xorshift64> = RefCell::new(Xorshift64::from_entropy());
}

/// Run a closure with the calling thread's generator.
pub fn with_thread_rng<T>(f: impl FnOnce(&mut Xorshift64) -> T) -> T {
    THREAD_RNG.with(|rng| f(&mut rng.borrow_mut()))
}

/// Reseed the calling thread's generator. Test hook for reproducible runs.
pub fn seed_thread_rng(seed: u64) {
    THREAD_RNG.with(|rng| *rng.borrow_mut() = Xorshift64::with_seed(seed));
}

/// Uniform draw from `[lo, hi]` using the thread generator.
pub fn range_u64(lo: u64, hi: u64) -> u64 {
    with_thread_rng(|rng| rng.range_u64(lo, hi))
}
