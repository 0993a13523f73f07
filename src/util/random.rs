//! Random number generation
//!
//! Two generator flavors, both Xoshiro256++ (64-bit, seedable, fast):
//!
//! - **Shared**: a single process-wide engine behind a mutex. Fine for cold
//!   paths (bootstrap resampling, workload setup).
//! - **Per-thread**: a thread-local engine seeded from the global seed
//!   combined with a hash of the thread id. No contention, and each worker
//!   gets an independent stream; cross-thread correlation is not strictly
//!   zero, so don't use it where strong randomness guarantees matter.
//!
//! The global seed comes from `--treadmill_random_seed`; the sentinel value
//! `u64::MAX` means "seed from wall time".

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel seed value meaning "derive the seed from wall time".
pub const SEED_FROM_WALL_CLOCK: u64 = u64::MAX;

static CONFIGURED_SEED: OnceLock<u64> = OnceLock::new();

static SHARED_ENGINE: OnceLock<Mutex<Xoshiro256PlusPlus>> = OnceLock::new();

thread_local! {
    static THREAD_ENGINE: RefCell<Option<Xoshiro256PlusPlus>> = const { RefCell::new(None) };
}

/// Set the global seed. Call once at startup, before any draws.
///
/// Later calls are ignored; the first seed wins (draws may already have
/// happened against it).
pub fn init_seed(seed: u64) {
    let _ = CONFIGURED_SEED.set(seed);
}

fn base_seed() -> u64 {
    let configured = *CONFIGURED_SEED.get_or_init(|| SEED_FROM_WALL_CLOCK);
    if configured == SEED_FROM_WALL_CLOCK {
        static WALL_SEED: OnceLock<u64> = OnceLock::new();
        *WALL_SEED.get_or_init(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0)
        })
    } else {
        configured
    }
}

fn shared_engine() -> &'static Mutex<Xoshiro256PlusPlus> {
    SHARED_ENGINE.get_or_init(|| Mutex::new(Xoshiro256PlusPlus::seed_from_u64(base_seed())))
}

fn with_thread_engine<T>(f: impl FnOnce(&mut Xoshiro256PlusPlus) -> T) -> T {
    THREAD_ENGINE.with(|cell| {
        let mut slot = cell.borrow_mut();
        let engine = slot.get_or_insert_with(|| {
            let mut hasher = DefaultHasher::new();
            std::thread::current().id().hash(&mut hasher);
            Xoshiro256PlusPlus::seed_from_u64(base_seed().wrapping_add(hasher.finish()))
        });
        f(engine)
    })
}

/// Shared random number stream, usable from any thread.
pub struct RandomEngine;

impl RandomEngine {
    /// Uniform real in `[0, 1)`.
    pub fn get_double() -> f64 {
        shared_engine().lock().unwrap().gen::<f64>()
    }

    /// Uniform real in `[min, max)`.
    pub fn get_double_in(min: f64, max: f64) -> f64 {
        shared_engine().lock().unwrap().gen_range(min..max)
    }

    /// Uniform integer in `[0, 2^64)`.
    pub fn get_integer() -> u64 {
        shared_engine().lock().unwrap().gen::<u64>()
    }

    /// Uniform integer in `[min, max]`.
    pub fn get_integer_in(min: u64, max: u64) -> u64 {
        shared_engine().lock().unwrap().gen_range(min..=max)
    }
}

/// Per-thread random number stream. Cheaper than [`RandomEngine`] and free
/// of contention; streams on different threads are seeded independently.
pub struct ThreadRandomEngine;

impl ThreadRandomEngine {
    /// Uniform real in `[min, max)`.
    pub fn get_double(min: f64, max: f64) -> f64 {
        with_thread_engine(|e| e.gen_range(min..max))
    }

    /// Uniform integer in `[min, max]`.
    pub fn get_integer(min: u64, max: u64) -> u64 {
        with_thread_engine(|e| e.gen_range(min..=max))
    }
}

/// Draw from an exponential distribution with the given mean, using the
/// calling thread's engine.
///
/// The uniform draw is clamped below at 1e-9 so the logarithm cannot
/// return infinity.
pub fn random_exponential_interval(mean: f64) -> f64 {
    let u = with_thread_engine(|e| e.gen::<f64>());
    -u.max(1e-9).ln() * mean
}
