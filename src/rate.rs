//! Shared rate state: the `(current, min, max)` triple and its mutators
//!
//! Mutations are serialized through one mutex guarding the triple as a unit,
//! so `min <= current <= max` holds at every instant rather than only after
//! each individual call. The current rate is mirrored into an atomic so the
//! dispatcher loop can read it every iteration without touching the lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

/// The rate triple, mutated as a unit under the lock
#[derive(Debug, Clone, Copy)]
struct Bounds {
    current: u32,
    min: u32,
    max: u32,
}

/// Target-rate state shared between the caller and the dispatcher loop
///
/// All mutators return a success flag; a rejected mutation is a silent no-op.
/// Accessors never block the caller for longer than the other mutators'
/// check-and-write, and [`RateLimits::current`] is wait-free.
#[derive(Debug)]
pub struct RateLimits {
    bounds: Mutex<Bounds>,
    /// Mirror of `bounds.current`, updated on every successful mutation
    current: AtomicU32,
}

impl RateLimits {
    /// Create rate state with the given initial value and inclusive bounds
    ///
    /// The triple must satisfy `min <= initial <= max`; the mutators preserve
    /// that invariant but cannot repair a seed that violates it. `Pacer`
    /// constructs this from a validated config; direct callers carry the same
    /// obligation (checked by a debug assertion).
    pub fn new(initial: u32, min: u32, max: u32) -> Self {
        debug!(initial, min, max, "RateLimits::new: called");
        debug_assert!(min <= initial && initial <= max, "rate triple out of order: {} <= {} <= {}", min, initial, max);
        Self {
            bounds: Mutex::new(Bounds {
                current: initial,
                min,
                max,
            }),
            current: AtomicU32::new(initial),
        }
    }

    // The lock is only ever held for a check-and-write, which cannot panic,
    // so a poisoned mutex still holds a consistent triple.
    fn lock(&self) -> MutexGuard<'_, Bounds> {
        self.bounds.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raise the target rate by one; fails at the upper bound
    pub fn increase(&self) -> bool {
        let mut bounds = self.lock();
        if bounds.current >= bounds.max {
            debug!(current = bounds.current, max = bounds.max, "increase: at max, rejecting");
            return false;
        }
        bounds.current += 1;
        self.current.store(bounds.current, Ordering::Release);
        true
    }

    /// Lower the target rate by one; fails at the lower bound
    pub fn decrease(&self) -> bool {
        let mut bounds = self.lock();
        if bounds.current <= bounds.min {
            debug!(current = bounds.current, min = bounds.min, "decrease: at min, rejecting");
            return false;
        }
        bounds.current -= 1;
        self.current.store(bounds.current, Ordering::Release);
        true
    }

    /// Set the target rate; fails unless `min <= rate <= max`
    pub fn set_rate(&self, rate: u32) -> bool {
        let mut bounds = self.lock();
        if rate < bounds.min || rate > bounds.max {
            debug!(rate, min = bounds.min, max = bounds.max, "set_rate: out of bounds, rejecting");
            return false;
        }
        bounds.current = rate;
        self.current.store(rate, Ordering::Release);
        true
    }

    /// Set the upper bound; fails if it would drop below the current rate
    ///
    /// The policy is uniform for every value: there is no "unbounded"
    /// sentinel that bypasses the check.
    pub fn set_max(&self, max: u32) -> bool {
        let mut bounds = self.lock();
        if max < bounds.current {
            debug!(max, current = bounds.current, "set_max: below current, rejecting");
            return false;
        }
        bounds.max = max;
        true
    }

    /// Set the lower bound; fails if it would rise above the current rate
    pub fn set_min(&self, min: u32) -> bool {
        let mut bounds = self.lock();
        if min > bounds.current {
            debug!(min, current = bounds.current, "set_min: above current, rejecting");
            return false;
        }
        bounds.min = min;
        true
    }

    /// Current target rate (wait-free)
    pub fn current(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    /// Current lower bound
    pub fn min(&self) -> u32 {
        self.lock().min
    }

    /// Current upper bound
    pub fn max(&self) -> u32 {
        self.lock().max
    }

    /// Consistent `(current, min, max)` snapshot
    pub fn snapshot(&self) -> (u32, u32, u32) {
        let bounds = self.lock();
        (bounds.current, bounds.min, bounds.max)
    }
}
