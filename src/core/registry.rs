//! Liveness registry
//!
//! Maps every active worker to the instant of its last liveness report. Workers
//! refresh their entry once per iteration and delete it when done; the watchdog
//! scans it once per period. Everything goes through a single lock so no
//! operation ever observes a half-applied update from another.

use crate::core::types::{Staleness, WorkerId};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Silence beyond `period * HARD_LIMIT_FACTOR` is fatal
pub const HARD_LIMIT_FACTOR: f64 = 1.5;

/// Thread-safe map from worker to its last liveness report
#[derive(Default)]
pub struct LivenessRegistry {
    last_alive: Mutex<FxHashMap<WorkerId, Instant>>,
}

impl LivenessRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh the timestamp of `id` to now
    ///
    /// # Returns
    /// `true` if the registry held no entries before this call. The watchdog
    /// uses this as its start trigger.
    pub fn register_alive(&self, id: WorkerId) -> bool {
        let mut last_alive = self.last_alive.lock();
        let was_empty = last_alive.is_empty();
        last_alive.insert(id, Instant::now());
        was_empty
    }

    /// Remove `id`, if present
    pub fn remove_alive(&self, id: WorkerId) {
        self.last_alive.lock().remove(&id);
    }

    /// Whether no worker is registered
    pub fn is_empty(&self) -> bool {
        self.last_alive.lock().is_empty()
    }

    /// Number of registered workers
    pub fn len(&self) -> usize {
        self.last_alive.lock().len()
    }

    /// Whether `id` is currently registered
    pub fn contains(&self, id: WorkerId) -> bool {
        self.last_alive.lock().contains_key(&id)
    }

    /// Registered workers, ascending
    pub fn workers(&self) -> Vec<WorkerId> {
        let mut workers: Vec<WorkerId> = self.last_alive.lock().keys().copied().collect();
        workers.sort_unstable();
        workers
    }

    /// List every worker that has been silent for longer than `period` as of `now`
    ///
    /// Entries silent for longer than `period * 1.5` are flagged `hard`.
    /// The result is ordered by worker id.
    pub fn scan(&self, now: Instant, period: Duration) -> Vec<Staleness> {
        let hard_limit = period.mul_f64(HARD_LIMIT_FACTOR);
        let last_alive = self.last_alive.lock();

        let mut stale: Vec<Staleness> = last_alive
            .iter()
            .filter_map(|(&worker, &seen)| {
                let elapsed = now.saturating_duration_since(seen);
                (elapsed > period).then_some(Staleness {
                    worker,
                    elapsed,
                    hard: elapsed > hard_limit,
                })
            })
            .collect();
        stale.sort_by_key(|s| s.worker);
        stale
    }
}
