//! Deadlock provoker
//!
//! A worker draws its own random order over (a subset of) the lock pool once,
//! then repeatedly takes every lock in that order, holds them for a moment and
//! lets them go in reverse. Two workers whose orders disagree on any pair of
//! shared locks can end up each holding what the other waits for, and from
//! then on neither reports alive again. More workers, a bigger pool or bigger
//! subsets raise the odds; disjoint subsets rule it out.

use crate::core::locks::LockPool;
use crate::core::logger::{Logger, StatusEvent};
use crate::core::types::{WorkerId, current_worker_id};
use crate::core::watchdog::Watchdog;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::ops::RangeInclusive;
use std::thread;
use std::time::Duration;

/// How long a worker sits on its locks, in milliseconds
pub const DEFAULT_HOLD_MS: RangeInclusive<u64> = 1..=80;

/// Number of locks a worker takes: zero or anything beyond the pool means all of them
pub fn clamp_subset(pool_size: usize, subset: usize) -> usize {
    if subset == 0 || subset > pool_size {
        pool_size
    } else {
        subset
    }
}

/// Uniform shuffle of `0..pool_size`, truncated to the clamped subset size
pub fn draw_permutation<R: Rng + ?Sized>(
    pool_size: usize,
    subset: usize,
    rng: &mut R,
) -> Vec<usize> {
    let mut permutation: Vec<usize> = (0..pool_size).collect();
    permutation.shuffle(rng);
    permutation.truncate(clamp_subset(pool_size, subset));
    permutation
}

/// One worker's lock-acquisition loop
pub struct Provoker {
    permutation: Vec<usize>,
    iterations: usize,
    hold_ms: RangeInclusive<u64>,
    rng: StdRng,
}

impl Provoker {
    /// Worker with a freshly drawn random order over `subset` of `pool_size` locks
    pub fn random(pool_size: usize, subset: usize, iterations: usize, mut rng: StdRng) -> Self {
        let permutation = draw_permutation(pool_size, subset, &mut rng);
        Self::with_permutation(permutation, iterations, rng)
    }

    /// Worker with a fixed acquisition order
    ///
    /// Every index must be in range for the pool the worker runs against.
    pub fn with_permutation(permutation: Vec<usize>, iterations: usize, rng: StdRng) -> Self {
        Provoker {
            permutation,
            iterations,
            hold_ms: DEFAULT_HOLD_MS,
            rng,
        }
    }

    /// Override the hold duration range (milliseconds)
    pub fn hold(mut self, hold_ms: RangeInclusive<u64>) -> Self {
        self.hold_ms = hold_ms;
        self
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Run every iteration on the calling thread
    ///
    /// Returns only if no iteration ever blocks for good. The worker reports
    /// alive at the top of each iteration and leaves the registry after the
    /// last one.
    ///
    /// # Returns
    /// The id this worker reported under
    pub fn run(mut self, pool: &LockPool, watchdog: &Watchdog, logger: &Logger) -> WorkerId {
        let worker = current_worker_id();
        logger.emit(StatusEvent::WorkerStarted {
            worker,
            permutation: self.permutation.clone(),
        });

        let mut guards = Vec::with_capacity(self.permutation.len());
        for iteration in 1..=self.iterations {
            watchdog.alive(worker);
            logger.emit(StatusEvent::LoopBegin { worker, iteration });

            // Lock in permutation order
            for &index in &self.permutation {
                guards.push(pool.lock(index));
                thread::yield_now();
            }

            logger.emit(StatusEvent::LocksAcquired { worker, iteration });
            thread::sleep(Duration::from_millis(self.draw_hold()));

            // Unlock in reverse permutation order
            while let Some(guard) = guards.pop() {
                drop(guard);
                thread::yield_now();
            }

            logger.emit(StatusEvent::LoopEnd { worker, iteration });
        }

        watchdog.finished(worker);
        logger.emit(StatusEvent::WorkerFinished { worker });
        worker
    }

    fn draw_hold(&mut self) -> u64 {
        let (min_ms, max_ms) = (*self.hold_ms.start(), *self.hold_ms.end());
        if min_ms >= max_ms {
            min_ms
        } else {
            self.rng.random_range(min_ms..=max_ms)
        }
    }
}
