//! Liveness watchdog
//!
//! The watchdog owns the [`LivenessRegistry`] and a background monitor thread.
//! Workers call [`Watchdog::alive`] once per iteration and
//! [`Watchdog::finished`] when done. The monitor thread is started lazily by
//! the first report that finds the registry empty, via a single
//! compare-and-exchange on the state (`Idle -> Running`), so it starts at most
//! once for the lifetime of the watchdog.
//!
//! # How it works
//!
//! 1. Sleep for one `period`
//! 2. Scan the registry for workers silent longer than `period` (soft) or
//!    `period * 1.5` (hard)
//! 3. Repeat until the registry is empty or a hard violation was seen
//! 4. On a timeout, take a [`LockSnapshot`] of the attached [`LockPool`]
//!    (owners, waiters, circular waits) and emit it as status lines
//! 5. Publish the [`WatchdogOutcome`] on the outcome channel
//!
//! The watchdog only observes. A stalled worker stays blocked after the
//! timeout is published; nothing here releases its locks.

use crate::core::locks::LockPool;
use crate::core::logger::{Logger, StatusEvent};
use crate::core::registry::LivenessRegistry;
use crate::core::types::{
    LivenessTimeout, LockSnapshot, WatchdogOutcome, WatchdogState, WorkerId, current_worker_id,
};
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::io;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default check period
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(500);

/// Callback invoked on the watchdog thread when it times out
pub type TimeoutCallback = Arc<dyn Fn(&LivenessTimeout) + Send + Sync>;

struct Shared {
    period: Duration,
    registry: LivenessRegistry,
    state: AtomicU8,
    soft_violations: AtomicUsize,
    logger: Arc<Logger>,
    on_timeout: Option<TimeoutCallback>,
    pool: OnceLock<Arc<LockPool>>,
    outcome_tx: Sender<WatchdogOutcome>,
    outcome_rx: Receiver<WatchdogOutcome>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a watchdog; clones share the same registry and monitor
#[derive(Clone)]
pub struct Watchdog {
    shared: Arc<Shared>,
}

impl Watchdog {
    /// Create an idle watchdog checking every `period`
    pub fn new(period: Duration, logger: Arc<Logger>) -> Self {
        Self::with_callback(period, logger, None)
    }

    /// Create an idle watchdog that also runs `on_timeout` when it gives up
    pub fn with_callback(
        period: Duration,
        logger: Arc<Logger>,
        on_timeout: Option<TimeoutCallback>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = bounded(1);
        Watchdog {
            shared: Arc::new(Shared {
                period,
                registry: LivenessRegistry::new(),
                state: AtomicU8::new(WatchdogState::Idle as u8),
                soft_violations: AtomicUsize::new(0),
                logger,
                on_timeout,
                pool: OnceLock::new(),
                outcome_tx,
                outcome_rx,
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Report `id` alive
    ///
    /// The first report into an empty registry also starts the monitor.
    pub fn alive(&self, id: WorkerId) {
        if self.shared.registry.register_alive(id) {
            self.start();
        }
    }

    /// Report `id` done
    pub fn finished(&self, id: WorkerId) {
        self.shared.registry.remove_alive(id);
    }

    /// Explain timeouts with the owners and waiters of `pool`
    ///
    /// Only the first attached pool is kept.
    ///
    /// # Returns
    /// `true` if `pool` was attached
    pub fn attach_pool(&self, pool: Arc<LockPool>) -> bool {
        self.shared.pool.set(pool).is_ok()
    }

    /// One-time `Idle -> Running` transition
    ///
    /// If the monitor thread cannot be spawned the state goes back to `Idle`
    /// and [`WatchdogOutcome::Failed`] is published, so nobody waits on a
    /// monitor that does not exist.
    ///
    /// # Returns
    /// `true` if this call spawned the monitor thread
    pub fn start(&self) -> bool {
        self.start_with(|shared| {
            thread::Builder::new()
                .name("stallguard-watchdog".into())
                .spawn(move || shared.run())
        })
    }

    fn start_with<F>(&self, spawn: F) -> bool
    where
        F: FnOnce(Arc<Shared>) -> io::Result<JoinHandle<()>>,
    {
        if self
            .shared
            .state
            .compare_exchange(
                WatchdogState::Idle as u8,
                WatchdogState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        // Hold the slot while spawning so `join` never misses the handle
        let mut slot = self.shared.monitor.lock();
        match spawn(Arc::clone(&self.shared)) {
            Ok(handle) => {
                *slot = Some(handle);
                true
            }
            Err(err) => {
                self.shared
                    .state
                    .store(WatchdogState::Idle as u8, Ordering::Release);
                let _ = self
                    .shared
                    .outcome_tx
                    .try_send(WatchdogOutcome::Failed(err.to_string()));
                false
            }
        }
    }

    pub fn state(&self) -> WatchdogState {
        WatchdogState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn period(&self) -> Duration {
        self.shared.period
    }

    pub fn registry(&self) -> &LivenessRegistry {
        &self.shared.registry
    }

    /// Soft violations noticed so far
    pub fn soft_violations(&self) -> usize {
        self.shared.soft_violations.load(Ordering::Relaxed)
    }

    /// Block until the monitor publishes its outcome
    ///
    /// Never returns if the monitor is never started.
    pub fn wait(&self) -> WatchdogOutcome {
        // The sender lives in `shared`, which we hold, so the channel cannot disconnect
        match self.shared.outcome_rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => unreachable!("watchdog outcome channel disconnected"),
        }
    }

    /// Like [`Watchdog::wait`] but gives up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<WatchdogOutcome> {
        match self.shared.outcome_rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Join the monitor thread, if it was started
    pub fn join(&self) {
        let handle = self.shared.monitor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Shared {
    fn run(&self) {
        let monitor = current_worker_id();
        self.logger.emit(StatusEvent::WatchdogStarted { monitor });

        let mut all_alive = true;
        let mut stalled = Vec::new();

        while all_alive && !self.registry.is_empty() {
            thread::sleep(self.period);

            for entry in self.registry.scan(Instant::now(), self.period) {
                let elapsed_ms = entry.elapsed.as_millis() as u64;
                if entry.hard {
                    all_alive = false;
                    stalled.push((entry.worker, elapsed_ms));
                    self.logger.emit(StatusEvent::Stalled {
                        monitor,
                        worker: entry.worker,
                        elapsed_ms,
                    });
                } else {
                    self.soft_violations.fetch_add(1, Ordering::Relaxed);
                    self.logger.emit(StatusEvent::Unresponsive {
                        monitor,
                        worker: entry.worker,
                        elapsed_ms,
                    });
                }
            }
        }

        let empty = self.registry.is_empty();
        let locks = if all_alive {
            None
        } else {
            self.lock_snapshot(monitor)
        };
        self.logger.emit(StatusEvent::WatchdogFinished {
            monitor,
            all_alive,
            empty,
        });

        let outcome = if all_alive {
            self.state.store(WatchdogState::Finished as u8, Ordering::Release);
            WatchdogOutcome::Finished {
                soft_violations: self.soft_violations.load(Ordering::Relaxed),
            }
        } else {
            let timeout = LivenessTimeout {
                stalled_workers: stalled,
                period_ms: self.period.as_millis() as u64,
                active_workers: self.registry.len(),
                timestamp: Utc::now().to_rfc3339(),
                locks,
            };
            self.state.store(WatchdogState::TimedOut as u8, Ordering::Release);
            if let Some(callback) = &self.on_timeout {
                callback(&timeout);
            }
            WatchdogOutcome::TimedOut(timeout)
        };

        // Capacity 1 and a single send per watchdog
        let _ = self.outcome_tx.try_send(outcome);
    }

    /// Snapshot the attached pool and emit it, one line per lock
    fn lock_snapshot(&self, monitor: WorkerId) -> Option<LockSnapshot> {
        let mut snapshot = self.pool.get()?.snapshot();
        snapshot.add_not_waiting(self.registry.workers());

        for lock in &snapshot.locks {
            self.logger.emit(StatusEvent::LockOwnership {
                monitor,
                lock: lock.index,
                owner: lock.owner,
                waiters: lock.waiters.clone(),
            });
        }
        self.logger.emit(StatusEvent::NotWaiting {
            monitor,
            workers: snapshot.not_waiting.clone(),
        });
        for cycle in &snapshot.cycles {
            self.logger.emit(StatusEvent::DeadlockCycle {
                monitor,
                cycle: cycle.clone(),
            });
        }
        Some(snapshot)
    }
}
