//! # Stallguard
//!
//! A lock-ordering deadlock provoker with a liveness watchdog.
//!
//! Stallguard spawns worker threads that lock random permutations of a shared
//! pool of mutexes, on purpose, so that sooner or later two of them wait on
//! each other forever. A background watchdog tracks when each worker last
//! reported progress and declares a [`LivenessTimeout`] once one has been
//! silent for more than one and a half check periods.
//!
//! ## Features
//!
//! - Randomized, seedable lock-acquisition orders
//! - Lazily started watchdog with soft and hard staleness thresholds
//! - Lock owner and waiter snapshots with deadlock cycles on timeout
//! - Line-atomic status output and an optional JSON-lines event log
//! - Detection only: stalled workers are never unblocked

mod core;
pub use crate::core::{
    Entropy, EventLogger, Harness, LivenessRegistry, LivenessTimeout, LockPool, LockSnapshot,
    LockState, Logger, Provoker, RunReport, StatusEvent, SyncWriter, Watchdog, WatchdogOutcome, WatchdogState,
    locks::PoolGuard,
    logger::{LoggerMode, TIMESTAMP_PLACEHOLDER},
    provoker::{DEFAULT_HOLD_MS, clamp_subset, draw_permutation},
    registry::HARD_LIMIT_FACTOR,
    types::{Staleness, WorkerId, current_worker_id, format_cycle},
    watchdog::{DEFAULT_PERIOD, TimeoutCallback},
};

pub const BANNER: &str = r#"
  ▄▖▗ ▄▖▖ ▖   ▄▖▖▖▄▖▄▖▄
  ▚ ▜ ▌▌▌ ▌   ▌ ▌▌▌▌▙▘▌▌
  ▄▌▐▖▛▌▙▖▙▖  ▙▌▙▌▛▌▌▌▙▘
"#;
