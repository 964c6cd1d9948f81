use crate::core::types::{WorkerId, format_cycle};
use serde::Serialize;
use std::fmt;

/// Everything a run reports about itself
///
/// `Display` renders the human status line, `Serialize` the event log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusEvent {
    /// A worker drew its permutation and is about to loop
    WorkerStarted {
        worker: WorkerId,
        permutation: Vec<usize>,
    },
    /// A worker reported alive and starts acquiring
    LoopBegin { worker: WorkerId, iteration: usize },
    /// A worker holds every lock of its permutation
    LocksAcquired { worker: WorkerId, iteration: usize },
    /// A worker released everything
    LoopEnd { worker: WorkerId, iteration: usize },
    /// A worker completed all iterations and left the registry
    WorkerFinished { worker: WorkerId },
    /// The harness joined a finished worker
    WorkerJoined { worker: WorkerId },
    /// The watchdog thread came up
    WatchdogStarted { monitor: WorkerId },
    /// Silent for more than one period
    Unresponsive {
        monitor: WorkerId,
        worker: WorkerId,
        elapsed_ms: u64,
    },
    /// Silent for more than 1.5 periods
    Stalled {
        monitor: WorkerId,
        worker: WorkerId,
        elapsed_ms: u64,
    },
    /// A held or contended lock at the moment of a timeout
    LockOwnership {
        monitor: WorkerId,
        lock: usize,
        owner: Option<WorkerId>,
        waiters: Vec<WorkerId>,
    },
    /// Registered workers not blocked on any lock at the moment of a timeout
    NotWaiting {
        monitor: WorkerId,
        workers: Vec<WorkerId>,
    },
    /// A circular wait among workers
    DeadlockCycle {
        monitor: WorkerId,
        cycle: Vec<WorkerId>,
    },
    /// The watchdog loop exited
    WatchdogFinished {
        monitor: WorkerId,
        all_alive: bool,
        empty: bool,
    },
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::WorkerStarted {
                worker,
                permutation,
            } => write!(f, "worker({worker}) started, permutation: {permutation:?}"),
            StatusEvent::LoopBegin { worker, iteration } => {
                write!(f, "worker({worker}) loop {iteration} begin")
            }
            StatusEvent::LocksAcquired { worker, iteration } => {
                write!(f, "worker({worker}) loop {iteration} all locks acquired")
            }
            StatusEvent::LoopEnd { worker, iteration } => {
                write!(f, "worker({worker}) loop {iteration} end")
            }
            StatusEvent::WorkerFinished { worker } => write!(f, "worker({worker}) finished"),
            StatusEvent::WorkerJoined { worker } => write!(f, "worker({worker}) joined"),
            StatusEvent::WatchdogStarted { monitor } => write!(f, "watchdog({monitor}) started"),
            StatusEvent::Unresponsive {
                monitor,
                worker,
                elapsed_ms,
            } => write!(
                f,
                "watchdog({monitor}) unresponsive worker: {worker} ({elapsed_ms}ms)"
            ),
            StatusEvent::Stalled {
                monitor,
                worker,
                elapsed_ms,
            } => write!(
                f,
                "watchdog({monitor}) stalled worker: {worker} ({elapsed_ms}ms)"
            ),
            StatusEvent::LockOwnership {
                monitor,
                lock,
                owner,
                waiters,
            } => match owner {
                Some(owner) => write!(
                    f,
                    "watchdog({monitor}) lock {lock}: owner {owner}, waiters {waiters:?}"
                ),
                None => write!(
                    f,
                    "watchdog({monitor}) lock {lock}: owner none, waiters {waiters:?}"
                ),
            },
            StatusEvent::NotWaiting { monitor, workers } => {
                write!(f, "watchdog({monitor}) not waiting: {workers:?}")
            }
            StatusEvent::DeadlockCycle { monitor, cycle } => {
                write!(f, "watchdog({monitor}) deadlock: {}", format_cycle(cycle))
            }
            StatusEvent::WatchdogFinished {
                monitor,
                all_alive,
                empty,
            } => write!(
                f,
                "watchdog({monitor}) finished, allAlive: {all_alive}, empty: {empty}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines() {
        let ev = StatusEvent::LocksAcquired {
            worker: 4,
            iteration: 2,
        };
        assert_eq!(ev.to_string(), "worker(4) loop 2 all locks acquired");

        let ev = StatusEvent::WatchdogFinished {
            monitor: 9,
            all_alive: false,
            empty: false,
        };
        assert_eq!(
            ev.to_string(),
            "watchdog(9) finished, allAlive: false, empty: false"
        );
    }

    #[test]
    fn test_lock_snapshot_lines() {
        let ev = StatusEvent::LockOwnership {
            monitor: 1,
            lock: 3,
            owner: Some(5),
            waiters: vec![6, 7],
        };
        assert_eq!(ev.to_string(), "watchdog(1) lock 3: owner 5, waiters [6, 7]");

        let ev = StatusEvent::NotWaiting {
            monitor: 1,
            workers: vec![2],
        };
        assert_eq!(ev.to_string(), "watchdog(1) not waiting: [2]");

        let ev = StatusEvent::DeadlockCycle {
            monitor: 1,
            cycle: vec![5, 6],
        };
        assert_eq!(ev.to_string(), "watchdog(1) deadlock: 5 -> 6 -> 5");
        assert_eq!(serde_json::to_value(&ev).unwrap()["kind"], "deadlock_cycle");
    }

    #[test]
    fn test_event_record_is_tagged() {
        let ev = StatusEvent::Stalled {
            monitor: 1,
            worker: 2,
            elapsed_ms: 760,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "stalled");
        assert_eq!(json["worker"], 2);
        assert_eq!(json["elapsed_ms"], 760);
    }
}
