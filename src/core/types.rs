use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Identifies a thread taking part in a run, workers and the watchdog alike
///
/// Ids are handed out on a thread's first call to [`current_worker_id`] and
/// never reused within the process, so an id in a status line or in a
/// [`LockSnapshot`] always names exactly one thread.
pub type WorkerId = usize;

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static WORKER_ID: WorkerId = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
}

/// Id of the calling thread, stable for the thread's lifetime
pub fn current_worker_id() -> WorkerId {
    WORKER_ID.with(|id| *id)
}

/// Lifecycle of the watchdog monitor
///
/// `Idle` until the first liveness report, then `Running` until the registry
/// drains (`Finished`) or a worker stays silent past the hard limit
/// (`TimedOut`). Both of the latter are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum WatchdogState {
    Idle = 0,
    Running = 1,
    TimedOut = 2,
    Finished = 3,
}

impl WatchdogState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WatchdogState::Idle,
            1 => WatchdogState::Running,
            2 => WatchdogState::TimedOut,
            _ => WatchdogState::Finished,
        }
    }

    /// Whether the monitor has stopped for good
    pub fn is_terminal(self) -> bool {
        matches!(self, WatchdogState::TimedOut | WatchdogState::Finished)
    }
}

/// A worker found silent for longer than one check period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staleness {
    /// The silent worker
    pub worker: WorkerId,
    /// Time since its last liveness report
    pub elapsed: Duration,
    /// Silence exceeded the hard limit (`period * 1.5`)
    pub hard: bool,
}

/// Fatal watchdog verdict
///
/// Produced once, by the watchdog thread, after at least one worker stayed
/// silent for longer than the hard limit. It is handed to the owning thread
/// through the watchdog's outcome channel and returned from
/// [`Harness::run`](crate::Harness::run) as an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LivenessTimeout {
    /// Workers past the hard limit with their silence in milliseconds
    pub stalled_workers: Vec<(WorkerId, u64)>,

    /// The watchdog check period in milliseconds
    pub period_ms: u64,

    /// Number of workers still registered when the watchdog gave up
    pub active_workers: usize,

    /// RFC 3339 timestamp of the verdict
    pub timestamp: String,

    /// Lock owners, waiters and circular waits at the moment of the verdict
    ///
    /// `None` when the watchdog was not attached to a [`LockPool`](crate::LockPool).
    #[serde(default)]
    pub locks: Option<LockSnapshot>,
}

impl fmt::Display for LivenessTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Watchdog timeout: {} of {} active worker(s) silent for more than 1.5 x {}ms",
            self.stalled_workers.len(),
            self.active_workers,
            self.period_ms
        )?;
        for (worker, elapsed_ms) in &self.stalled_workers {
            write!(f, "; worker({worker}) silent {elapsed_ms}ms")?;
        }
        if let Some(locks) = &self.locks {
            for cycle in &locks.cycles {
                write!(f, "; deadlock {}", format_cycle(cycle))?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for LivenessTimeout {}

/// One lock that is held or waited on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockState {
    /// Position of the lock in its pool
    pub index: usize,
    /// Worker holding the lock, if any
    pub owner: Option<WorkerId>,
    /// Workers blocked on the lock, ascending
    pub waiters: Vec<WorkerId>,
}

/// Who holds and who waits on which lock at one instant
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Locks that are held or waited on, ordered by index
    pub locks: Vec<LockState>,
    /// Workers not blocked on any lock, ascending
    pub not_waiting: Vec<WorkerId>,
    /// Circular waits, each listed once as the workers along the cycle
    pub cycles: Vec<Vec<WorkerId>>,
}

impl LockSnapshot {
    /// Whether `worker` is blocked on some lock
    pub fn is_waiting(&self, worker: WorkerId) -> bool {
        self.locks.iter().any(|l| l.waiters.contains(&worker))
    }

    /// Add every worker of `workers` that is not blocked to `not_waiting`
    pub fn add_not_waiting(&mut self, workers: impl IntoIterator<Item = WorkerId>) {
        let idle: Vec<WorkerId> = workers
            .into_iter()
            .filter(|&w| !self.is_waiting(w))
            .collect();
        self.not_waiting.extend(idle);
        self.not_waiting.sort_unstable();
        self.not_waiting.dedup();
    }
}

/// Render a cycle as `a -> b -> a`
pub fn format_cycle(cycle: &[WorkerId]) -> String {
    let mut out = String::new();
    for worker in cycle.iter().chain(cycle.first()) {
        if !out.is_empty() {
            out.push_str(" -> ");
        }
        out.push_str(&worker.to_string());
    }
    out
}

/// How the watchdog stopped
#[derive(Debug, Clone, PartialEq)]
pub enum WatchdogOutcome {
    /// The registry drained without a hard violation
    Finished { soft_violations: usize },
    /// A worker stalled past the hard limit
    TimedOut(LivenessTimeout),
    /// The monitor thread could not be started
    Failed(String),
}
