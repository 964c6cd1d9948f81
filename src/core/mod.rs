// Core types
pub mod types;
pub use types::*;

// Status output
pub mod logger;
pub use logger::{EventLogger, Logger, StatusEvent, SyncWriter};

// Liveness tracking
pub mod registry;
pub use registry::LivenessRegistry;

pub mod watchdog;
pub use watchdog::Watchdog;

// Contended resources and the workers fighting over them
pub mod locks;
pub use locks::LockPool;

pub mod provoker;
pub use provoker::Provoker;

pub mod entropy;
pub use entropy::Entropy;

// Deadlock cycle detection over lock ownership
pub(crate) mod graph;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, unbounded};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use watchdog::TimeoutCallback;

/// Summary of a run that drained cleanly
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Worker threads spawned
    pub workers: usize,
    /// Iterations completed across all workers
    pub iterations_completed: usize,
    /// Workers noticed silent for more than one period, but not 1.5
    pub soft_violations: usize,
    /// Whether the liveness registry ended empty
    pub registry_empty: bool,
    /// Wall time of the run in milliseconds
    pub elapsed_ms: u64,
}

/// Stallguard harness configuration
///
/// # Example
///
/// ```rust,no_run
/// use stallguard::Harness;
///
/// // 20 locks, 10 workers, 10 iterations each, 5 locks per worker
/// let report = Harness::new(20, 10, 10).subset(5).run();
/// match report {
///     Ok(report) => println!("clean run: {report:?}"),
///     Err(err) => eprintln!("{err}"),
/// }
/// ```
pub struct Harness {
    mutexes: usize,
    workers: usize,
    iterations: usize,
    subset: usize,
    period: Duration,
    hold_ms: RangeInclusive<u64>,
    entropy: Entropy,
    partitioned: bool,
    log_path: Option<String>,
    writer: Option<SyncWriter>,
    on_timeout: Option<TimeoutCallback>,
}

impl Harness {
    /// Create a new harness with default settings
    ///
    /// By default:
    /// - Every worker takes the whole pool
    /// - The watchdog checks every 500ms
    /// - Locks are held for 1 to 80ms
    /// - Every worker seeds itself from the OS
    /// - Status lines go to stdout and the event log is disabled
    pub fn new(mutexes: usize, workers: usize, iterations: usize) -> Self {
        Harness {
            mutexes,
            workers,
            iterations,
            subset: 0,
            period: watchdog::DEFAULT_PERIOD,
            hold_ms: provoker::DEFAULT_HOLD_MS,
            entropy: Entropy::Os,
            partitioned: false,
            log_path: None,
            writer: None,
            on_timeout: None,
        }
    }

    /// Locks taken by each worker; zero or more than the pool means all of them
    pub fn subset(mut self, subset: usize) -> Self {
        self.subset = subset;
        self
    }

    /// Watchdog check period
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Range of the per-iteration hold duration in milliseconds
    pub fn hold(mut self, hold_ms: RangeInclusive<u64>) -> Self {
        self.hold_ms = hold_ms;
        self
    }

    /// Derive every worker's randomness from `seed`
    pub fn seed(mut self, seed: u64) -> Self {
        self.entropy = Entropy::Seeded(seed);
        self
    }

    /// Give each worker a disjoint slice of the pool instead of a draw over all of it
    ///
    /// Worker `i` gets locks `[i * c, (i + 1) * c)` with `c = mutexes / workers`,
    /// shuffled. Such a run can never deadlock.
    pub fn partitioned(mut self, partitioned: bool) -> Self {
        self.partitioned = partitioned;
        self
    }

    /// Activate the JSON-lines event log
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the path contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    pub fn with_log<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.log_path = Some(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Send status lines somewhere other than stdout
    pub fn writer(mut self, writer: SyncWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Set a callback to run on the watchdog thread when it times out
    pub fn on_timeout<F>(mut self, callback: F) -> Self
    where
        F: Fn(&LivenessTimeout) + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(callback));
        self
    }

    /// Spawn the workers and wait for the watchdog's verdict
    ///
    /// # Returns
    /// A [`RunReport`] once every worker has finished and been joined
    ///
    /// # Errors
    /// Returns a [`LivenessTimeout`] (recoverable with
    /// `anyhow::Error::downcast_ref`) if a worker stalled. The stalled workers
    /// are left blocked and detached. Also fails if the event log cannot be
    /// opened, a thread cannot be spawned, or a worker panicked.
    pub fn run(mut self) -> Result<RunReport> {
        let started = Instant::now();
        if self.workers == 0 {
            return Ok(RunReport {
                workers: 0,
                iterations_completed: 0,
                soft_violations: 0,
                registry_empty: true,
                elapsed_ms: 0,
            });
        }

        let events = match &self.log_path {
            Some(path) => {
                EventLogger::with_file(path).context("Failed to initialize event logger")?
            }
            None => EventLogger::new(),
        };
        let logger = Arc::new(Logger::new(self.writer.take().unwrap_or_default(), events));
        let pool = Arc::new(LockPool::new(self.mutexes));
        let watchdog =
            Watchdog::with_callback(self.period, Arc::clone(&logger), self.on_timeout.take());
        watchdog.attach_pool(Arc::clone(&pool));
        let gate = StartGate::new();

        let mut handles = Vec::with_capacity(self.workers);
        for index in 0..self.workers {
            let provoker = self.provoker_for(index);
            let pool = Arc::clone(&pool);
            let worker_watchdog = watchdog.clone();
            let logger = Arc::clone(&logger);
            let ticket = gate.ticket();

            let spawned = thread::Builder::new()
                .name(format!("stallguard-worker-{index}"))
                .spawn(move || {
                    // Register before anyone starts looping so the registry
                    // cannot drain while a worker is still on its way in
                    let id = types::current_worker_id();
                    worker_watchdog.alive(id);
                    if !ticket.wait() {
                        worker_watchdog.finished(id);
                        return None;
                    }
                    Some(provoker.run(&pool, &worker_watchdog, &logger))
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Closing the gate sends every parked worker home
                    drop(gate);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    watchdog.join();
                    return Err(err).context("Failed to spawn worker thread");
                }
            }
        }
        gate.open(handles.len())?;

        match watchdog.wait() {
            WatchdogOutcome::Finished { soft_violations } => {
                for handle in handles {
                    let joined = handle
                        .join()
                        .map_err(|_| anyhow!("worker thread panicked"))?;
                    if let Some(worker) = joined {
                        logger.emit(StatusEvent::WorkerJoined { worker });
                    }
                }
                watchdog.join();

                Ok(RunReport {
                    workers: self.workers,
                    iterations_completed: self.workers * self.iterations,
                    soft_violations,
                    registry_empty: watchdog.registry().is_empty(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            WatchdogOutcome::TimedOut(timeout) => {
                watchdog.join();
                // Deadlocked workers never return; dropping the handles detaches them
                drop(handles);
                Err(timeout.into())
            }
            WatchdogOutcome::Failed(reason) => {
                Err(anyhow!("Failed to start watchdog thread: {reason}"))
            }
        }
    }

    fn provoker_for(&self, index: usize) -> Provoker {
        let mut rng = self.entropy.rng_for(index);
        let provoker = if self.partitioned {
            let chunk = self.mutexes / self.workers;
            let mut permutation: Vec<usize> = (index * chunk..(index + 1) * chunk).collect();
            permutation.shuffle(&mut rng);
            permutation.truncate(provoker::clamp_subset(chunk, self.subset));
            Provoker::with_permutation(permutation, self.iterations, rng)
        } else {
            Provoker::random(self.mutexes, self.subset, self.iterations, rng)
        };
        provoker.hold(self.hold_ms.clone())
    }
}

/// Holds spawned workers until every one of them has reported alive
///
/// Each worker takes a [`GateTicket`], reports alive, then waits on it.
/// [`StartGate::open`] lets them all through once all have arrived; dropping
/// the gate instead makes every pending [`GateTicket::wait`] return `false`.
struct StartGate {
    ready_tx: Sender<()>,
    ready_rx: Receiver<()>,
    go_tx: Sender<()>,
    go_rx: Receiver<()>,
}

struct GateTicket {
    ready_tx: Sender<()>,
    go_rx: Receiver<()>,
}

impl StartGate {
    fn new() -> Self {
        let (ready_tx, ready_rx) = unbounded();
        let (go_tx, go_rx) = unbounded();
        StartGate {
            ready_tx,
            ready_rx,
            go_tx,
            go_rx,
        }
    }

    fn ticket(&self) -> GateTicket {
        GateTicket {
            ready_tx: self.ready_tx.clone(),
            go_rx: self.go_rx.clone(),
        }
    }

    /// Wait for `workers` arrivals, then release them all
    fn open(self, workers: usize) -> Result<()> {
        let StartGate {
            ready_tx,
            ready_rx,
            go_tx,
            ..
        } = self;
        drop(ready_tx);

        for _ in 0..workers {
            ready_rx
                .recv()
                .map_err(|_| anyhow!("worker exited before reaching the start gate"))?;
        }
        for _ in 0..workers {
            // Only fails once every ticket is gone, and then nobody is waiting
            let _ = go_tx.send(());
        }
        Ok(())
    }
}

impl GateTicket {
    /// Announce arrival and wait for the gate
    ///
    /// # Returns
    /// `false` if the gate was dropped without opening
    fn wait(self) -> bool {
        let _ = self.ready_tx.send(());
        self.go_rx.recv().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitions_are_disjoint() {
        let harness = Harness::new(10, 3, 1).partitioned(true).seed(5);
        let mut seen = Vec::new();
        for index in 0..3 {
            let provoker = harness.provoker_for(index);
            assert_eq!(provoker.permutation().len(), 3);
            seen.extend_from_slice(provoker.permutation());
        }
        seen.sort();
        assert_eq!(seen, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_partition_respects_subset() {
        let harness = Harness::new(12, 2, 1).partitioned(true).subset(4);
        let provoker = harness.provoker_for(1);
        assert_eq!(provoker.permutation().len(), 4);
        assert!(provoker.permutation().iter().all(|&i| (6..12).contains(&i)));
    }

    #[test]
    fn test_gate_releases_everyone_once_all_arrive() {
        let gate = StartGate::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ticket = gate.ticket();
                thread::spawn(move || ticket.wait())
            })
            .collect();

        gate.open(handles.len()).unwrap();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn test_dropped_gate_sends_parked_workers_home() {
        let watchdog = Watchdog::new(Duration::from_millis(40), Arc::new(Logger::silent()));
        let gate = StartGate::new();

        // Two workers got spawned and parked; the third spawn "failed"
        let parked: Vec<_> = (0..2)
            .map(|_| {
                let watchdog = watchdog.clone();
                let ticket = gate.ticket();
                thread::spawn(move || {
                    let id = types::current_worker_id();
                    watchdog.alive(id);
                    if !ticket.wait() {
                        watchdog.finished(id);
                        return None;
                    }
                    Some(id)
                })
            })
            .collect();

        while watchdog.registry().len() < 2 {
            thread::yield_now();
        }
        drop(gate);

        for handle in parked {
            assert_eq!(handle.join().unwrap(), None);
        }
        assert!(matches!(
            watchdog.wait_timeout(Duration::from_secs(5)),
            Some(WatchdogOutcome::Finished { .. })
        ));
        watchdog.join();
        assert!(watchdog.registry().is_empty());
    }

    #[test]
    fn test_zero_workers_is_a_clean_noop() {
        let report = Harness::new(4, 0, 10)
            .writer(SyncWriter::sink())
            .run()
            .unwrap();
        assert_eq!(report.workers, 0);
        assert!(report.registry_empty);
    }
}
