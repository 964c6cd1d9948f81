use anyhow::Result;
use clap::Parser;
use stallguard::Harness;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Stallguard - Lock-Ordering Deadlock Provoker With A Liveness Watchdog"
)]
struct Cli {
    /// Number of mutexes in the shared pool
    #[arg(long, default_value_t = 20)]
    mutexes: usize,

    /// Number of worker threads
    #[arg(long, default_value_t = 10)]
    threads: usize,

    /// Iterations per worker
    #[arg(long, default_value_t = 10)]
    loops: usize,

    /// Mutexes locked by each worker (0 = all of them)
    #[arg(long, default_value_t = 5)]
    subset: usize,

    /// Watchdog check period in milliseconds
    #[arg(long, default_value_t = 500)]
    period_ms: u64,

    /// Seed for reproducible permutations and hold times
    #[arg(long)]
    seed: Option<u64>,

    /// Give every worker a disjoint slice of the pool
    #[arg(long)]
    partitioned: bool,

    /// Path to a JSON-lines event log ("{timestamp}" is expanded)
    #[arg(long)]
    log: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    println!("{}", stallguard::BANNER);

    let mut harness = Harness::new(cli.mutexes, cli.threads, cli.loops)
        .subset(cli.subset)
        .period(Duration::from_millis(cli.period_ms))
        .partitioned(cli.partitioned);
    if let Some(seed) = cli.seed {
        harness = harness.seed(seed);
    }
    if let Some(log) = cli.log {
        harness = harness.with_log(log);
    }

    // A liveness timeout propagates out of main; stalled workers stay blocked
    // until the process exits.
    let report = harness.run()?;
    println!(
        "clean run: {} workers, {} iterations, {} soft violations, {}ms",
        report.workers, report.iterations_completed, report.soft_violations, report.elapsed_ms
    );
    Ok(())
}
