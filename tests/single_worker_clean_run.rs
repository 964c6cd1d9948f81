use stallguard::Harness;
mod common;
use common::Captured;

#[test]
fn test_single_worker_on_twenty_locks_completes() {
    let out = Captured::default();

    let report = Harness::new(20, 1, 10)
        .seed(2024)
        .writer(out.writer())
        .run()
        .expect("a lone worker can never deadlock");

    assert_eq!(report.workers, 1);
    assert_eq!(report.iterations_completed, 10);
    assert_eq!(report.soft_violations, 0);
    assert!(report.registry_empty);

    assert_eq!(out.count("all locks acquired"), 10);
    assert_eq!(out.count("loop 10 end"), 1);
    assert_eq!(out.count(") finished, allAlive: true, empty: true"), 1);
    assert_eq!(out.count(") joined"), 1);
    assert_eq!(out.count("unresponsive"), 0);
    assert_eq!(out.count("stalled"), 0);
}
