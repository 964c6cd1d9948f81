use stallguard::Harness;
mod common;
use common::Captured;

#[test]
fn test_disjoint_subsets_always_drain() {
    // Several rounds with different seeds; none may ever stall
    for seed in 0..3 {
        let out = Captured::default();

        let report = Harness::new(20, 5, 8)
            .partitioned(true)
            .hold(1..=20)
            .seed(seed)
            .writer(out.writer())
            .run()
            .unwrap_or_else(|err| panic!("partitioned run stalled (seed {seed}): {err}"));

        assert_eq!(report.workers, 5);
        assert_eq!(report.iterations_completed, 40);
        assert!(report.registry_empty);
        assert_eq!(out.count("stalled"), 0);
        let finished = out
            .lines()
            .iter()
            .filter(|l| l.starts_with("worker(") && l.ends_with(") finished"))
            .count();
        assert_eq!(finished, 5);
        assert_eq!(out.count(") joined"), 5);
        assert_eq!(out.count("allAlive: true"), 1);
    }
}
