use stallguard::{Harness, SyncWriter};
use std::collections::HashMap;

#[test]
fn test_event_log_mirrors_status_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stallguard_{timestamp}.log");

    Harness::new(6, 2, 3)
        .partitioned(true)
        .hold(1..=5)
        .seed(11)
        .with_log(&path)
        .writer(SyncWriter::sink())
        .run()
        .expect("partitioned run must drain");

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
    let log = entries[0].as_ref().unwrap().path();

    let mut kinds: HashMap<String, usize> = HashMap::new();
    for line in std::fs::read_to_string(log).unwrap().lines() {
        let record: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(record["timestamp"].is_f64());
        *kinds
            .entry(record["kind"].as_str().unwrap().to_string())
            .or_default() += 1;
    }

    assert_eq!(kinds.get("watchdog_started"), Some(&1));
    assert_eq!(kinds.get("watchdog_finished"), Some(&1));
    assert_eq!(kinds.get("worker_started"), Some(&2));
    assert_eq!(kinds.get("loop_begin"), Some(&6));
    assert_eq!(kinds.get("locks_acquired"), Some(&6));
    assert_eq!(kinds.get("loop_end"), Some(&6));
    assert_eq!(kinds.get("worker_finished"), Some(&2));
    assert_eq!(kinds.get("worker_joined"), Some(&2));
    assert_eq!(kinds.get("stalled"), None);
}

#[test]
fn test_unwritable_log_path_fails_before_spawning() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be opened as a log file
    let err = Harness::new(2, 1, 1)
        .with_log(dir.path())
        .writer(SyncWriter::sink())
        .run()
        .unwrap_err();
    assert!(format!("{err:#}").contains("Failed to initialize event logger"));
}
