use parking_lot::Mutex;
use stallguard::SyncWriter;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

/// Short check period so stalls surface quickly
#[allow(dead_code)]
pub const FAST_PERIOD: Duration = Duration::from_millis(100);
/// Upper bound on how long any scenario may wait for the watchdog
#[allow(dead_code)]
pub const VERDICT_TIMEOUT: Duration = Duration::from_secs(10);

/// In-memory writer whose contents outlive the harness
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

#[allow(dead_code)]
impl Captured {
    pub fn writer(&self) -> SyncWriter {
        SyncWriter::new(self.clone())
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[allow(dead_code)]
    pub fn count(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }
}

impl Write for Captured {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
