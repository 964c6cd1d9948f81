//! Status reporting for a run
//!
//! Every worker and the watchdog report through one [`Logger`], which writes
//! a human line to its [`SyncWriter`] and, when enabled, a JSON record to its
//! [`EventLogger`]. There is no process-wide logger; each run builds its own.

mod event_logger;
mod status;
mod sync_writer;

pub use event_logger::{EventLogger, LoggerMode, TIMESTAMP_PLACEHOLDER};
pub use status::StatusEvent;
pub use sync_writer::SyncWriter;

/// Status output of a single run
#[derive(Default)]
pub struct Logger {
    out: SyncWriter,
    events: EventLogger,
}

impl Logger {
    pub fn new(out: SyncWriter, events: EventLogger) -> Self {
        Logger { out, events }
    }

    /// Logger that discards everything, handy in tests
    pub fn silent() -> Self {
        Logger::new(SyncWriter::sink(), EventLogger::new())
    }

    pub fn emit(&self, event: StatusEvent) {
        self.out.line(format_args!("{event}"));
        self.events.log_event(&event);
    }
}
