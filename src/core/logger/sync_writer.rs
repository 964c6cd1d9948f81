use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};

/// Line-atomic writer shared by every thread of a run
///
/// Each call to [`SyncWriter::line`] formats the whole message first and then
/// writes it, newline included, under one lock. Lines from different threads
/// may interleave in any order but never tear.
pub struct SyncWriter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl SyncWriter {
    /// Wrap any writer
    pub fn new<W: Write + Send + 'static>(out: W) -> Self {
        SyncWriter {
            out: Mutex::new(Box::new(out)),
        }
    }

    /// Write to standard output
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Discard everything
    pub fn sink() -> Self {
        Self::new(io::sink())
    }

    /// Emit one line
    ///
    /// Write errors are ignored; status output never interrupts a run.
    pub fn line(&self, args: fmt::Arguments<'_>) {
        let mut buf = fmt::format(args);
        buf.push('\n');

        let mut out = self.out.lock();
        let _ = out.write_all(buf.as_bytes());
        let _ = out.flush();
    }
}

impl Default for SyncWriter {
    fn default() -> Self {
        Self::stdout()
    }
}
