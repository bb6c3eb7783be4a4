//! Console logger for hosts that embed the client without a logger of their
//! own.
//!
//! Implements `log::Log` and writes one line per record to stderr. Records
//! from the hashing backend are filtered out; everything else is printed with
//! its level and target.

use std::io::Write;

use log::{LevelFilter, Metadata, Record, SetLoggerError};

/// Global logger instance
static LOGGER: ConsoleLogger = ConsoleLogger;

/// Targets that only add noise to request traces.
const MUTED_TARGETS: &[&str] = &["sha1", "ahash"];

struct ConsoleLogger;

impl ConsoleLogger {
    fn muted(target: &str) -> bool {
        MUTED_TARGETS.iter().any(|muted| target.starts_with(muted))
    }
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && !Self::muted(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut err = std::io::stderr().lock();
        // Nothing sensible to do if stderr is gone.
        let _ = writeln!(
            err,
            "[{:<5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the console logger.
///
/// Fails if another logger was installed first; the caller decides whether
/// that matters.
pub fn init(max_level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(max_level);
    Ok(())
}
