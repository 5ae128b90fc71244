use crate::{LogSink, SinkWriter};
use core::fmt::Write;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// A [`Log`] implementation writing one line per record into a [`LogSink`].
pub struct BootLogger<S> {
    max_level: LevelFilter,
    sink: S,
}

impl<S: LogSink> BootLogger<S> {
    #[must_use]
    pub const fn new(max_level: LevelFilter, sink: S) -> Self {
        Self { max_level, sink }
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Installs this logger as the global `log` backend.
    ///
    /// # Errors
    /// If a logger has already been installed.
    pub fn install(&'static self) -> Result<(), SetLoggerError>
    where
        S: 'static,
    {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

impl<S: LogSink> Log for BootLogger<S> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Best effort; the sink never fails.
        let _ = writeln!(
            SinkWriter(&self.sink),
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}
