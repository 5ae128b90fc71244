//! # Boot Logging
//!
//! A `log` backend for the loader and the tools around it. Log records are
//! formatted as `"[LEVEL] target: message"` and handed to a [`LogSink`], a
//! byte-oriented output that needs neither allocation nor locking on the
//! caller's side.
//!
//! ## Sinks
//!
//! * [`DebugconSink`] writes to QEMU's debug console, I/O port `0x402`
//!   (feature `debugcon`, x86 only). Run QEMU with `-debugcon stdio` to see
//!   the output.
//! * [`EarlyLogBuffer`] captures output before any device is usable and
//!   replays it into a real sink once one exists.
//! * Any `&T` where `T: LogSink`, so a `static` sink can be shared.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use boot_log::{BootLogger, EarlyLogBuffer};
//! use log::{LevelFilter, info};
//!
//! static EARLY: EarlyLogBuffer<4096> = EarlyLogBuffer::new();
//! static LOGGER: BootLogger<&EarlyLogBuffer<4096>> =
//!     BootLogger::new(LevelFilter::Debug, &EARLY);
//!
//! LOGGER.install().expect("logger already installed");
//! info!("memory map ready");
//! ```
//!
//! ## Fatal errors
//!
//! Panic handlers call [`report_panic`] and then [`halt`]; the report is a
//! `PANIC!` banner, the message and a closing `Halted.` line.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(all(feature = "debugcon", any(target_arch = "x86", target_arch = "x86_64")))]
mod debugcon;
mod early;
mod logger;
mod panic;

#[cfg(all(feature = "debugcon", any(target_arch = "x86", target_arch = "x86_64")))]
pub use debugcon::DebugconSink;
pub use early::EarlyLogBuffer;
pub use logger::BootLogger;
pub use panic::{halt, report_panic, write_halt_report};

use core::fmt;

/// A byte sink for log output.
///
/// Writes are best effort and must not panic.
pub trait LogSink: Send + Sync {
    fn write_str(&self, s: &str);
}

impl<T: LogSink + ?Sized> LogSink for &T {
    fn write_str(&self, s: &str) {
        (**self).write_str(s);
    }
}

/// Adapts a [`LogSink`] to [`fmt::Write`].
pub(crate) struct SinkWriter<'a, S: ?Sized>(pub &'a S);

impl<S: LogSink + ?Sized> fmt::Write for SinkWriter<'_, S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}
