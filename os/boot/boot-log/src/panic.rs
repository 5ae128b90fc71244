use crate::{LogSink, SinkWriter};
use core::fmt::{self, Write};
use core::panic::PanicInfo;

/// Writes the fatal-error report: a `PANIC!` banner, the message and a
/// closing `Halted.` line.
pub fn write_halt_report<S: LogSink + ?Sized>(sink: &S, message: fmt::Arguments<'_>) {
    let mut out = SinkWriter(sink);
    let _ = write!(out, "PANIC!\n{message}\n\nHalted.\n");
}

/// Writes the report for a panic, including its location if known.
pub fn report_panic<S: LogSink + ?Sized>(sink: &S, info: &PanicInfo<'_>) {
    match info.location() {
        Some(location) => write_halt_report(
            sink,
            format_args!(
                "{} at {}:{}",
                info.message(),
                location.file(),
                location.line()
            ),
        ),
        None => write_halt_report(sink, format_args!("{}", info.message())),
    }
}

/// Parks the processor for good.
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
