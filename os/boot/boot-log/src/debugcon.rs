use crate::LogSink;

/// QEMU's debug console port.
const DEBUGCON_PORT: u16 = 0x402;

/// Writes bytes to QEMU's debug console.
///
/// On real hardware the port is normally unused and the writes go nowhere.
#[derive(Debug, Default, Copy, Clone)]
pub struct DebugconSink;

impl DebugconSink {
    #[allow(clippy::inline_always)]
    #[inline(always)]
    fn putc(c: u8) {
        // SAFETY: writing to the debug port has no side effects besides output.
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") DEBUGCON_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
    }
}

impl LogSink for DebugconSink {
    fn write_str(&self, s: &str) {
        for b in s.bytes() {
            Self::putc(b);
        }
    }
}
