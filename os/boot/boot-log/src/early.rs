use crate::LogSink;
use spin::Mutex;

/// Captures log output until a real sink is available.
///
/// The buffer keeps the first `N` bytes and counts what did not fit; early
/// boot messages matter more than late ones.
pub struct EarlyLogBuffer<const N: usize> {
    inner: Mutex<Buffer<N>>,
}

struct Buffer<const N: usize> {
    bytes: [u8; N],
    len: usize,
    dropped: usize,
}

impl<const N: usize> EarlyLogBuffer<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Buffer {
                bytes: [0; N],
                len: 0,
                dropped: 0,
            }),
        }
    }

    /// Bytes currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes that did not fit.
    pub fn dropped(&self) -> usize {
        self.inner.lock().dropped
    }

    /// Writes the captured output into `sink`, keeping it.
    pub fn replay<S: LogSink + ?Sized>(&self, sink: &S) {
        let buffer = self.inner.lock();
        buffer.replay(sink);
    }

    /// Writes the captured output into `sink` and empties the buffer.
    pub fn drain<S: LogSink + ?Sized>(&self, sink: &S) {
        let mut buffer = self.inner.lock();
        buffer.replay(sink);
        buffer.len = 0;
        buffer.dropped = 0;
    }
}

impl<const N: usize> Buffer<N> {
    fn replay<S: LogSink + ?Sized>(&self, sink: &S) {
        // Only whole characters are ever stored.
        if let Ok(text) = core::str::from_utf8(&self.bytes[..self.len]) {
            sink.write_str(text);
        }
        if self.dropped > 0 {
            let mut line = [0u8; 48];
            sink.write_str(dropped_line(&mut line, self.dropped));
        }
    }
}

/// Formats `"[early log: N bytes dropped]\n"` into `buf`.
fn dropped_line(buf: &mut [u8; 48], dropped: usize) -> &str {
    const PREFIX: &[u8] = b"[early log: ";
    const SUFFIX: &[u8] = b" bytes dropped]\n";

    let mut digits = [0u8; 20];
    let mut n = dropped;
    let mut start = digits.len();
    loop {
        start -= 1;
        #[allow(clippy::cast_possible_truncation)]
        {
            digits[start] = b'0' + (n % 10) as u8;
        }
        n /= 10;
        if n == 0 {
            break;
        }
    }

    let mut len = 0;
    for part in [PREFIX, &digits[start..], SUFFIX] {
        buf[len..len + part.len()].copy_from_slice(part);
        len += part.len();
    }
    core::str::from_utf8(&buf[..len]).unwrap_or_default()
}

impl<const N: usize> Default for EarlyLogBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LogSink for EarlyLogBuffer<N> {
    fn write_str(&self, s: &str) {
        let mut buffer = self.inner.lock();
        let room = N - buffer.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        let start = buffer.len;
        buffer.bytes[start..start + take].copy_from_slice(&s.as_bytes()[..take]);
        buffer.len += take;
        buffer.dropped += s.len() - take;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::Capture;

    #[test]
    fn replays_in_order() {
        let early = EarlyLogBuffer::<64>::new();
        early.write_str("[INFO] a: one\n");
        early.write_str("[WARN] b: two\n");

        let capture = Capture::default();
        early.replay(&capture);
        assert_eq!(capture.text(), "[INFO] a: one\n[WARN] b: two\n");
        assert_eq!(early.len(), 28);
    }

    #[test]
    fn drain_empties() {
        let early = EarlyLogBuffer::<64>::new();
        early.write_str("x");
        let capture = Capture::default();
        early.drain(&capture);
        assert!(early.is_empty());
        early.drain(&capture);
        assert_eq!(capture.text(), "x");
    }

    #[test]
    fn overflow_keeps_whole_characters() {
        let early = EarlyLogBuffer::<4>::new();
        early.write_str("abcä");
        early.write_str("xyz");
        assert_eq!(early.len(), 4);
        assert_eq!(early.dropped(), 4);

        let capture = Capture::default();
        early.replay(&capture);
        assert_eq!(capture.text(), "abcx[early log: 4 bytes dropped]\n");
    }

    #[test]
    fn dropped_line_formats_large_counts() {
        let mut buf = [0u8; 48];
        assert_eq!(
            dropped_line(&mut buf, usize::MAX),
            "[early log: 18446744073709551615 bytes dropped]\n"
        );
    }
}
