//! Serial line intake: byte stream to complete command lines.

use heapless::Vec;

/// Accumulates serial bytes until a line feed.
///
/// The capacity is fixed; bytes past it are discarded and the whole
/// over-long line is thrown away at its terminator, since a truncated
/// command must not be half-executed. The CR of a CRLF ending is left in
/// place for the parser's whitespace rule to skip.
pub struct LineBuffer<const N: usize = 128> {
    buf: Vec<u8, N>,
    overflow: bool,
    ready: bool,
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            overflow: false,
            ready: false,
        }
    }

    /// Feed one byte; returns the completed line on LF.
    ///
    /// The returned slice stays valid until the next call, which recycles
    /// the buffer.
    pub fn feed(&mut self, byte: u8) -> Option<&str> {
        if self.ready {
            self.buf.clear();
            self.ready = false;
        }

        if byte == b'\n' {
            if core::mem::take(&mut self.overflow) {
                self.buf.clear();
                return None;
            }
            self.ready = true;
            return core::str::from_utf8(&self.buf).ok();
        }

        if self.buf.push(byte).is_err() {
            self.overflow = true;
        }
        None
    }
}

impl<const N: usize> Default for LineBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str<'a, const N: usize>(buf: &'a mut LineBuffer<N>, text: &str) -> Option<String> {
        let mut line = None;
        for b in text.bytes() {
            if let Some(l) = buf.feed(b) {
                line = Some(l.to_owned());
            }
        }
        line
    }

    #[test]
    fn yields_lines_on_lf() {
        let mut buf = LineBuffer::<16>::new();
        assert_eq!(feed_str(&mut buf, "X10 Y2\r\n").as_deref(), Some("X10 Y2\r"));
        assert_eq!(feed_str(&mut buf, "M3\n").as_deref(), Some("M3"));
        assert_eq!(feed_str(&mut buf, "incompl"), None);
        assert_eq!(feed_str(&mut buf, "ete\n").as_deref(), Some("incomplete"));
    }

    #[test]
    fn overlong_line_is_discarded_whole() {
        let mut buf = LineBuffer::<8>::new();
        assert_eq!(feed_str(&mut buf, "X123456789\n"), None);
        // The buffer recovers on the next line.
        assert_eq!(feed_str(&mut buf, "X1\n").as_deref(), Some("X1"));
    }
}
