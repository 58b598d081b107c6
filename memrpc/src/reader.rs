//! Line-buffered stream reader.
//!
//! Yields one logical CRLF-terminated line at a time, and supports a
//! read-exactly-N-bytes mode for fixed-length value bodies (which may
//! themselves contain CRLF and must not be line-split).

/// One framed unit from the stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// A logical line, CRLF stripped.
    Line(Vec<u8>),
    /// Exactly the number of bytes requested via
    /// [`LineReader::expect_body`].
    Body(Vec<u8>),
}

/// Buffered reader over an incrementally fed byte stream.
pub struct LineReader {
    buf: Vec<u8>,
    pos: usize,
    want_body: usize,
}

/// Consumed-prefix length that triggers buffer compaction.
const COMPACT_THRESHOLD: usize = 4096;

impl LineReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            want_body: 0,
        }
    }

    /// Append received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(data);
    }

    /// Switch to body mode: the next frame will be exactly `len` bytes.
    pub fn expect_body(&mut self, len: usize) {
        debug_assert_eq!(self.want_body, 0);
        self.want_body = len;
    }

    /// Next complete frame, or `None` if more bytes are needed.
    pub fn next(&mut self) -> Option<Frame> {
        if self.want_body > 0 {
            if self.buf.len() - self.pos < self.want_body {
                return None;
            }
            let body = self.buf[self.pos..self.pos + self.want_body].to_vec();
            self.pos += self.want_body;
            self.want_body = 0;
            return Some(Frame::Body(body));
        }

        let rest = &self.buf[self.pos..];
        let end = rest.windows(2).position(|w| w == b"\r\n")?;
        let line = rest[..end].to_vec();
        self.pos += end + 2;
        Some(Frame::Line(line))
    }

    /// Bytes buffered but not yet framed.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn compact(&mut self) {
        if self.pos >= COMPACT_THRESHOLD || self.pos == self.buf.len() {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}
