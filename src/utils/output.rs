/// Bounded output handling.
///
/// `OutputCapture` is the in-memory buffer behind the `print` operation.
/// `collect_stream` drains a worker pipe up to a byte limit.
use crate::config::types::{CapturedOutput, OutputIntegrity};
use std::io::{self, BufReader, Read};

/// Print buffer capped at a fixed number of bytes
#[derive(Debug)]
pub struct OutputCapture {
    buffer: String,
    limit: usize,
    integrity: OutputIntegrity,
    dropped_bytes: u64,
}

impl OutputCapture {
    pub fn new(limit: usize) -> Self {
        OutputCapture {
            buffer: String::new(),
            limit,
            integrity: OutputIntegrity::Complete,
            dropped_bytes: 0,
        }
    }

    /// Bytes that can still be written before truncation
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.buffer.len())
    }

    pub fn is_truncated(&self) -> bool {
        self.integrity == OutputIntegrity::TruncatedByLimit
    }

    /// Append `text`, keeping whole characters only. Returns false once
    /// anything had to be dropped; every later write is dropped whole.
    pub fn write(&mut self, text: &str) -> bool {
        if self.is_truncated() {
            self.dropped_bytes += text.len() as u64;
            return false;
        }
        let room = self.remaining();
        if text.len() <= room {
            self.buffer.push_str(text);
            return true;
        }

        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buffer.push_str(&text[..cut]);
        self.dropped_bytes += (text.len() - cut) as u64;
        self.integrity = OutputIntegrity::TruncatedByLimit;
        false
    }

    pub fn finish(self) -> CapturedOutput {
        CapturedOutput {
            text: self.buffer,
            integrity: self.integrity,
            dropped_bytes: self.dropped_bytes,
        }
    }
}

/// Drain `stream` to EOF, keeping at most `limit` bytes.
///
/// Reading continues past the limit so the writer never blocks on a full
/// pipe; the excess is discarded and reported through the integrity flag.
pub fn collect_stream<R: Read>(stream: R, limit: usize) -> io::Result<(Vec<u8>, OutputIntegrity)> {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut integrity = OutputIntegrity::Complete;

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if buffer.len() + n > limit {
            let remaining = limit - buffer.len();
            buffer.extend_from_slice(&chunk[..remaining]);
            integrity = OutputIntegrity::TruncatedByLimit;
        } else {
            buffer.extend_from_slice(&chunk[..n]);
        }
    }

    Ok((buffer, integrity))
}
