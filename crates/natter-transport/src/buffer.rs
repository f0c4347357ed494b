//! Read buffering for mixed line/payload streams.
//!
//! Control lines are found by scanning buffered bytes for a newline; payload
//! blocks are served from the buffer first and then read in bounded chunks
//! that never reach past the requested length.

use std::io::{self, Read};

use bytes::{Bytes, BytesMut};
use natter_protocol::codec::MAX_LINE_LENGTH;

use crate::error::TransportError;

/// Default read chunk size, one Ethernet MTU.
pub const DEFAULT_CHUNK_SIZE: usize = 1500;

/// Buffered reader state, independent of the underlying stream.
#[derive(Debug)]
pub struct ReadBuffer {
    buf: BytesMut,
    chunk_size: usize,
}

impl ReadBuffer {
    /// Create a buffer that reads in chunks of at most `chunk_size` bytes.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            buf: BytesMut::with_capacity(chunk_size * 2),
            chunk_size,
        }
    }

    /// Number of bytes read from the stream but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Read one line, returning it without its `\r\n` (or bare `\n`)
    /// terminator.
    ///
    /// # Errors
    ///
    /// Returns an error on EOF, timeout, read failure, an over-long line or
    /// invalid UTF-8.
    pub fn read_line<R: Read>(&mut self, reader: &mut R) -> Result<String, TransportError> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == b'\n') {
                let end = scanned + pos;
                let mut line = self.buf.split_to(end + 1);
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                return String::from_utf8(line.to_vec()).map_err(|_| TransportError::InvalidLine);
            }

            scanned = self.buf.len();
            if scanned > MAX_LINE_LENGTH {
                return Err(TransportError::LineTooLong(scanned));
            }
            self.fill(reader, self.chunk_size)?;
        }
    }

    /// Read exactly `n` bytes.
    ///
    /// Buffered bytes are used first; the rest is read in chunks of at most
    /// `min(chunk_size, remaining)` bytes so nothing after the `n`th byte is
    /// consumed from the stream.
    ///
    /// # Errors
    ///
    /// Returns an error on EOF, timeout or read failure before `n` bytes
    /// arrive.
    pub fn read_exact<R: Read>(&mut self, reader: &mut R, n: usize) -> Result<Bytes, TransportError> {
        while self.buf.len() < n {
            let remaining = n - self.buf.len();
            self.fill(reader, remaining.min(self.chunk_size))?;
        }
        Ok(self.buf.split_to(n).freeze())
    }

    fn fill<R: Read>(&mut self, reader: &mut R, max: usize) -> Result<usize, TransportError> {
        let start = self.buf.len();
        self.buf.resize(start + max, 0);

        let result = loop {
            match reader.read(&mut self.buf[start..]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(0) => {
                self.buf.truncate(start);
                Err(TransportError::ConnectionClosed)
            }
            Ok(n) => {
                self.buf.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.buf.truncate(start);
                Err(TransportError::from_read(e))
            }
        }
    }
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}
