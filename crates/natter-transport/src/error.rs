//! Transport errors.

use std::io;

use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the stream.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A read or write did not complete within the configured timeout.
    #[error("Connection timed out")]
    Timeout,

    /// A write failed or wrote zero bytes.
    #[error("Broken pipe")]
    BrokenPipe,

    /// The transport is not open.
    #[error("Not connected")]
    NotConnected,

    /// A control line exceeded the maximum length.
    #[error("Line exceeds maximum length ({0} bytes buffered)")]
    LineTooLong(usize),

    /// A control line is not valid UTF-8.
    #[error("Line is not valid UTF-8")]
    InvalidLine,

    /// The server address could not be resolved.
    #[error("Cannot resolve address {0}")]
    Resolve(String),

    /// TLS negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Classify a read error.
    #[must_use]
    pub fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => TransportError::ConnectionClosed,
            _ => TransportError::Io(err),
        }
    }

    /// Classify a write error.
    #[must_use]
    pub fn from_write(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::BrokenPipe,
        }
    }

    /// Whether the error means the stream ended rather than failed: EOF or
    /// timeout.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionClosed | TransportError::Timeout
        )
    }
}
