//! Blocking transport over a plain or TLS-upgraded TCP stream.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rustls::ClientConfig;
use tracing::{debug, trace, warn};

use crate::buffer::{ReadBuffer, DEFAULT_CHUNK_SIZE};
use crate::error::TransportError;
use crate::socket::Socket;
use crate::tls;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Read/write timeout; `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
    /// Maximum bytes requested per read.
    pub chunk_size: usize,
    /// Log every byte sent and every line received.
    pub debug: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Some(Duration::from_secs(30)),
            chunk_size: DEFAULT_CHUNK_SIZE,
            debug: false,
        }
    }
}

/// Byte-level transport owning exactly one stream at a time.
#[derive(Debug)]
pub struct Transport {
    socket: Option<Socket>,
    buffer: ReadBuffer,
    peer: Option<SocketAddr>,
    debug: bool,
}

impl Transport {
    /// Open a TCP connection to `addr` (`host:port`).
    ///
    /// Every resolved address is tried in turn with the configured connect
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be resolved or no address
    /// accepts the connection.
    pub fn connect(addr: &str, config: TransportConfig) -> Result<Self, TransportError> {
        let addrs: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(addr.to_string()))?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::Resolve(addr.to_string()));
        }

        let mut last_err = None;
        for candidate in addrs {
            match TcpStream::connect_timeout(&candidate, config.connect_timeout) {
                Ok(stream) => {
                    debug!(peer = %candidate, "TCP connection established");
                    return Self::from_stream(stream, config);
                }
                Err(e) => {
                    debug!(peer = %candidate, error = %e, "TCP connect failed");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                TransportError::Timeout
            }
            Some(e) => TransportError::Io(e),
            None => TransportError::Resolve(addr.to_string()),
        })
    }

    /// Wrap an already connected TCP stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket options cannot be applied.
    pub fn from_stream(stream: TcpStream, config: TransportConfig) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();

        let mut transport = Self {
            socket: Some(Socket::Plain(stream)),
            buffer: ReadBuffer::new(config.chunk_size),
            peer,
            debug: config.debug,
        };
        transport.set_timeout(config.io_timeout)?;
        Ok(transport)
    }

    /// Check if the transport is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Check if the stream has been upgraded to TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.socket.as_ref().is_some_and(Socket::is_tls)
    }

    /// Remote address of the stream, if known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Apply a read and write timeout; `None` blocks indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] if the transport is not open.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        // A zero duration is rejected by the OS; treat it as "no timeout".
        let timeout = timeout.filter(|t| !t.is_zero());
        socket.tcp().set_read_timeout(timeout)?;
        socket.tcp().set_write_timeout(timeout)?;
        Ok(())
    }

    /// Write the whole buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BrokenPipe`] if a write fails or writes zero
    /// bytes, and [`TransportError::Timeout`] if the write timed out.
    pub fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;

        if self.debug {
            trace!(bytes = data.len(), data = %String::from_utf8_lossy(data).trim_end(), ">>");
        }

        let mut written = 0;
        while written < data.len() {
            match socket.write(&data[written..]) {
                Ok(0) => {
                    warn!(written, total = data.len(), "Write returned zero bytes");
                    return Err(TransportError::BrokenPipe);
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "Write failed");
                    return Err(TransportError::from_write(e));
                }
            }
        }

        socket.flush().map_err(TransportError::from_write)
    }

    /// Read one control line, without its terminator.
    ///
    /// # Errors
    ///
    /// Returns an error on EOF, timeout or read failure.
    pub fn receive_line(&mut self) -> Result<String, TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;
        let line = self.buffer.read_line(socket)?;
        if self.debug {
            trace!(line = %line, "<<");
        }
        Ok(line)
    }

    /// Read exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on EOF, timeout or read failure before `n` bytes
    /// arrive.
    pub fn receive_exact(&mut self, n: usize) -> Result<Bytes, TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;
        self.buffer.read_exact(socket, n)
    }

    /// Upgrade the plaintext stream to TLS in place.
    ///
    /// On failure the transport is left closed; no plaintext reads can follow
    /// a failed negotiation.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if the handshake fails, or
    /// [`TransportError::NotConnected`] if the transport is not open.
    pub fn upgrade_to_tls(
        &mut self,
        config: Arc<ClientConfig>,
        server_name: &str,
    ) -> Result<(), TransportError> {
        let socket = self.socket.take().ok_or(TransportError::NotConnected)?;

        let tcp = match socket {
            Socket::Plain(tcp) => tcp,
            Socket::Tls(stream) => {
                self.socket = Some(Socket::Tls(stream));
                return Err(TransportError::Tls("stream is already encrypted".into()));
            }
        };

        if self.buffer.buffered() > 0 {
            self.buffer.clear();
            let _ = tcp.shutdown(std::net::Shutdown::Both);
            return Err(TransportError::Tls(
                "unexpected plaintext data before TLS handshake".into(),
            ));
        }

        match tls::upgrade(tcp, config, server_name) {
            Ok(stream) => {
                self.socket = Some(Socket::Tls(Box::new(stream)));
                Ok(())
            }
            Err(e) => {
                warn!(server = %server_name, error = %e, "TLS upgrade failed");
                Err(e)
            }
        }
    }

    /// Close the transport. Closing a closed transport is a no-op.
    pub fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.shutdown();
            self.buffer.clear();
            debug!(peer = ?self.peer, "Transport closed");
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}
