//! # natter-transport
//!
//! Byte-level transport for the natter messaging client.
//!
//! The transport owns one TCP stream, optionally upgraded in place to TLS,
//! and exposes bounded blocking primitives:
//!
//! - **send** - write a whole buffer, looping on partial writes
//! - **receive_line** - read one CRLF-terminated control line
//! - **receive_exact** - read exactly `n` payload bytes in bounded chunks
//!
//! ```rust,ignore
//! use natter_transport::{Transport, TransportConfig};
//!
//! let mut transport = Transport::connect("127.0.0.1:4222", TransportConfig::default())?;
//! let greeting = transport.receive_line()?;
//! transport.send(b"PING\r\n")?;
//! ```

pub mod buffer;
pub mod error;
pub mod socket;
pub mod tls;
pub mod transport;

pub use buffer::{ReadBuffer, DEFAULT_CHUNK_SIZE};
pub use error::TransportError;
pub use socket::Socket;
pub use transport::{Transport, TransportConfig};
