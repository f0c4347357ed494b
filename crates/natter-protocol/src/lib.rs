//! # natter-protocol
//!
//! Wire protocol definitions for the natter messaging client.
//!
//! The protocol is line oriented: every control frame is a single
//! CRLF-terminated text line, and `PUB`/`MSG` frames are followed by a raw
//! payload block whose byte length is declared on the control line.
//!
//! ## Frame Types
//!
//! - `INFO` - Broker greeting carrying [`ServerInfo`]
//! - `MSG` - Inbound message header (payload follows)
//! - `PING` / `PONG` - Keepalive
//! - `+OK` / `-ERR` - Acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use natter_protocol::{codec, Frame};
//!
//! let publish = codec::encode_publish("orders.new", b"hello", None);
//! assert_eq!(&publish[..], b"PUB orders.new 5\r\nhello\r\n");
//!
//! match codec::parse_line("MSG orders.new 9 5").unwrap() {
//!     Frame::Msg(header) => assert_eq!(header.length, 5),
//!     other => panic!("unexpected frame {other:?}"),
//! }
//! ```

pub mod codec;
pub mod frames;
pub mod info;
pub mod payload;
pub mod subject;

pub use codec::{is_error_frame, parse_line, ProtocolError};
pub use frames::{Frame, FrameType, MsgHeader};
pub use info::{ConnectInfo, ServerInfo};
pub use payload::{JsonCodec, MsgPackCodec, PayloadCodec};
pub use subject::validate_subject;
