//! Frame types for the natter protocol.
//!
//! A frame is one protocol line, optionally followed by a payload block.
//! Frames only live for a single parse/dispatch cycle.

use std::fmt;

use crate::info::ServerInfo;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Broker greeting or update.
    Info,
    /// Message delivery, followed by a payload block.
    Msg,
    /// Keepalive request.
    Ping,
    /// Keepalive answer.
    Pong,
    /// Verbose-mode acknowledgement.
    Ok,
    /// Broker error.
    Err,
    /// Any verb the client does not understand.
    Unknown,
}

impl FrameType {
    /// The protocol verb for this frame type.
    #[must_use]
    pub fn verb(self) -> &'static str {
        match self {
            FrameType::Info => "INFO",
            FrameType::Msg => "MSG",
            FrameType::Ping => "PING",
            FrameType::Pong => "PONG",
            FrameType::Ok => "+OK",
            FrameType::Err => "-ERR",
            FrameType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Parsed header of an inbound `MSG` frame.
///
/// The payload block of `length` bytes (plus a CRLF) follows the header line
/// on the wire and is read separately by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgHeader {
    /// Subject the message was published to.
    pub subject: String,
    /// Subscription id the message was delivered on.
    pub sid: String,
    /// Optional reply inbox.
    pub reply: Option<String>,
    /// Payload length in bytes.
    pub length: usize,
}

/// An inbound protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Broker information (greeting, or asynchronous update).
    Info(ServerInfo),
    /// Message header; payload follows on the wire.
    Msg(MsgHeader),
    /// Keepalive ping, must be answered with `PONG`.
    Ping,
    /// Keepalive pong.
    Pong,
    /// Acknowledgment in verbose mode.
    Ok,
    /// Error reported by the broker.
    Err(String),
    /// A line with an unrecognized verb.
    Unknown(String),
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Info(_) => FrameType::Info,
            Frame::Msg(_) => FrameType::Msg,
            Frame::Ping => FrameType::Ping,
            Frame::Pong => FrameType::Pong,
            Frame::Ok => FrameType::Ok,
            Frame::Err(_) => FrameType::Err,
            Frame::Unknown(_) => FrameType::Unknown,
        }
    }

    /// Check whether this is an error frame.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Err(_))
    }
}
