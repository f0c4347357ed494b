//! Codec for encoding and parsing natter frames.
//!
//! Outbound commands are encoded into CRLF-terminated lines, with `PUB`
//! carrying a payload block whose length is the byte length of the payload.
//! Inbound lines are classified by their leading verb.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::{Frame, MsgHeader};
use crate::info::ConnectInfo;

/// Line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Maximum control line length (64 KiB).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Pre-encoded `PING` frame.
pub const PING: &[u8] = b"PING\r\n";

/// Pre-encoded `PONG` frame.
pub const PONG: &[u8] = b"PONG\r\n";

const ERR_PREFIX: &str = "-ERR";

/// Protocol errors that can occur during encoding/parsing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame line has the wrong shape.
    #[error("Malformed {verb} frame: {line:?}")]
    Malformed {
        /// Verb of the malformed frame.
        verb: &'static str,
        /// The offending line.
        line: String,
    },

    /// A declared payload length is not a number.
    #[error("Invalid payload length {0:?}")]
    InvalidLength(String),

    /// The `INFO` body is not valid JSON.
    #[error("Invalid INFO payload: {0}")]
    InvalidInfo(#[source] serde_json::Error),

    /// Subject is empty or contains whitespace.
    #[error("Invalid subject: {0:?}")]
    InvalidSubject(String),

    /// JSON payload encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode a command line: the verb and its arguments joined by single spaces,
/// terminated by CRLF.
#[must_use]
pub fn encode(command: &str, args: &[&str]) -> Bytes {
    let len = command.len() + args.iter().map(|a| a.len() + 1).sum::<usize>() + CRLF.len();
    let mut buf = BytesMut::with_capacity(len);
    buf.extend_from_slice(command.as_bytes());
    for arg in args {
        buf.put_u8(b' ');
        buf.extend_from_slice(arg.as_bytes());
    }
    buf.extend_from_slice(CRLF);
    buf.freeze()
}

/// Encode a `PUB` frame.
///
/// The encoded format is:
/// - `PUB <subject> [<reply>] <length>\r\n`
/// - `<length>` raw payload bytes
/// - `\r\n`
#[must_use]
pub fn encode_publish(subject: &str, payload: &[u8], reply: Option<&str>) -> Bytes {
    let mut buf = BytesMut::with_capacity(subject.len() + payload.len() + 32);
    encode_publish_into(&mut buf, subject, payload, reply);
    buf.freeze()
}

/// Encode a `PUB` frame into an existing buffer.
pub fn encode_publish_into(buf: &mut BytesMut, subject: &str, payload: &[u8], reply: Option<&str>) {
    let length = payload.len().to_string();
    let line = match reply {
        Some(reply) => encode("PUB", &[subject, reply, &length]),
        None => encode("PUB", &[subject, &length]),
    };
    buf.reserve(line.len() + payload.len() + CRLF.len());
    buf.extend_from_slice(&line);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(CRLF);
}

/// Encode a `SUB` frame.
#[must_use]
pub fn encode_subscribe(subject: &str, queue: Option<&str>, sid: &str) -> Bytes {
    match queue {
        Some(queue) => encode("SUB", &[subject, queue, sid]),
        None => encode("SUB", &[subject, sid]),
    }
}

/// Encode an `UNSUB` frame, optionally limited to `max` more deliveries.
#[must_use]
pub fn encode_unsubscribe(sid: &str, max: Option<u64>) -> Bytes {
    match max {
        Some(max) => encode("UNSUB", &[sid, &max.to_string()]),
        None => encode("UNSUB", &[sid]),
    }
}

/// Encode a `CONNECT` frame.
///
/// # Errors
///
/// Returns an error if the options cannot be serialized.
pub fn encode_connect(info: &ConnectInfo) -> Result<Bytes, ProtocolError> {
    let json = serde_json::to_string(info)?;
    Ok(encode("CONNECT", &[&json]))
}

/// Check whether a line is an error frame.
#[must_use]
pub fn is_error_frame(line: &str) -> bool {
    line.starts_with(ERR_PREFIX)
}

/// Parse one protocol line into a frame.
///
/// The line may still carry its CRLF terminator. `MSG` lines are
/// `MSG <subject> <sid> [<reply>] <length>`: the presence of the reply inbox
/// is decided by counting fields (4 without, 5 with).
///
/// # Errors
///
/// Returns an error for malformed `MSG` lines, non-numeric lengths and
/// invalid `INFO` JSON.
pub fn parse_line(line: &str) -> Result<Frame, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);

    if is_error_frame(line) {
        return Ok(Frame::Err(parse_error_reason(&line[ERR_PREFIX.len()..])));
    }

    let (verb, rest) = match line.split_once(|c: char| c.is_ascii_whitespace()) {
        Some((verb, rest)) => (verb, rest.trim_start()),
        None => (line, ""),
    };

    match verb.to_ascii_uppercase().as_str() {
        "MSG" => parse_msg(line).map(Frame::Msg),
        "PING" => Ok(Frame::Ping),
        "PONG" => Ok(Frame::Pong),
        "+OK" => Ok(Frame::Ok),
        "INFO" => serde_json::from_str(rest)
            .map(Frame::Info)
            .map_err(ProtocolError::InvalidInfo),
        _ => Ok(Frame::Unknown(line.to_string())),
    }
}

fn parse_msg(line: &str) -> Result<MsgHeader, ProtocolError> {
    let fields: Vec<&str> = line.split_ascii_whitespace().collect();

    let (subject, sid, reply, length) = match fields.as_slice() {
        [_, subject, sid, length] => (*subject, *sid, None, *length),
        [_, subject, sid, reply, length] => (*subject, *sid, Some(*reply), *length),
        _ => {
            return Err(ProtocolError::Malformed {
                verb: "MSG",
                line: line.to_string(),
            })
        }
    };

    let length = length
        .parse::<usize>()
        .map_err(|_| ProtocolError::InvalidLength(length.to_string()))?;

    Ok(MsgHeader {
        subject: subject.to_string(),
        sid: sid.to_string(),
        reply: reply.map(str::to_string),
        length,
    })
}

fn parse_error_reason(rest: &str) -> String {
    let rest = rest.trim();
    rest.strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .unwrap_or(rest)
        .to_string()
}
