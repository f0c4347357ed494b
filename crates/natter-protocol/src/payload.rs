//! Payload codecs.
//!
//! Payload encoding is applied before framing and after parsing; the frame
//! codec itself only ever sees opaque bytes. Codecs are marker types with
//! associated functions so the codec is chosen at compile time:
//!
//! ```
//! use natter_protocol::payload::{JsonCodec, MsgPackCodec, PayloadCodec};
//!
//! let bytes = MsgPackCodec::encode(&("order", 42u32)).unwrap();
//! let (kind, id): (String, u32) = MsgPackCodec::decode(&bytes).unwrap();
//! assert_eq!((kind.as_str(), id), ("order", 42));
//!
//! assert_eq!(JsonCodec::encode(&[1, 2]).unwrap(), b"[1,2]");
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::ProtocolError;

/// A payload serialization format.
pub trait PayloadCodec {
    /// Short name of the format, used in logs.
    const NAME: &'static str;

    /// Encode a value into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Decode payload bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding of `T`.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError>;
}

/// JSON payloads via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    const NAME: &'static str = "json";

    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// MessagePack payloads via `rmp-serde`.
///
/// Structs are encoded as maps (`to_vec_named`) so field names survive on the
/// wire for consumers in other languages.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl PayloadCodec for MsgPackCodec {
    const NAME: &'static str = "msgpack";

    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
