//! Delivered messages and the reply context handed to handlers.

use bytes::{Bytes, BytesMut};
use natter_protocol::codec::encode_publish_into;
use natter_protocol::{validate_subject, PayloadCodec, ProtocolError};

use crate::subscription::SubscriptionId;

/// A message delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject the message was published to.
    pub subject: String,
    /// Subscription the message arrived on.
    pub sid: SubscriptionId,
    /// Reply inbox, if the publisher expects an answer.
    pub reply: Option<String>,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        sid: SubscriptionId,
        reply: Option<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            subject: subject.into(),
            sid,
            reply,
            payload: payload.into(),
        }
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Decode the payload with a payload codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid encoding of `T`.
    pub fn decode<C: PayloadCodec, T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        C::decode(&self.payload)
    }
}

/// Outbound frames produced by a handler.
///
/// Handlers cannot borrow the connection while it is dispatching, so
/// publishes are encoded here and written by the dispatch loop after the
/// handler returns.
#[derive(Debug, Default)]
pub struct Replier {
    outbound: BytesMut,
    published: u64,
}

impl Replier {
    /// Create an empty replier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a publish.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject or reply inbox is invalid.
    pub fn publish(
        &mut self,
        subject: &str,
        payload: &[u8],
        reply: Option<&str>,
    ) -> Result<(), ProtocolError> {
        validate_subject(subject)?;
        if let Some(reply) = reply {
            validate_subject(reply)?;
        }
        encode_publish_into(&mut self.outbound, subject, payload, reply);
        self.published += 1;
        Ok(())
    }

    /// Answer a request. Returns `false` if the message carries no reply
    /// inbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply inbox is invalid.
    pub fn respond(&mut self, message: &Message, payload: &[u8]) -> Result<bool, ProtocolError> {
        match message.reply.as_deref() {
            Some(inbox) => self.publish(inbox, payload, None).map(|()| true),
            None => Ok(false),
        }
    }

    /// Answer a request with an encoded value.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the reply inbox is invalid.
    pub fn respond_encoded<C: PayloadCodec, T: serde::Serialize + ?Sized>(
        &mut self,
        message: &Message,
        value: &T,
    ) -> Result<bool, ProtocolError> {
        let payload = C::encode(value)?;
        self.respond(message, &payload)
    }

    /// Number of publishes queued.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Take the encoded frames and the number of publishes they contain.
    pub(crate) fn take(&mut self) -> (Bytes, u64) {
        let published = std::mem::take(&mut self.published);
        (self.outbound.split().freeze(), published)
    }
}
