//! Client error taxonomy.

use natter_protocol::ProtocolError;
use natter_transport::TransportError;
use thiserror::Error;

use crate::subscription::SubscriptionId;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O failure, broken pipe or timeout.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed frame, invalid subject or payload codec failure.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The broker greeting was an error or not an `INFO` frame.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The broker rejected `CONNECT` or did not answer the initial `PING`.
    #[error("Connect rejected: {0}")]
    Connect(String),

    /// TLS was required and the upgrade failed.
    #[error("TLS negotiation failed: {0}")]
    TlsNegotiation(String),

    /// A `MSG` frame referenced a subscription id that is not registered.
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    /// A subscription handler returned an error or panicked.
    #[error("Handler for subscription {sid} failed: {reason}")]
    Callback {
        /// Subscription the message arrived on.
        sid: SubscriptionId,
        /// Handler error message.
        reason: String,
    },

    /// The operation requires a ready connection.
    #[error("Not connected")]
    NotConnected,

    /// The connection options are invalid.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

impl ClientError {
    /// Whether this error ended the connection because the stream closed or
    /// timed out.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ClientError::Transport(e) if e.is_disconnect())
    }
}

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;
