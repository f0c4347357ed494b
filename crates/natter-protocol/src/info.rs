//! Handshake payloads: the broker's `INFO` greeting and the client's
//! `CONNECT` options.

use serde::{Deserialize, Serialize};

/// Protocol level announced in `CONNECT`. Level 1 tells the broker the client
/// understands asynchronous `INFO` updates.
pub const CLIENT_PROTOCOL: u8 = 1;

/// Language tag announced in `CONNECT`.
pub const CLIENT_LANG: &str = "rust";

/// Broker information parsed from the `INFO` greeting.
///
/// A snapshot is taken once per successful handshake and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Unique broker identifier.
    pub server_id: String,
    /// Human-readable broker name.
    pub server_name: String,
    /// Broker version string.
    pub version: String,
    /// Protocol level supported by the broker.
    pub proto: i32,
    /// Host the broker is listening on.
    pub host: String,
    /// Port the broker is listening on.
    pub port: u16,
    /// Maximum payload size accepted by the broker.
    pub max_payload: usize,
    /// Whether the broker requires credentials.
    pub auth_required: bool,
    /// Whether the broker requires the connection to be upgraded to TLS.
    pub tls_required: bool,
    /// Whether the broker offers TLS.
    pub tls_available: bool,
    /// Other broker URLs advertised to clients.
    pub connect_urls: Vec<String>,
}

/// Options sent to the broker in the `CONNECT` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    /// Ask the broker to acknowledge every command with `+OK`.
    pub verbose: bool,
    /// Ask the broker for strict protocol checking.
    pub pedantic: bool,
    /// Whether the client requires TLS.
    pub tls_required: bool,
    /// Optional client name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Client implementation language.
    pub lang: String,
    /// Client version.
    pub version: String,
    /// Protocol level.
    pub protocol: u8,
    /// Whether messages published by this connection are echoed back to its
    /// own matching subscriptions.
    pub echo: bool,
    /// Username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    /// Authentication token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for ConnectInfo {
    fn default() -> Self {
        Self {
            verbose: false,
            pedantic: false,
            tls_required: false,
            name: None,
            lang: CLIENT_LANG.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol: CLIENT_PROTOCOL,
            echo: true,
            user: None,
            pass: None,
            auth_token: None,
        }
    }
}
