//! Connection options.
//!
//! Options can be built in code, parsed from a server URL, or deserialized
//! from any serde source (the CLI loads them from TOML and `NATTER_*`
//! environment variables). The TLS context is never deserialized; set it with
//! [`ConnectOptions::with_tls_config`].

use std::sync::Arc;
use std::time::Duration;

use natter_protocol::info::ConnectInfo;
use natter_transport::{tls, TransportConfig, DEFAULT_CHUNK_SIZE};
use rustls::ClientConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Default broker port.
pub const DEFAULT_PORT: u16 = 4222;

/// Connection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Server URL: `nats://[user:pass@]host[:port]`, or `tls://...` to
    /// require TLS.
    #[serde(default = "default_url")]
    pub url: String,

    /// Client name reported to the broker.
    #[serde(default)]
    pub name: Option<String>,

    /// Username; overrides credentials in the URL.
    #[serde(default)]
    pub user: Option<String>,

    /// Password; overrides credentials in the URL.
    #[serde(default)]
    pub pass: Option<String>,

    /// Authentication token.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Ask the broker to acknowledge every command with `+OK`.
    #[serde(default)]
    pub verbose: bool,

    /// Ask the broker for strict protocol checking.
    #[serde(default)]
    pub pedantic: bool,

    /// Receive messages published by this connection.
    #[serde(default = "default_true")]
    pub echo: bool,

    /// Require TLS even if the broker does not.
    #[serde(default)]
    pub tls_required: bool,

    /// Accept any server certificate (self-signed development brokers).
    #[serde(default)]
    pub tls_insecure: bool,

    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Read/write timeout in milliseconds; 0 blocks indefinitely.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Maximum bytes requested per payload read.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Trace every protocol line sent and received.
    #[serde(default)]
    pub debug: bool,

    /// TLS context.
    #[serde(skip)]
    pub tls_config: Option<Arc<ClientConfig>>,
}

// Default value functions
fn default_url() -> String {
    format!("nats://127.0.0.1:{DEFAULT_PORT}")
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_read_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            url: default_url(),
            name: None,
            user: None,
            pass: None,
            auth_token: None,
            verbose: false,
            pedantic: false,
            echo: true,
            tls_required: false,
            tls_insecure: false,
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            chunk_size: default_chunk_size(),
            debug: false,
            tls_config: None,
        }
    }
}

/// A parsed server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    /// Host name or IP address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Whether the URL scheme requires TLS.
    pub tls: bool,
    /// Username from the URL.
    pub user: Option<String>,
    /// Password from the URL.
    pub pass: Option<String>,
    /// Token from the URL (`nats://token@host`).
    pub token: Option<String>,
}

impl ServerAddr {
    /// Parse a server URL.
    ///
    /// Format: `[nats|tls]://[user:pass@|token@]host[:port]`. A bare
    /// `host[:port]` is accepted as `nats://`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidOptions`] for unknown schemes, empty
    /// hosts and invalid ports.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| ClientError::InvalidOptions(format!("{reason}: {url}"));

        let (tls, rest) = match url.split_once("://") {
            Some(("nats", rest)) => (false, rest),
            Some(("tls", rest)) => (true, rest),
            Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme {scheme:?}"))),
            None => (false, url),
        };
        let rest = rest.trim_end_matches('/');

        let (creds, hostport) = match rest.rsplit_once('@') {
            Some((creds, hostport)) => (Some(creds), hostport),
            None => (None, rest),
        };

        let (user, pass, token) = match creds {
            Some(creds) => match creds.split_once(':') {
                Some((user, pass)) => (Some(user.to_string()), Some(pass.to_string()), None),
                None => (None, None, Some(creds.to_string())),
            },
            None => (None, None, None),
        };

        let (host, port) = match hostport.strip_prefix('[') {
            // IPv6 literal: [::1]:4222
            Some(v6) => {
                let (host, after) = v6.split_once(']').ok_or_else(|| invalid("unterminated IPv6 host"))?;
                (host, after.strip_prefix(':'))
            }
            None => match hostport.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (hostport, None),
            },
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid(&format!("invalid port {port:?}")))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
            user,
            pass,
            token,
        })
    }

    /// `host:port` for socket address resolution.
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl ConnectOptions {
    /// Create options for a server URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let options = Self {
            url: url.into(),
            ..Self::default()
        };
        options.validate()?;
        Ok(options)
    }

    /// Set the client name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set username and password.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.pass = Some(pass.into());
        self
    }

    /// Set an authentication token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the read/write timeout; zero blocks indefinitely.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the TCP connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the payload read chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Require TLS even if the broker does not.
    #[must_use]
    pub fn with_tls_required(mut self, required: bool) -> Self {
        self.tls_required = required;
        self
    }

    /// Use a specific TLS context.
    #[must_use]
    pub fn with_tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Enable verbose mode.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Enable protocol line tracing.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Check the options for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidOptions`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        ServerAddr::parse(&self.url)?;
        if self.chunk_size == 0 {
            return Err(ClientError::InvalidOptions("chunk_size must be positive".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ClientError::InvalidOptions(
                "connect_timeout_ms must be positive".into(),
            ));
        }
        if self.pass.is_some() && self.user.is_none() {
            return Err(ClientError::InvalidOptions("pass given without user".into()));
        }
        Ok(())
    }

    /// Parsed server address.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn server_addr(&self) -> Result<ServerAddr> {
        ServerAddr::parse(&self.url)
    }

    /// TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Read/write timeout, `None` when disabled.
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    /// Transport settings derived from these options.
    #[must_use]
    pub fn transport_config(&self, connect_timeout: Duration) -> TransportConfig {
        TransportConfig {
            connect_timeout,
            io_timeout: self.read_timeout(),
            chunk_size: self.chunk_size,
            debug: self.debug,
        }
    }

    /// TLS context to upgrade with: the configured one, or a default one.
    ///
    /// # Errors
    ///
    /// Returns an error if a default context cannot be built.
    pub fn tls_client_config(&self) -> Result<Arc<ClientConfig>> {
        if let Some(config) = &self.tls_config {
            return Ok(config.clone());
        }
        let config = if self.tls_insecure {
            tls::insecure_client_config()
        } else {
            tls::default_client_config()
        };
        config.map_err(|e| ClientError::TlsNegotiation(e.to_string()))
    }

    /// Build the `CONNECT` payload. Explicit credentials win over URL ones.
    #[must_use]
    pub fn connect_info(&self, addr: &ServerAddr, tls_required: bool) -> ConnectInfo {
        ConnectInfo {
            verbose: self.verbose,
            pedantic: self.pedantic,
            tls_required,
            name: self.name.clone(),
            echo: self.echo,
            user: self.user.clone().or_else(|| addr.user.clone()),
            pass: self.pass.clone().or_else(|| addr.pass.clone()),
            auth_token: self.auth_token.clone().or_else(|| addr.token.clone()),
            ..ConnectInfo::default()
        }
    }
}
