//! # natter-core
//!
//! Client-side protocol engine for the natter messaging client.
//!
//! This crate provides the pieces that sit on top of the transport:
//!
//! - **Registry** - Subscription ids to handlers, subjects to replay records
//! - **Connection** - Handshake, publish/subscribe, request/reply, reconnect
//! - **Dispatch** - Blocking read loop routing `MSG` frames to handlers
//! - **Message** - Delivered messages and the reply context
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Connection  │────▶│  Transport  │────▶│   Broker    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │ wait()            │
//!        ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │  Registry   │◀────│ Frame Codec │
//! └─────────────┘     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use natter_core::{ConnectOptions, Connection, HandlerResult, Message, Replier};
//!
//! # fn main() -> natter_core::Result<()> {
//! let mut conn = Connection::new(ConnectOptions::from_url("nats://127.0.0.1:4222")?);
//! conn.connect()?;
//!
//! conn.subscribe("orders.new", |msg: &Message, _: &mut Replier| -> HandlerResult {
//!     println!("{}: {} bytes", msg.subject, msg.payload.len());
//!     Ok(())
//! })?;
//! conn.publish("orders.new", b"hello", None)?;
//! conn.wait(1)?;
//! conn.close();
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod metrics;
pub mod options;
pub mod registry;
pub mod subscription;

pub use connection::{Connection, ConnectionState, ConnectionStats};
pub use error::{ClientError, Result};
pub use message::{Message, Replier};
pub use options::{ConnectOptions, ServerAddr};
pub use registry::{ReplayRecord, Retention, SubscriptionRegistry};
pub use subscription::{new_inbox, Handler, HandlerError, HandlerResult, SharedHandler, SubscriptionId};

pub use natter_protocol::{JsonCodec, MsgPackCodec, PayloadCodec, ServerInfo};
