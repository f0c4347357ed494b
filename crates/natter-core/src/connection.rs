//! Connection state machine.
//!
//! A [`Connection`] owns at most one [`Transport`] at a time. Every operation
//! is synchronous: outgoing commands are written immediately and inbound
//! frames are only read by [`Connection::wait`], [`Connection::flush`] and
//! [`Connection::request`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use natter_protocol::codec::{encode_connect, encode_publish, encode_subscribe, encode_unsubscribe, PING};
use natter_protocol::{parse_line, validate_subject, Frame, PayloadCodec, ProtocolError, ServerInfo};
use natter_transport::Transport;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::dispatch::Event;
use crate::error::{ClientError, Result};
use crate::message::{Message, Replier};
use crate::metrics;
use crate::options::{ConnectOptions, ServerAddr};
use crate::registry::{Retention, SubscriptionRegistry};
use crate::subscription::{new_inbox, HandlerResult, SharedHandler, SubscriptionId};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport.
    Disconnected,
    /// Opening the TCP stream.
    Connecting,
    /// Waiting for the broker's `INFO` greeting.
    AwaitingInfo,
    /// Upgrading the stream to TLS.
    TlsUpgrading,
    /// `CONNECT` sent, waiting for the `PONG`.
    Handshaking,
    /// Ready for commands.
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingInfo => "awaiting_info",
            ConnectionState::TlsUpgrading => "tls_upgrading",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// `PING`s sent by the client (keepalive and flush).
    pub pings_sent: u64,
    /// Messages published, including handler replies.
    pub messages_published: u64,
    /// Messages delivered to handlers.
    pub messages_received: u64,
    /// Calls to [`Connection::reconnect`].
    pub reconnects: u64,
    /// Handler invocations that failed or panicked.
    pub callback_errors: u64,
}

/// A client connection to a broker.
#[derive(Debug)]
pub struct Connection {
    pub(crate) options: ConnectOptions,
    pub(crate) transport: Option<Transport>,
    pub(crate) state: ConnectionState,
    pub(crate) server_info: Option<Arc<ServerInfo>>,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) stats: ConnectionStats,
    /// `PONG`s still owed by the broker.
    pub(crate) pongs_pending: u64,
    /// Timeout of the last connect, reused by reconnect.
    connect_timeout: Duration,
}

impl Connection {
    /// Create a disconnected connection.
    #[must_use]
    pub fn new(options: ConnectOptions) -> Self {
        let connect_timeout = options.connect_timeout();
        Self {
            options,
            transport: None,
            state: ConnectionState::Disconnected,
            server_info: None,
            registry: SubscriptionRegistry::new(),
            stats: ConnectionStats::default(),
            pongs_pending: 0,
            connect_timeout,
        }
    }

    /// Connect with the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`Connection::connect_with_timeout`].
    pub fn connect(&mut self) -> Result<()> {
        self.connect_with_timeout(self.options.connect_timeout())
    }

    /// Open the transport and run the handshake.
    ///
    /// The timeout bounds the TCP connect and every handshake read. Any
    /// existing transport is closed first, and subscriptions of a previous
    /// connection stop being dispatch targets.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Handshake`] if the greeting is an error or not `INFO`
    /// - [`ClientError::TlsNegotiation`] if a required TLS upgrade fails
    /// - [`ClientError::Connect`] if the broker rejects `CONNECT`
    /// - [`ClientError::Transport`] on I/O failures
    ///
    /// The connection is left disconnected on every error.
    pub fn connect_with_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.options.validate()?;
        self.close();
        self.registry.clear_active();
        self.server_info = None;
        self.connect_timeout = timeout;

        match self.handshake(timeout) {
            Ok(info) => {
                info!(
                    url = %self.options.url,
                    peer = ?self.transport.as_ref().and_then(Transport::peer_addr),
                    server_id = %info.server_id,
                    tls = self.transport.as_ref().is_some_and(Transport::is_tls),
                    "Connected"
                );
                self.server_info = Some(Arc::new(info));
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(url = %self.options.url, state = %self.state, error = %e, "Connect failed");
                self.close();
                Err(e)
            }
        }
    }

    fn handshake(&mut self, timeout: Duration) -> Result<ServerInfo> {
        let addr = self.options.server_addr()?;

        self.state = ConnectionState::Connecting;
        debug!(addr = %addr.authority(), "Opening transport");
        let mut transport = Transport::connect(&addr.authority(), self.options.transport_config(timeout))?;
        transport.set_timeout(Some(timeout))?;
        self.transport = Some(transport);

        self.state = ConnectionState::AwaitingInfo;
        let greeting = self.transport_mut()?.receive_line()?;
        let info = match parse_line(&greeting) {
            Ok(Frame::Info(info)) => info,
            Ok(Frame::Err(reason)) => return Err(ClientError::Handshake(reason)),
            Ok(other) => {
                return Err(ClientError::Handshake(format!(
                    "expected INFO greeting, got {}",
                    other.frame_type()
                )))
            }
            Err(e) => return Err(ClientError::Handshake(e.to_string())),
        };
        debug!(server_id = %info.server_id, tls_required = info.tls_required, "Received INFO");

        let tls_required = info.tls_required || addr.tls || self.options.tls_required;
        if tls_required {
            self.upgrade(&addr)?;
        }

        self.state = ConnectionState::Handshaking;
        let connect = encode_connect(&self.options.connect_info(&addr, tls_required))?;
        let transport = self.transport_mut()?;
        transport.send(&connect)?;
        transport.send(PING)?;

        loop {
            let line = self.transport_mut()?.receive_line()?;
            match parse_line(&line) {
                Ok(Frame::Pong) => break,
                // Verbose mode acknowledges CONNECT before the PONG.
                Ok(Frame::Ok) => continue,
                Ok(Frame::Err(reason)) => return Err(ClientError::Connect(reason)),
                Ok(other) => {
                    return Err(ClientError::Connect(format!(
                        "expected PONG, got {}",
                        other.frame_type()
                    )))
                }
                Err(e) => return Err(ClientError::Connect(e.to_string())),
            }
        }

        let read_timeout = self.options.read_timeout();
        self.transport_mut()?.set_timeout(read_timeout)?;
        Ok(info)
    }

    fn upgrade(&mut self, addr: &ServerAddr) -> Result<()> {
        self.state = ConnectionState::TlsUpgrading;
        let config = self.options.tls_client_config()?;
        self.transport_mut()?
            .upgrade_to_tls(config, &addr.host)
            .map_err(|e| ClientError::TlsNegotiation(e.to_string()))?;
        debug!(server = %addr.host, "TLS established");
        Ok(())
    }

    /// Publish a payload. No acknowledgment is awaited.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not ready, a subject is invalid,
    /// the payload exceeds the broker's limit or the write fails.
    pub fn publish(&mut self, subject: &str, payload: &[u8], reply: Option<&str>) -> Result<()> {
        self.ensure_ready()?;
        validate_subject(subject)?;
        if let Some(reply) = reply {
            validate_subject(reply)?;
        }

        let max_payload = self.server_info.as_ref().map_or(0, |info| info.max_payload);
        if max_payload > 0 && payload.len() > max_payload {
            return Err(ProtocolError::Invalid(format!(
                "payload of {} bytes exceeds broker limit of {max_payload}",
                payload.len()
            ))
            .into());
        }

        self.send(&encode_publish(subject, payload, reply))?;
        self.stats.messages_published += 1;
        metrics::record_published(1);
        trace!(subject = %subject, reply = ?reply, bytes = payload.len(), "Published");
        Ok(())
    }

    /// Encode a value with a payload codec and publish it.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails, or as [`Connection::publish`].
    pub fn publish_encoded<C, T>(&mut self, subject: &str, value: &T, reply: Option<&str>) -> Result<()>
    where
        C: PayloadCodec,
        T: Serialize + ?Sized,
    {
        let payload = C::encode(value)?;
        self.publish(subject, &payload, reply)
    }

    /// Subscribe to a subject. The subscription is replayed on reconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not ready, the subject is
    /// invalid or the write fails.
    pub fn subscribe<H>(&mut self, subject: &str, handler: H) -> Result<SubscriptionId>
    where
        H: Fn(&Message, &mut Replier) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_handler(subject, None, Arc::new(handler))
    }

    /// Subscribe to a subject as a member of a queue group.
    ///
    /// # Errors
    ///
    /// As [`Connection::subscribe`]; the queue name follows subject rules.
    pub fn queue_subscribe<H>(&mut self, subject: &str, queue: &str, handler: H) -> Result<SubscriptionId>
    where
        H: Fn(&Message, &mut Replier) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_handler(subject, Some(queue), Arc::new(handler))
    }

    /// Subscribe with an already shared handler.
    ///
    /// # Errors
    ///
    /// As [`Connection::subscribe`].
    pub fn subscribe_handler(
        &mut self,
        subject: &str,
        queue: Option<&str>,
        handler: SharedHandler,
    ) -> Result<SubscriptionId> {
        self.register(subject, queue, handler, Retention::Replay)
    }

    fn register(
        &mut self,
        subject: &str,
        queue: Option<&str>,
        handler: SharedHandler,
        retention: Retention,
    ) -> Result<SubscriptionId> {
        self.ensure_ready()?;
        validate_subject(subject)?;
        if let Some(queue) = queue {
            validate_subject(queue)?;
        }

        let id = self.registry.add(subject, queue, handler, retention);
        self.send(&encode_subscribe(subject, queue, id.as_str()))?;
        Ok(id)
    }

    /// Unsubscribe.
    ///
    /// With `max`, the broker stops after `max` more deliveries and the local
    /// entry stays routable. Without it the id is removed immediately, and
    /// the subject is no longer replayed once it has no live subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownSubscription`] if the id is not live, or
    /// an error if the connection is not ready or the write fails.
    pub fn unsubscribe(&mut self, id: &SubscriptionId, max: Option<u64>) -> Result<()> {
        self.ensure_ready()?;
        if !self.registry.contains(id) {
            return Err(ClientError::UnknownSubscription(id.clone()));
        }

        self.send(&encode_unsubscribe(id.as_str(), max))?;

        if max.is_none() {
            if let Some(subject) = self.registry.remove(id) {
                if self.registry.ids_for(&subject).is_empty() {
                    self.registry.forget(&subject);
                }
            }
        }
        debug!(sid = %id, max = ?max, "Unsubscribed");
        Ok(())
    }

    /// Send a request and dispatch until one reply arrives.
    ///
    /// The reply is delivered to `handler` on a private inbox that is never
    /// replayed and is removed before this returns. Messages for other
    /// subscriptions that arrive first go to their own handlers. Returns
    /// `false` if the stream ended or timed out before a reply arrived.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent, or any error the
    /// dispatch loop surfaces.
    pub fn request<H>(&mut self, subject: &str, payload: &[u8], handler: H) -> Result<bool>
    where
        H: Fn(&Message, &mut Replier) -> HandlerResult + Send + Sync + 'static,
    {
        self.ensure_ready()?;
        validate_subject(subject)?;

        let inbox = new_inbox();
        let id = self.register(&inbox, None, Arc::new(handler), Retention::Transient)?;
        let outcome = self.exchange(&id, &inbox, subject, payload);
        self.registry.remove(&id);
        outcome
    }

    fn exchange(&mut self, id: &SubscriptionId, inbox: &str, subject: &str, payload: &[u8]) -> Result<bool> {
        self.send(&encode_unsubscribe(id.as_str(), Some(1)))?;
        self.publish(subject, payload, Some(inbox))?;

        while self.transport.as_ref().is_some_and(Transport::is_open) {
            match self.next_event() {
                Ok(Event::Delivered(sid)) if sid == *id => {
                    trace!(subject = %subject, inbox = %inbox, "Request answered");
                    return Ok(true);
                }
                Ok(_) => {}
                Err(e) if e.is_disconnect() => {
                    debug!(subject = %subject, reason = %e, "Request got no reply");
                    self.close();
                    return Ok(false);
                }
                Err(e) => {
                    warn!(subject = %subject, error = %e, "Request failed");
                    self.close();
                    return Err(e);
                }
            }
        }
        Ok(false)
    }

    /// Send a keepalive `PING`. The `PONG` is consumed by the dispatch loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not ready or the write fails.
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.send(PING)?;
        self.pongs_pending += 1;
        self.stats.pings_sent += 1;
        metrics::record_ping();
        Ok(())
    }

    /// Round trip to the broker: send `PING` and dispatch until every
    /// outstanding `PONG` has arrived. Returns the round-trip time.
    ///
    /// Messages arriving in the meantime are delivered to their handlers.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the stream ends before the
    /// `PONG`; the connection is closed in that case.
    pub fn flush(&mut self) -> Result<Duration> {
        let start = Instant::now();
        self.ping()?;

        while self.pongs_pending > 0 {
            if let Err(e) = self.next_event() {
                self.close();
                return Err(e);
            }
        }

        let rtt = start.elapsed();
        trace!(rtt_us = rtt.as_micros() as u64, "Flushed");
        Ok(rtt)
    }

    /// Tear down the transport and connect again with the timeout of the last
    /// connect.
    ///
    /// With `resubscribe`, every replay record is subscribed again; the
    /// returned map holds the new id for each subject.
    ///
    /// # Errors
    ///
    /// Returns the connect error, or the first resubscribe failure.
    pub fn reconnect(&mut self, resubscribe: bool) -> Result<HashMap<String, SubscriptionId>> {
        self.stats.reconnects += 1;
        metrics::record_reconnect();
        info!(url = %self.options.url, attempt = self.stats.reconnects, "Reconnecting");

        self.close();
        self.connect_with_timeout(self.connect_timeout)?;

        let mut resubscribed = HashMap::new();
        if resubscribe {
            for record in self.registry.snapshot() {
                let id = self.register(&record.subject, record.queue.as_deref(), record.handler, Retention::Replay)?;
                debug!(subject = %record.subject, queue = ?record.queue, sid = %id, "Resubscribed");
                resubscribed.insert(record.subject, id);
            }
        }
        Ok(resubscribed)
    }

    /// Close the connection. Closing a closed connection is a no-op.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            info!(url = %self.options.url, "Connection closed");
        }
        self.state = ConnectionState::Disconnected;
        self.pongs_pending = 0;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection is ready for commands.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Ready && self.transport.as_ref().is_some_and(Transport::is_open)
    }

    /// Broker information from the last handshake or `INFO` update.
    #[must_use]
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_deref()
    }

    /// Connection counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Connection options.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Subscription registry.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    pub(crate) fn transport_mut(&mut self) -> Result<&mut Transport> {
        self.transport.as_mut().ok_or(ClientError::NotConnected)
    }

    /// Write to the transport; a failed write closes the connection.
    pub(crate) fn send(&mut self, data: &[u8]) -> Result<()> {
        let result = self.transport_mut()?.send(data);
        if let Err(e) = result {
            warn!(error = %e, "Send failed, closing connection");
            self.close();
            return Err(e.into());
        }
        Ok(())
    }
}
