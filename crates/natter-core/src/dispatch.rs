//! Dispatch loop.
//!
//! Reads one frame at a time from the transport, answers broker `PING`s and
//! routes `MSG` frames to the registered handlers.

use natter_protocol::codec::{CRLF, PONG};
use natter_protocol::{parse_line, Frame, MsgHeader, ProtocolError};
use natter_transport::Transport;
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::message::{Message, Replier};
use crate::metrics;
use crate::subscription::SubscriptionId;

/// Outcome of processing one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    /// A message was handed to the handler of this subscription.
    Delivered(SubscriptionId),
    /// The broker answered a client `PING`.
    Pong,
    /// Nothing visible to the caller.
    Ignored,
}

impl Connection {
    /// Run the dispatch loop until `quantity` messages have been delivered,
    /// or until the stream ends or times out if `quantity` is zero.
    ///
    /// Returns the number of messages delivered. Reaching `quantity` leaves
    /// the connection open; EOF and timeouts close it and return normally.
    /// A failing handler is logged and counted, and the loop continues.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] if the connection is not ready.
    /// Malformed frames, unknown subscription ids and read failures close the
    /// connection and are returned.
    pub fn wait(&mut self, quantity: usize) -> Result<usize> {
        self.ensure_ready()?;

        let mut delivered = 0;
        while self.transport.as_ref().is_some_and(Transport::is_open) {
            match self.next_event() {
                Ok(Event::Delivered(_)) => {
                    delivered += 1;
                    if quantity > 0 && delivered >= quantity {
                        return Ok(delivered);
                    }
                }
                Ok(_) => {}
                Err(e) if e.is_disconnect() => {
                    debug!(delivered, reason = %e, "Dispatch loop stopped");
                    self.close();
                    return Ok(delivered);
                }
                Err(e) => {
                    warn!(delivered, error = %e, "Dispatch loop failed");
                    self.close();
                    return Err(e);
                }
            }
        }
        Ok(delivered)
    }

    /// Read and handle one frame.
    pub(crate) fn next_event(&mut self) -> Result<Event> {
        let line = self.transport_mut()?.receive_line()?;

        match parse_line(&line)? {
            Frame::Msg(header) => self.deliver(header),
            Frame::Ping => {
                self.send(PONG)?;
                trace!("Answered PING");
                Ok(Event::Ignored)
            }
            Frame::Pong => {
                self.pongs_pending = self.pongs_pending.saturating_sub(1);
                Ok(Event::Pong)
            }
            Frame::Info(info) => {
                debug!(server_id = %info.server_id, "Server info updated");
                self.server_info = Some(info.into());
                Ok(Event::Ignored)
            }
            Frame::Ok => Ok(Event::Ignored),
            Frame::Err(reason) => {
                warn!(reason = %reason, "Broker reported an error");
                Ok(Event::Ignored)
            }
            Frame::Unknown(line) => {
                trace!(line = %line, "Ignoring unknown frame");
                Ok(Event::Ignored)
            }
        }
    }

    fn deliver(&mut self, header: MsgHeader) -> Result<Event> {
        let max_payload = self.server_info.as_ref().map_or(0, |info| info.max_payload);
        if max_payload > 0 && header.length > max_payload {
            return Err(ProtocolError::InvalidLength(format!(
                "{} exceeds broker limit of {max_payload}",
                header.length
            ))
            .into());
        }
        let framed = header
            .length
            .checked_add(CRLF.len())
            .ok_or_else(|| ProtocolError::InvalidLength(header.length.to_string()))?;

        let mut payload = self.transport_mut()?.receive_exact(framed)?;
        if !payload.ends_with(CRLF) {
            return Err(ProtocolError::Invalid(format!(
                "payload of MSG {} is not terminated by CRLF",
                header.subject
            ))
            .into());
        }
        payload.truncate(header.length);

        let sid = SubscriptionId::from(header.sid);
        let message = Message::new(header.subject, sid.clone(), header.reply, payload);
        let mut replier = Replier::new();

        match self.registry.dispatch(&message, &mut replier) {
            Ok(()) => {}
            Err(ClientError::Callback { sid, reason }) => {
                warn!(sid = %sid, subject = %message.subject, reason = %reason, "Handler failed");
                self.stats.callback_errors += 1;
                metrics::record_callback_error();
            }
            Err(e) => return Err(e),
        }
        self.stats.messages_received += 1;
        metrics::record_received(message.payload.len());

        let (frames, published) = replier.take();
        if !frames.is_empty() {
            self.send(&frames)?;
            self.stats.messages_published += published;
            metrics::record_published(published);
        }
        Ok(Event::Delivered(sid))
    }
}
