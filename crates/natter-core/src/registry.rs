//! Subscription registry.
//!
//! Two tables are kept apart on purpose: the dispatch table maps subscription
//! ids to handlers, and the replay table maps subjects to the registration
//! that should be re-issued after a reconnect. Ids are regenerated on every
//! reconnect, so replay cannot be keyed by id.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, trace};

use crate::error::{ClientError, Result};
use crate::message::{Message, Replier};
use crate::subscription::{SharedHandler, SubscriptionId};

/// Whether a subscription is replayed after a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Recorded for replay on reconnect.
    Replay,
    /// Never replayed (request inboxes).
    Transient,
}

/// Registration re-issued after a reconnect.
#[derive(Clone)]
pub struct ReplayRecord {
    /// Subject to subscribe to.
    pub subject: String,
    /// Last-used queue group.
    pub queue: Option<String>,
    /// Handler to attach.
    pub handler: SharedHandler,
}

impl fmt::Debug for ReplayRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayRecord")
            .field("subject", &self.subject)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Dispatch table entry.
struct Entry {
    subject: String,
    handler: SharedHandler,
}

/// Routing table from subscription ids to handlers, plus replay records.
#[derive(Default)]
pub struct SubscriptionRegistry {
    /// Live subscriptions by id.
    active: HashMap<SubscriptionId, Entry>,
    /// Replay records in first-registration order.
    replay: Vec<ReplayRecord>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription and return its fresh id.
    ///
    /// With [`Retention::Replay`] the subject's replay record is created, or
    /// updated in place with the new queue group and handler.
    pub fn add(
        &mut self,
        subject: &str,
        queue: Option<&str>,
        handler: SharedHandler,
        retention: Retention,
    ) -> SubscriptionId {
        let mut id = SubscriptionId::generate();
        while self.active.contains_key(&id) {
            id = SubscriptionId::generate();
        }

        if retention == Retention::Replay {
            let record = ReplayRecord {
                subject: subject.to_string(),
                queue: queue.map(str::to_string),
                handler: handler.clone(),
            };
            match self.replay.iter_mut().find(|r| r.subject == subject) {
                Some(existing) => *existing = record,
                None => self.replay.push(record),
            }
        }

        self.active.insert(
            id.clone(),
            Entry {
                subject: subject.to_string(),
                handler,
            },
        );

        debug!(sid = %id, subject = %subject, queue = ?queue, ?retention, "Subscription registered");
        id
    }

    /// Remove a subscription from the dispatch table.
    ///
    /// The subject's replay record is left untouched. Returns the subject the
    /// id was registered for.
    pub fn remove(&mut self, id: &SubscriptionId) -> Option<String> {
        let entry = self.active.remove(id)?;
        debug!(sid = %id, subject = %entry.subject, "Subscription removed");
        Some(entry.subject)
    }

    /// Drop the replay record for a subject. Returns `true` if one existed.
    pub fn forget(&mut self, subject: &str) -> bool {
        let before = self.replay.len();
        self.replay.retain(|r| r.subject != subject);
        self.replay.len() != before
    }

    /// Drop every dispatch entry, keeping replay records.
    pub fn clear_active(&mut self) {
        self.active.clear();
    }

    /// Invoke the handler registered for `message.sid`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownSubscription`] if the id is not
    /// registered, and [`ClientError::Callback`] if the handler fails or
    /// panics. Registry state is unchanged in both cases.
    pub fn dispatch(&self, message: &Message, replier: &mut Replier) -> Result<()> {
        let entry = self
            .active
            .get(&message.sid)
            .ok_or_else(|| ClientError::UnknownSubscription(message.sid.clone()))?;

        trace!(sid = %message.sid, subject = %message.subject, bytes = message.payload.len(), "Dispatching");

        let outcome = catch_unwind(AssertUnwindSafe(|| entry.handler.handle(message, replier)));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ClientError::Callback {
                sid: message.sid.clone(),
                reason: e.to_string(),
            }),
            Err(panic) => Err(ClientError::Callback {
                sid: message.sid.clone(),
                reason: panic_message(panic.as_ref()),
            }),
        }
    }

    /// Replay records, in first-registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ReplayRecord> {
        self.replay.clone()
    }

    /// Check if an id is a dispatch target.
    #[must_use]
    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.active.contains_key(id)
    }

    /// Ids currently registered for a subject.
    #[must_use]
    pub fn ids_for(&self, subject: &str) -> Vec<SubscriptionId> {
        self.active
            .iter()
            .filter(|(_, e)| e.subject == subject)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Check if there are no live subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("active", &self.active.len())
            .field("replay", &self.replay)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
