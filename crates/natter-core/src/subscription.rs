//! Subscription identifiers and message handlers.

use std::fmt;
use std::sync::Arc;

use crate::message::{Message, Replier};

/// Prefix of generated reply inboxes.
pub const INBOX_PREFIX: &str = "_INBOX";

/// Opaque, globally unique subscription identifier.
///
/// Generated ids are 128 random bits, hex-encoded. Ids are never reused
/// across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Generate a private reply inbox subject.
#[must_use]
pub fn new_inbox() -> String {
    format!("{INBOX_PREFIX}.{}", SubscriptionId::generate())
}

/// Error returned by a handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Receives messages delivered on a subscription.
///
/// Handlers run synchronously inside the dispatch loop. Anything published
/// through the [`Replier`] is sent once the handler returns.
pub trait Handler: Send + Sync + 'static {
    /// Handle one message.
    fn handle(&self, message: &Message, replier: &mut Replier) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&Message, &mut Replier) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, message: &Message, replier: &mut Replier) -> HandlerResult {
        self(message, replier)
    }
}

/// A handler shared between the dispatch table and the replay records.
pub type SharedHandler = Arc<dyn Handler>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_subscription_id_generation() {
        let id1 = SubscriptionId::generate();
        let id2 = SubscriptionId::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 32);
        assert!(id1.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| SubscriptionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_subscription_id_from_string() {
        let id: SubscriptionId = "9".into();
        assert_eq!(id.as_str(), "9");
        assert_eq!(id.to_string(), "9");
    }

    #[test]
    fn test_inbox_format() {
        let inbox = new_inbox();
        assert!(inbox.starts_with("_INBOX."));
        assert_eq!(inbox.len(), "_INBOX.".len() + 32);
        assert_ne!(inbox, new_inbox());
    }
}
