//! Client metrics.
//!
//! Counters are recorded through the `metrics` facade; they are no-ops until
//! an exporter is installed (see the CLI's `--metrics-port`).

use metrics::counter;

/// Metric names.
pub mod names {
    /// Messages sent with `PUB`.
    pub const MESSAGES_PUBLISHED: &str = "natter_messages_published_total";
    /// Messages handed to a handler.
    pub const MESSAGES_RECEIVED: &str = "natter_messages_received_total";
    /// Payload bytes of delivered messages.
    pub const BYTES_RECEIVED: &str = "natter_bytes_received_total";
    /// Client `PING`s.
    pub const PINGS: &str = "natter_pings_total";
    /// Reconnect attempts.
    pub const RECONNECTS: &str = "natter_reconnects_total";
    /// Handlers that returned an error or panicked.
    pub const CALLBACK_ERRORS: &str = "natter_callback_errors_total";
}

/// Describe every client metric.
pub fn describe_metrics() {
    metrics::describe_counter!(names::MESSAGES_PUBLISHED, "Total number of messages published");
    metrics::describe_counter!(names::MESSAGES_RECEIVED, "Total number of messages delivered to handlers");
    metrics::describe_counter!(names::BYTES_RECEIVED, "Total payload bytes received");
    metrics::describe_counter!(names::PINGS, "Total number of PINGs sent by the client");
    metrics::describe_counter!(names::RECONNECTS, "Total number of reconnects");
    metrics::describe_counter!(names::CALLBACK_ERRORS, "Total number of failed handler invocations");
}

/// Record published messages.
pub fn record_published(count: u64) {
    counter!(names::MESSAGES_PUBLISHED).increment(count);
}

/// Record a delivered message.
pub fn record_received(bytes: usize) {
    counter!(names::MESSAGES_RECEIVED).increment(1);
    counter!(names::BYTES_RECEIVED).increment(bytes as u64);
}

/// Record a client `PING`.
pub fn record_ping() {
    counter!(names::PINGS).increment(1);
}

/// Record a reconnect.
pub fn record_reconnect() {
    counter!(names::RECONNECTS).increment(1);
}

/// Record a failed handler.
pub fn record_callback_error() {
    counter!(names::CALLBACK_ERRORS).increment(1);
}
