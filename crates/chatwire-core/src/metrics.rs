//! Metrics recorded by the realtime core.
//!
//! Uses the `metrics` facade; nothing is exported unless the embedding
//! process installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const SESSIONS_ACTIVE: &str = "chatwire_sessions_active";
    pub const MESSAGES_PUBLISHED: &str = "chatwire_messages_published_total";
    pub const MESSAGES_DELIVERED: &str = "chatwire_messages_delivered_total";
    pub const MESSAGES_SUPPRESSED: &str = "chatwire_messages_suppressed_total";
    pub const PERSIST_FAILURES: &str = "chatwire_persist_failures_total";
    pub const PUSH_TOTAL: &str = "chatwire_push_total";
    pub const ERRORS_TOTAL: &str = "chatwire_errors_total";
}

/// Describe every core metric.
pub fn describe() {
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of live sessions");
    metrics::describe_counter!(
        names::MESSAGES_PUBLISHED,
        "Messages published to the broker"
    );
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED,
        "Messages written to recipient connections"
    );
    metrics::describe_counter!(
        names::MESSAGES_SUPPRESSED,
        "Messages dropped by delivery policy"
    );
    metrics::describe_counter!(
        names::PERSIST_FAILURES,
        "Published messages that failed to persist"
    );
    metrics::describe_counter!(names::PUSH_TOTAL, "Push notification attempts");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");
}

/// Update the live session gauge.
pub fn set_active_sessions(count: usize) {
    gauge!(names::SESSIONS_ACTIVE).set(count as f64);
}

/// Record a published message.
pub fn record_published() {
    counter!(names::MESSAGES_PUBLISHED).increment(1);
}

/// Record a message written to a connection.
pub fn record_delivered() {
    counter!(names::MESSAGES_DELIVERED).increment(1);
}

/// Record a message dropped by policy (`blocked`, `self_echo`).
pub fn record_suppressed(reason: &'static str) {
    counter!(names::MESSAGES_SUPPRESSED, "reason" => reason).increment(1);
}

/// Record a persistence failure after publish.
pub fn record_persist_failure() {
    counter!(names::PERSIST_FAILURES).increment(1);
}

/// Record a push attempt (`sent`, `failed`).
pub fn record_push(outcome: &'static str) {
    counter!(names::PUSH_TOTAL, "outcome" => outcome).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}
