//! Observability
//!
//! Structured JSON logging, typed lifecycle events and counter metrics.
//! Observability never changes the outcome of the operation it reports.
//!
//! ```ignore
//! use strata::observability::{log_event_with_fields, Event, MetricsRegistry};
//!
//! log_event_with_fields(Event::TxnCommitted, &[("layer", "1"), ("version", "4")]);
//! let metrics = MetricsRegistry::new();
//! metrics.record_commit(3);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{LogLevel, Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

fn severity_of(event: Event) -> Severity {
    if event.is_fatal() {
        Severity::Fatal
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event
pub fn log_event(event: Event) {
    Logger::log(severity_of(event), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(severity_of(event), event.as_str(), fields);
}
