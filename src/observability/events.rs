//! Observable events
//!
//! Every log line names one of these events.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    ConfigLoaded,
    ServerStarted,
    ServerFailed,

    // Layers
    LayerCreated,
    LayerDeleted,
    SchemaChanged,
    VersioningEnabled,
    VersioningDisabled,

    // Transactions
    TxnOpened,
    TxnStaged,
    TxnCommitted,
    TxnRejected,
    TxnDisposed,
    RevertApplied,

    // Persistence
    SnapshotPersisted,
    SnapshotLoaded,
    SnapshotCorrupted,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::ServerStarted => "SERVER_STARTED",
            Event::ServerFailed => "SERVER_FAILED",

            Event::LayerCreated => "LAYER_CREATED",
            Event::LayerDeleted => "LAYER_DELETED",
            Event::SchemaChanged => "SCHEMA_CHANGED",
            Event::VersioningEnabled => "VERSIONING_ENABLED",
            Event::VersioningDisabled => "VERSIONING_DISABLED",

            Event::TxnOpened => "TXN_OPENED",
            Event::TxnStaged => "TXN_STAGED",
            Event::TxnCommitted => "TXN_COMMITTED",
            Event::TxnRejected => "TXN_REJECTED",
            Event::TxnDisposed => "TXN_DISPOSED",
            Event::RevertApplied => "REVERT_APPLIED",

            Event::SnapshotPersisted => "SNAPSHOT_PERSISTED",
            Event::SnapshotLoaded => "SNAPSHOT_LOADED",
            Event::SnapshotCorrupted => "SNAPSHOT_CORRUPTED",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::SnapshotCorrupted | Event::ServerFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
