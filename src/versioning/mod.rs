//! Versioned feature storage
//!
//! Current rows, per-key event records and closed-interval history, plus
//! the reads built on them: point-in-time lists, change feeds and revert.
//!
//! # Model
//!
//! - A version context carries the `vid` a group of writes shares
//! - `latest` advances by one per context that changed something
//! - History ranges of one key are contiguous and never overlap
//! - The event record of a key starts where its last history range ends

mod changes;
mod errors;
mod pit;
mod revert;
mod schema;
mod table;
mod types;

pub use changes::{FeatureChange, FidPage};
pub use errors::{VersionError, VersionResult};
pub use schema::{FeatureSnapshot, VersionSchema};
pub use table::{ChangeKind, PitState, RawChange, VersionedTable};
pub use types::{
    Epoch, EventRecord, HistoryRecord, VersionContext, VersionOp, VersioningState,
    VersioningStatus, Vid, WriteOutcome,
};
