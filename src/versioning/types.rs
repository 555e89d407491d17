//! Version vocabulary
//!
//! Version ids, epochs, operation tags, and the records the versioned
//! tables keep per key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Version id, monotonically increasing within one epoch.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vid(u64);

impl Vid {
    /// The version every existing row is backfilled at when versioning is enabled.
    pub const INITIAL: Vid = Vid(1);

    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the following version.
    #[inline]
    pub fn next(&self) -> Vid {
        Vid(self.0 + 1)
    }
}

impl fmt::Display for Vid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one incarnation of a layer's versioning.
///
/// A new epoch is drawn each time versioning is enabled; version ids from
/// other epochs are meaningless.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(u32);

impl Epoch {
    #[inline]
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Draws a random epoch different from `previous`.
    pub fn generate(previous: Option<Epoch>) -> Epoch {
        loop {
            let candidate = Epoch(rand::random::<u32>());
            if Some(candidate) != previous {
                return candidate;
            }
        }
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation tag of a version transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionOp {
    Insert,
    Update,
    Delete,
    Restore,
}

/// Per-key pointer to the version where the key's current state began.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub vid: Vid,
    pub op: VersionOp,
}

/// State of a key during the version range `[vid, nid)`.
///
/// `state` is `None` for tombstones, the closed interval during which the
/// key was deleted. Tombstones always carry `vop == Delete`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord<R> {
    pub vid: Vid,
    pub nid: Vid,
    pub vop: VersionOp,
    pub nop: VersionOp,
    pub state: Option<R>,
}

impl<R> HistoryRecord<R> {
    /// Returns true if `at` falls inside `[vid, nid)`.
    #[inline]
    pub fn contains(&self, at: Vid) -> bool {
        self.vid <= at && at < self.nid
    }

    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.state.is_none()
    }
}

/// Result of a single primitive write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WriteOutcome {
    /// Stored state changed
    Changed,
    /// The write matched the stored state and was suppressed
    Unchanged,
}

impl WriteOutcome {
    #[inline]
    pub fn is_changed(&self) -> bool {
        matches!(self, WriteOutcome::Changed)
    }
}

/// The version a group of writes is performed under.
///
/// All writes sharing a context share one `vid`. The layer's latest version
/// only advances to it if at least one write changed state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionContext {
    vid: Option<Vid>,
    changed: usize,
}

impl VersionContext {
    /// Context for a versioned layer writing at `vid`.
    pub fn versioned(vid: Vid) -> Self {
        Self {
            vid: Some(vid),
            changed: 0,
        }
    }

    /// Context for a layer without versioning.
    pub fn unversioned() -> Self {
        Self {
            vid: None,
            changed: 0,
        }
    }

    /// The version being written, `None` when unversioned.
    #[inline]
    pub fn vid(&self) -> Option<Vid> {
        self.vid
    }

    /// Records a write outcome and passes it through.
    pub fn record(&mut self, outcome: WriteOutcome) -> WriteOutcome {
        if outcome.is_changed() {
            self.changed += 1;
        }
        outcome
    }

    /// Records `count` changed writes at once.
    pub fn record_changed(&mut self, count: usize) {
        self.changed += count;
    }

    /// Number of writes that changed state.
    #[inline]
    pub fn changed(&self) -> usize {
        self.changed
    }
}

/// Live versioning parameters of a layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningState {
    pub epoch: Epoch,
    pub latest: Vid,
}

/// The `{enabled, epoch, latest}` status surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningStatus {
    pub enabled: bool,
    pub epoch: Option<Epoch>,
    pub latest: Option<Vid>,
}
