//! Versioned table
//!
//! A keyed table that keeps, next to the current rows, one event record per
//! key and a closed-interval history of earlier states. Features,
//! descriptions and attachments all store their rows in this structure.
//!
//! Every write is expressed as "key `k` should be in state `s` at version
//! `v`". The table recomputes the key's state as of the version before `v`
//! and derives the event and history records from that base, so repeated
//! writes within one version collapse into a single net transition.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::ops::RangeBounds;

use serde::{Deserialize, Serialize};

use super::errors::{VersionError, VersionResult};
use super::types::{EventRecord, HistoryRecord, Vid, VersionOp, WriteOutcome};

/// State of a key at a given version.
#[derive(Debug, PartialEq)]
pub enum PitState<'a, R> {
    /// The key did not exist yet
    Absent,
    /// The key was deleted at `since`
    Deleted { since: Vid },
    /// The key held `row` since `since`
    Present { since: Vid, row: &'a R },
}

impl<'a, R> PitState<'a, R> {
    pub fn row(&self) -> Option<&'a R> {
        match self {
            PitState::Present { row, .. } => Some(row),
            _ => None,
        }
    }
}

/// Net classification of a key between two versions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Restore,
}

/// Net change of one key over a version window.
#[derive(Debug, PartialEq)]
pub struct RawChange<'a, K, R> {
    pub key: K,
    pub kind: ChangeKind,
    /// Version at which the key reached its target state
    pub vid: Vid,
    pub before: Option<&'a R>,
    pub after: Option<&'a R>,
}

/// The state a key is written against.
enum Base<R> {
    Absent,
    Deleted { since: Vid },
    Live { since: Vid, op: VersionOp, row: R },
}

/// Current rows plus event and history records, keyed by `K`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionedTable<K: Ord, R> {
    current: BTreeMap<K, R>,
    events: BTreeMap<K, EventRecord>,
    history: BTreeMap<K, Vec<HistoryRecord<R>>>,
    versioned: bool,
}

impl<K: Ord, R> Default for VersionedTable<K, R> {
    fn default() -> Self {
        Self {
            current: BTreeMap::new(),
            events: BTreeMap::new(),
            history: BTreeMap::new(),
            versioned: false,
        }
    }
}

impl<K, R> VersionedTable<K, R>
where
    K: Copy + Ord + Display,
    R: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    /// Turns on tracking, backfilling an insert event at `initial` for every
    /// live row.
    pub fn enable_versioning(&mut self, initial: Vid) {
        self.events = self
            .current
            .keys()
            .map(|k| {
                (
                    *k,
                    EventRecord {
                        vid: initial,
                        op: VersionOp::Insert,
                    },
                )
            })
            .collect();
        self.history.clear();
        self.versioned = true;
    }

    /// Turns off tracking and drops all event and history records.
    pub fn disable_versioning(&mut self) {
        self.events.clear();
        self.history.clear();
        self.versioned = false;
    }

    /// Removes every row and record.
    pub fn clear(&mut self) {
        self.current.clear();
        self.events.clear();
        self.history.clear();
    }

    #[inline]
    pub fn get(&self, key: &K) -> Option<&R> {
        self.current.get(key)
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.current.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.current.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Live rows in key order.
    pub fn rows(&self) -> impl Iterator<Item = (&K, &R)> {
        self.current.iter()
    }

    #[inline]
    pub fn event(&self, key: &K) -> Option<&EventRecord> {
        self.events.get(key)
    }

    /// History records of a key, oldest first.
    pub fn history_of(&self, key: &K) -> &[HistoryRecord<R>] {
        self.history.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Version of the live row, if the key is live and versioned.
    pub fn vid_of(&self, key: &K) -> Option<Vid> {
        if !self.current.contains_key(key) {
            return None;
        }
        self.events.get(key).map(|ev| ev.vid)
    }

    /// Returns true if the key's latest operation is a delete.
    pub fn is_deleted(&self, key: &K) -> bool {
        matches!(self.events.get(key), Some(ev) if ev.op == VersionOp::Delete)
    }

    /// Last snapshot the key held before it was deleted.
    pub fn last_snapshot(&self, key: &K) -> Option<&R> {
        self.history_of(key)
            .iter()
            .rev()
            .find_map(|rec| rec.state.as_ref())
    }

    /// Checks the caller's view of a live key.
    ///
    /// Passes when unversioned, when no expectation is given, or when the
    /// expectation matches the key's event version.
    pub fn check_expected(&self, key: &K, expected: Option<Vid>) -> VersionResult<()> {
        let Some(expected) = expected else {
            return Ok(());
        };
        if !self.versioned {
            return Ok(());
        }
        match self.events.get(key) {
            Some(ev) if ev.vid != expected => Err(VersionError::Conflict {
                key: key.to_string(),
                expected,
                actual: ev.vid,
            }),
            _ => Ok(()),
        }
    }

    /// Inserts a new key. Keys that were ever live are rejected.
    pub fn insert(&mut self, key: K, row: R, vid: Option<Vid>) -> VersionResult<WriteOutcome> {
        if self.current.contains_key(&key) || self.events.contains_key(&key) {
            return Err(VersionError::KeyExists(key.to_string()));
        }
        self.write(key, Some(row), vid)
    }

    /// Replaces the row of a live key.
    pub fn update(&mut self, key: K, row: R, vid: Option<Vid>) -> VersionResult<WriteOutcome> {
        if !self.current.contains_key(&key) {
            return Err(VersionError::NotFound(key.to_string()));
        }
        self.write(key, Some(row), vid)
    }

    /// Deletes a live key.
    pub fn delete(&mut self, key: K, vid: Option<Vid>) -> VersionResult<WriteOutcome> {
        if !self.current.contains_key(&key) {
            return Err(VersionError::NotFound(key.to_string()));
        }
        self.write(key, None, vid)
    }

    /// Brings back a deleted key with `row`, or with its last snapshot.
    pub fn restore(&mut self, key: K, row: Option<R>, vid: Option<Vid>) -> VersionResult<WriteOutcome> {
        if !self.versioned {
            return Err(VersionError::VersioningDisabled);
        }
        if !self.is_deleted(&key) {
            return Err(if self.current.contains_key(&key) {
                VersionError::NotDeleted(key.to_string())
            } else {
                VersionError::NotFound(key.to_string())
            });
        }
        let row = match row {
            Some(row) => row,
            None => self
                .last_snapshot(&key)
                .cloned()
                .ok_or_else(|| VersionError::Storage(format!("no snapshot to restore {}", key)))?,
        };
        self.write(key, Some(row), vid)
    }

    /// Writes the desired state of a key at `vid`.
    ///
    /// `None` means "not live". Writing the state the key already has is
    /// suppressed and reported as [`WriteOutcome::Unchanged`].
    pub fn write(&mut self, key: K, desired: Option<R>, vid: Option<Vid>) -> VersionResult<WriteOutcome> {
        if self.current.get(&key) == desired.as_ref() {
            return Ok(WriteOutcome::Unchanged);
        }
        match vid {
            Some(vid) if self.versioned => self.transition(key, desired, vid)?,
            Some(_) => return Err(VersionError::Storage("versioned write on unversioned table".to_string())),
            None if self.versioned => return Err(VersionError::Storage("unversioned write on versioned table".to_string())),
            None => match desired {
                Some(row) => {
                    self.current.insert(key, row);
                }
                None => {
                    self.current.remove(&key);
                }
            },
        }
        Ok(WriteOutcome::Changed)
    }

    fn transition(&mut self, key: K, desired: Option<R>, vid: Vid) -> VersionResult<()> {
        let base = self.base_before(&key, vid)?;
        match (base, desired) {
            (Base::Absent, Some(row)) => {
                self.set_event(key, vid, VersionOp::Insert);
                self.current.insert(key, row);
            }
            (Base::Absent, None) => {
                self.events.remove(&key);
                self.current.remove(&key);
            }
            (Base::Live { since, op, row: old }, Some(row)) if old == row => {
                self.set_event(key, since, op);
                self.current.insert(key, row);
            }
            (Base::Live { since, op, row: old }, Some(row)) => {
                self.push_history(key, since, vid, op, VersionOp::Update, Some(old))?;
                self.set_event(key, vid, VersionOp::Update);
                self.current.insert(key, row);
            }
            (Base::Live { since, op, row: old }, None) => {
                self.push_history(key, since, vid, op, VersionOp::Delete, Some(old))?;
                self.set_event(key, vid, VersionOp::Delete);
                self.current.remove(&key);
            }
            (Base::Deleted { since }, Some(row)) => {
                self.push_history(key, since, vid, VersionOp::Delete, VersionOp::Restore, None)?;
                self.set_event(key, vid, VersionOp::Restore);
                self.current.insert(key, row);
            }
            (Base::Deleted { since }, None) => {
                self.set_event(key, since, VersionOp::Delete);
                self.current.remove(&key);
            }
        }
        Ok(())
    }

    /// Recovers the key's state as of the version before `vid`.
    ///
    /// If the key was already written at `vid`, the history record that
    /// write closed is reopened.
    fn base_before(&mut self, key: &K, vid: Vid) -> VersionResult<Base<R>> {
        let Some(ev) = self.events.get(key).copied() else {
            return Ok(Base::Absent);
        };
        if ev.vid > vid {
            return Err(VersionError::Storage(format!(
                "write of {} at {} behind event version {}",
                key, vid, ev.vid
            )));
        }
        if ev.vid < vid {
            return Ok(match ev.op {
                VersionOp::Delete => Base::Deleted { since: ev.vid },
                op => Base::Live {
                    since: ev.vid,
                    op,
                    row: self
                        .current
                        .get(key)
                        .cloned()
                        .ok_or_else(|| VersionError::Storage(format!("event without row for {}", key)))?,
                },
            });
        }

        let reopened = match self.history.get_mut(key) {
            Some(recs) if recs.last().map(|r| r.nid) == Some(vid) => recs.pop(),
            _ => None,
        };
        if matches!(self.history.get(key), Some(recs) if recs.is_empty()) {
            self.history.remove(key);
        }
        match reopened {
            None if ev.op == VersionOp::Insert => Ok(Base::Absent),
            None => Err(VersionError::Storage(format!(
                "{} changed at {} without a closed record",
                key, vid
            ))),
            Some(rec) => Ok(match rec.state {
                Some(row) => Base::Live {
                    since: rec.vid,
                    op: rec.vop,
                    row,
                },
                None => Base::Deleted { since: rec.vid },
            }),
        }
    }

    fn set_event(&mut self, key: K, vid: Vid, op: VersionOp) {
        self.events.insert(key, EventRecord { vid, op });
    }

    fn push_history(
        &mut self,
        key: K,
        vid: Vid,
        nid: Vid,
        vop: VersionOp,
        nop: VersionOp,
        state: Option<R>,
    ) -> VersionResult<()> {
        if vid >= nid {
            return Err(VersionError::Storage(format!(
                "empty history range [{}, {}) for {}",
                vid, nid, key
            )));
        }
        let recs = self.history.entry(key).or_default();
        if let Some(last) = recs.last() {
            if last.nid > vid {
                return Err(VersionError::Storage(format!(
                    "history range [{}, {}) overlaps [{}, {}) for {}",
                    vid, nid, last.vid, last.nid, key
                )));
            }
        }
        recs.push(HistoryRecord {
            vid,
            nid,
            vop,
            nop,
            state,
        });
        Ok(())
    }

    /// State of a key at version `at`.
    pub fn state_at(&self, key: &K, at: Vid) -> PitState<'_, R> {
        let Some(ev) = self.events.get(key) else {
            return PitState::Absent;
        };
        if ev.vid <= at {
            return match (ev.op, self.current.get(key)) {
                (VersionOp::Delete, _) => PitState::Deleted { since: ev.vid },
                (_, Some(row)) => PitState::Present { since: ev.vid, row },
                (_, None) => PitState::Absent,
            };
        }
        let recs = self.history_of(key);
        let idx = recs.partition_point(|rec| rec.vid <= at);
        match idx.checked_sub(1).map(|i| &recs[i]) {
            Some(rec) if rec.contains(at) => match &rec.state {
                Some(row) => PitState::Present { since: rec.vid, row },
                None => PitState::Deleted { since: rec.vid },
            },
            _ => PitState::Absent,
        }
    }

    /// All rows live at version `at`, with the version each row dates from.
    ///
    /// This is the union of current rows whose event is not newer than `at`
    /// and history rows whose range contains `at`; the two sets are
    /// disjoint.
    pub fn rows_at(&self, at: Vid) -> Vec<(K, Vid, &R)> {
        let from_current = self.current.iter().filter_map(|(k, row)| {
            let ev = self.events.get(k)?;
            (ev.vid <= at).then_some((*k, ev.vid, row))
        });
        let from_history = self.history.iter().filter_map(|(k, recs)| {
            let idx = recs.partition_point(|rec| rec.vid <= at);
            let rec = &recs[idx.checked_sub(1)?];
            match &rec.state {
                Some(row) if rec.contains(at) => Some((*k, rec.vid, row)),
                _ => None,
            }
        });
        let mut rows: Vec<_> = from_current.chain(from_history).collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Returns true if the key was written in `(initial, target]`.
    pub fn changed_in(&self, key: &K, initial: Vid, target: Vid) -> bool {
        let within = |v: Vid| initial < v && v <= target;
        self.events.get(key).is_some_and(|ev| within(ev.vid))
            || self.history_of(key).iter().any(|rec| within(rec.vid))
    }

    /// Keys written in `(initial, target]`, ascending, after `after`,
    /// at most `limit`.
    pub fn changed_keys(&self, initial: Vid, target: Vid, after: Option<K>, limit: usize) -> Vec<K> {
        self.events
            .keys()
            .filter(|k| after.map_or(true, |a| **k > a))
            .filter(|k| self.changed_in(k, initial, target))
            .take(limit)
            .copied()
            .collect()
    }

    /// Keys written in `(initial, target]` that fall in `range`, ascending.
    pub fn changed_keys_in(&self, initial: Vid, target: Vid, range: impl RangeBounds<K>) -> Vec<K> {
        self.events
            .range(range)
            .map(|(k, _)| *k)
            .filter(|k| self.changed_in(k, initial, target))
            .collect()
    }

    /// Whether any key differs between `initial` and `target`.
    ///
    /// Writes that cancel out inside the window, such as a create followed
    /// by a delete of the same key, do not count.
    pub fn has_net_change(&self, initial: Vid, target: Vid) -> bool {
        self.changed_keys_in(initial, target, ..)
            .into_iter()
            .any(|key| self.net_change(key, initial, target).is_some())
    }

    /// Net change of a key between `initial` and `target`, if any.
    pub fn net_change(&self, key: K, initial: Vid, target: Vid) -> Option<RawChange<'_, K, R>> {
        let from = self.state_at(&key, initial);
        let to = self.state_at(&key, target);
        let (kind, vid, before, after) = match (from, to) {
            (PitState::Present { row: a, .. }, PitState::Present { since, row: b }) => {
                if a == b {
                    return None;
                }
                (ChangeKind::Update, since, Some(a), Some(b))
            }
            (PitState::Deleted { .. }, PitState::Present { since, row }) => {
                (ChangeKind::Restore, since, None, Some(row))
            }
            (PitState::Absent, PitState::Present { since, row }) => {
                (ChangeKind::Create, since, None, Some(row))
            }
            (PitState::Present { row, .. }, PitState::Deleted { since }) => {
                (ChangeKind::Delete, since, Some(row), None)
            }
            (PitState::Present { row, .. }, PitState::Absent) => {
                (ChangeKind::Delete, target, Some(row), None)
            }
            _ => return None,
        };
        Some(RawChange {
            key,
            kind,
            vid,
            before,
            after,
        })
    }

    /// Converges every key to its state at `target`, writing at `vid`.
    ///
    /// Returns the number of keys that changed.
    pub fn revert_to(&mut self, target: Vid, vid: Vid) -> VersionResult<usize> {
        if !self.versioned {
            return Err(VersionError::VersioningDisabled);
        }
        let desired: Vec<(K, Option<R>)> = self
            .events
            .keys()
            .map(|k| (*k, self.state_at(k, target).row().cloned()))
            .collect();
        let mut changed = 0;
        for (key, state) in desired {
            if self.write(key, state, Some(vid))?.is_changed() {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Applies `f` to every stored row, current and historical.
    pub fn try_map_rows<E>(&mut self, mut f: impl FnMut(&mut R) -> Result<(), E>) -> Result<(), E> {
        for row in self.current.values_mut() {
            f(row)?;
        }
        for recs in self.history.values_mut() {
            for row in recs.iter_mut().filter_map(|rec| rec.state.as_mut()) {
                f(row)?;
            }
        }
        Ok(())
    }

    /// Every stored row, current and historical.
    pub fn stored_rows(&self) -> impl Iterator<Item = &R> {
        self.current.values().chain(
            self.history
                .values()
                .flatten()
                .filter_map(|rec| rec.state.as_ref()),
        )
    }

    /// Keeps only the keys for which `keep` returns true, with all records.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.current.retain(|k, _| keep(k));
        self.events.retain(|k, _| keep(k));
        self.history.retain(|k, _| keep(k));
    }

    /// Verifies the relations between current rows, events and history.
    pub fn check_invariants(&self) -> VersionResult<()> {
        if !self.versioned {
            if !self.events.is_empty() || !self.history.is_empty() {
                return Err(VersionError::Storage(
                    "unversioned table carries version records".to_string(),
                ));
            }
            return Ok(());
        }
        for key in self.current.keys() {
            match self.events.get(key) {
                Some(ev) if ev.op != VersionOp::Delete => {}
                _ => return Err(VersionError::Storage(format!("live {} has no live event", key))),
            }
        }
        for (key, ev) in &self.events {
            if ev.op == VersionOp::Delete && self.current.contains_key(key) {
                return Err(VersionError::Storage(format!("deleted {} has a current row", key)));
            }
            if ev.op != VersionOp::Delete && !self.current.contains_key(key) {
                return Err(VersionError::Storage(format!("{} has an event but no row", key)));
            }
            let recs = self.history_of(key);
            for pair in recs.windows(2) {
                if pair[0].nid != pair[1].vid {
                    return Err(VersionError::Storage(format!(
                        "history of {} is not contiguous at {}",
                        key, pair[0].nid
                    )));
                }
            }
            for rec in recs {
                if rec.vid >= rec.nid {
                    return Err(VersionError::Storage(format!("empty history range for {}", key)));
                }
                if rec.is_tombstone() != (rec.vop == VersionOp::Delete) {
                    return Err(VersionError::Storage(format!("malformed tombstone for {}", key)));
                }
            }
            if let Some(last) = recs.last() {
                if last.nid != ev.vid {
                    return Err(VersionError::Storage(format!(
                        "history of {} ends at {} but event is at {}",
                        key, last.nid, ev.vid
                    )));
                }
            }
        }
        if let Some(key) = self.history.keys().find(|k| !self.events.contains_key(k)) {
            return Err(VersionError::Storage(format!("history without event for {}", key)));
        }
        Ok(())
    }
}
