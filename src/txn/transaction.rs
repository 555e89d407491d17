//! Transaction bookkeeping
//!
//! A transaction is a sparse, ordered map of slots. Slots hold a raw
//! operation payload or a tombstone; payloads are parsed only at commit.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{TxnError, TxnResult};
use crate::actions::ErrorBody;
use crate::versioning::{Epoch, Vid};

/// Per-layer transaction identity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(u64);

impl TxnId {
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a commit attempt, as returned to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommitOutcome {
    Committed { version: Option<Vid> },
    Errors { errors: Vec<(u64, ErrorBody)> },
}

impl CommitOutcome {
    #[inline]
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }
}

#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    epoch: Option<Epoch>,
    slots: BTreeMap<u64, Option<Value>>,
    /// Last commit outcome; kept until the slot map changes
    outcome: Option<CommitOutcome>,
    /// Slots that failed in the last `Errors` outcome
    failed: BTreeSet<u64>,
    results: Vec<(u64, Value)>,
    /// Set once the bound epoch was found stale
    stale: bool,
}

impl Transaction {
    pub fn new(id: TxnId, epoch: Option<Epoch>) -> Self {
        Self {
            id,
            epoch,
            slots: BTreeMap::new(),
            outcome: None,
            failed: BTreeSet::new(),
            results: Vec::new(),
            stale: false,
        }
    }

    #[inline]
    pub fn id(&self) -> TxnId {
        self.id
    }

    #[inline]
    pub fn epoch(&self) -> Option<Epoch> {
        self.epoch
    }

    #[inline]
    pub fn is_committed(&self) -> bool {
        matches!(self.outcome, Some(CommitOutcome::Committed { .. }))
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Cached outcome, if the slot map has not changed since.
    #[inline]
    pub fn outcome(&self) -> Option<&CommitOutcome> {
        self.outcome.as_ref()
    }

    /// Non-null slots in seqnum order.
    pub fn staged(&self) -> impl Iterator<Item = (u64, &Value)> {
        self.slots
            .iter()
            .filter_map(|(seqnum, op)| op.as_ref().map(|op| (*seqnum, op)))
    }

    pub fn results(&self) -> TxnResult<&[(u64, Value)]> {
        if !self.is_committed() {
            return Err(TxnError::NotCommitted(self.id));
        }
        Ok(&self.results)
    }

    /// Stages a batch of slot writes; either every write is taken or none.
    ///
    /// Returns true if the slot map changed.
    pub fn put(&mut self, items: Vec<(u64, Option<Value>)>) -> TxnResult<bool> {
        if self.is_committed() {
            return Err(TxnError::Committed(self.id));
        }
        let mut slots = self.slots.clone();
        let mut changed = false;
        for (seqnum, op) in items {
            match (slots.get(&seqnum), &op) {
                (Some(current), _) if *current == op => continue,
                (Some(Some(_)), Some(_)) if !self.failed.contains(&seqnum) => {
                    return Err(TxnError::SlotConflict(seqnum));
                }
                _ => {}
            }
            slots.insert(seqnum, op);
            changed = true;
        }
        if changed {
            self.slots = slots;
            self.outcome = None;
        }
        Ok(changed)
    }

    /// Records the outcome of a commit attempt.
    pub fn resolve(&mut self, outcome: CommitOutcome, results: Vec<(u64, Value)>) {
        self.failed = match &outcome {
            CommitOutcome::Errors { errors } => errors.iter().map(|(seqnum, _)| *seqnum).collect(),
            CommitOutcome::Committed { .. } => BTreeSet::new(),
        };
        self.results = results;
        self.outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn txn() -> Transaction {
        Transaction::new(TxnId::new(1), Some(Epoch::new(7)))
    }

    fn error_at(seqnum: u64) -> CommitOutcome {
        CommitOutcome::Errors {
            errors: vec![(
                seqnum,
                ErrorBody {
                    error: "feature.conflict".to_string(),
                    message: "stale".to_string(),
                    status_code: 409,
                },
            )],
        }
    }

    #[test]
    fn test_identical_put_is_noop() {
        let mut txn = txn();
        let op = json!({"action": "description.put", "fid": 1, "value": "a"});
        assert!(txn.put(vec![(1, Some(op.clone()))]).unwrap());
        assert!(!txn.put(vec![(1, Some(op))]).unwrap());
    }

    #[test]
    fn test_differing_put_conflicts() {
        let mut txn = txn();
        txn.put(vec![(1, Some(json!({"value": "a"})))]).unwrap();
        let err = txn.put(vec![(1, Some(json!({"value": "b"})))]).unwrap_err();
        assert_eq!(err, TxnError::SlotConflict(1));
    }

    #[test]
    fn test_batch_put_is_atomic() {
        let mut txn = txn();
        txn.put(vec![(1, Some(json!({"value": "a"})))]).unwrap();
        let err = txn
            .put(vec![(2, Some(json!({"value": "x"}))), (1, Some(json!({"value": "b"})))])
            .unwrap_err();
        assert_eq!(err, TxnError::SlotConflict(1));
        assert_eq!(txn.staged().count(), 1);
    }

    #[test]
    fn test_null_clears_and_tombstone_can_be_restaged() {
        let mut txn = txn();
        txn.put(vec![(1, Some(json!({"value": "a"})))]).unwrap();
        txn.put(vec![(1, None)]).unwrap();
        assert_eq!(txn.staged().count(), 0);
        txn.put(vec![(1, Some(json!({"value": "b"})))]).unwrap();
        assert_eq!(txn.staged().next().unwrap().1, &json!({"value": "b"}));
    }

    #[test]
    fn test_failed_slot_can_be_overwritten() {
        let mut txn = txn();
        txn.put(vec![(1, Some(json!({"vid": 0})))]).unwrap();
        txn.resolve(error_at(1), Vec::new());
        assert!(txn.outcome().is_some());

        txn.put(vec![(1, Some(json!({"vid": 2})))]).unwrap();
        assert!(txn.outcome().is_none());
    }

    #[test]
    fn test_identical_put_keeps_cached_errors() {
        let mut txn = txn();
        txn.put(vec![(1, Some(json!({"vid": 0})))]).unwrap();
        txn.resolve(error_at(1), Vec::new());
        txn.put(vec![(1, Some(json!({"vid": 0})))]).unwrap();
        assert_eq!(txn.outcome(), Some(&error_at(1)));
    }

    #[test]
    fn test_committed_rejects_put_and_serves_results() {
        let mut txn = txn();
        assert_eq!(txn.results().unwrap_err(), TxnError::NotCommitted(TxnId::new(1)));
        txn.put(vec![(1, Some(json!({"value": "a"})))]).unwrap();
        txn.resolve(
            CommitOutcome::Committed {
                version: Some(Vid::new(3)),
            },
            vec![(1, json!({"fid": 1}))],
        );
        assert_eq!(txn.results().unwrap(), &[(1, json!({"fid": 1}))]);
        let err = txn.put(vec![(2, None)]).unwrap_err();
        assert_eq!(err, TxnError::Committed(TxnId::new(1)));
    }

    #[test]
    fn test_outcome_wire_shape() {
        let committed = CommitOutcome::Committed {
            version: Some(Vid::new(3)),
        };
        assert_eq!(
            serde_json::to_value(&committed).unwrap(),
            json!({"status": "committed", "version": 3})
        );
        let errors = serde_json::to_value(error_at(1)).unwrap();
        assert_eq!(errors["status"], "errors");
        assert_eq!(errors["errors"][0][0], 1);
        assert_eq!(errors["errors"][0][1]["error"], "feature.conflict");
    }
}
