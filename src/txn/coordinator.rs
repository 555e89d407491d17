//! Transaction coordinator
//!
//! Owns a layer's transaction table. A commit validates every staged slot
//! against the committed state and, only if all pass, applies them in
//! seqnum order inside one version of the layer store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::Value;

use super::errors::{TxnError, TxnResult};
use super::transaction::{CommitOutcome, Transaction, TxnId};
use crate::actions::{Action, ActionError, Produced, Staged};
use crate::store::{LayerState, LayerStore};
use crate::versioning::{Epoch, VersionError};

#[derive(Debug, Default)]
struct TxnTable {
    last_id: u64,
    txns: BTreeMap<TxnId, Transaction>,
}

/// Why a commit did not go through.
enum Abort {
    Errors(Vec<(u64, ActionError)>),
    Fatal(TxnError),
}

impl From<VersionError> for Abort {
    fn from(err: VersionError) -> Self {
        Abort::Fatal(err.into())
    }
}

fn poisoned() -> TxnError {
    TxnError::Storage("transaction table lock poisoned".to_string())
}

/// Number of slots applied by a commit, for metrics.
#[derive(Clone, Debug, PartialEq)]
pub struct CommitReport {
    pub outcome: CommitOutcome,
    /// True when this call did the work, false for a cached outcome
    pub fresh: bool,
    pub applied: usize,
}

#[derive(Debug, Default)]
pub struct TransactionCoordinator {
    table: Mutex<TxnTable>,
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a transaction bound to `epoch`.
    pub fn open(&self, store: &LayerStore, epoch: Option<Epoch>) -> TxnResult<TxnId> {
        let mut table = self.table.lock().map_err(|_| poisoned())?;
        store.read(|s| s.schema().check_epoch(epoch))??;
        table.last_id += 1;
        let id = TxnId::new(table.last_id);
        table.txns.insert(id, Transaction::new(id, epoch));
        Ok(id)
    }

    /// Stages slot writes. Returns true if the slot map changed.
    pub fn put(&self, store: &LayerStore, id: TxnId, items: Vec<(u64, Option<Value>)>) -> TxnResult<bool> {
        let mut table = self.table.lock().map_err(|_| poisoned())?;
        let txn = table.txns.get_mut(&id).ok_or(TxnError::NotFound(id))?;
        if txn.is_committed() {
            return Err(TxnError::Committed(id));
        }
        check_bound_epoch(store, txn)?;
        txn.put(items)
    }

    /// Commits a transaction, or returns its cached outcome.
    pub fn commit(&self, store: &LayerStore, id: TxnId) -> TxnResult<CommitReport> {
        let mut table = self.table.lock().map_err(|_| poisoned())?;
        let txn = table.txns.get_mut(&id).ok_or(TxnError::NotFound(id))?;
        if let Some(outcome) = txn.outcome() {
            if txn.is_committed() {
                return Ok(CommitReport {
                    outcome: outcome.clone(),
                    fresh: false,
                    applied: 0,
                });
            }
        }
        check_bound_epoch(store, txn)?;
        if let Some(outcome) = txn.outcome() {
            return Ok(CommitReport {
                outcome: outcome.clone(),
                fresh: false,
                applied: 0,
            });
        }

        let epoch = txn.epoch();
        let slots: Vec<(u64, Value)> = txn.staged().map(|(seqnum, op)| (seqnum, op.clone())).collect();
        let attempt = store.write_scope(|state, ctx| {
            state.schema().check_epoch(epoch)?;
            let actions = validate_all(state, &slots)?;
            let mut produced = Produced::new();
            for (seqnum, action) in &actions {
                match action.apply(state, ctx, &produced) {
                    Ok(output) => {
                        produced.insert(*seqnum, output);
                    }
                    Err(ActionError::Storage(message)) => {
                        return Err(Abort::Fatal(TxnError::Storage(message)));
                    }
                    Err(err) => return Err(Abort::Errors(vec![(*seqnum, err)])),
                }
            }
            Ok(produced)
        });

        let report = match attempt {
            Ok((produced, version)) => {
                let applied = produced.len();
                let results = produced
                    .into_iter()
                    .map(|(seqnum, output)| (seqnum, output.to_json()))
                    .collect();
                let outcome = CommitOutcome::Committed { version };
                txn.resolve(outcome.clone(), results);
                CommitReport {
                    outcome,
                    fresh: true,
                    applied,
                }
            }
            Err(Abort::Errors(errors)) => {
                let outcome = CommitOutcome::Errors {
                    errors: errors
                        .into_iter()
                        .map(|(seqnum, err)| (seqnum, err.body()))
                        .collect(),
                };
                txn.resolve(outcome.clone(), Vec::new());
                CommitReport {
                    outcome,
                    fresh: true,
                    applied: 0,
                }
            }
            Err(Abort::Fatal(err)) => {
                if matches!(err, TxnError::EpochMismatch { .. }) {
                    txn.mark_stale();
                }
                return Err(err);
            }
        };
        Ok(report)
    }

    /// Per-slot results of a committed transaction.
    pub fn results(&self, id: TxnId) -> TxnResult<Vec<(u64, Value)>> {
        let table = self.table.lock().map_err(|_| poisoned())?;
        let txn = table.txns.get(&id).ok_or(TxnError::NotFound(id))?;
        Ok(txn.results()?.to_vec())
    }

    pub fn dispose(&self, id: TxnId) -> TxnResult<()> {
        let mut table = self.table.lock().map_err(|_| poisoned())?;
        table.txns.remove(&id).map(|_| ()).ok_or(TxnError::NotFound(id))
    }

    /// Number of transactions not yet disposed.
    pub fn len(&self) -> usize {
        self.table.lock().map(|t| t.txns.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fails, and invalidates the transaction for good, if its epoch is stale.
fn check_bound_epoch(store: &LayerStore, txn: &mut Transaction) -> TxnResult<()> {
    let current = store.read(|s| s.schema().epoch())?;
    if txn.is_stale() || current != txn.epoch() {
        txn.mark_stale();
        return Err(TxnError::EpochMismatch {
            expected: current,
            found: txn.epoch(),
        });
    }
    Ok(())
}

/// Parses and validates every slot; collects all failures.
fn validate_all(state: &LayerState, slots: &[(u64, Value)]) -> Result<Vec<(u64, Action)>, Abort> {
    let mut errors = Vec::new();
    let mut actions = Vec::new();
    for (seqnum, payload) in slots {
        match Action::parse(payload) {
            Ok(action) => actions.push((*seqnum, action)),
            Err(err) => errors.push((*seqnum, err)),
        }
    }
    let staged: Staged = actions
        .iter()
        .map(|(seqnum, action)| (*seqnum, action.kind()))
        .collect();
    for (seqnum, action) in &actions {
        match action.validate(*seqnum, state, &staged) {
            Ok(()) => {}
            Err(ActionError::Storage(message)) => return Err(Abort::Fatal(TxnError::Storage(message))),
            Err(err) => errors.push((*seqnum, err)),
        }
    }
    if errors.is_empty() {
        Ok(actions)
    } else {
        errors.sort_by_key(|(seqnum, _)| *seqnum);
        Err(Abort::Errors(errors))
    }
}
