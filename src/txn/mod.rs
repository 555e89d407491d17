//! Transactions
//!
//! Batched, optimistic multi-operation writes: slots are staged with `put`,
//! validated and applied as a unit by `commit`, and read back with
//! `results`.

mod coordinator;
mod errors;
mod transaction;

pub use coordinator::{CommitReport, TransactionCoordinator};
pub use errors::{TxnError, TxnResult};
pub use transaction::{CommitOutcome, Transaction, TxnId};
