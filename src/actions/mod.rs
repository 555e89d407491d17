//! Action registry
//!
//! Typed handlers for every mutation a transaction can stage
//! (`feature.*`, `description.*`, `attachment.*`, `revert`).

mod action;
mod errors;
mod registry;

pub use action::{Action, ActionOutput, Produced, Ref, Staged};
pub use errors::{ActionError, ActionResult, Domain, ErrorBody};
pub use registry::{lookup, ActionKind, ActionSpec, ACTIONS};
