//! Layer change feed
//!
//! Merges feature, description and attachment changes into one feed paged
//! by owning fid, so a page holds every change of its fids.

use std::collections::BTreeSet;

use serde_json::Value;

use super::state::LayerState;
use crate::layer::Fid;
use crate::versioning::{VersionResult, Vid};

/// One page of feed entries.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangePage {
    pub entries: Vec<Value>,
    /// Cursor of the following page, `None` on the last page
    pub next: Option<Fid>,
}

impl LayerState {
    /// Changes between `initial` and `target` (default: latest) for fids
    /// after `cursor`, at most `limit` fids per page.
    pub fn changes(&self, initial: Vid, target: Option<Vid>, cursor: Option<Fid>, limit: usize) -> VersionResult<ChangePage> {
        let schema = self.schema();
        let (initial, target) = schema.check_window(initial, target)?;
        let limit = limit.max(1);

        let features = schema.query_changed_fids(initial, target, cursor, limit + 1)?;
        let descriptions = self
            .descriptions()
            .table()
            .changed_keys(initial, target, cursor, limit + 1);
        let attachments = self.attachments().changed_by_fid(initial, target);

        let mut fids: BTreeSet<Fid> = features.fids.into_iter().collect();
        fids.extend(descriptions);
        fids.extend(
            attachments
                .keys()
                .filter(|fid| cursor.map_or(true, |c| **fid > c))
                .copied(),
        );
        let mut page: Vec<Fid> = fids.into_iter().take(limit + 1).collect();
        let next = if page.len() > limit {
            page.truncate(limit);
            page.last().copied()
        } else {
            None
        };

        let (Some(first), Some(last)) = (page.first().copied(), page.last().copied()) else {
            return Ok(ChangePage {
                entries: Vec::new(),
                next: None,
            });
        };
        let definition = schema.definition();
        let mut feature_changes = schema
            .query_changes(initial, target, first..=last)?
            .into_iter()
            .peekable();

        let mut entries = Vec::new();
        for fid in page {
            while let Some(change) = feature_changes.next_if(|c| c.fid <= fid) {
                entries.push(change.to_json(definition));
            }
            if let Some(entry) = self.descriptions().change_entry(fid, initial, target) {
                entries.push(entry);
            }
            for aid in attachments.get(&fid).into_iter().flatten() {
                if let Some(entry) = self.attachments().change_entry(*aid, initial, target) {
                    entries.push(entry);
                }
            }
        }
        Ok(ChangePage { entries, next })
    }
}
