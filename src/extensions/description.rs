//! Feature descriptions
//!
//! One free-text description per feature, versioned in the layer's version
//! sequence. Writing `None` removes the description.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::layer::Fid;
use crate::versioning::{
    ChangeKind, VersionContext, VersionResult, VersionedTable, Vid, WriteOutcome,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptionStore {
    table: VersionedTable<Fid, String>,
}

impl DescriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fid: Fid) -> Option<&str> {
        self.table.get(&fid).map(String::as_str)
    }

    /// Version of the live description of `fid`.
    pub fn vid_of(&self, fid: Fid) -> Option<Vid> {
        self.table.vid_of(&fid)
    }

    #[inline]
    pub fn exists(&self, fid: Fid) -> bool {
        self.table.contains(&fid)
    }

    #[inline]
    pub fn is_deleted(&self, fid: Fid) -> bool {
        self.table.is_deleted(&fid)
    }

    pub fn check_expected(&self, fid: Fid, expected: Option<Vid>) -> VersionResult<()> {
        self.table.check_expected(&fid, expected)
    }

    /// Sets or clears the description of `fid`.
    pub fn put(&mut self, ctx: &mut VersionContext, fid: Fid, value: Option<String>) -> VersionResult<WriteOutcome> {
        Ok(ctx.record(self.table.write(fid, value, ctx.vid())?))
    }

    /// Brings back the last removed description of `fid`.
    pub fn restore(&mut self, ctx: &mut VersionContext, fid: Fid) -> VersionResult<WriteOutcome> {
        Ok(ctx.record(self.table.restore(fid, None, ctx.vid())?))
    }

    pub(crate) fn table(&self) -> &VersionedTable<Fid, String> {
        &self.table
    }

    pub(crate) fn table_mut(&mut self) -> &mut VersionedTable<Fid, String> {
        &mut self.table
    }

    /// Feed entries for `fid` between `initial` and `target`.
    pub fn change_entry(&self, fid: Fid, initial: Vid, target: Vid) -> Option<Value> {
        let change = self.table.net_change(fid, initial, target)?;
        let value = match change.kind {
            ChangeKind::Delete => Value::Null,
            _ => json!(change.after),
        };
        Some(json!({
            "action": "description.put",
            "fid": fid,
            "vid": change.vid,
            "value": value,
        }))
    }
}
