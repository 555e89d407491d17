//! Feature change feed
//!
//! Classifies features whose state differs between two versions. Only the
//! endpoints of the window matter: a feature changed and changed back inside
//! the window is not reported, which keeps feeds over adjacent windows
//! composable.

use std::collections::BTreeMap;
use std::ops::RangeBounds;

use serde_json::{json, Map, Value};

use super::errors::{VersionError, VersionResult};
use super::schema::VersionSchema;
use super::table::{ChangeKind, RawChange};
use super::types::Vid;
use crate::geometry::Geometry;
use crate::layer::{FeatureRow, Fid, FieldValue, LayerDefinition};

/// Net change of one feature over a version window.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureChange {
    pub fid: Fid,
    pub vid: Vid,
    pub kind: ChangeKind,
    /// Geometry at the target, present only when it is part of the change
    pub geom: Option<Option<Geometry>>,
    /// Field values at the target that are part of the change
    pub fields: BTreeMap<String, FieldValue>,
}

impl FeatureChange {
    fn from_raw(raw: RawChange<'_, Fid, FeatureRow>) -> Self {
        let (geom, fields) = match (raw.kind, raw.before, raw.after) {
            (ChangeKind::Update, Some(before), Some(after)) => {
                let geom = (before.geom != after.geom).then(|| after.geom.clone());
                let fields = after
                    .fields
                    .iter()
                    .filter(|(key, value)| before.fields.get(*key) != Some(*value))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                (geom, fields)
            }
            (_, _, Some(after)) => (Some(after.geom.clone()), after.fields.clone()),
            _ => (None, BTreeMap::new()),
        };
        Self {
            fid: raw.key,
            vid: raw.vid,
            kind: raw.kind,
            geom,
            fields,
        }
    }

    /// Action name of the change, e.g. `feature.update`.
    pub fn action(&self) -> &'static str {
        match self.kind {
            ChangeKind::Create => "feature.create",
            ChangeKind::Update => "feature.update",
            ChangeKind::Delete => "feature.delete",
            ChangeKind::Restore => "feature.restore",
        }
    }

    /// Renders the change as a feed entry.
    pub fn to_json(&self, definition: &LayerDefinition) -> Value {
        let mut out = Map::new();
        out.insert("action".to_string(), json!(self.action()));
        out.insert("fid".to_string(), json!(self.fid));
        out.insert("vid".to_string(), json!(self.vid));
        if let Some(geom) = &self.geom {
            let wkt = geom.as_ref().map(|g| Value::String(g.to_wkt()));
            out.insert("geom".to_string(), wkt.unwrap_or(Value::Null));
        }
        if self.kind != ChangeKind::Delete {
            let fields: Map<String, Value> = definition
                .fields
                .iter()
                .filter_map(|f| {
                    self.fields
                        .get(&f.keyname)
                        .map(|v| (f.keyname.clone(), v.to_json()))
                })
                .collect();
            out.insert("fields".to_string(), Value::Object(fields));
        }
        Value::Object(out)
    }
}

/// One page of changed fids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FidPage {
    pub fids: Vec<Fid>,
    /// Cursor for the following page, `None` on the last page
    pub next: Option<Fid>,
}

impl VersionSchema {
    /// Validates a change window and resolves a missing target to latest.
    pub fn check_window(&self, initial: Vid, target: Option<Vid>) -> VersionResult<(Vid, Vid)> {
        let latest = self.latest().ok_or(VersionError::VersioningDisabled)?;
        let target = target.unwrap_or(latest);
        self.check_version(target)?;
        if initial > target {
            return Err(VersionError::InvalidRange(format!(
                "initial {} is after target {}",
                initial, target
            )));
        }
        Ok((initial, target))
    }

    /// Fids written in `(initial, target]`, ascending, after `cursor`.
    pub fn query_changed_fids(&self, initial: Vid, target: Vid, cursor: Option<Fid>, limit: usize) -> VersionResult<FidPage> {
        self.check_window(initial, Some(target))?;
        let mut fids = self.features.changed_keys(initial, target, cursor, limit + 1);
        let next = if fids.len() > limit {
            fids.truncate(limit);
            fids.last().copied()
        } else {
            None
        };
        Ok(FidPage { fids, next })
    }

    /// Net changes between `initial` and `target` for fids in `fids`.
    pub fn query_changes(&self, initial: Vid, target: Vid, fids: impl RangeBounds<Fid>) -> VersionResult<Vec<FeatureChange>> {
        self.check_window(initial, Some(target))?;
        Ok(self
            .features
            .changed_keys_in(initial, target, fids)
            .into_iter()
            .filter_map(|fid| self.features.net_change(fid, initial, target))
            .map(FeatureChange::from_raw)
            .collect())
    }
}
