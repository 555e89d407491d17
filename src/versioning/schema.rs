//! Feature version schema
//!
//! Owns a layer's definition, its feature table and the layer-wide
//! versioning parameters. All feature mutations go through here.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::errors::{VersionError, VersionResult};
use super::table::VersionedTable;
use super::types::{Epoch, VersionContext, VersioningState, VersioningStatus, Vid, WriteOutcome};
use crate::geometry::{GeometryError, GeometryType};
use crate::layer::{FeatureRow, Fid, FieldDef, LayerDefinition, LayerError};

/// A feature as returned by list and point-in-time reads.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureSnapshot<'a> {
    pub fid: Fid,
    /// Version the row dates from, `None` when unversioned
    pub vid: Option<Vid>,
    pub row: &'a FeatureRow,
}

impl FeatureSnapshot<'_> {
    /// Renders `{fid, vid?, geom, fields}` with WKT geometry.
    pub fn to_json(&self, definition: &LayerDefinition) -> Value {
        let mut out = Map::new();
        out.insert("fid".to_string(), json!(self.fid));
        if let Some(vid) = self.vid {
            out.insert("vid".to_string(), json!(vid));
        }
        out.insert("geom".to_string(), self.row.geom_json());
        out.insert("fields".to_string(), Value::Object(self.row.fields_json(definition)));
        Value::Object(out)
    }
}

/// Storage scheme of one vector layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionSchema {
    definition: LayerDefinition,
    pub(super) features: VersionedTable<Fid, FeatureRow>,
    fid_seq: u64,
    versioning: Option<VersioningState>,
    /// Epoch of the previous incarnation, so a re-enable never reuses it
    retired_epoch: Option<Epoch>,
}

impl VersionSchema {
    /// Creates an empty, unversioned schema for `definition`.
    pub fn create(definition: LayerDefinition) -> VersionResult<Self> {
        definition.validate()?;
        Ok(Self {
            definition,
            features: VersionedTable::new(),
            fid_seq: 0,
            versioning: None,
            retired_epoch: None,
        })
    }

    /// Discards every feature with its events and history.
    ///
    /// A versioned layer restarts at version 1 under a new epoch.
    pub fn drop_storage(&mut self) {
        self.features.clear();
        self.fid_seq = 0;
        if let Some(state) = self.versioning.as_mut() {
            *state = VersioningState {
                epoch: Epoch::generate(Some(state.epoch)),
                latest: Vid::INITIAL,
            };
        }
    }

    #[inline]
    pub fn definition(&self) -> &LayerDefinition {
        &self.definition
    }

    // ==================
    // Versioning
    // ==================

    #[inline]
    pub fn is_versioned(&self) -> bool {
        self.versioning.is_some()
    }

    #[inline]
    pub fn epoch(&self) -> Option<Epoch> {
        self.versioning.map(|v| v.epoch)
    }

    #[inline]
    pub fn latest(&self) -> Option<Vid> {
        self.versioning.map(|v| v.latest)
    }

    pub fn status(&self) -> VersioningStatus {
        VersioningStatus {
            enabled: self.versioning.is_some(),
            epoch: self.epoch(),
            latest: self.latest(),
        }
    }

    /// Starts versioning under a fresh epoch at version 1.
    pub fn enable_versioning(&mut self) -> VersionResult<Epoch> {
        if self.versioning.is_some() {
            return Err(VersionError::VersioningEnabled);
        }
        let epoch = Epoch::generate(self.retired_epoch);
        self.features.enable_versioning(Vid::INITIAL);
        self.versioning = Some(VersioningState {
            epoch,
            latest: Vid::INITIAL,
        });
        Ok(epoch)
    }

    /// Stops versioning and drops events and history.
    pub fn disable_versioning(&mut self) -> VersionResult<()> {
        let state = self.versioning.take().ok_or(VersionError::VersioningDisabled)?;
        self.retired_epoch = Some(state.epoch);
        self.features.disable_versioning();
        Ok(())
    }

    /// Checks `epoch` against the current one.
    pub fn check_epoch(&self, epoch: Option<Epoch>) -> VersionResult<()> {
        let current = self.epoch();
        if current != epoch {
            return Err(VersionError::EpochMismatch {
                expected: current,
                found: epoch,
            });
        }
        Ok(())
    }

    /// Opens a write context at `latest + 1`.
    pub fn begin_version(&self) -> VersionContext {
        match self.versioning {
            Some(state) => VersionContext::versioned(state.latest.next()),
            None => VersionContext::unversioned(),
        }
    }

    /// Closes a write context, advancing `latest` if anything changed.
    ///
    /// Returns the version now current, `None` when unversioned.
    pub fn finish_version(&mut self, ctx: &VersionContext) -> VersionResult<Option<Vid>> {
        let Some(state) = self.versioning.as_mut() else {
            return Ok(None);
        };
        if let Some(vid) = ctx.vid() {
            if vid != state.latest.next() {
                return Err(VersionError::Storage(format!(
                    "context version {} does not follow latest {}",
                    vid, state.latest
                )));
            }
            if ctx.changed() > 0 {
                state.latest = vid;
            }
        }
        Ok(Some(state.latest))
    }

    /// Whether the feature table differs between `initial` and `target`.
    pub fn has_net_change(&self, initial: Vid, target: Vid) -> bool {
        self.features.has_net_change(initial, target)
    }

    // ==================
    // Schema evolution
    // ==================

    /// Appends fields; every stored snapshot gets `null` for them.
    pub fn add_fields(&mut self, fields: Vec<FieldDef>) -> VersionResult<()> {
        let mut definition = self.definition.clone();
        definition.fields.extend(fields);
        definition.validate()?;

        let mut features = self.features.clone();
        features.try_map_rows(|row| {
            *row = definition.normalize(std::mem::take(row));
            Ok::<_, VersionError>(())
        })?;
        self.definition = definition;
        self.features = features;
        Ok(())
    }

    /// Removes fields from the definition and from every stored snapshot.
    pub fn delete_fields(&mut self, keynames: &[String]) -> VersionResult<()> {
        for keyname in keynames {
            if self.definition.field(keyname).is_none() {
                return Err(LayerError::UnknownField(keyname.clone()).into());
            }
        }
        let mut definition = self.definition.clone();
        definition.fields.retain(|f| !keynames.contains(&f.keyname));

        let mut features = self.features.clone();
        features.try_map_rows(|row| {
            row.fields.retain(|key, _| !keynames.contains(key));
            Ok::<_, VersionError>(())
        })?;
        self.definition = definition;
        self.features = features;
        Ok(())
    }

    /// Converts the layer and every stored geometry to `target`.
    ///
    /// Nothing changes if any stored geometry cannot be converted.
    pub fn convert_geometry_type(&mut self, target: GeometryType) -> VersionResult<()> {
        if !self.definition.geometry_type.same_family(target) {
            return Err(LayerError::Geometry(GeometryError::Conversion {
                from: self.definition.geometry_type.to_string(),
                to: target.to_string(),
                reason: "different geometry families".to_string(),
            })
            .into());
        }
        let mut features = self.features.clone();
        features.try_map_rows(|row| {
            if let Some(geom) = row.geom.as_mut() {
                *geom = geom.convert(target).map_err(LayerError::from)?;
            }
            Ok::<_, VersionError>(())
        })?;
        self.definition.geometry_type = target;
        self.features = features;
        Ok(())
    }

    // ==================
    // Mutations
    // ==================

    fn conform(&self, row: FeatureRow) -> VersionResult<FeatureRow> {
        if let Some(geom) = &row.geom {
            self.definition.check_geometry(geom)?;
        }
        Ok(self.definition.normalize(row))
    }

    /// Inserts a feature under a freshly allocated fid.
    pub fn insert(&mut self, ctx: &mut VersionContext, row: FeatureRow) -> VersionResult<Fid> {
        let row = self.conform(row)?;
        let fid = Fid::new(self.fid_seq + 1);
        ctx.record(self.features.insert(fid, row, ctx.vid())?);
        self.fid_seq = fid.value();
        Ok(fid)
    }

    /// Replaces a live feature's row.
    ///
    /// Identical rows are suppressed: no history and no version change.
    pub fn update(
        &mut self,
        ctx: &mut VersionContext,
        fid: Fid,
        row: FeatureRow,
        expected: Option<Vid>,
    ) -> VersionResult<WriteOutcome> {
        self.features.check_expected(&fid, expected)?;
        let row = self.conform(row)?;
        Ok(ctx.record(self.features.update(fid, row, ctx.vid())?))
    }

    /// Deletes a live feature.
    pub fn delete(&mut self, ctx: &mut VersionContext, fid: Fid, expected: Option<Vid>) -> VersionResult<WriteOutcome> {
        self.features.check_expected(&fid, expected)?;
        Ok(ctx.record(self.features.delete(fid, ctx.vid())?))
    }

    /// Restores a deleted feature from its last snapshot or from `row`.
    pub fn restore(&mut self, ctx: &mut VersionContext, fid: Fid, row: Option<FeatureRow>) -> VersionResult<WriteOutcome> {
        let row = row.map(|r| self.conform(r)).transpose()?;
        Ok(ctx.record(self.features.restore(fid, row, ctx.vid())?))
    }

    // ==================
    // Reads
    // ==================

    #[inline]
    pub fn get(&self, fid: Fid) -> Option<&FeatureRow> {
        self.features.get(&fid)
    }

    /// Version of a live feature.
    #[inline]
    pub fn vid_of(&self, fid: Fid) -> Option<Vid> {
        self.features.vid_of(&fid)
    }

    #[inline]
    pub fn is_deleted(&self, fid: Fid) -> bool {
        self.features.is_deleted(&fid)
    }

    /// Last row of a deleted feature.
    pub fn last_snapshot(&self, fid: Fid) -> Option<&FeatureRow> {
        self.features.last_snapshot(&fid)
    }

    /// Checks an expected version against a feature without writing.
    pub fn check_expected(&self, fid: Fid, expected: Option<Vid>) -> VersionResult<()> {
        self.features.check_expected(&fid, expected)
    }

    #[inline]
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Current features in fid order.
    pub fn feature_list(&self) -> Vec<FeatureSnapshot<'_>> {
        self.features
            .rows()
            .map(|(fid, row)| FeatureSnapshot {
                fid: *fid,
                vid: self.features.vid_of(fid),
                row,
            })
            .collect()
    }

    /// Verifies event, history and current rows agree.
    pub fn check_invariants(&self) -> VersionResult<()> {
        if self.features.is_versioned() != self.versioning.is_some() {
            return Err(VersionError::Storage(
                "feature table and layer disagree on versioning".to_string(),
            ));
        }
        if let Some((fid, _)) = self.features.rows().last() {
            if fid.value() > self.fid_seq {
                return Err(VersionError::Storage(format!("fid {} beyond sequence", fid)));
            }
        }
        self.features.check_invariants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Coord, Geometry};
    use crate::layer::{FieldType, FieldValue};

    fn schema() -> VersionSchema {
        let definition = LayerDefinition::new(
            GeometryType::Point,
            vec![FieldDef::new("name", FieldType::String)],
        )
        .unwrap();
        VersionSchema::create(definition).unwrap()
    }

    fn row(name: &str, x: f64) -> FeatureRow {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("name".to_string(), FieldValue::String(name.to_string()));
        FeatureRow {
            geom: Some(Geometry::Point(Coord::new(x, 0.0))),
            fields,
        }
    }

    fn commit<T>(schema: &mut VersionSchema, f: impl FnOnce(&mut VersionSchema, &mut VersionContext) -> T) -> T {
        let mut ctx = schema.begin_version();
        let out = f(schema, &mut ctx);
        schema.finish_version(&ctx).unwrap();
        out
    }

    #[test]
    fn test_fids_are_sequential() {
        let mut s = schema();
        let mut ctx = s.begin_version();
        assert_eq!(s.insert(&mut ctx, row("a", 0.0)).unwrap(), Fid::new(1));
        assert_eq!(s.insert(&mut ctx, row("b", 0.0)).unwrap(), Fid::new(2));
        assert_eq!(s.feature_count(), 2);
    }

    #[test]
    fn test_enable_versioning_backfills_at_one() {
        let mut s = schema();
        commit(&mut s, |s, ctx| s.insert(ctx, row("a", 0.0)).unwrap());
        s.enable_versioning().unwrap();
        assert_eq!(s.latest(), Some(Vid::INITIAL));
        assert_eq!(s.vid_of(Fid::new(1)), Some(Vid::INITIAL));
        assert_eq!(s.enable_versioning(), Err(VersionError::VersioningEnabled));
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_reenable_draws_new_epoch() {
        let mut s = schema();
        let first = s.enable_versioning().unwrap();
        s.disable_versioning().unwrap();
        let second = s.enable_versioning().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_version_advances_once_per_context() {
        let mut s = schema();
        s.enable_versioning().unwrap();
        commit(&mut s, |s, ctx| {
            s.insert(ctx, row("a", 0.0)).unwrap();
            s.insert(ctx, row("b", 1.0)).unwrap();
            s.insert(ctx, row("c", 2.0)).unwrap();
        });
        assert_eq!(s.latest(), Some(Vid::new(2)));
    }

    #[test]
    fn test_noop_update_keeps_latest() {
        let mut s = schema();
        s.enable_versioning().unwrap();
        commit(&mut s, |s, ctx| s.insert(ctx, row("a", 0.0)).unwrap());
        let outcome = commit(&mut s, |s, ctx| {
            s.update(ctx, Fid::new(1), row("a", 0.0), Some(Vid::new(2))).unwrap()
        });
        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert_eq!(s.latest(), Some(Vid::new(2)));
    }

    #[test]
    fn test_stale_vid_conflicts() {
        let mut s = schema();
        s.enable_versioning().unwrap();
        commit(&mut s, |s, ctx| s.insert(ctx, row("a", 0.0)).unwrap());
        let mut ctx = s.begin_version();
        let err = s
            .update(&mut ctx, Fid::new(1), row("b", 0.0), Some(Vid::new(1)))
            .unwrap_err();
        assert!(matches!(err, VersionError::Conflict { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_geometry_type_enforced() {
        let mut s = schema();
        let mut ctx = s.begin_version();
        let line = FeatureRow {
            geom: Some(Geometry::LineString(vec![Coord::new(0.0, 0.0), Coord::new(1.0, 1.0)])),
            ..Default::default()
        };
        assert!(matches!(s.insert(&mut ctx, line), Err(VersionError::Layer(_))));
    }

    #[test]
    fn test_add_and_delete_fields_rewrite_history() {
        let mut s = schema();
        s.enable_versioning().unwrap();
        commit(&mut s, |s, ctx| s.insert(ctx, row("a", 0.0)).unwrap());
        commit(&mut s, |s, ctx| s.update(ctx, Fid::new(1), row("b", 0.0), None).unwrap());

        s.add_fields(vec![FieldDef::new("height", FieldType::Real)]).unwrap();
        assert_eq!(s.get(Fid::new(1)).unwrap().fields["height"], FieldValue::Null);
        let old = s.features.history_of(&Fid::new(1))[0].state.as_ref().unwrap();
        assert_eq!(old.fields["height"], FieldValue::Null);

        s.delete_fields(&["name".to_string()]).unwrap();
        assert!(!s.get(Fid::new(1)).unwrap().fields.contains_key("name"));
        assert!(s.delete_fields(&["missing".to_string()]).is_err());
        assert_eq!(s.latest(), Some(Vid::new(3)));
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_convert_geometry_type_is_all_or_nothing() {
        let mut s = schema();
        commit(&mut s, |s, ctx| s.insert(ctx, row("a", 0.0)).unwrap());
        s.convert_geometry_type(GeometryType::MultiPoint).unwrap();
        assert_eq!(
            s.get(Fid::new(1)).unwrap().geom.as_ref().unwrap().geometry_type(),
            GeometryType::MultiPoint
        );

        let two = FeatureRow {
            geom: Some(Geometry::MultiPoint(vec![Coord::new(0.0, 0.0), Coord::new(1.0, 1.0)])),
            ..Default::default()
        };
        commit(&mut s, |s, ctx| s.insert(ctx, two).unwrap());
        assert!(s.convert_geometry_type(GeometryType::Point).is_err());
        assert_eq!(s.definition().geometry_type, GeometryType::MultiPoint);
        assert!(s.convert_geometry_type(GeometryType::LineString).is_err());
    }

    #[test]
    fn test_drop_storage_clears_features() {
        let mut s = schema();
        commit(&mut s, |s, ctx| s.insert(ctx, row("a", 0.0)).unwrap());
        s.drop_storage();
        assert_eq!(s.feature_count(), 0);
        s.check_invariants().unwrap();
    }
}
