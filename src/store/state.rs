//! Layer state
//!
//! Everything that belongs to one layer and moves in one version sequence:
//! the feature schema, descriptions and attachments.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::extensions::{Aid, AttachmentPatch, AttachmentSource, AttachmentStore, DescriptionStore};
use crate::geometry::GeometryType;
use crate::layer::{FeatureRow, Fid, FieldDef, LayerDefinition};
use crate::versioning::{
    VersionContext, VersionError, VersionResult, VersionSchema, VersioningStatus, Vid, WriteOutcome,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerState {
    schema: VersionSchema,
    descriptions: DescriptionStore,
    attachments: AttachmentStore,
}

impl LayerState {
    pub fn new(definition: LayerDefinition) -> VersionResult<Self> {
        Ok(Self {
            schema: VersionSchema::create(definition)?,
            descriptions: DescriptionStore::new(),
            attachments: AttachmentStore::new(),
        })
    }

    #[inline]
    pub fn schema(&self) -> &VersionSchema {
        &self.schema
    }

    #[inline]
    pub fn definition(&self) -> &LayerDefinition {
        self.schema.definition()
    }

    #[inline]
    pub fn descriptions(&self) -> &DescriptionStore {
        &self.descriptions
    }

    #[inline]
    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    #[inline]
    pub fn status(&self) -> VersioningStatus {
        self.schema.status()
    }

    #[inline]
    pub fn begin_version(&self) -> VersionContext {
        self.schema.begin_version()
    }

    #[inline]
    pub fn finish_version(&mut self, ctx: &VersionContext) -> VersionResult<Option<Vid>> {
        self.schema.finish_version(ctx)
    }

    /// Whether any store differs between `initial` and `target`.
    pub fn has_net_change(&self, initial: Vid, target: Vid) -> bool {
        self.schema.has_net_change(initial, target)
            || self.descriptions.table().has_net_change(initial, target)
            || self.attachments.table().has_net_change(initial, target)
    }

    // ==================
    // Schema
    // ==================

    pub fn enable_versioning(&mut self) -> VersionResult<VersioningStatus> {
        self.schema.enable_versioning()?;
        self.descriptions.table_mut().enable_versioning(Vid::INITIAL);
        self.attachments.table_mut().enable_versioning(Vid::INITIAL);
        Ok(self.status())
    }

    pub fn disable_versioning(&mut self) -> VersionResult<VersioningStatus> {
        self.schema.disable_versioning()?;
        self.descriptions.table_mut().disable_versioning();
        self.attachments.table_mut().disable_versioning();
        self.attachments.collect_garbage();
        Ok(self.status())
    }

    pub fn add_fields(&mut self, fields: Vec<FieldDef>) -> VersionResult<()> {
        self.schema.add_fields(fields)
    }

    pub fn delete_fields(&mut self, keynames: &[String]) -> VersionResult<()> {
        self.schema.delete_fields(keynames)
    }

    pub fn convert_geometry_type(&mut self, target: GeometryType) -> VersionResult<()> {
        self.schema.convert_geometry_type(target)
    }

    /// Drops every feature and extension row.
    pub fn drop_storage(&mut self) {
        let versioned = self.schema.is_versioned();
        self.schema.drop_storage();
        self.descriptions = DescriptionStore::new();
        self.attachments = AttachmentStore::new();
        if versioned {
            self.descriptions.table_mut().enable_versioning(Vid::INITIAL);
            self.attachments.table_mut().enable_versioning(Vid::INITIAL);
        }
    }

    // ==================
    // Features
    // ==================

    fn require_feature(&self, fid: Fid) -> VersionResult<()> {
        if self.schema.get(fid).is_none() {
            return Err(VersionError::NotFound(format!("feature {}", fid)));
        }
        Ok(())
    }

    pub fn create_feature(&mut self, ctx: &mut VersionContext, row: FeatureRow) -> VersionResult<Fid> {
        self.schema.insert(ctx, row)
    }

    pub fn update_feature(
        &mut self,
        ctx: &mut VersionContext,
        fid: Fid,
        row: FeatureRow,
        expected: Option<Vid>,
    ) -> VersionResult<WriteOutcome> {
        self.schema.update(ctx, fid, row, expected)
    }

    /// Deletes a feature together with its description and attachments.
    pub fn delete_feature(&mut self, ctx: &mut VersionContext, fid: Fid, expected: Option<Vid>) -> VersionResult<WriteOutcome> {
        let outcome = self.schema.delete(ctx, fid, expected)?;
        if self.descriptions.exists(fid) {
            self.descriptions.put(ctx, fid, None)?;
        }
        self.attachments.delete_for_fid(ctx, fid)?;
        Ok(outcome)
    }

    pub fn restore_feature(&mut self, ctx: &mut VersionContext, fid: Fid, row: Option<FeatureRow>) -> VersionResult<WriteOutcome> {
        self.schema.restore(ctx, fid, row)
    }

    // ==================
    // Extensions
    // ==================

    pub fn put_description(
        &mut self,
        ctx: &mut VersionContext,
        fid: Fid,
        value: Option<String>,
        expected: Option<Vid>,
    ) -> VersionResult<WriteOutcome> {
        self.require_feature(fid)?;
        self.descriptions.check_expected(fid, expected)?;
        self.descriptions.put(ctx, fid, value)
    }

    pub fn restore_description(&mut self, ctx: &mut VersionContext, fid: Fid) -> VersionResult<WriteOutcome> {
        self.require_feature(fid)?;
        self.descriptions.restore(ctx, fid)
    }

    pub fn create_attachment(
        &mut self,
        ctx: &mut VersionContext,
        fid: Fid,
        source: AttachmentSource,
        keyname: Option<String>,
        description: Option<String>,
    ) -> VersionResult<Aid> {
        self.require_feature(fid)?;
        self.attachments.create(ctx, fid, source, keyname, description)
    }

    pub fn update_attachment(
        &mut self,
        ctx: &mut VersionContext,
        aid: Aid,
        patch: &AttachmentPatch,
        expected: Option<Vid>,
    ) -> VersionResult<WriteOutcome> {
        self.attachments.check_expected(aid, expected)?;
        self.attachments.update(ctx, aid, patch)
    }

    pub fn delete_attachment(&mut self, ctx: &mut VersionContext, aid: Aid, expected: Option<Vid>) -> VersionResult<WriteOutcome> {
        self.attachments.check_expected(aid, expected)?;
        self.attachments.delete(ctx, aid)
    }

    pub fn restore_attachment(&mut self, ctx: &mut VersionContext, aid: Aid) -> VersionResult<WriteOutcome> {
        if let Some(fid) = self.attachments.owner(aid) {
            self.require_feature(fid)?;
        }
        self.attachments.restore(ctx, aid)
    }

    // ==================
    // Revert
    // ==================

    /// Converges features, descriptions and attachments to their state at
    /// `target`. Returns the number of rows written.
    pub fn revert_to(&mut self, ctx: &mut VersionContext, target: Vid) -> VersionResult<usize> {
        let mut changed = self.schema.revert_to(ctx, target)?;
        let vid = ctx.vid().ok_or(VersionError::VersioningDisabled)?;
        let extension_changes =
            self.descriptions.table_mut().revert_to(target, vid)? + self.attachments.table_mut().revert_to(target, vid)?;
        ctx.record_changed(extension_changes);
        changed += extension_changes;
        Ok(changed)
    }

    // ==================
    // Reads
    // ==================

    /// Current feature with its extensions, as JSON.
    pub fn feature_json(&self, fid: Fid) -> Option<Value> {
        let row = self.schema.get(fid)?;
        let definition = self.definition();
        let attachments: Vec<Value> = self
            .attachments
            .for_fid(fid)
            .into_iter()
            .map(|(aid, a)| {
                let mut entry = a.to_json();
                entry.insert("aid".to_string(), json!(aid));
                if let Some(vid) = self.attachments.vid_of(aid) {
                    entry.insert("vid".to_string(), json!(vid));
                }
                Value::Object(entry)
            })
            .collect();
        let mut out = json!({
            "fid": fid,
            "geom": row.geom_json(),
            "fields": row.fields_json(definition),
            "description": self.descriptions.get(fid),
            "attachments": attachments,
        });
        if let Some(vid) = self.schema.vid_of(fid) {
            out["vid"] = json!(vid);
        }
        Some(out)
    }

    /// Features as JSON, current or at `version`.
    pub fn features_json(&self, version: Option<Vid>) -> VersionResult<Vec<Value>> {
        let definition = self.definition();
        Ok(self
            .schema
            .feature_list_at(version)?
            .iter()
            .map(|f| f.to_json(definition))
            .collect())
    }

    /// Verifies every table and the links between them.
    pub fn check_invariants(&self) -> VersionResult<()> {
        self.schema.check_invariants()?;
        let versioned = self.schema.is_versioned();
        if self.descriptions.table().is_versioned() != versioned
            || self.attachments.table().is_versioned() != versioned
        {
            return Err(VersionError::Storage(
                "extension tables disagree on versioning".to_string(),
            ));
        }
        self.descriptions.table().check_invariants()?;
        self.attachments.table().check_invariants()?;

        if let Some((fid, _)) = self
            .descriptions
            .table()
            .rows()
            .find(|(fid, _)| self.schema.get(**fid).is_none())
        {
            return Err(VersionError::Storage(format!("description of missing feature {}", fid)));
        }
        if let Some((aid, _)) = self
            .attachments
            .table()
            .rows()
            .find(|(_, a)| self.schema.get(a.fid).is_none())
        {
            return Err(VersionError::Storage(format!("attachment {} of missing feature", aid)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{FieldType, FieldValue};

    fn state() -> LayerState {
        let definition = LayerDefinition::new(
            GeometryType::Point,
            vec![FieldDef::new("name", FieldType::String)],
        )
        .unwrap();
        let mut state = LayerState::new(definition).unwrap();
        state.enable_versioning().unwrap();
        state
    }

    fn named(name: &str) -> FeatureRow {
        FeatureRow {
            geom: None,
            fields: [("name".to_string(), FieldValue::String(name.to_string()))].into(),
        }
    }

    fn source() -> AttachmentSource {
        AttachmentSource {
            name: "a.txt".to_string(),
            mime_type: None,
            data: b"a".to_vec(),
        }
    }

    #[test]
    fn test_delete_feature_cascades() {
        let mut s = state();
        let mut ctx = s.begin_version();
        let fid = s.create_feature(&mut ctx, named("a")).unwrap();
        s.put_description(&mut ctx, fid, Some("d".to_string()), None).unwrap();
        let aid = s.create_attachment(&mut ctx, fid, source(), None, None).unwrap();
        s.finish_version(&ctx).unwrap();

        let mut ctx = s.begin_version();
        s.delete_feature(&mut ctx, fid, None).unwrap();
        s.finish_version(&ctx).unwrap();
        assert!(s.descriptions().get(fid).is_none());
        assert!(s.attachments().get(aid).is_none());
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_description_needs_live_feature() {
        let mut s = state();
        let mut ctx = s.begin_version();
        let err = s
            .put_description(&mut ctx, Fid::new(9), Some("x".to_string()), None)
            .unwrap_err();
        assert!(matches!(err, VersionError::NotFound(_)));
    }

    #[test]
    fn test_revert_covers_extensions() {
        let mut s = state();
        let mut ctx = s.begin_version();
        let fid = s.create_feature(&mut ctx, named("a")).unwrap();
        s.put_description(&mut ctx, fid, Some("first".to_string()), None).unwrap();
        s.finish_version(&ctx).unwrap();

        let mut ctx = s.begin_version();
        s.put_description(&mut ctx, fid, Some("second".to_string()), Some(Vid::new(2))).unwrap();
        s.create_attachment(&mut ctx, fid, source(), None, None).unwrap();
        s.finish_version(&ctx).unwrap();

        let mut ctx = s.begin_version();
        assert_eq!(s.revert_to(&mut ctx, Vid::new(2)).unwrap(), 2);
        s.finish_version(&ctx).unwrap();
        assert_eq!(s.descriptions().get(fid), Some("first"));
        assert!(s.attachments().for_fid(fid).is_empty());
        assert_eq!(s.status().latest, Some(Vid::new(4)));
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_disable_keeps_current_data() {
        let mut s = state();
        let mut ctx = s.begin_version();
        let fid = s.create_feature(&mut ctx, named("a")).unwrap();
        s.create_attachment(&mut ctx, fid, source(), None, None).unwrap();
        s.finish_version(&ctx).unwrap();

        let status = s.disable_versioning().unwrap();
        assert!(!status.enabled);
        assert_eq!(s.schema().feature_count(), 1);
        assert_eq!(s.attachments().for_fid(fid).len(), 1);
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_feature_json_includes_extensions() {
        let mut s = state();
        let mut ctx = s.begin_version();
        let fid = s.create_feature(&mut ctx, named("a")).unwrap();
        s.put_description(&mut ctx, fid, Some("d".to_string()), None).unwrap();
        s.finish_version(&ctx).unwrap();

        let json = s.feature_json(fid).unwrap();
        assert_eq!(json["description"], "d");
        assert_eq!(json["vid"], 2);
        assert_eq!(json["fields"]["name"], "a");
        assert!(s.feature_json(Fid::new(5)).is_none());
    }
}
