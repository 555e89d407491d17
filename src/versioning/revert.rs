//! Revert to an earlier version
//!
//! Reverting issues ordinary writes in the caller's version context, so it
//! leaves regular history behind and advances the version like any commit.

use super::errors::{VersionError, VersionResult};
use super::schema::VersionSchema;
use super::types::{VersionContext, Vid};

impl VersionSchema {
    /// Converges every feature to its state at `target`.
    ///
    /// Returns the number of features written.
    pub fn revert_to(&mut self, ctx: &mut VersionContext, target: Vid) -> VersionResult<usize> {
        self.check_version(target)?;
        let vid = ctx.vid().ok_or(VersionError::VersioningDisabled)?;
        let changed = self.features.revert_to(target, vid)?;
        ctx.record_changed(changed);
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryType;
    use crate::layer::{FeatureRow, Fid, FieldDef, FieldType, FieldValue, LayerDefinition};

    fn named(name: &str) -> FeatureRow {
        FeatureRow {
            geom: None,
            fields: [("name".to_string(), FieldValue::String(name.to_string()))].into(),
        }
    }

    fn rows_at(s: &VersionSchema, at: Option<Vid>) -> Vec<(Fid, FeatureRow)> {
        s.feature_list_at(at)
            .unwrap()
            .into_iter()
            .map(|f| (f.fid, f.row.clone()))
            .collect()
    }

    fn revert(s: &mut VersionSchema, target: u64) -> usize {
        let mut ctx = s.begin_version();
        let changed = s.revert_to(&mut ctx, Vid::new(target)).unwrap();
        s.finish_version(&ctx).unwrap();
        changed
    }

    #[test]
    fn test_revert_converges_and_advances_once() {
        let definition = LayerDefinition::new(
            GeometryType::Point,
            vec![FieldDef::new("name", FieldType::String)],
        )
        .unwrap();
        let mut s = VersionSchema::create(definition).unwrap();
        s.enable_versioning().unwrap();

        let mut ctx = s.begin_version();
        s.insert(&mut ctx, named("a")).unwrap();
        s.insert(&mut ctx, named("b")).unwrap();
        s.finish_version(&ctx).unwrap();

        let mut ctx = s.begin_version();
        s.update(&mut ctx, Fid::new(1), named("a2"), None).unwrap();
        s.delete(&mut ctx, Fid::new(2), None).unwrap();
        s.insert(&mut ctx, named("c")).unwrap();
        s.finish_version(&ctx).unwrap();
        assert_eq!(s.latest(), Some(Vid::new(3)));

        let snapshot = rows_at(&s, Some(Vid::new(2)));
        assert_eq!(revert(&mut s, 2), 3);
        assert_eq!(s.latest(), Some(Vid::new(4)));
        assert_eq!(rows_at(&s, None), snapshot);

        // Same target again: data unchanged, no new version.
        assert_eq!(revert(&mut s, 2), 0);
        assert_eq!(s.latest(), Some(Vid::new(4)));
        assert_eq!(rows_at(&s, None), snapshot);

        // Back to the state at 3, then to the empty layer at 1.
        let later = rows_at(&s, Some(Vid::new(3)));
        revert(&mut s, 3);
        assert_eq!(rows_at(&s, None), later);
        revert(&mut s, 1);
        assert!(rows_at(&s, None).is_empty());
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_revert_requires_versioning() {
        let definition = LayerDefinition::new(GeometryType::Point, vec![]).unwrap();
        let mut s = VersionSchema::create(definition).unwrap();
        let mut ctx = s.begin_version();
        assert_eq!(
            s.revert_to(&mut ctx, Vid::INITIAL),
            Err(VersionError::VersioningDisabled)
        );
    }
}
