//! Layer definitions and feature rows

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::{LayerError, LayerResult};
use super::field::{FieldDef, FieldValue};
use crate::geometry::{Geometry, GeometryType};

/// Per-layer feature identity, stable across versions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fid(u64);

impl Fid {
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The stored state of one feature: geometry plus every declared field.
///
/// Rows built through [`LayerDefinition`] always carry one entry per
/// field, with `Null` for unset values, so two rows compare equal exactly
/// when every field and the geometry match.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureRow {
    pub geom: Option<Geometry>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl FeatureRow {
    /// Field values as a JSON object with one entry per declared field.
    pub fn fields_json(&self, definition: &LayerDefinition) -> Map<String, Value> {
        definition
            .fields
            .iter()
            .map(|f| {
                let value = self
                    .fields
                    .get(&f.keyname)
                    .map(FieldValue::to_json)
                    .unwrap_or(Value::Null);
                (f.keyname.clone(), value)
            })
            .collect()
    }

    /// Geometry as WKT, or `null`.
    pub fn geom_json(&self) -> Value {
        self.geom
            .as_ref()
            .map(|g| Value::String(g.to_wkt()))
            .unwrap_or(Value::Null)
    }
}

/// How a write treats the geometry of the row it modifies.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum GeomPatch {
    /// Leave the geometry as it is
    #[default]
    Keep,
    /// Remove the geometry
    Clear,
    /// Replace the geometry
    Set(Geometry),
}

/// A partial modification of a feature row.
///
/// Field values are raw JSON; they are coerced against the definition when
/// the patch is checked or applied.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct FeaturePatch {
    pub geom: GeomPatch,
    pub fields: Map<String, Value>,
}

impl FeaturePatch {
    /// Returns true if the patch leaves every part of the row untouched.
    pub fn is_empty(&self) -> bool {
        self.geom == GeomPatch::Keep && self.fields.is_empty()
    }
}

/// Geometry type and ordered field list of a vector layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDefinition {
    pub geometry_type: GeometryType,
    pub fields: Vec<FieldDef>,
}

impl LayerDefinition {
    /// Creates and validates a definition.
    pub fn new(geometry_type: GeometryType, fields: Vec<FieldDef>) -> LayerResult<Self> {
        let definition = Self {
            geometry_type,
            fields,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Checks keynames are valid and unique.
    pub fn validate(&self) -> LayerResult<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            field.validate()?;
            if !seen.insert(field.keyname.as_str()) {
                return Err(LayerError::DuplicateField(field.keyname.clone()));
            }
        }
        Ok(())
    }

    /// Looks up a field by keyname.
    pub fn field(&self, keyname: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.keyname == keyname)
    }

    /// Checks a geometry matches the layer geometry type.
    pub fn check_geometry(&self, geom: &Geometry) -> LayerResult<()> {
        let found = geom.geometry_type();
        if found != self.geometry_type {
            return Err(LayerError::GeometryTypeMismatch {
                expected: self.geometry_type.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    /// Coerces a JSON object of field values; unknown keys are rejected.
    pub fn coerce_fields(&self, values: &Map<String, Value>) -> LayerResult<BTreeMap<String, FieldValue>> {
        values
            .iter()
            .map(|(key, value)| {
                let field = self
                    .field(key)
                    .ok_or_else(|| LayerError::UnknownField(key.clone()))?;
                Ok((key.clone(), field.coerce(value)?))
            })
            .collect()
    }

    /// Builds a full row with `Null` for every field not present in `values`.
    pub fn build_row(&self, geom: Option<Geometry>, values: &Map<String, Value>) -> LayerResult<FeatureRow> {
        let base = FeatureRow {
            geom: None,
            fields: self.empty_fields(),
        };
        let patch = FeaturePatch {
            geom: geom.map(GeomPatch::Set).unwrap_or(GeomPatch::Keep),
            fields: values.clone(),
        };
        self.apply_patch(&base, &patch)
    }

    /// Applies a patch on top of `base`, returning the new row.
    pub fn apply_patch(&self, base: &FeatureRow, patch: &FeaturePatch) -> LayerResult<FeatureRow> {
        let mut row = self.normalize(base.clone());
        match &patch.geom {
            GeomPatch::Keep => {}
            GeomPatch::Clear => row.geom = None,
            GeomPatch::Set(geom) => {
                self.check_geometry(geom)?;
                row.geom = Some(geom.clone());
            }
        }
        row.fields.extend(self.coerce_fields(&patch.fields)?);
        Ok(row)
    }

    /// Drops unknown fields and adds `Null` for missing ones.
    pub fn normalize(&self, mut row: FeatureRow) -> FeatureRow {
        row.fields.retain(|key, _| self.field(key).is_some());
        for field in &self.fields {
            row.fields
                .entry(field.keyname.clone())
                .or_insert(FieldValue::Null);
        }
        row
    }

    fn empty_fields(&self) -> BTreeMap<String, FieldValue> {
        self.fields
            .iter()
            .map(|f| (f.keyname.clone(), FieldValue::Null))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Coord;
    use crate::layer::FieldType;
    use serde_json::json;

    fn definition() -> LayerDefinition {
        LayerDefinition::new(
            GeometryType::Point,
            vec![
                FieldDef::new("name", FieldType::String),
                FieldDef::new("height", FieldType::Real),
            ],
        )
        .unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let result = LayerDefinition::new(
            GeometryType::Point,
            vec![
                FieldDef::new("a", FieldType::String),
                FieldDef::new("a", FieldType::Integer),
            ],
        );
        assert_eq!(result, Err(LayerError::DuplicateField("a".to_string())));
    }

    #[test]
    fn test_build_row_fills_nulls() {
        let row = definition()
            .build_row(None, &object(json!({"name": "oak"})))
            .unwrap();
        assert_eq!(row.fields.len(), 2);
        assert_eq!(row.fields["height"], FieldValue::Null);
        assert_eq!(row.fields["name"], FieldValue::String("oak".to_string()));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = definition()
            .build_row(None, &object(json!({"colour": "red"})))
            .unwrap_err();
        assert_eq!(err, LayerError::UnknownField("colour".to_string()));
    }

    #[test]
    fn test_geometry_type_checked() {
        let line = Geometry::LineString(vec![Coord::new(0.0, 0.0), Coord::new(1.0, 1.0)]);
        let err = definition().build_row(Some(line), &Map::new()).unwrap_err();
        assert!(matches!(err, LayerError::GeometryTypeMismatch { .. }));
    }

    #[test]
    fn test_patch_keeps_untouched_parts() {
        let def = definition();
        let point = Geometry::Point(Coord::new(1.0, 1.0));
        let base = def
            .build_row(Some(point.clone()), &object(json!({"name": "oak", "height": 3.0})))
            .unwrap();

        let patch = FeaturePatch {
            geom: GeomPatch::Keep,
            fields: object(json!({"height": 4.5})),
        };
        let row = def.apply_patch(&base, &patch).unwrap();
        assert_eq!(row.geom, Some(point));
        assert_eq!(row.fields["name"], FieldValue::String("oak".to_string()));
        assert_eq!(row.fields["height"], FieldValue::Real(4.5));

        let cleared = def
            .apply_patch(&row, &FeaturePatch { geom: GeomPatch::Clear, ..Default::default() })
            .unwrap();
        assert!(cleared.geom.is_none());
    }

    #[test]
    fn test_fields_json_covers_every_field() {
        let def = definition();
        let row = def.build_row(None, &object(json!({"height": 2}))).unwrap();
        let keys: Vec<_> = row.fields_json(&def).keys().cloned().collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"name".to_string()));
    }
}
