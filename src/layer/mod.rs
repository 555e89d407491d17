//! Layer definitions
//!
//! The static shape of a vector layer: geometry type, typed fields, and the
//! feature rows that conform to them. Nothing here knows about versions.

mod errors;
mod feature;
mod field;

pub use errors::{LayerError, LayerResult};
pub use feature::{FeaturePatch, FeatureRow, Fid, GeomPatch, LayerDefinition};
pub use field::{FieldDef, FieldType, FieldValue};
