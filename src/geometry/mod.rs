//! Geometry subsystem
//!
//! 2D simple-feature geometries as stored in layer snapshots, with WKT and
//! hex-WKB codecs for the wire and single/multi conversion for geometry type
//! changes.

mod errors;
mod types;
mod wkb;
mod wkt;

pub use errors::{GeometryError, GeometryResult};
pub use types::{Coord, Geometry, GeometryType, Ring};
