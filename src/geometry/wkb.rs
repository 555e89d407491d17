//! Well-Known Binary codec
//!
//! Writes little-endian ISO WKB and reads either byte order. The hex form is
//! what travels in JSON payloads.

use super::errors::{GeometryError, GeometryResult};
use super::types::{Coord, Geometry, GeometryType, Ring};

const BIG_ENDIAN: u8 = 0;
const LITTLE_ENDIAN: u8 = 1;

impl Geometry {
    /// Encodes this geometry as little-endian WKB.
    pub fn to_wkb(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        write_geometry(&mut out, self);
        out
    }

    /// Encodes this geometry as upper-case hex WKB.
    pub fn to_wkb_hex(&self) -> String {
        self.to_wkb().iter().map(|b| format!("{:02X}", b)).collect()
    }

    /// Decodes and validates WKB bytes.
    pub fn from_wkb(bytes: &[u8]) -> GeometryResult<Geometry> {
        let mut reader = Reader {
            bytes,
            pos: 0,
            little: true,
        };
        let geometry = reader.geometry()?;
        if reader.pos != bytes.len() {
            return Err(GeometryError::InvalidWkb(format!(
                "{} trailing bytes",
                bytes.len() - reader.pos
            )));
        }
        geometry.validate()?;
        Ok(geometry)
    }

    /// Decodes hex WKB (either case).
    pub fn from_wkb_hex(hex: &str) -> GeometryResult<Geometry> {
        let hex = hex.trim();
        if hex.len() % 2 != 0 {
            return Err(GeometryError::InvalidWkb("odd hex length".to_string()));
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| {
                hex.get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| GeometryError::InvalidWkb(format!("bad hex at {}", i)))
            })
            .collect::<GeometryResult<Vec<u8>>>()?;
        Geometry::from_wkb(&bytes)
    }
}

fn write_header(out: &mut Vec<u8>, geometry_type: GeometryType) {
    out.push(LITTLE_ENDIAN);
    out.extend_from_slice(&geometry_type.wkb_code().to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: usize) {
    out.extend_from_slice(&(value as u32).to_le_bytes());
}

fn write_coord(out: &mut Vec<u8>, c: &Coord) {
    out.extend_from_slice(&c.x.to_le_bytes());
    out.extend_from_slice(&c.y.to_le_bytes());
}

fn write_ring(out: &mut Vec<u8>, ring: &[Coord]) {
    write_u32(out, ring.len());
    ring.iter().for_each(|c| write_coord(out, c));
}

fn write_rings(out: &mut Vec<u8>, rings: &[Ring]) {
    write_u32(out, rings.len());
    rings.iter().for_each(|r| write_ring(out, r));
}

fn write_geometry(out: &mut Vec<u8>, geometry: &Geometry) {
    write_header(out, geometry.geometry_type());
    match geometry {
        Geometry::Point(c) => write_coord(out, c),
        Geometry::LineString(line) => write_ring(out, line),
        Geometry::Polygon(rings) => write_rings(out, rings),
        Geometry::MultiPoint(points) => {
            write_u32(out, points.len());
            for c in points {
                write_geometry(out, &Geometry::Point(*c));
            }
        }
        Geometry::MultiLineString(lines) => {
            write_u32(out, lines.len());
            for line in lines {
                write_header(out, GeometryType::LineString);
                write_ring(out, line);
            }
        }
        Geometry::MultiPolygon(polygons) => {
            write_u32(out, polygons.len());
            for rings in polygons {
                write_header(out, GeometryType::Polygon);
                write_rings(out, rings);
            }
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    little: bool,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> GeometryResult<[u8; N]> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + N)
            .ok_or_else(|| GeometryError::InvalidWkb(format!("truncated at byte {}", self.pos)))?;
        self.pos += N;
        let mut buf = [0u8; N];
        buf.copy_from_slice(slice);
        Ok(buf)
    }

    fn u32(&mut self) -> GeometryResult<u32> {
        let raw = self.take::<4>()?;
        Ok(if self.little {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn f64(&mut self) -> GeometryResult<f64> {
        let raw = self.take::<8>()?;
        Ok(if self.little {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        })
    }

    /// Reads a count and bounds it by the remaining input so corrupt counts
    /// cannot trigger huge allocations.
    fn count(&mut self, min_item_bytes: usize) -> GeometryResult<usize> {
        let n = self.u32()? as usize;
        let remaining = self.bytes.len().saturating_sub(self.pos);
        if n.saturating_mul(min_item_bytes) > remaining {
            return Err(GeometryError::InvalidWkb(format!(
                "count {} exceeds remaining {} bytes",
                n, remaining
            )));
        }
        Ok(n)
    }

    fn header(&mut self) -> GeometryResult<GeometryType> {
        let [order] = self.take::<1>()?;
        self.little = match order {
            LITTLE_ENDIAN => true,
            BIG_ENDIAN => false,
            other => {
                return Err(GeometryError::InvalidWkb(format!(
                    "invalid byte order marker {}",
                    other
                )))
            }
        };
        let code = self.u32()?;
        GeometryType::from_wkb_code(code)
    }

    fn expect_header(&mut self, expected: GeometryType) -> GeometryResult<()> {
        let found = self.header()?;
        if found != expected {
            return Err(GeometryError::InvalidWkb(format!(
                "expected {} member, found {}",
                expected, found
            )));
        }
        Ok(())
    }

    fn coord(&mut self) -> GeometryResult<Coord> {
        Ok(Coord::new(self.f64()?, self.f64()?))
    }

    fn ring(&mut self) -> GeometryResult<Ring> {
        let n = self.count(16)?;
        (0..n).map(|_| self.coord()).collect()
    }

    fn rings(&mut self) -> GeometryResult<Vec<Ring>> {
        let n = self.count(4)?;
        (0..n).map(|_| self.ring()).collect()
    }

    fn geometry(&mut self) -> GeometryResult<Geometry> {
        let geometry = match self.header()? {
            GeometryType::Point => Geometry::Point(self.coord()?),
            GeometryType::LineString => Geometry::LineString(self.ring()?),
            GeometryType::Polygon => Geometry::Polygon(self.rings()?),
            GeometryType::MultiPoint => {
                let n = self.count(21)?;
                let mut points = Vec::with_capacity(n);
                for _ in 0..n {
                    self.expect_header(GeometryType::Point)?;
                    points.push(self.coord()?);
                }
                Geometry::MultiPoint(points)
            }
            GeometryType::MultiLineString => {
                let n = self.count(9)?;
                let mut lines = Vec::with_capacity(n);
                for _ in 0..n {
                    self.expect_header(GeometryType::LineString)?;
                    lines.push(self.ring()?);
                }
                Geometry::MultiLineString(lines)
            }
            GeometryType::MultiPolygon => {
                let n = self.count(9)?;
                let mut polygons = Vec::with_capacity(n);
                for _ in 0..n {
                    self.expect_header(GeometryType::Polygon)?;
                    polygons.push(self.rings()?);
                }
                Geometry::MultiPolygon(polygons)
            }
        };
        Ok(geometry)
    }
}
