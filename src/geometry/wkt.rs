//! Well-Known Text codec
//!
//! Reads and writes the 2D subset of OGC WKT. `EMPTY`, Z/M ordinates and
//! geometry collections are rejected.

use super::errors::{GeometryError, GeometryResult};
use super::types::{Coord, Geometry, GeometryType, Ring};

impl Geometry {
    /// Parses and validates a WKT string.
    pub fn from_wkt(text: &str) -> GeometryResult<Geometry> {
        let mut parser = Parser::new(text);
        let geometry = parser.geometry()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.error("trailing characters"));
        }
        geometry.validate()?;
        Ok(geometry)
    }

    /// Formats this geometry as WKT, e.g. `POINT (1 2)`.
    pub fn to_wkt(&self) -> String {
        let mut out = String::new();
        out.push_str(self.geometry_type().as_str());
        out.push(' ');
        match self {
            Geometry::Point(c) => {
                out.push('(');
                write_coord(&mut out, c);
                out.push(')');
            }
            Geometry::LineString(line) => write_ring(&mut out, line),
            Geometry::Polygon(rings) => write_rings(&mut out, rings),
            Geometry::MultiPoint(points) => {
                out.push('(');
                for (i, c) in points.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push('(');
                    write_coord(&mut out, c);
                    out.push(')');
                }
                out.push(')');
            }
            Geometry::MultiLineString(lines) => write_rings(&mut out, lines),
            Geometry::MultiPolygon(polygons) => {
                out.push('(');
                for (i, rings) in polygons.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_rings(&mut out, rings);
                }
                out.push(')');
            }
        }
        out
    }
}

fn write_coord(out: &mut String, c: &Coord) {
    out.push_str(&format!("{} {}", c.x, c.y));
}

fn write_ring(out: &mut String, ring: &[Coord]) {
    out.push('(');
    for (i, c) in ring.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_coord(out, c);
    }
    out.push(')');
}

fn write_rings(out: &mut String, rings: &[Ring]) {
    out.push('(');
    for (i, ring) in rings.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_ring(out, ring);
    }
    out.push(')');
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            input: text.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> GeometryError {
        GeometryError::InvalidWkt {
            position: self.pos,
            reason: reason.into(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> GeometryResult<()> {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", byte as char)))
        }
    }

    /// Consumes `byte` if it is next, returning whether it was there.
    fn accept(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn word(&mut self) -> String {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).to_ascii_uppercase()
    }

    fn number(&mut self) -> GeometryResult<f64> {
        self.skip_ws();
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b) if b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E')
        ) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;
        text.parse::<f64>()
            .map_err(|_| self.error(format!("invalid number '{}'", text)))
    }

    fn geometry(&mut self) -> GeometryResult<Geometry> {
        let name = self.word();
        if name.is_empty() {
            return Err(self.error("expected geometry type"));
        }
        let geometry_type: GeometryType = name
            .parse()
            .map_err(|_| self.error(format!("unsupported geometry type '{}'", name)))?;

        let modifier = self.word();
        match modifier.as_str() {
            "" => {}
            "EMPTY" => return Err(self.error("empty geometries are not supported")),
            "Z" | "M" | "ZM" => return Err(self.error("only 2D geometries are supported")),
            other => return Err(self.error(format!("unexpected token '{}'", other))),
        }

        let geometry = match geometry_type {
            GeometryType::Point => {
                self.expect(b'(')?;
                let c = self.coord()?;
                self.expect(b')')?;
                Geometry::Point(c)
            }
            GeometryType::LineString => Geometry::LineString(self.ring()?),
            GeometryType::Polygon => Geometry::Polygon(self.rings()?),
            GeometryType::MultiPoint => Geometry::MultiPoint(self.multi_point()?),
            GeometryType::MultiLineString => Geometry::MultiLineString(self.rings()?),
            GeometryType::MultiPolygon => {
                self.expect(b'(')?;
                let mut polygons = vec![self.rings()?];
                while self.accept(b',') {
                    polygons.push(self.rings()?);
                }
                self.expect(b')')?;
                Geometry::MultiPolygon(polygons)
            }
        };
        Ok(geometry)
    }

    fn coord(&mut self) -> GeometryResult<Coord> {
        let x = self.number()?;
        let y = self.number()?;
        self.skip_ws();
        if matches!(self.peek(), Some(b) if b.is_ascii_digit() || b == b'-') {
            return Err(self.error("only 2D coordinates are supported"));
        }
        Ok(Coord::new(x, y))
    }

    fn ring(&mut self) -> GeometryResult<Ring> {
        self.expect(b'(')?;
        let mut coords = vec![self.coord()?];
        while self.accept(b',') {
            coords.push(self.coord()?);
        }
        self.expect(b')')?;
        Ok(coords)
    }

    fn rings(&mut self) -> GeometryResult<Vec<Ring>> {
        self.expect(b'(')?;
        let mut rings = vec![self.ring()?];
        while self.accept(b',') {
            rings.push(self.ring()?);
        }
        self.expect(b')')?;
        Ok(rings)
    }

    /// Accepts both `MULTIPOINT ((1 2), (3 4))` and `MULTIPOINT (1 2, 3 4)`.
    fn multi_point(&mut self) -> GeometryResult<Vec<Coord>> {
        self.expect(b'(')?;
        let mut points = Vec::new();
        loop {
            if self.accept(b'(') {
                points.push(self.coord()?);
                self.expect(b')')?;
            } else {
                points.push(self.coord()?);
            }
            if !self.accept(b',') {
                break;
            }
        }
        self.expect(b')')?;
        Ok(points)
    }
}
