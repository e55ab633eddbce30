use serde::{Deserialize, Serialize};

/// Geographic bounding box in WGS84 degrees.
///
/// Longitudes run west→east, latitudes south→north. A box whose `west` is
/// greater than its `east` is treated as empty; antimeridian-crossing views are
/// not produced by the map engines this crate talks to.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Smallest box covering every `[lon, lat]` in `points`.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f64; 2]>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut b = Self::new(first[0], first[1], first[0], first[1]);
        for p in iter {
            b.extend(*p);
        }
        Some(b)
    }

    pub fn extend(&mut self, p: [f64; 2]) {
        self.west = self.west.min(p[0]);
        self.east = self.east.max(p[0]);
        self.south = self.south.min(p[1]);
        self.north = self.north.max(p[1]);
    }

    /// All four edges are finite and the box is not inverted.
    pub fn is_valid(&self) -> bool {
        [self.west, self.south, self.east, self.north]
            .iter()
            .all(|v| v.is_finite())
            && self.west <= self.east
            && self.south <= self.north
    }

    /// Closed-interval overlap test; boxes that share only an edge intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.west <= other.east
            && other.west <= self.east
            && self.south <= other.north
            && other.south <= self.north
    }
}
