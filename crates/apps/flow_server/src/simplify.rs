use geo::{Coord, LineString, Simplify};
use streaming::{LineGeometry, Position};

/// Douglas–Peucker simplification of every part, `tolerance` in degrees.
///
/// Endpoints are always kept. A non-positive tolerance returns the input.
pub fn simplify(geometry: &LineGeometry, tolerance: f64) -> LineGeometry {
    if tolerance.is_nan() || tolerance <= 0.0 {
        return geometry.clone();
    }
    match geometry {
        LineGeometry::LineString { coordinates } => LineGeometry::LineString {
            coordinates: simplify_part(coordinates, tolerance),
        },
        LineGeometry::MultiLineString { coordinates } => LineGeometry::MultiLineString {
            coordinates: coordinates
                .iter()
                .map(|part| simplify_part(part, tolerance))
                .collect(),
        },
    }
}

fn simplify_part(points: &[Position], tolerance: f64) -> Vec<Position> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let line: LineString<f64> = points.iter().map(|&[x, y]| Coord { x, y }).collect();
    line.simplify(&tolerance)
        .into_inner()
        .into_iter()
        .map(|c| [c.x, c.y])
        .collect()
}
