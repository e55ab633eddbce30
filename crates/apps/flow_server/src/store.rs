//! Backing store for the flow service.
//!
//! `FlowTable` is the seam between the HTTP layer and wherever river segments
//! live. `MemoryTable` holds a GeoJSON export in memory and answers bbox
//! queries with a linear scan.

use std::path::Path;

use foundation::{BoundingBox, FeatureId};
use serde::Deserialize;
use streaming::LineGeometry;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Io(String),
    Parse(String),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(msg) => write!(f, "store read failed: {msg}"),
            StoreError::Parse(msg) => write!(f, "store data invalid: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// One river segment row.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub comid: FeatureId,
    pub streamflow_cms: f64,
    pub velocity_ms: f64,
    pub name: Option<String>,
    pub stream_order: u32,
    pub geometry: LineGeometry,
    pub bounds: BoundingBox,
}

impl Segment {
    /// Returns `None` for empty geometry.
    pub fn new(
        comid: FeatureId,
        streamflow_cms: f64,
        geometry: LineGeometry,
    ) -> Option<Self> {
        let bounds = geometry.bounds()?;
        Some(Self {
            comid,
            streamflow_cms,
            velocity_ms: 0.0,
            name: None,
            stream_order: 0,
            geometry,
            bounds,
        })
    }
}

pub trait FlowTable: Send + Sync {
    /// Segments intersecting `bbox` with `streamflow_cms > 0`, highest flow
    /// first, truncated to `limit`.
    fn query(&self, bbox: &BoundingBox, limit: usize) -> Result<Vec<Segment>, StoreError>;

    /// Current flow of every segment, for the live feed document.
    fn flows(&self) -> Result<Vec<(FeatureId, f64)>, StoreError>;

    /// Model run the flows belong to, if known.
    fn reference_time(&self) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct SourceCollection {
    #[serde(default)]
    reference_time: Option<String>,
    features: Vec<SourceFeature>,
}

#[derive(Debug, Deserialize)]
struct SourceFeature {
    properties: SourceProperties,
    #[serde(default)]
    geometry: Option<LineGeometry>,
}

#[derive(Debug, Deserialize)]
struct SourceProperties {
    comid: FeatureId,
    #[serde(default)]
    streamflow_cms: f64,
    #[serde(default)]
    velocity_ms: f64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    stream_order: u32,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryTable {
    segments: Vec<Segment>,
    reference_time: Option<String>,
}

impl MemoryTable {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            reference_time: None,
        }
    }

    pub fn with_reference_time(mut self, reference_time: impl Into<String>) -> Self {
        self.reference_time = Some(reference_time.into());
        self
    }

    /// Parses a GeoJSON `FeatureCollection` of line features.
    ///
    /// Features without usable geometry are skipped.
    pub fn from_geojson_str(text: &str) -> Result<Self, StoreError> {
        let collection: SourceCollection =
            serde_json::from_str(text).map_err(|e| StoreError::Parse(e.to_string()))?;

        let total = collection.features.len();
        let segments: Vec<Segment> = collection
            .features
            .into_iter()
            .filter_map(|f| {
                let p = f.properties;
                let mut segment = Segment::new(p.comid, p.streamflow_cms, f.geometry?)?;
                segment.velocity_ms = p.velocity_ms;
                segment.name = p.name;
                segment.stream_order = p.stream_order;
                Some(segment)
            })
            .collect();

        if segments.len() < total {
            warn!("skipped {} features without geometry", total - segments.len());
        }
        Ok(Self {
            segments,
            reference_time: collection.reference_time,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {e}", path.display())))?;
        let table = Self::from_geojson_str(&text)?;
        info!("loaded {} segments from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl FlowTable for MemoryTable {
    fn query(&self, bbox: &BoundingBox, limit: usize) -> Result<Vec<Segment>, StoreError> {
        let mut rows: Vec<&Segment> = self
            .segments
            .iter()
            .filter(|s| s.streamflow_cms > 0.0 && s.bounds.intersects(bbox))
            .collect();
        rows.sort_by(|a, b| b.streamflow_cms.total_cmp(&a.streamflow_cms));
        rows.truncate(limit);
        Ok(rows.into_iter().cloned().collect())
    }

    fn flows(&self) -> Result<Vec<(FeatureId, f64)>, StoreError> {
        Ok(self
            .segments
            .iter()
            .filter(|s| s.streamflow_cms.is_finite())
            .map(|s| (s.comid, s.streamflow_cms))
            .collect())
    }

    fn reference_time(&self) -> Option<String> {
        self.reference_time.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{FlowTable, MemoryTable, Segment, StoreError};
    use foundation::{BoundingBox, FeatureId};
    use pretty_assertions::assert_eq;
    use streaming::LineGeometry;

    fn line(coords: &[[f64; 2]]) -> LineGeometry {
        LineGeometry::LineString {
            coordinates: coords.to_vec(),
        }
    }

    fn segment(id: u64, flow: f64, coords: &[[f64; 2]]) -> Segment {
        Segment::new(FeatureId(id), flow, line(coords)).unwrap()
    }

    const BBOX: BoundingBox = BoundingBox::new(-73.0, 44.0, -72.0, 45.0);

    #[test]
    fn query_filters_sorts_and_truncates() {
        let table = MemoryTable::new(vec![
            segment(1, 150.0, &[[-72.6, 44.2], [-72.5, 44.3]]),
            segment(2, 0.0, &[[-72.6, 44.2], [-72.5, 44.3]]),
            segment(3, 1200.0, &[[-72.9, 44.9], [-72.8, 44.95]]),
            segment(4, 30.0, &[[-80.0, 40.0], [-79.9, 40.1]]),
            // Crosses the east edge.
            segment(5, 5.0, &[[-72.5, 44.5], [-71.5, 44.5]]),
            segment(6, -1.0, &[[-72.6, 44.2], [-72.5, 44.3]]),
        ]);

        let ids: Vec<u64> = table
            .query(&BBOX, 5000)
            .unwrap()
            .iter()
            .map(|s| s.comid.0)
            .collect();
        assert_eq!(ids, vec![3, 1, 5]);

        let top: Vec<u64> = table
            .query(&BBOX, 2)
            .unwrap()
            .iter()
            .map(|s| s.comid.0)
            .collect();
        assert_eq!(top, vec![3, 1]);
    }

    #[test]
    fn geojson_import_skips_missing_geometry() {
        let text = r#"{
            "type": "FeatureCollection",
            "reference_time": "2024-06-01T12:00:00Z",
            "features": [
                {"type": "Feature",
                 "properties": {"comid": 101, "streamflow_cms": 12.5, "name": "Otter Creek", "stream_order": 4},
                 "geometry": {"type": "LineString", "coordinates": [[-73.1, 44.0], [-73.0, 44.1]]}},
                {"type": "Feature",
                 "properties": {"comid": 102, "streamflow_cms": 3.0},
                 "geometry": null},
                {"type": "Feature",
                 "properties": {"comid": 103},
                 "geometry": {"type": "MultiLineString", "coordinates": [[[-72.0, 45.0], [-71.9, 45.2]]]}}
            ]
        }"#;
        let table = MemoryTable::from_geojson_str(text).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.reference_time().as_deref(), Some("2024-06-01T12:00:00Z"));
        assert_eq!(
            table.flows().unwrap(),
            vec![(FeatureId(101), 12.5), (FeatureId(103), 0.0)]
        );
    }

    #[test]
    fn malformed_geojson_is_a_parse_error() {
        assert!(matches!(
            MemoryTable::from_geojson_str(r#"{"features": 3}"#),
            Err(StoreError::Parse(_))
        ));
    }

    #[test]
    fn empty_geometry_has_no_segment() {
        assert_eq!(Segment::new(FeatureId(1), 1.0, line(&[])), None);
    }
}
