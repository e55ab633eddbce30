//! Wire types for the two consumed services.
//!
//! - Spatial query service: GeoJSON `FeatureCollection` of river segments.
//! - Live feed service: flat `comid → streamflow` document.
//!
//! Also hosts the client-side records and summaries derived from them.

use std::collections::BTreeMap;

use foundation::{BoundingBox, FeatureId};
use runtime::Generation;
use serde::{Deserialize, Serialize};

use crate::category::{FlowCategory, categorize};

/// `[lon, lat]` in WGS84 degrees.
pub type Position = [f64; 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureKind {
    #[default]
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollectionKind {
    #[default]
    FeatureCollection,
}

/// Simplified line geometry of one river segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LineGeometry {
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
}

impl LineGeometry {
    pub fn parts(&self) -> Vec<&[Position]> {
        match self {
            LineGeometry::LineString { coordinates } => vec![coordinates.as_slice()],
            LineGeometry::MultiLineString { coordinates } => {
                coordinates.iter().map(|c| c.as_slice()).collect()
            }
        }
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.parts().into_iter().flatten())
    }

    pub fn vertex_count(&self) -> usize {
        self.parts().iter().map(|p| p.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowProperties {
    pub comid: FeatureId,
    pub streamflow_cms: f64,
    #[serde(default)]
    pub velocity_ms: f64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stream_order: u32,
    pub flow_category: FlowCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowFeature {
    #[serde(rename = "type", default)]
    pub kind: FeatureKind,
    pub properties: FlowProperties,
    pub geometry: Option<LineGeometry>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default)]
    pub kind: CollectionKind,
    pub features: Vec<FlowFeature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<FlowFeature>) -> Self {
        Self {
            kind: CollectionKind::FeatureCollection,
            features,
        }
    }

    pub fn into_records(self) -> Vec<FlowRecord> {
        self.features.into_iter().map(FlowRecord::from).collect()
    }
}

/// Live feed document, polled in overlay mode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LiveFeed {
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub reference_time: Option<String>,
    #[serde(default)]
    pub site_count: usize,
    pub sites: BTreeMap<String, f64>,
}

impl LiveFeed {
    /// Splits the feed into typed updates. Keys that are not feature ids can
    /// never match a surface feature and are returned as a miss count.
    pub fn into_updates(self) -> (Vec<(FeatureId, f64)>, usize) {
        let mut updates = Vec::with_capacity(self.sites.len());
        let mut invalid = 0usize;
        for (key, flow) in self.sites {
            match key.parse::<FeatureId>() {
                Ok(id) => updates.push((id, flow)),
                Err(_) => invalid += 1,
            }
        }
        (updates, invalid)
    }
}

/// Error body returned by the query service on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// One backing-store row as the client keeps it.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    pub feature_id: FeatureId,
    pub streamflow_cms: f64,
    pub velocity_ms: f64,
    pub name: Option<String>,
    pub stream_order: u32,
    pub geometry: Option<LineGeometry>,
}

impl FlowRecord {
    pub fn category(&self) -> FlowCategory {
        categorize(self.streamflow_cms)
    }
}

impl From<FlowFeature> for FlowRecord {
    fn from(f: FlowFeature) -> Self {
        let p = f.properties;
        Self {
            feature_id: p.comid,
            streamflow_cms: p.streamflow_cms,
            velocity_ms: p.velocity_ms,
            name: p.name,
            stream_order: p.stream_order,
            geometry: f.geometry,
        }
    }
}

/// The data set currently handed to the map engine in direct mode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowDataSet {
    pub generation: Generation,
    pub records: Vec<FlowRecord>,
}

/// Summary of the last committed cycle. Observational only.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderStats {
    pub count: usize,
    pub max_flow: f64,
}

impl RenderStats {
    /// `max_flow` is 0 when `flows` is empty.
    pub fn from_flows(flows: impl IntoIterator<Item = f64>) -> Self {
        let mut count = 0usize;
        let mut max_flow: Option<f64> = None;
        for f in flows {
            count += 1;
            max_flow = Some(max_flow.map_or(f, |m| m.max(f)));
        }
        Self {
            count,
            max_flow: max_flow.unwrap_or(0.0),
        }
    }
}
