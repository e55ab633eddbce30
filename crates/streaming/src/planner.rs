use foundation::BoundingBox;
use serde::{Deserialize, Serialize};

use crate::viewport::Viewport;

/// Spatial query derived from one settled viewport. Disposable.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub bbox: BoundingBox,
    pub limit: u32,
}

impl QuerySpec {
    /// Query-string pairs in the order the query service documents them.
    pub fn query_pairs(&self) -> [(&'static str, String); 5] {
        [
            ("west", self.bbox.west.to_string()),
            ("south", self.bbox.south.to_string()),
            ("east", self.bbox.east.to_string()),
            ("north", self.bbox.north.to_string()),
            ("limit", self.limit.to_string()),
        ]
    }
}

/// One step of the zoom → result-cap table: applies from `min_zoom` upward.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitBreakpoint {
    pub min_zoom: f64,
    pub limit: u32,
}

impl LimitBreakpoint {
    pub const fn new(min_zoom: f64, limit: u32) -> Self {
        Self { min_zoom, limit }
    }
}

pub const DEFAULT_LIMIT_BREAKPOINTS: [LimitBreakpoint; 4] = [
    LimitBreakpoint::new(0.0, 1000),
    LimitBreakpoint::new(6.0, 2000),
    LimitBreakpoint::new(8.0, 5000),
    LimitBreakpoint::new(10.0, 8000),
];

/// Derives query parameters from a viewport.
///
/// Wide views get a small cap to bound payload size; narrow views can afford a
/// larger one. The breakpoint table must be sorted by `min_zoom`; zooms below
/// the first breakpoint (and NaN) use the coarsest limit.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlanner {
    breakpoints: Vec<LimitBreakpoint>,
}

impl QueryPlanner {
    pub fn new(breakpoints: Vec<LimitBreakpoint>) -> Self {
        Self { breakpoints }
    }

    pub fn limit_for_zoom(&self, zoom: f64) -> u32 {
        let coarsest = self.breakpoints.first().map(|b| b.limit).unwrap_or(0);
        self.breakpoints
            .iter()
            .rev()
            .find(|b| zoom >= b.min_zoom)
            .map(|b| b.limit)
            .unwrap_or(coarsest)
    }

    pub fn plan(&self, viewport: &Viewport) -> QuerySpec {
        QuerySpec {
            bbox: viewport.bbox(),
            limit: self.limit_for_zoom(viewport.zoom),
        }
    }
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT_BREAKPOINTS.to_vec())
    }
}

/// Plans with the default breakpoint table.
pub fn plan(viewport: &Viewport) -> QuerySpec {
    QueryPlanner::default().plan(viewport)
}
