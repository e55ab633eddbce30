//! Reference spatial query and live feed service.
//!
//! - `GET /flow?west&south&east&north&limit` → GeoJSON `FeatureCollection`
//! - `GET /live` → `{generated_at, reference_time, site_count, sites}`
//! - `GET /healthz`

pub mod simplify;
pub mod store;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use foundation::BoundingBox;
use serde_json::{json, Value};
use streaming::{
    categorize, FeatureCollection, FeatureKind, FlowFeature, FlowProperties, LiveFeed,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::simplify::simplify;
use crate::store::{FlowTable, Segment};

pub const DEFAULT_LIMIT: u32 = 5000;
pub const MAX_LIMIT: u32 = 10_000;

#[derive(Clone)]
pub struct AppState {
    pub table: Arc<dyn FlowTable>,
    /// Static live-feed document; generated from `table` when unset.
    pub live_path: Option<PathBuf>,
    pub simplify_tolerance: f64,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/flow", get(get_flow))
        .route("/live", get(get_live))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

/// Validated `/flow` parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowQuery {
    pub bbox: BoundingBox,
    pub limit: u32,
}

impl FlowQuery {
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let west = coordinate(params, "west", 180.0)?;
        let south = coordinate(params, "south", 90.0)?;
        let east = coordinate(params, "east", 180.0)?;
        let north = coordinate(params, "north", 90.0)?;
        if west > east || south > north {
            return Err(format!(
                "bbox is inverted: [{west}, {south}, {east}, {north}]"
            ));
        }

        let limit = match params.get("limit") {
            None => DEFAULT_LIMIT,
            Some(raw) => {
                let n: i64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid limit: {raw:?}"))?;
                n.clamp(1, MAX_LIMIT as i64) as u32
            }
        };

        Ok(Self {
            bbox: BoundingBox::new(west, south, east, north),
            limit,
        })
    }
}

/// Parses one bbox edge, clamped to `±max_abs`. Map engines report wrapped
/// longitudes beyond ±180 at low zoom.
fn coordinate(params: &HashMap<String, String>, key: &str, max_abs: f64) -> Result<f64, String> {
    let raw = params
        .get(key)
        .ok_or_else(|| format!("missing parameter: {key}"))?;
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("invalid {key}: {raw:?}"))?;
    if !value.is_finite() {
        return Err(format!("{key} is not finite: {value}"));
    }
    Ok(value.clamp(-max_abs, max_abs))
}

pub fn to_feature(segment: Segment, tolerance: f64) -> FlowFeature {
    FlowFeature {
        kind: FeatureKind::Feature,
        geometry: Some(simplify(&segment.geometry, tolerance)),
        properties: FlowProperties {
            comid: segment.comid,
            streamflow_cms: segment.streamflow_cms,
            velocity_ms: segment.velocity_ms,
            name: segment.name,
            stream_order: segment.stream_order,
            flow_category: categorize(segment.streamflow_cms),
        },
    }
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

async fn get_flow(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = match FlowQuery::from_params(&params) {
        Ok(q) => q,
        Err(msg) => return api_error(StatusCode::BAD_REQUEST, msg).into_response(),
    };

    match state.table.query(&query.bbox, query.limit as usize) {
        Ok(rows) => {
            let features = rows
                .into_iter()
                .map(|s| to_feature(s, state.simplify_tolerance))
                .collect();
            Json(FeatureCollection::new(features)).into_response()
        }
        Err(err) => {
            error!("flow query failed: {err}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn get_live(State(state): State<AppState>) -> Response {
    let feed = match &state.live_path {
        Some(path) => read_live_file(path).await,
        None => live_from_table(state.table.as_ref()),
    };
    match feed {
        Ok(feed) => {
            let mut resp = Json(feed).into_response();
            resp.headers_mut().insert(
                http::header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache"),
            );
            resp
        }
        Err(msg) => {
            error!("live feed unavailable: {msg}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
        }
    }
}

async fn read_live_file(path: &Path) -> Result<LiveFeed, String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("{}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))
}

fn live_from_table(table: &dyn FlowTable) -> Result<LiveFeed, String> {
    let sites: BTreeMap<String, f64> = table
        .flows()
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|(id, flow)| (id.to_string(), flow))
        .collect();
    Ok(LiveFeed {
        generated_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        reference_time: table.reference_time(),
        site_count: sites.len(),
        sites,
    })
}
