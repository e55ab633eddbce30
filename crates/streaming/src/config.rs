use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::applier::DEFAULT_SLICE_SIZE;
use crate::planner::{DEFAULT_LIMIT_BREAKPOINTS, LimitBreakpoint, QueryPlanner};
use crate::viewport::Viewport;

/// How query results reach the render surface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Every cycle replaces the whole feature set with a bbox query result.
    #[default]
    Direct,
    /// Geometry lives in a pre-loaded tileset; cycles push flow per feature.
    Overlay,
}

impl std::str::FromStr for SyncMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(SyncMode::Direct),
            "overlay" => Ok(SyncMode::Overlay),
            other => Err(ConfigError::Invalid(format!("unknown sync mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "config read failed: {msg}"),
            ConfigError::Parse(msg) => write!(f, "config parse failed: {msg}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Externally supplied constants for the synchronization engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub mode: SyncMode,

    /// Spatial query endpoint (`GET ?west&south&east&north&limit`).
    pub query_url: String,
    /// Live feed document (overlay mode).
    pub live_feed_url: String,

    /// Map access token, passed through to the rendering engine.
    pub access_token: Option<String>,
    pub tileset_id: String,
    /// Render-surface source holding the river geometry.
    pub source_id: String,
    pub source_layer: String,

    pub refresh_interval_ms: u64,
    pub debounce_ms: u64,
    /// Updates applied per cooperative turn.
    pub slice_size: usize,

    /// Zoom → result cap, sorted by `min_zoom`.
    pub limit_breakpoints: Vec<LimitBreakpoint>,
    pub initial_viewport: Viewport,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Direct,
            query_url: "http://127.0.0.1:9200/flow".to_string(),
            live_feed_url: "http://127.0.0.1:9200/live".to_string(),
            access_token: None,
            tileset_id: "nwm.conus-reaches".to_string(),
            source_id: "rivers".to_string(),
            source_layer: "reaches".to_string(),
            refresh_interval_ms: 15 * 60 * 1000,
            debounce_ms: 300,
            slice_size: DEFAULT_SLICE_SIZE,
            limit_breakpoints: DEFAULT_LIMIT_BREAKPOINTS.to_vec(),
            initial_viewport: Viewport::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: SyncConfig =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Applies `FLOW_*` / `MAPBOX_TOKEN` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(mode) = env::var("FLOW_MODE") {
            self.mode = mode.parse()?;
        }
        if let Ok(url) = env::var("FLOW_QUERY_URL") {
            self.query_url = url;
        }
        if let Ok(url) = env::var("FLOW_LIVE_URL") {
            self.live_feed_url = url;
        }
        if let Ok(token) = env::var("MAPBOX_TOKEN") {
            self.access_token = Some(token);
        }
        if let Ok(id) = env::var("FLOW_TILESET_ID") {
            self.tileset_id = id;
        }
        if let Ok(id) = env::var("FLOW_SOURCE_ID") {
            self.source_id = id;
        }
        if let Ok(layer) = env::var("FLOW_SOURCE_LAYER") {
            self.source_layer = layer;
        }
        self.refresh_interval_ms = env_var_u64("FLOW_REFRESH_INTERVAL_MS", self.refresh_interval_ms);
        self.debounce_ms = env_var_u64("FLOW_DEBOUNCE_MS", self.debounce_ms);
        self.slice_size = env_var_usize("FLOW_SLICE_SIZE", self.slice_size);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::Invalid("debounce_ms must be > 0".into()));
        }
        if self.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid("refresh_interval_ms must be > 0".into()));
        }
        if self.slice_size == 0 {
            return Err(ConfigError::Invalid("slice_size must be > 0".into()));
        }
        if self.limit_breakpoints.is_empty() {
            return Err(ConfigError::Invalid("limit_breakpoints is empty".into()));
        }
        let sorted = self
            .limit_breakpoints
            .windows(2)
            .all(|w| w[0].min_zoom < w[1].min_zoom);
        if !sorted {
            return Err(ConfigError::Invalid(
                "limit_breakpoints must be strictly ascending by min_zoom".into(),
            ));
        }
        if !self.initial_viewport.bbox().is_valid() {
            return Err(ConfigError::Invalid("initial_viewport is not a valid bbox".into()));
        }
        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn planner(&self) -> QueryPlanner {
        QueryPlanner::new(self.limit_breakpoints.clone())
    }
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
