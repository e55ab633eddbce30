use std::path::{Path, PathBuf};

use clap::Parser;
use foundation::FeatureId;
use streaming::{
    spawn, FlowBackend, MemorySurface, SyncConfig, SyncMode, SyncStatus, Viewport,
    ViewportTracker,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Headless flow synchronization driven by viewports on stdin",
    after_help = "stdin lines:\n  WEST SOUTH EAST NORTH ZOOM   settled viewport\n  move WEST SOUTH EAST NORTH ZOOM\n  settle\n  quit"
)]
struct Args {
    /// JSON config file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured mode: direct | overlay
    #[arg(long)]
    mode: Option<SyncMode>,

    /// GeoJSON whose feature ids make up the overlay surface
    #[arg(long)]
    features: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run(Args::parse()).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), String> {
    let mut config = match &args.config {
        Some(path) => SyncConfig::load(path),
        None => Ok(SyncConfig::default()),
    }
    .and_then(SyncConfig::with_env_overrides)
    .map_err(|e| e.to_string())?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }

    let mut surface = MemorySurface::new(config.source_id.clone(), config.source_layer.clone());
    if let Some(path) = &args.features {
        let ids = read_feature_ids(path).await?;
        info!("surface holds {} features from {}", ids.len(), path.display());
        surface.insert_features(ids);
    } else if config.mode == SyncMode::Overlay {
        warn!("overlay mode without --features: every update will miss");
    }
    surface.set_loaded(true);

    let (handle, engine) =
        spawn(&config, FlowBackend::http(&config), surface).map_err(|e| e.to_string())?;

    let mut status_rx = handle.subscribe_status();
    let logger = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            log_status(&status);
        }
    });

    let mut tracker = ViewportTracker::new(config.initial_viewport);
    let settled = handle.clone();
    tracker.on_settle(move |v| {
        settled.viewport_settled(*v);
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.map_err(|e| e.to_string())? {
        match parse_line(&line) {
            Ok(Input::Jump(v)) => {
                tracker.jump_to(v);
            }
            Ok(Input::Move(v)) => tracker.move_to(v),
            Ok(Input::Settle) => {
                tracker.settle();
            }
            Ok(Input::Quit) => break,
            Ok(Input::Blank) => {}
            Err(msg) => warn!("{msg}"),
        }
    }

    handle.shutdown();
    let surface = engine.await.map_err(|e| e.to_string())?;
    let _ = logger.await;
    let status = handle.status();
    info!(
        "done: generation {} applied {:?}, {} features styled",
        status.generation,
        status.applied_generation,
        surface.styled_count()
    );
    Ok(())
}

fn log_status(status: &SyncStatus) {
    let summary = format!(
        "{:?} {} loading={} count={} max_flow={:.2}",
        status.phase,
        status.generation,
        status.loading,
        status.stats.count,
        status.stats.max_flow
    );
    match (&status.error, &status.reference_time) {
        (Some(err), _) => warn!("{summary} error={err}"),
        (None, Some(rt)) => info!("{summary} reference_time={rt}"),
        (None, None) => info!("{summary}"),
    }
}

#[derive(Debug, PartialEq)]
enum Input {
    Jump(Viewport),
    Move(Viewport),
    Settle,
    Quit,
    Blank,
}

fn parse_line(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(Input::Blank);
    }
    match line {
        "settle" => return Ok(Input::Settle),
        "quit" | "exit" => return Ok(Input::Quit),
        _ => {}
    }
    match line.strip_prefix("move ") {
        Some(rest) => parse_viewport(rest).map(Input::Move),
        None => parse_viewport(line).map(Input::Jump),
    }
}

fn parse_viewport(text: &str) -> Result<Viewport, String> {
    let nums = text
        .split_whitespace()
        .map(|t| t.parse::<f64>().map_err(|_| format!("not a number: {t:?}")))
        .collect::<Result<Vec<_>, _>>()?;
    let [west, south, east, north, zoom] = nums[..] else {
        return Err(format!(
            "expected WEST SOUTH EAST NORTH ZOOM, got {} values",
            nums.len()
        ));
    };
    let viewport = Viewport::new(west, south, east, north, zoom);
    if !viewport.bbox().is_valid() {
        return Err(format!("invalid bbox: {text}"));
    }
    Ok(viewport)
}

async fn read_feature_ids(path: &Path) -> Result<Vec<FeatureId>, String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("{}: {e}", path.display()))?;
    let doc: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))?;
    let features = doc["features"]
        .as_array()
        .ok_or_else(|| format!("{}: not a FeatureCollection", path.display()))?;
    Ok(features
        .iter()
        .filter_map(|f| {
            f["properties"]["comid"]
                .as_u64()
                .or_else(|| f["id"].as_u64())
                .map(FeatureId)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{parse_line, Input};
    use streaming::Viewport;

    #[test]
    fn parses_each_line_kind() {
        assert_eq!(
            parse_line("-73 44 -72 45 9"),
            Ok(Input::Jump(Viewport::new(-73.0, 44.0, -72.0, 45.0, 9.0)))
        );
        assert_eq!(
            parse_line("  move -74 44 -73 45 7.5 "),
            Ok(Input::Move(Viewport::new(-74.0, 44.0, -73.0, 45.0, 7.5)))
        );
        assert_eq!(parse_line("settle"), Ok(Input::Settle));
        assert_eq!(parse_line("quit"), Ok(Input::Quit));
        assert_eq!(parse_line("# comment"), Ok(Input::Blank));
    }

    #[test]
    fn rejects_malformed_viewports() {
        assert!(parse_line("-73 44 -72").is_err());
        assert!(parse_line("-73 44 -72 north 9").is_err());
        assert!(parse_line("-72 44 -73 45 9").is_err());
    }
}
