use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use flow_server::store::MemoryTable;
use flow_server::{router, AppState};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reference river flow query and live feed service")]
struct Args {
    /// Listen address (default: $FLOW_ADDR or 127.0.0.1:9200)
    #[arg(long)]
    addr: Option<String>,

    /// GeoJSON FeatureCollection of river segments (default: $FLOW_DATA)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Static live-feed document; generated from the segment table when unset
    #[arg(long)]
    live_data: Option<PathBuf>,

    /// Douglas-Peucker tolerance in degrees; 0 disables simplification
    #[arg(long)]
    simplify_tolerance: Option<f64>,
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
    let addr: SocketAddr = args
        .addr
        .unwrap_or_else(|| env::var("FLOW_ADDR").unwrap_or_else(|_| "127.0.0.1:9200".to_string()))
        .parse()
        .map_err(|e| format!("invalid listen address: {e}"))?;
    let data = args
        .data
        .or_else(|| env::var("FLOW_DATA").ok().map(PathBuf::from))
        .ok_or_else(|| "no segment data: pass --data or set FLOW_DATA".to_string())?;
    let live_path = args
        .live_data
        .or_else(|| env::var("FLOW_LIVE_DATA").ok().map(PathBuf::from));
    let simplify_tolerance = args
        .simplify_tolerance
        .unwrap_or_else(|| env_var_f64("FLOW_SIMPLIFY_TOLERANCE", 0.0001));

    let table = MemoryTable::load(&data).await.map_err(|e| e.to_string())?;
    if table.is_empty() {
        return Err(format!("{} holds no line features", data.display()));
    }
    if let Some(path) = &live_path {
        info!("serving live feed from {}", path.display());
    }

    let state = AppState {
        table: Arc::new(table),
        live_path,
        simplify_tolerance,
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind {addr}: {e}"))?;
    info!("flow server listening on http://{addr}");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| e.to_string())
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
