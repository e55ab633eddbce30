//! Consumed services: the spatial query service and the live feed.
//!
//! The engine only sees the two traits. `HttpFlowClient` implements both over
//! plain HTTP; tests substitute in-memory fakes.

use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::SyncError;
use crate::planner::QuerySpec;
use crate::protocol::{ErrorBody, FeatureCollection, LiveFeed};

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Bounding-box queries against the backing store (direct mode).
///
/// Implementations give no ordering guarantee between concurrent calls.
pub trait SpatialQuery: Send + Sync {
    fn query(&self, spec: QuerySpec) -> BoxFuture<'_, Result<FeatureCollection, SyncError>>;
}

/// Polled `comid → streamflow` document (overlay mode).
pub trait LiveFeedSource: Send + Sync {
    fn fetch_live(&self) -> BoxFuture<'_, Result<LiveFeed, SyncError>>;
}

/// HTTP client for the query service and live feed.
#[derive(Debug, Clone)]
pub struct HttpFlowClient {
    client: reqwest::Client,
    query_url: String,
    live_url: String,
}

impl HttpFlowClient {
    pub fn new(query_url: impl Into<String>, live_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), query_url, live_url)
    }

    pub fn with_client(
        client: reqwest::Client,
        query_url: impl Into<String>,
        live_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            query_url: query_url.into(),
            live_url: live_url.into(),
        }
    }
}

impl SpatialQuery for HttpFlowClient {
    fn query(&self, spec: QuerySpec) -> BoxFuture<'_, Result<FeatureCollection, SyncError>> {
        Box::pin(async move {
            debug!("GET {} limit={}", self.query_url, spec.limit);
            let resp = self
                .client
                .get(&self.query_url)
                .query(&spec.query_pairs())
                .send()
                .await?;
            read_json(resp).await
        })
    }
}

impl LiveFeedSource for HttpFlowClient {
    fn fetch_live(&self) -> BoxFuture<'_, Result<LiveFeed, SyncError>> {
        Box::pin(async move {
            // Cache-bust: the feed is a static document behind CDNs.
            let resp = self
                .client
                .get(&self.live_url)
                .query(&[("t", unix_millis().to_string())])
                .send()
                .await?;
            read_json(resp).await
        })
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, SyncError> {
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(SyncError::transport)?;

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .map(|b| b.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).trim().to_string());
        return Err(SyncError::service(Some(status.as_u16()), message));
    }

    serde_json::from_slice(&bytes).map_err(|e| {
        SyncError::service(Some(status.as_u16()), format!("malformed response: {e}"))
    })
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
