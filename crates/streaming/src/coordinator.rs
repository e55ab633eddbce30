use std::sync::Arc;
use std::time::{Duration, Instant};

use runtime::{Debouncer, Generation, GenerationGuard, Metrics, MetricsSnapshot};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::planner::{QueryPlanner, QuerySpec};
use crate::protocol::{FlowDataSet, FlowRecord, RenderStats};
use crate::viewport::Viewport;

/// Phases of one synchronization cycle.
///
/// `Idle -> Debouncing -> Fetching -> {Applying -> Idle | Error}`. `Error`
/// behaves like `Idle` for every transition; it only records that the last
/// cycle failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Debouncing,
    Fetching,
    Applying,
    Error,
}

/// What started a cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Viewport,
    Refresh,
}

/// Permission to run one fetch. The result must be handed back to
/// [`FetchCoordinator::admit`] with the same generation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FetchTicket {
    pub generation: Generation,
    pub trigger: Trigger,
    pub query: QuerySpec,
}

/// Outcome of handing a fetch result to the coordinator.
#[derive(Debug, PartialEq)]
pub enum Admission<T> {
    /// Result belongs to the latest cycle; the caller applies it.
    Current(T),
    /// A newer cycle has started; the result was dropped.
    Stale,
    /// The latest cycle failed; displayed data is unchanged.
    Failed,
}

/// Snapshot of everything the UI chrome needs to describe sync state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub generation: Generation,
    pub applied_generation: Option<Generation>,
    pub loading: bool,
    pub error: Option<String>,
    pub stats: RenderStats,
    pub last_updated_ms: Option<u64>,
    pub reference_time: Option<String>,
    pub metrics: MetricsSnapshot,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            generation: Generation::default(),
            applied_generation: None,
            loading: false,
            error: None,
            stats: RenderStats::default(),
            last_updated_ms: None,
            reference_time: None,
            metrics: MetricsSnapshot::default(),
        }
    }
}

/// Debounces viewport settles, hands out fetch tickets and decides which
/// results may touch render state.
///
/// Time is injected: the coordinator holds a deadline, never a timer, so the
/// "last settle wins" rule is testable without a runtime.
#[derive(Debug)]
pub struct FetchCoordinator {
    planner: QueryPlanner,
    debouncer: Debouncer<Viewport>,
    generations: GenerationGuard,
    viewport: Viewport,
    phase: SyncPhase,
    loading: bool,
    error: Option<String>,
    stats: RenderStats,
    last_updated_ms: Option<u64>,
    reference_time: Option<String>,
    data: Arc<FlowDataSet>,
    metrics: Metrics,
}

impl FetchCoordinator {
    pub fn new(planner: QueryPlanner, debounce: Duration, initial: Viewport) -> Self {
        Self {
            planner,
            debouncer: Debouncer::new(debounce),
            generations: GenerationGuard::new(),
            viewport: initial,
            phase: SyncPhase::Idle,
            loading: false,
            error: None,
            stats: RenderStats::default(),
            last_updated_ms: None,
            reference_time: None,
            data: Arc::new(FlowDataSet::default()),
            metrics: Metrics::new(),
        }
    }

    /// Latest settled viewport.
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn phase(&self) -> SyncPhase {
        if self.debouncer.is_pending() {
            SyncPhase::Debouncing
        } else {
            self.phase
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn data(&self) -> Arc<FlowDataSet> {
        Arc::clone(&self.data)
    }

    pub fn latest_generation(&self) -> Generation {
        self.generations.latest()
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.generations.is_current(generation)
    }

    pub fn metrics_mut(&mut self) -> &mut Metrics {
        &mut self.metrics
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn on_viewport_settled(&mut self, viewport: Viewport, now: Instant) {
        debug!(
            "viewport settled: [{:.4}, {:.4}, {:.4}, {:.4}] z{:.2}",
            viewport.west, viewport.south, viewport.east, viewport.north, viewport.zoom
        );
        self.viewport = viewport;
        self.debouncer.push(viewport, now);
    }

    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Fires the debounced fetch once the quiescence window has elapsed.
    pub fn poll_debounce(&mut self, now: Instant) -> Option<FetchTicket> {
        let viewport = self.debouncer.poll(now)?;
        Some(self.begin(Trigger::Viewport, viewport))
    }

    /// Starts a scheduler cycle for the latest settled viewport, bypassing
    /// the debounce window. A pending debounce is folded into this cycle.
    pub fn begin_refresh(&mut self) -> FetchTicket {
        let _ = self.debouncer.cancel();
        self.begin(Trigger::Refresh, self.viewport)
    }

    fn begin(&mut self, trigger: Trigger, viewport: Viewport) -> FetchTicket {
        let generation = self.generations.begin();
        let query = self.planner.plan(&viewport);
        self.phase = SyncPhase::Fetching;
        self.loading = true;
        self.metrics.inc_counter("cycles_started", 1);
        info!(
            "sync {generation} ({trigger:?}): bbox=[{}, {}, {}, {}] limit={}",
            query.bbox.west, query.bbox.south, query.bbox.east, query.bbox.north, query.limit
        );
        FetchTicket {
            generation,
            trigger,
            query,
        }
    }

    /// Decides what happens to a fetch result.
    pub fn admit<T>(
        &mut self,
        generation: Generation,
        outcome: Result<T, SyncError>,
    ) -> Admission<T> {
        if !self.generations.is_current(generation) {
            self.metrics.inc_counter("stale_discarded", 1);
            debug!(
                "discarding {generation}: superseded by {}",
                self.generations.latest()
            );
            return Admission::Stale;
        }

        match outcome {
            Ok(payload) => {
                self.phase = SyncPhase::Applying;
                Admission::Current(payload)
            }
            Err(err) => {
                warn!("sync {generation} failed: {err}");
                self.metrics.inc_counter("cycles_failed", 1);
                self.phase = SyncPhase::Error;
                self.loading = false;
                self.error = Some(err.to_string());
                Admission::Failed
            }
        }
    }

    /// Direct mode: replaces the displayed data set with `records`.
    pub fn commit_records(
        &mut self,
        generation: Generation,
        records: Vec<FlowRecord>,
        at_ms: u64,
    ) -> bool {
        let stats = RenderStats::from_flows(records.iter().map(|r| r.streamflow_cms));
        if !self.commit(generation, stats, at_ms) {
            return false;
        }
        self.data = Arc::new(FlowDataSet {
            generation,
            records,
        });
        true
    }

    /// Overlay mode: publishes the stats of a finished apply.
    pub fn commit_stats(&mut self, generation: Generation, stats: RenderStats, at_ms: u64) -> bool {
        self.commit(generation, stats, at_ms)
    }

    pub fn set_reference_time(&mut self, generation: Generation, reference_time: Option<String>) {
        if self.generations.is_current(generation) {
            self.reference_time = reference_time;
        }
    }

    fn commit(&mut self, generation: Generation, stats: RenderStats, at_ms: u64) -> bool {
        if !self.generations.mark_applied(generation) {
            self.metrics.inc_counter("stale_discarded", 1);
            debug!("not committing {generation}: superseded");
            return false;
        }
        self.stats = stats;
        self.loading = false;
        self.error = None;
        self.last_updated_ms = Some(at_ms);
        self.phase = SyncPhase::Idle;
        info!(
            "sync {generation} committed: {} features, max flow {:.2} m3/s",
            stats.count, stats.max_flow
        );
        true
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            phase: self.phase(),
            generation: self.generations.latest(),
            applied_generation: self.generations.applied(),
            loading: self.loading,
            error: self.error.clone(),
            stats: self.stats,
            last_updated_ms: self.last_updated_ms,
            reference_time: self.reference_time.clone(),
            metrics: self.metrics.snapshot(),
        }
    }
}
