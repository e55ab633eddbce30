//! Event loop driving one synchronization engine.
//!
//! Everything that mutates sync state runs on a single task: viewport
//! settles, fetch results, the debounce deadline, refresh ticks and apply
//! slices are multiplexed through one `select!`. Fetches run on their own
//! tasks and report back tagged with their generation.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::applier::{ApplyProgress, ChunkedApplier};
use crate::config::{ConfigError, SyncConfig, SyncMode};
use crate::coordinator::{Admission, FetchCoordinator, FetchTicket, SyncStatus};
use crate::error::SyncError;
use crate::protocol::{FeatureCollection, FlowDataSet, LiveFeed};
use crate::refresh::RefreshScheduler;
use crate::source::{HttpFlowClient, LiveFeedSource, SpatialQuery, unix_millis};
use crate::surface::RenderSurface;
use crate::viewport::Viewport;

/// Where a cycle's data comes from. Picks the operating mode.
#[derive(Clone)]
pub enum FlowBackend {
    /// Bbox query; the result replaces the whole data set.
    Direct(Arc<dyn SpatialQuery>),
    /// Live feed; flows are merged into the loaded surface feature by feature.
    Overlay(Arc<dyn LiveFeedSource>),
}

impl FlowBackend {
    /// HTTP backend for the mode selected in `config`.
    pub fn http(config: &SyncConfig) -> Self {
        let client = Arc::new(HttpFlowClient::new(
            config.query_url.clone(),
            config.live_feed_url.clone(),
        ));
        match config.mode {
            SyncMode::Direct => FlowBackend::Direct(client),
            SyncMode::Overlay => FlowBackend::Overlay(client),
        }
    }

    pub fn mode(&self) -> SyncMode {
        match self {
            FlowBackend::Direct(_) => SyncMode::Direct,
            FlowBackend::Overlay(_) => SyncMode::Overlay,
        }
    }
}

impl std::fmt::Debug for FlowBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FlowBackend").field(&self.mode()).finish()
    }
}

#[derive(Debug)]
enum Command {
    ViewportSettled(Viewport),
    SurfaceReady,
    Shutdown,
}

#[derive(Debug)]
enum Fetched {
    Collection(FeatureCollection),
    Live(LiveFeed),
}

#[derive(Debug)]
struct FetchResult {
    ticket: FetchTicket,
    outcome: Result<Fetched, SyncError>,
}

/// Cloneable front end of a running [`SyncEngine`].
///
/// Dropping every handle stops the engine.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SyncStatus>,
    data: watch::Receiver<Arc<FlowDataSet>>,
}

impl SyncHandle {
    /// Reports a settled viewport. Returns `false` once the engine has stopped.
    pub fn viewport_settled(&self, viewport: Viewport) -> bool {
        self.commands.send(Command::ViewportSettled(viewport)).is_ok()
    }

    /// Source-ready event from the render surface; arms the refresh schedule.
    pub fn surface_ready(&self) -> bool {
        self.commands.send(Command::SurfaceReady).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Data set currently displayed in direct mode.
    pub fn data(&self) -> Arc<FlowDataSet> {
        Arc::clone(&self.data.borrow())
    }

    pub fn subscribe_data(&self) -> watch::Receiver<Arc<FlowDataSet>> {
        self.data.clone()
    }
}

pub struct SyncEngine<S> {
    coordinator: FetchCoordinator,
    applier: ChunkedApplier,
    refresh: RefreshScheduler,
    backend: FlowBackend,
    surface: S,
    source_id: String,
    commands: mpsc::UnboundedReceiver<Command>,
    results_tx: mpsc::UnboundedSender<FetchResult>,
    results: mpsc::UnboundedReceiver<FetchResult>,
    status_tx: watch::Sender<SyncStatus>,
    data_tx: watch::Sender<Arc<FlowDataSet>>,
}

impl<S: RenderSurface + 'static> SyncEngine<S> {
    /// Fails if `config` does not validate.
    pub fn new(
        config: &SyncConfig,
        backend: FlowBackend,
        surface: S,
    ) -> Result<(Self, SyncHandle), ConfigError> {
        config.validate()?;
        let coordinator = FetchCoordinator::new(
            config.planner(),
            config.debounce_window(),
            config.initial_viewport,
        );
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (results_tx, results) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(coordinator.status());
        let (data_tx, data_rx) = watch::channel(coordinator.data());

        let engine = Self {
            applier: ChunkedApplier::new(
                config.slice_size,
                config.source_id.clone(),
                config.source_layer.clone(),
            ),
            refresh: RefreshScheduler::new(config.refresh_interval()),
            coordinator,
            backend,
            surface,
            source_id: config.source_id.clone(),
            commands,
            results_tx,
            results,
            status_tx,
            data_tx,
        };
        let handle = SyncHandle {
            commands: commands_tx,
            status: status_rx,
            data: data_rx,
        };
        Ok((engine, handle))
    }

    /// Runs until shut down, then hands the surface back.
    pub async fn run(mut self) -> S {
        info!(
            "sync engine started: mode={:?} source={}",
            self.backend.mode(),
            self.source_id
        );
        if self.surface.is_source_loaded(&self.source_id) {
            self.arm_refresh();
        } else if !self.surface.has_source(&self.source_id) {
            warn!("render surface has no source {:?}", self.source_id);
        }
        self.publish();

        loop {
            let deadline = self.coordinator.debounce_deadline();
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(Command::ViewportSettled(viewport)) => {
                        self.coordinator
                            .on_viewport_settled(viewport, Instant::now().into_std());
                    }
                    Some(Command::SurfaceReady) => self.arm_refresh(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(result) = self.results.recv() => self.on_fetched(result),
                _ = debounce_elapsed(deadline) => {
                    if let Some(ticket) = self.coordinator.poll_debounce(Instant::now().into_std()) {
                        self.dispatch(ticket);
                    }
                }
                _ = self.refresh.tick() => {
                    let ticket = self.coordinator.begin_refresh();
                    self.dispatch(ticket);
                }
                _ = tokio::task::yield_now(), if self.applier.is_active() => self.step_apply(),
            }

            self.publish();
        }

        if let Some(g) = self.applier.abandon() {
            debug!("shutdown: dropping apply {g}");
        }
        info!("sync engine stopped");
        self.surface
    }

    fn arm_refresh(&mut self) {
        if !self.refresh.arm(Instant::now()) {
            trace!("refresh already armed");
        }
    }

    fn dispatch(&mut self, ticket: FetchTicket) {
        if let Some(old) = self.applier.abandon() {
            debug!("{} supersedes in-progress apply {old}", ticket.generation);
            let metrics = self.coordinator.metrics_mut();
            metrics.inc_counter("applies_superseded", 1);
            metrics.set_gauge("apply_pending", 0);
        }

        let tx = self.results_tx.clone();
        match &self.backend {
            FlowBackend::Direct(query) => {
                let query = Arc::clone(query);
                tokio::spawn(async move {
                    let outcome = query.query(ticket.query).await.map(Fetched::Collection);
                    let _ = tx.send(FetchResult { ticket, outcome });
                });
            }
            FlowBackend::Overlay(feed) => {
                let feed = Arc::clone(feed);
                tokio::spawn(async move {
                    let outcome = feed.fetch_live().await.map(Fetched::Live);
                    let _ = tx.send(FetchResult { ticket, outcome });
                });
            }
        }
    }

    fn on_fetched(&mut self, result: FetchResult) {
        let generation = result.ticket.generation;
        match self.coordinator.admit(generation, result.outcome) {
            Admission::Current(Fetched::Collection(collection)) => {
                let records = collection.into_records();
                if self
                    .coordinator
                    .commit_records(generation, records, unix_millis())
                {
                    self.data_tx.send_replace(self.coordinator.data());
                }
            }
            Admission::Current(Fetched::Live(mut feed)) => {
                self.coordinator
                    .set_reference_time(generation, feed.reference_time.take());
                let (updates, invalid) = feed.into_updates();
                if invalid > 0 {
                    debug!("{generation}: {invalid} feed keys are not feature ids");
                    self.coordinator
                        .metrics_mut()
                        .inc_counter("apply_misses", invalid as u64);
                }
                self.applier.start(generation, updates);
            }
            Admission::Stale | Admission::Failed => {}
        }
    }

    fn step_apply(&mut self) {
        match self.applier.step(&mut self.surface) {
            ApplyProgress::Finished(report) => {
                self.coordinator.metrics_mut().set_gauge("apply_pending", 0);
                if report.missed > 0 {
                    self.coordinator
                        .metrics_mut()
                        .inc_counter("apply_misses", report.missed as u64);
                }
                self.coordinator
                    .commit_stats(report.generation, report.stats, unix_millis());
            }
            ApplyProgress::Pending {
                generation,
                done,
                total,
            } => {
                trace!("apply {generation}: {done}/{total}");
                self.coordinator
                    .metrics_mut()
                    .set_gauge("apply_pending", (total - done) as i64);
            }
            ApplyProgress::Idle => {}
        }
    }

    fn publish(&self) {
        let status = self.coordinator.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

/// Spawns an engine on the current runtime.
pub fn spawn<S: RenderSurface + 'static>(
    config: &SyncConfig,
    backend: FlowBackend,
    surface: S,
) -> Result<(SyncHandle, JoinHandle<S>), ConfigError> {
    let (engine, handle) = SyncEngine::new(config, backend, surface)?;
    Ok((handle, tokio::spawn(engine.run())))
}

async fn debounce_elapsed(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::{FlowBackend, spawn};
    use crate::category::{FlowCategory, categorize};
    use crate::config::{ConfigError, SyncConfig, SyncMode};
    use crate::coordinator::SyncPhase;
    use crate::error::SyncError;
    use crate::planner::QuerySpec;
    use crate::protocol::{
        FeatureCollection, FeatureKind, FlowFeature, FlowProperties, LiveFeed, RenderStats,
    };
    use crate::error::ApplyMiss;
    use crate::source::{BoxFuture, LiveFeedSource, SpatialQuery};
    use crate::surface::{FeatureRef, FeatureState, MemorySurface, RenderSurface};
    use crate::viewport::Viewport;
    use foundation::FeatureId;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{Instant, sleep};

    type Step<T> = (Duration, Result<T, SyncError>);

    /// Replays scripted responses in call order, each after its own delay.
    struct Scripted<T> {
        script: Mutex<VecDeque<Step<T>>>,
        calls: Mutex<Vec<(Instant, Option<QuerySpec>)>>,
    }

    impl<T: Default + Send + 'static> Scripted<T> {
        fn new(script: Vec<Step<T>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn next(&self, spec: Option<QuerySpec>) -> BoxFuture<'_, Result<T, SyncError>> {
            self.calls.lock().push((Instant::now(), spec));
            let (delay, result) = self
                .script
                .lock()
                .pop_front()
                .unwrap_or((Duration::ZERO, Ok(T::default())));
            Box::pin(async move {
                sleep(delay).await;
                result
            })
        }

        fn specs(&self) -> Vec<QuerySpec> {
            self.calls.lock().iter().filter_map(|(_, s)| *s).collect()
        }

        fn call_offsets(&self, t0: Instant) -> Vec<Duration> {
            self.calls.lock().iter().map(|(at, _)| *at - t0).collect()
        }
    }

    impl SpatialQuery for Scripted<FeatureCollection> {
        fn query(&self, spec: QuerySpec) -> BoxFuture<'_, Result<FeatureCollection, SyncError>> {
            self.next(Some(spec))
        }
    }

    impl LiveFeedSource for Scripted<LiveFeed> {
        fn fetch_live(&self) -> BoxFuture<'_, Result<LiveFeed, SyncError>> {
            self.next(None)
        }
    }

    fn feature(id: u64, flow: f64) -> FlowFeature {
        FlowFeature {
            kind: FeatureKind::Feature,
            properties: FlowProperties {
                comid: FeatureId(id),
                streamflow_cms: flow,
                velocity_ms: 0.0,
                name: None,
                stream_order: 1,
                flow_category: categorize(flow),
            },
            geometry: None,
        }
    }

    fn collection(rows: &[(u64, f64)]) -> FeatureCollection {
        FeatureCollection::new(rows.iter().map(|&(id, f)| feature(id, f)).collect())
    }

    fn live(sites: &[(&str, f64)]) -> LiveFeed {
        LiveFeed {
            sites: sites
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
            ..LiveFeed::default()
        }
    }

    fn surface(ids: impl IntoIterator<Item = u64>, loaded: bool) -> MemorySurface {
        let mut s =
            MemorySurface::new("rivers", "reaches").with_features(ids.into_iter().map(FeatureId));
        s.set_loaded(loaded);
        s
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn settle_burst_issues_one_query_for_last_viewport() {
        let query = Scripted::new(vec![(ms(20), Ok(collection(&[(1, 12.0), (2, 150.0)])))]);
        let (handle, task) = spawn(
            &SyncConfig::default(),
            FlowBackend::Direct(query.clone()),
            surface([], false),
        )
        .unwrap();

        let views: Vec<Viewport> = (0..5)
            .map(|i| Viewport::new(-73.0 - i as f64 * 0.25, 44.0, -72.0, 45.0, 5.0 + i as f64))
            .collect();
        for v in &views {
            handle.viewport_settled(*v);
            sleep(ms(50)).await;
        }
        sleep(ms(1_000)).await;

        let specs = query.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].bbox, views[4].bbox());
        assert_eq!(specs[0].limit, 5000);

        let status = handle.status();
        assert_eq!(status.phase, SyncPhase::Idle);
        assert_eq!(status.stats, RenderStats { count: 2, max_flow: 150.0 });
        assert_eq!(handle.data().records.len(), 2);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_older_response_is_discarded() {
        let query = Scripted::new(vec![
            (ms(2_000), Ok(collection(&[(1, 999.0)]))),
            (ms(100), Ok(collection(&[(2, 20.0)]))),
        ]);
        let (handle, task) = spawn(
            &SyncConfig::default(),
            FlowBackend::Direct(query.clone()),
            surface([], false),
        )
        .unwrap();

        handle.viewport_settled(Viewport::new(-74.0, 44.0, -73.0, 45.0, 7.0));
        sleep(ms(400)).await;
        handle.viewport_settled(Viewport::new(-73.0, 44.0, -72.0, 45.0, 9.0));
        sleep(ms(600)).await;

        let after_g2 = handle.data();
        assert_eq!(after_g2.records[0].feature_id, FeatureId(2));

        // g1 resolves at ~2.3s.
        sleep(ms(3_000)).await;
        let status = handle.status();
        let data = handle.data();
        assert_eq!(query.specs().len(), 2);
        assert_eq!(data.generation, after_g2.generation);
        assert_eq!(data.records.len(), 1);
        assert_eq!(data.records[0].feature_id, FeatureId(2));
        assert_eq!(status.applied_generation, Some(status.generation));
        assert_eq!(status.stats.max_flow, 20.0);
        assert_eq!(status.metrics.counter("stale_discarded"), 1);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycle_keeps_displayed_data() {
        let query = Scripted::new(vec![
            (ms(10), Ok(collection(&[(1, 60.0)]))),
            (ms(10), Err(SyncError::service(Some(500), "relation does not exist"))),
        ]);
        let (handle, task) = spawn(
            &SyncConfig::default(),
            FlowBackend::Direct(query.clone()),
            surface([], false),
        )
        .unwrap();

        handle.viewport_settled(Viewport::new(-74.0, 44.0, -73.0, 45.0, 7.0));
        sleep(ms(500)).await;
        handle.viewport_settled(Viewport::new(-73.0, 44.0, -72.0, 45.0, 7.0));
        sleep(ms(500)).await;

        let status = handle.status();
        assert_eq!(status.phase, SyncPhase::Error);
        assert!(!status.loading);
        assert_eq!(
            status.error.as_deref(),
            Some("service error (HTTP 500): relation does not exist")
        );
        assert_eq!(status.stats, RenderStats { count: 1, max_flow: 60.0 });
        assert_eq!(handle.data().records[0].feature_id, FeatureId(1));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn overlay_applies_live_feed_and_skips_absent_features() {
        let feed = Scripted::new(vec![(
            ms(5),
            Ok(live(&[("101", 0.5), ("102", 1500.0), ("x-17", 3.0)])),
        )]);
        let config = SyncConfig {
            mode: SyncMode::Overlay,
            ..SyncConfig::default()
        };
        let (handle, task) =
            spawn(&config, FlowBackend::Overlay(feed.clone()), surface([101], false)).unwrap();

        sleep(ms(100)).await;
        assert!(feed.calls.lock().is_empty());

        handle.surface_ready();
        sleep(ms(100)).await;
        handle.shutdown();
        let surface = task.await.unwrap();

        let status = handle.status();
        assert_eq!(status.stats, RenderStats { count: 1, max_flow: 0.5 });
        assert_eq!(status.metrics.counter("apply_misses"), 2);
        assert_eq!(
            surface.state(FeatureId(101)).map(|s| s.category),
            Some(FlowCategory::VeryLow)
        );
        assert_eq!(surface.styled_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_cadence_holds_across_viewport_cycles() {
        const PERIOD: Duration = Duration::from_secs(15 * 60);
        let feed = Scripted::new(
            (1..=4)
                .map(|k| {
                    let flow = k as f64 * 10.0;
                    (ms(800), Ok(live(&[("1", flow), ("2", flow / 2.0)])))
                })
                .collect(),
        );
        let config = SyncConfig {
            mode: SyncMode::Overlay,
            slice_size: 1,
            ..SyncConfig::default()
        };

        let t0 = Instant::now();
        let (handle, task) =
            spawn(&config, FlowBackend::Overlay(feed.clone()), surface([1, 2], true)).unwrap();

        sleep(Duration::from_secs(5 * 60)).await;
        handle.viewport_settled(Viewport::new(-73.0, 44.0, -72.0, 45.0, 9.0));
        sleep(PERIOD * 2 + Duration::from_secs(60) - Duration::from_secs(5 * 60)).await;

        assert_eq!(
            feed.call_offsets(t0),
            vec![Duration::ZERO, Duration::from_secs(5 * 60) + ms(300), PERIOD, PERIOD * 2]
        );

        let status = handle.status();
        assert_eq!(status.applied_generation, Some(status.generation));
        assert_eq!(status.stats, RenderStats { count: 2, max_flow: 40.0 });
        assert_eq!(status.metrics.gauges, vec![("apply_pending", 0)]);

        handle.shutdown();
        let surface = task.await.unwrap();
        assert_eq!(surface.state(FeatureId(1)).map(|s| s.flow), Some(40.0));
        assert_eq!(surface.state(FeatureId(2)).map(|s| s.flow), Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_stops_the_engine() {
        let query = Scripted::<FeatureCollection>::new(Vec::new());
        let (handle, task) = spawn(
            &SyncConfig::default(),
            FlowBackend::Direct(query),
            surface([], false),
        )
        .unwrap();
        drop(handle);
        let surface = task.await.unwrap();
        assert_eq!(surface.feature_count(), 0);
    }

    /// Spends a millisecond of wall time on every feature-state write.
    struct SlowSurface(MemorySurface);

    impl RenderSurface for SlowSurface {
        fn has_source(&self, source: &str) -> bool {
            self.0.has_source(source)
        }

        fn is_source_loaded(&self, source: &str) -> bool {
            self.0.is_source_loaded(source)
        }

        fn set_feature_state(
            &mut self,
            feature: &FeatureRef<'_>,
            state: FeatureState,
        ) -> Result<(), ApplyMiss> {
            std::thread::sleep(ms(1));
            self.0.set_feature_state(feature, state)
        }
    }

    // Real time: paused time cannot advance while slices keep yielding.
    #[tokio::test]
    async fn newer_cycle_abandons_apply_still_in_progress() {
        let keys: Vec<String> = (0..1000).map(|i| i.to_string()).collect();
        let first: Vec<(&str, f64)> = keys.iter().map(|k| (k.as_str(), 500.0)).collect();
        let feed = Scripted::new(vec![
            (Duration::ZERO, Ok(live(&first))),
            (Duration::ZERO, Ok(live(&[("1", 2.0)]))),
        ]);
        let config = SyncConfig {
            mode: SyncMode::Overlay,
            slice_size: 1,
            ..SyncConfig::default()
        };
        let (handle, task) = spawn(
            &config,
            FlowBackend::Overlay(feed.clone()),
            SlowSurface(surface(0..1000, true)),
        )
        .unwrap();

        sleep(ms(50)).await;
        handle.viewport_settled(Viewport::new(-73.0, 44.0, -72.0, 45.0, 9.0));

        let mut status_rx = handle.subscribe_status();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let status = status_rx.borrow_and_update();
                    let second = status.generation.0 == 2;
                    if second && status.applied_generation == Some(status.generation) {
                        break;
                    }
                }
                status_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("second cycle never applied");

        let status = handle.status();
        assert_eq!(status.stats, RenderStats { count: 1, max_flow: 2.0 });
        assert_eq!(status.metrics.counter("applies_superseded"), 1);
        assert_eq!(status.metrics.gauges, vec![("apply_pending", 0)]);

        handle.shutdown();
        let SlowSurface(surface) = task.await.unwrap();
        assert_eq!(surface.state(FeatureId(1)).map(|s| s.flow), Some(2.0));
        assert!(surface.styled_count() < 1000, "{}", surface.styled_count());
        assert_eq!(surface.state(FeatureId(999)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_rejects_invalid_config() {
        let feed = Scripted::<LiveFeed>::new(Vec::new());
        let config = SyncConfig {
            refresh_interval_ms: 0,
            ..SyncConfig::default()
        };
        let err = spawn(&config, FlowBackend::Overlay(feed.clone()), surface([1], true))
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
        assert!(feed.calls.lock().is_empty());
    }
}
