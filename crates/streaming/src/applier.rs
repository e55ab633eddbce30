use foundation::FeatureId;
use runtime::{Generation, SliceBudget};
use tracing::debug;

use crate::category::categorize;
use crate::protocol::RenderStats;
use crate::surface::{FeatureRef, FeatureState, RenderSurface};

pub const DEFAULT_SLICE_SIZE: usize = 5000;

/// Result of a completed apply cycle.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ApplyReport {
    pub generation: Generation,
    pub stats: RenderStats,
    /// Entries processed, applied or missed.
    pub touched: usize,
    pub missed: usize,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ApplyProgress {
    Idle,
    Pending {
        generation: Generation,
        done: usize,
        total: usize,
    },
    Finished(ApplyReport),
}

#[derive(Debug)]
struct ApplyJob {
    generation: Generation,
    updates: Vec<(FeatureId, f64)>,
    cursor: usize,
    applied: usize,
    max_flow: Option<f64>,
}

/// Merges a flat `feature → flow` batch into a render surface, one bounded
/// slice per call to [`ChunkedApplier::step`].
///
/// At most one job exists. Starting a job replaces the previous one, whose
/// remaining slices are never run.
#[derive(Debug)]
pub struct ChunkedApplier {
    slice_size: usize,
    source_id: String,
    source_layer: String,
    job: Option<ApplyJob>,
}

impl ChunkedApplier {
    pub fn new(
        slice_size: usize,
        source_id: impl Into<String>,
        source_layer: impl Into<String>,
    ) -> Self {
        Self {
            slice_size: slice_size.max(1),
            source_id: source_id.into(),
            source_layer: source_layer.into(),
            job: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.job.is_some()
    }

    /// Queues a new batch. Returns the generation of the job it superseded.
    pub fn start(
        &mut self,
        generation: Generation,
        updates: Vec<(FeatureId, f64)>,
    ) -> Option<Generation> {
        let superseded = self.abandon();
        debug!(
            "apply {generation}: {} updates in slices of {}",
            updates.len(),
            self.slice_size
        );
        self.job = Some(ApplyJob {
            generation,
            updates,
            cursor: 0,
            applied: 0,
            max_flow: None,
        });
        superseded
    }

    /// Drops the in-progress job, if any.
    pub fn abandon(&mut self) -> Option<Generation> {
        self.job.take().map(|j| j.generation)
    }

    /// Runs one slice against `surface`.
    pub fn step<S: RenderSurface + ?Sized>(&mut self, surface: &mut S) -> ApplyProgress {
        let Some(job) = self.job.as_mut() else {
            return ApplyProgress::Idle;
        };

        let mut budget = SliceBudget::new(self.slice_size);
        let take = budget.take_up_to(job.updates.len() - job.cursor);
        let slice = &job.updates[job.cursor..job.cursor + take];

        for &(id, flow) in slice {
            let feature = FeatureRef {
                source: &self.source_id,
                source_layer: &self.source_layer,
                id,
            };
            let state = FeatureState {
                flow,
                category: categorize(flow),
            };
            if surface.set_feature_state(&feature, state).is_ok() {
                job.applied += 1;
                job.max_flow = Some(job.max_flow.map_or(flow, |m| m.max(flow)));
            }
        }
        job.cursor += take;

        if job.cursor < job.updates.len() {
            return ApplyProgress::Pending {
                generation: job.generation,
                done: job.cursor,
                total: job.updates.len(),
            };
        }

        let Some(job) = self.job.take() else {
            return ApplyProgress::Idle;
        };
        ApplyProgress::Finished(ApplyReport {
            generation: job.generation,
            stats: RenderStats {
                count: job.applied,
                max_flow: job.max_flow.unwrap_or(0.0),
            },
            touched: job.cursor,
            missed: job.cursor - job.applied,
        })
    }

    /// Applies a whole batch, yielding to the scheduler between slices.
    ///
    /// Returns `None` if the job was replaced or abandoned while suspended.
    pub async fn apply<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        generation: Generation,
        updates: Vec<(FeatureId, f64)>,
    ) -> Option<ApplyReport> {
        self.start(generation, updates);
        loop {
            match self.step(surface) {
                ApplyProgress::Finished(report) => return Some(report),
                ApplyProgress::Idle => return None,
                ApplyProgress::Pending { .. } => tokio::task::yield_now().await,
            }
        }
    }
}
