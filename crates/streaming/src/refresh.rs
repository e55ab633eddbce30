use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::info;

/// Fixed-cadence live refresh, independent of viewport motion.
///
/// Inert until armed by the render surface becoming ready. Arming fires
/// immediately and then every `period` on the grid `T0 + k * period`; late
/// ticks are skipped rather than bunched up.
#[derive(Debug)]
pub struct RefreshScheduler {
    period: Duration,
    interval: Option<Interval>,
    armed_at: Option<Instant>,
    ticks: u64,
}

impl RefreshScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
            armed_at: None,
            ticks: 0,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    pub fn armed_at(&self) -> Option<Instant> {
        self.armed_at
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Starts the cadence at `now`. Re-arming an armed scheduler is a no-op,
    /// so repeated source-ready events never shift the grid.
    pub fn arm(&mut self, now: Instant) -> bool {
        if self.interval.is_some() {
            return false;
        }
        let mut interval = tokio::time::interval_at(now, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
        self.armed_at = Some(now);
        info!("live refresh armed: every {}s", self.period.as_secs());
        true
    }

    /// Completes at the next due tick; pending forever while unarmed.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => {
                let at = interval.tick().await;
                self.ticks += 1;
                at
            }
            None => std::future::pending().await,
        }
    }
}
