//! [`StatusReporter`] – periodic human-readable status dump.
//!
//! The dump lists, per feed of the active mode, the last pose and yaw, the
//! freshness verdict and (for the checked feed) the sanity verdict, followed
//! by the flight controller's own pose, battery and the publish flag.
//!
//! ```text
//! >>> Source: lidar_odom_ekf [3] <<<
//! >>> lidar_odom (primary) <<<
//! Pos: +1.00 [m] +2.00 [m] +0.50 [m]
//! Yaw: +90.00 [deg]
//! Gate: fresh (12 ms), sane
//! ...
//! >>> FCU Info <<<
//! Batt: +15.80 [V] +76.00%
//! Last tick: published
//! is_pub: true
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use posest_kernel::{
    FeedRole, Freshness, FreshnessTracker, InvalidSample, ReferenceMirror, ReferenceSnapshot,
    SanityChecker, SourceSelector,
};
use posest_types::{FeedKind, OperatingMode, Vec3};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::scheduler::TickOutcome;

/// Default interval between status dumps.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// State of one feed at report time.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedStatus {
    pub kind: FeedKind,
    pub role: FeedRole,
    /// Last position and yaw in degrees.
    pub pose: Option<(Vec3, f64)>,
    pub freshness: Freshness,
    /// Present only for the sanity-checked feed once it has a sample.
    pub sanity: Option<Result<(), InvalidSample>>,
}

/// One status dump.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub mode: OperatingMode,
    pub publish_enabled: bool,
    pub feeds: Vec<FeedStatus>,
    pub reference: ReferenceSnapshot,
    pub last_outcome: Option<TickOutcome>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ">>> Source: {} [{}] <<<", self.mode, self.mode.index())?;
        for feed in &self.feeds {
            writeln!(f, ">>> {} ({}) <<<", feed.kind, feed.role)?;
            match feed.pose {
                Some((p, yaw_deg)) => {
                    writeln!(f, "Pos: {:+.2} [m] {:+.2} [m] {:+.2} [m]", p.x, p.y, p.z)?;
                    writeln!(f, "Yaw: {yaw_deg:+.2} [deg]")?;
                }
                None => writeln!(f, "Pos: no data")?,
            }
            write!(f, "Gate: ")?;
            match feed.freshness {
                Freshness::Fresh { age } => write!(f, "fresh ({} ms)", age.as_millis())?,
                Freshness::Stale { age } => write!(f, "stale ({} ms)", age.as_millis())?,
                Freshness::NeverReceived => write!(f, "never received")?,
            }
            match &feed.sanity {
                Some(Ok(())) => writeln!(f, ", sane")?,
                Some(Err(invalid)) => writeln!(f, ", invalid ({invalid})")?,
                None => writeln!(f)?,
            }
        }

        writeln!(f, ">>> FCU Info <<<")?;
        if self.publish_enabled {
            if let Some(p) = self.reference.position {
                writeln!(f, "Pos_fcu: {:+.2} [m] {:+.2} [m] {:+.2} [m]", p.x, p.y, p.z)?;
            }
            if let Some(att) = self.reference.attitude {
                writeln!(f, "Yaw_fcu: {:+.2} [deg]", att.euler.yaw_deg())?;
            }
        }
        match self.reference.battery {
            Some(b) => {
                write!(f, "Batt: ")?;
                match b.voltage {
                    Some(v) => write!(f, "{v:+.2} [V]")?,
                    None => write!(f, "-- [V]")?,
                }
                match b.percentage {
                    Some(p) => writeln!(f, " {:+.2}%", p * 100.0)?,
                    None => writeln!(f, " --%")?,
                }
            }
            None => writeln!(f, "Batt: no data")?,
        }
        match &self.last_outcome {
            Some(TickOutcome::Published(_)) => writeln!(f, "Last tick: published")?,
            Some(TickOutcome::Suppressed(reason)) => writeln!(f, "Last tick: suppressed, {reason}")?,
            Some(TickOutcome::SinkFailed { error, .. }) => {
                writeln!(f, "Last tick: sink failed, {error}")?
            }
            None => writeln!(f, "Last tick: none")?,
        }
        write!(f, "is_pub: {}", self.publish_enabled)
    }
}

/// Builds [`StatusReport`]s from the shared state.
pub struct StatusReporter {
    selector: SourceSelector,
    freshness: FreshnessTracker,
    sanity: SanityChecker,
    reference: Arc<ReferenceMirror>,
    publish_enabled: bool,
    outcomes: Option<watch::Receiver<Option<TickOutcome>>>,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(
        selector: SourceSelector,
        freshness: FreshnessTracker,
        sanity: SanityChecker,
        reference: Arc<ReferenceMirror>,
        publish_enabled: bool,
    ) -> Self {
        Self {
            selector,
            freshness,
            sanity,
            reference,
            publish_enabled,
            outcomes: None,
            interval: DEFAULT_STATUS_INTERVAL,
        }
    }

    /// Follow an armed scheduler's outcomes.
    pub fn with_outcomes(mut self, outcomes: watch::Receiver<Option<TickOutcome>>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn report(&self, now: Instant) -> StatusReport {
        let selection = self.selector.select();
        let store = self.freshness.store();
        let feeds = selection
            .mandatory
            .iter()
            .map(|m| {
                let snapshot = store.snapshot(m.kind);
                let freshness = self.freshness.check_snapshot(snapshot.as_deref(), now);
                let pose = snapshot
                    .as_ref()
                    .map(|s| (s.sample.position(), s.sample.euler().yaw_deg()));
                let sanity = snapshot
                    .as_ref()
                    .filter(|_| m.kind == selection.checked)
                    .map(|s| self.sanity.verify(&s.sample));
                FeedStatus {
                    kind: m.kind,
                    role: m.role,
                    pose,
                    freshness,
                    sanity,
                }
            })
            .collect();

        StatusReport {
            mode: self.selector.mode(),
            publish_enabled: self.publish_enabled,
            feeds,
            reference: self.reference.snapshot(),
            last_outcome: self.outcomes.as_ref().and_then(|rx| rx.borrow().clone()),
        }
    }

    /// Hand a fresh report to `emit` every interval until `shutdown` flips
    /// to `true`.
    pub async fn run<F>(self, mut shutdown: watch::Receiver<bool>, mut emit: F)
    where
        F: FnMut(&StatusReport) + Send,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => emit(&self.report(Instant::now())),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("status reporter stopped");
    }
}
