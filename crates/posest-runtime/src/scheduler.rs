//! [`PublishScheduler`] – fixed-rate publish loop.
//!
//! Every tick asks the [`PublishGate`] whether the mode's candidate may be
//! forwarded.  On success the candidate's position and orientation are
//! stamped with the tick's wall-clock time and handed to the [`PoseSink`];
//! otherwise the tick is suppressed and the reason is logged.  Suppression
//! never escalates: the next tick simply re-evaluates.  A sink failure is
//! reported as its own outcome and leaves the state unchanged.
//!
//! ```text
//!           gate ok, sink ok             gate ok, sink ok
//! IdleWaiting ─────────► Publishing ◄────────────────┐
//!      │                    │  gate fails            │
//!      │ gate fails         ▼                        │
//!      └───────────────► Suppressed(reason) ─────────┘
//! ```
//!
//! The scheduler is not armed at all when publishing is disabled or the mode
//! publishes on its own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use posest_kernel::{PublishGate, SuppressReason};
use posest_middleware::PoseSink;
use posest_types::EstimatedPose;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Default tick period (50 Hz).
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(20);

/// Scheduler state after the most recent tick.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerState {
    /// Nothing has been published or suppressed yet.
    IdleWaiting,
    Suppressed(SuppressReason),
    Publishing,
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Published(EstimatedPose),
    Suppressed(SuppressReason),
    /// The gate approved the pose but the sink refused it.
    SinkFailed { pose: EstimatedPose, error: String },
}

impl TickOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, TickOutcome::Published(_))
    }
}

/// Running totals kept for the status dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickCounters {
    pub ticks: u64,
    pub published: u64,
    pub suppressed: u64,
    pub sink_failures: u64,
}

pub struct PublishScheduler {
    gate: PublishGate,
    sink: Arc<dyn PoseSink>,
    period: Duration,
    state: SchedulerState,
    counters: TickCounters,
    outcome_tx: watch::Sender<Option<TickOutcome>>,
}

impl std::fmt::Debug for PublishScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishScheduler")
            .field("gate", &self.gate)
            .field("period", &self.period)
            .field("state", &self.state)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl PublishScheduler {
    /// Build an armed scheduler, or `None` when publishing is disabled or the
    /// gate's mode is self-publishing.
    pub fn arm(
        publish_enabled: bool,
        gate: PublishGate,
        sink: Arc<dyn PoseSink>,
        period: Duration,
    ) -> Option<Self> {
        let mode = gate.selector().mode();
        if !publish_enabled {
            info!(%mode, "publishing disabled; scheduler not armed");
            return None;
        }
        if gate.selector().policy().self_publishing() {
            info!(%mode, "source publishes to the flight controller itself; scheduler not armed");
            return None;
        }
        let (outcome_tx, _) = watch::channel(None);
        Some(Self {
            gate,
            sink,
            period,
            state: SchedulerState::IdleWaiting,
            counters: TickCounters::default(),
            outcome_tx,
        })
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn counters(&self) -> TickCounters {
        self.counters
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Receiver that always holds the latest tick outcome.
    pub fn subscribe(&self) -> watch::Receiver<Option<TickOutcome>> {
        self.outcome_tx.subscribe()
    }

    /// Run one tick at monotonic `now`, stamping any published pose with
    /// `stamp`.
    pub fn tick(&mut self, now: Instant, stamp: DateTime<Utc>) -> TickOutcome {
        self.counters.ticks += 1;
        let outcome = match self.gate.evaluate(now) {
            Ok(snapshot) => {
                let pose = EstimatedPose {
                    stamp,
                    position: snapshot.sample.position(),
                    orientation: snapshot.sample.orientation(),
                };
                match self.sink.publish_estimated_pose(&pose) {
                    Ok(()) => {
                        self.enter_publishing();
                        self.counters.published += 1;
                        TickOutcome::Published(pose)
                    }
                    Err(e) => {
                        self.counters.sink_failures += 1;
                        error!(error = %e, "pose sink rejected estimated pose");
                        TickOutcome::SinkFailed {
                            pose,
                            error: e.to_string(),
                        }
                    }
                }
            }
            Err(reason) => {
                self.counters.suppressed += 1;
                self.enter_suppressed(reason.clone());
                TickOutcome::Suppressed(reason)
            }
        };
        self.outcome_tx.send_replace(Some(outcome.clone()));
        outcome
    }

    fn enter_publishing(&mut self) {
        if self.state != SchedulerState::Publishing {
            match &self.state {
                SchedulerState::Suppressed(previous) => {
                    info!(previous = %previous, "gating cleared; publishing resumed");
                }
                _ => info!(mode = %self.gate.selector().mode(), "publishing started"),
            }
            self.state = SchedulerState::Publishing;
        }
    }

    fn enter_suppressed(&mut self, reason: SuppressReason) {
        match &self.state {
            SchedulerState::Suppressed(previous) if previous.same_condition(&reason) => {
                debug!(reason = %reason, "publish suppressed");
            }
            _ => {
                warn!(
                    reason = %reason,
                    category = reason.category(),
                    feed = %reason.feed(),
                    "Stop publishing!"
                );
            }
        }
        self.state = SchedulerState::Suppressed(reason);
    }

    /// Tick every `period` until `shutdown` flips to `true`.
    ///
    /// Missed ticks are skipped rather than bursted.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            mode = %self.gate.selector().mode(),
            period_ms = self.period.as_millis() as u64,
            "publish scheduler started"
        );
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Instant::now(), Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(
            ticks = self.counters.ticks,
            published = self.counters.published,
            suppressed = self.counters.suppressed,
            "publish scheduler stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posest_kernel::{
        FeedRole, FeedStore, FreshnessTracker, SanityChecker, SourceSelector, policy_for,
    };
    use posest_types::{
        ConsistencyMetadata, FeedKind, FeedMessage, OperatingMode, PosestError, Quaternion, Vec3,
    };
    use std::sync::Mutex;

    const TIMEOUT: Duration = Duration::from_millis(500);

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<EstimatedPose>>,
        fail: bool,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<EstimatedPose> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PoseSink for RecordingSink {
        fn publish_estimated_pose(&self, pose: &EstimatedPose) -> Result<(), PosestError> {
            if self.fail {
                return Err(PosestError::Transport("link down".to_string()));
            }
            self.calls.lock().unwrap().push(*pose);
            Ok(())
        }
    }

    struct Harness {
        store: Arc<FeedStore>,
        sink: Arc<RecordingSink>,
        scheduler: PublishScheduler,
    }

    fn gate(mode: OperatingMode) -> (Arc<FeedStore>, PublishGate) {
        let selector = SourceSelector::new(mode);
        let store = Arc::new(FeedStore::new(selector.policy().feeds()));
        let gate = PublishGate::new(
            selector,
            FreshnessTracker::new(Arc::clone(&store), TIMEOUT),
            SanityChecker::with_default_rules(1.0),
        );
        (store, gate)
    }

    fn harness_with(mode: OperatingMode, sink: RecordingSink) -> Harness {
        let (store, gate) = gate(mode);
        let sink = Arc::new(sink);
        let scheduler =
            PublishScheduler::arm(true, gate, Arc::clone(&sink) as Arc<dyn PoseSink>, DEFAULT_TICK_PERIOD)
                .expect("mode must arm");
        Harness {
            store,
            sink,
            scheduler,
        }
    }

    fn harness(mode: OperatingMode) -> Harness {
        harness_with(mode, RecordingSink::default())
    }

    fn ingest(store: &FeedStore, kind: FeedKind, position: Vec3, at: Instant) {
        let msg = FeedMessage::pose(Utc::now(), position, Quaternion::identity());
        store.ingest(kind, msg.into(), at);
    }

    #[test]
    fn not_armed_when_publishing_disabled() {
        let (_, gate) = gate(OperatingMode::Mocap);
        let sink: Arc<dyn PoseSink> = Arc::new(RecordingSink::default());
        assert!(PublishScheduler::arm(false, gate, sink, DEFAULT_TICK_PERIOD).is_none());
    }

    #[test]
    fn not_armed_for_self_publishing_mode() {
        let (_, gate) = gate(OperatingMode::VisualOdom);
        let sink: Arc<dyn PoseSink> = Arc::new(RecordingSink::default());
        assert!(PublishScheduler::arm(true, gate, sink, DEFAULT_TICK_PERIOD).is_none());
    }

    #[test]
    fn starts_idle() {
        let h = harness(OperatingMode::Mocap);
        assert_eq!(h.scheduler.state(), &SchedulerState::IdleWaiting);
    }

    #[test]
    fn round_trip_single_source_publishes_unchanged() {
        for (mode, kind) in [
            (OperatingMode::Mocap, FeedKind::Mocap),
            (OperatingMode::LidarOdom, FeedKind::LidarOdom),
        ] {
            let mut h = harness(mode);
            let t0 = Instant::now();
            ingest(&h.store, kind, Vec3::new(1.0, 2.0, 3.0), t0);

            let stamp = Utc::now();
            let outcome = h.scheduler.tick(t0, stamp);
            assert!(outcome.is_published());

            let calls = h.sink.calls();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].position, Vec3::new(1.0, 2.0, 3.0));
            assert_eq!(calls[0].orientation, Quaternion::identity());
            assert_eq!(calls[0].stamp, stamp);
        }
    }

    #[test]
    fn lidar_ekf_without_ekf_reports_secondary_never_received() {
        let mut h = harness(OperatingMode::LidarOdomEkf);
        let t0 = Instant::now();
        ingest(&h.store, FeedKind::LidarOdom, Vec3::new(1.0, 0.0, 0.0), t0);

        let outcome = h.scheduler.tick(t0 + Duration::from_millis(50), Utc::now());
        let TickOutcome::Suppressed(reason) = outcome else {
            panic!("expected suppression, got {outcome:?}");
        };
        assert_eq!(
            reason,
            SuppressReason::NeverReceived {
                feed: FeedKind::SecondaryEkf,
                role: FeedRole::Secondary
            }
        );
        assert!(reason.to_string().starts_with("secondary feed never received"));
        assert!(h.sink.calls().is_empty());
        assert!(matches!(h.scheduler.state(), SchedulerState::Suppressed(_)));
    }

    #[test]
    fn mocap_publishes_within_first_tick() {
        let mut h = harness(OperatingMode::Mocap);
        let t0 = Instant::now();
        ingest(&h.store, FeedKind::Mocap, Vec3::new(0.0, 0.0, 1.0), t0);

        let outcome = h.scheduler.tick(t0 + Duration::from_millis(15), Utc::now());
        assert!(outcome.is_published());
        let calls = h.sink.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].position, Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn repeated_ticks_republish_same_pose_with_advancing_stamp() {
        let mut h = harness(OperatingMode::Mocap);
        let t0 = Instant::now();
        ingest(&h.store, FeedKind::Mocap, Vec3::new(0.5, -0.5, 1.5), t0);

        let base = Utc::now();
        for i in 0..5u32 {
            let now = t0 + DEFAULT_TICK_PERIOD * i;
            let stamp = base + chrono::Duration::milliseconds(20 * i64::from(i));
            assert!(h.scheduler.tick(now, stamp).is_published());
        }

        let calls = h.sink.calls();
        assert_eq!(calls.len(), 5);
        for pair in calls.windows(2) {
            assert_eq!(pair[0].position, pair[1].position);
            assert_eq!(pair[0].orientation, pair[1].orientation);
            assert!(pair[1].stamp > pair[0].stamp);
        }
    }

    /// For every mode and every fresh/stale/never combination of its
    /// mandatory feeds, a publish happens only when all are fresh.
    #[test]
    fn never_publishes_unless_every_mandatory_feed_is_fresh() {
        #[derive(Clone, Copy, Debug)]
        enum Cond {
            Fresh,
            Stale,
            Never,
        }
        const CONDS: [Cond; 3] = [Cond::Fresh, Cond::Stale, Cond::Never];

        for mode in OperatingMode::ALL {
            if policy_for(mode).self_publishing() {
                continue;
            }
            let kinds = policy_for(mode).feeds();
            let combos = CONDS.len().pow(kinds.len() as u32);
            for combo in 0..combos {
                let mut h = harness(mode);
                let now = Instant::now() + Duration::from_secs(10);
                let mut all_fresh = true;
                let mut code = combo;
                for &kind in &kinds {
                    let cond = CONDS[code % CONDS.len()];
                    code /= CONDS.len();
                    match cond {
                        Cond::Fresh => ingest(&h.store, kind, Vec3::zero(), now - Duration::from_millis(100)),
                        Cond::Stale => {
                            all_fresh = false;
                            ingest(&h.store, kind, Vec3::zero(), now - Duration::from_secs(2));
                        }
                        Cond::Never => all_fresh = false,
                    }
                }

                let outcome = h.scheduler.tick(now, Utc::now());
                assert_eq!(
                    outcome.is_published(),
                    all_fresh,
                    "mode {mode} combo {combo}: {outcome:?}"
                );
                assert_eq!(h.sink.calls().len(), usize::from(all_fresh));
            }
        }
    }

    #[test]
    fn invalid_checked_sample_suppresses_then_recovers() {
        let mut h = harness(OperatingMode::LidarOdom);
        let t0 = Instant::now();
        let degraded = FeedMessage::odometry(
            Utc::now(),
            Vec3::zero(),
            Quaternion::identity(),
            Vec3::zero(),
            Some(ConsistencyMetadata {
                degraded: true,
                ..Default::default()
            }),
        );
        h.store.ingest(FeedKind::LidarOdom, degraded.into(), t0);
        let outcome = h.scheduler.tick(t0, Utc::now());
        assert!(matches!(
            outcome,
            TickOutcome::Suppressed(ref r) if r.category() == "data invalid"
        ));

        ingest(&h.store, FeedKind::LidarOdom, Vec3::new(2.0, 0.0, 0.0), t0);
        assert!(h.scheduler.tick(t0, Utc::now()).is_published());
        assert_eq!(h.scheduler.state(), &SchedulerState::Publishing);
    }

    #[test]
    fn stale_feed_recovers_on_next_sample() {
        let mut h = harness(OperatingMode::Mocap);
        let t0 = Instant::now();
        ingest(&h.store, FeedKind::Mocap, Vec3::zero(), t0);
        let later = t0 + Duration::from_secs(1);
        assert!(!h.scheduler.tick(later, Utc::now()).is_published());

        ingest(&h.store, FeedKind::Mocap, Vec3::zero(), later);
        assert!(h.scheduler.tick(later, Utc::now()).is_published());

        let counters = h.scheduler.counters();
        assert_eq!(counters.ticks, 2);
        assert_eq!(counters.published, 1);
        assert_eq!(counters.suppressed, 1);
    }

    #[test]
    fn sink_failure_is_reported_not_fatal() {
        let mut h = harness_with(
            OperatingMode::Mocap,
            RecordingSink {
                fail: true,
                ..Default::default()
            },
        );
        let t0 = Instant::now();
        ingest(&h.store, FeedKind::Mocap, Vec3::zero(), t0);
        let outcome = h.scheduler.tick(t0, Utc::now());
        assert!(matches!(outcome, TickOutcome::SinkFailed { ref error, .. } if error.contains("link down")));
        assert_eq!(h.scheduler.counters().sink_failures, 1);
        // The next tick still runs.
        assert!(matches!(h.scheduler.tick(t0, Utc::now()), TickOutcome::SinkFailed { .. }));
    }

    #[test]
    fn sink_failure_never_enters_publishing() {
        let mut h = harness_with(
            OperatingMode::Mocap,
            RecordingSink {
                fail: true,
                ..Default::default()
            },
        );
        let t0 = Instant::now();
        ingest(&h.store, FeedKind::Mocap, Vec3::zero(), t0);
        h.scheduler.tick(t0, Utc::now());
        assert_eq!(h.scheduler.state(), &SchedulerState::IdleWaiting);
        assert_eq!(h.scheduler.counters().published, 0);
    }

    #[test]
    fn sink_failure_keeps_suppressed_state() {
        let mut h = harness_with(
            OperatingMode::Mocap,
            RecordingSink {
                fail: true,
                ..Default::default()
            },
        );
        let t0 = Instant::now();
        assert!(matches!(h.scheduler.tick(t0, Utc::now()), TickOutcome::Suppressed(_)));
        assert!(matches!(h.scheduler.state(), SchedulerState::Suppressed(_)));

        ingest(&h.store, FeedKind::Mocap, Vec3::zero(), t0);
        assert!(matches!(h.scheduler.tick(t0, Utc::now()), TickOutcome::SinkFailed { .. }));
        assert!(matches!(h.scheduler.state(), SchedulerState::Suppressed(_)));
    }

    #[test]
    fn outcomes_are_broadcast_on_watch_channel() {
        let mut h = harness(OperatingMode::Mocap);
        let rx = h.scheduler.subscribe();
        assert!(rx.borrow().is_none());

        let outcome = h.scheduler.tick(Instant::now(), Utc::now());
        assert_eq!(rx.borrow().as_ref(), Some(&outcome));
    }

    #[tokio::test]
    async fn run_ticks_until_shutdown() {
        let h = harness(OperatingMode::Mocap);
        ingest(&h.store, FeedKind::Mocap, Vec3::new(0.0, 0.0, 1.0), Instant::now());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler must stop on shutdown")
            .unwrap();

        assert!(!h.sink.calls().is_empty());
    }
}
