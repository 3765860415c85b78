//! [`FreshnessTracker`] – per-feed staleness monitor.
//!
//! A feed is *fresh* when its latest snapshot arrived no more than `timeout`
//! before the instant being evaluated.  A feed that has never produced a
//! sample is never fresh; that is a normal start-up condition, not an error.
//!
//! The boundary is inclusive: a sample exactly `timeout` old is still fresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use posest_types::FeedKind;

use crate::feed_store::{FeedSnapshot, FeedStore};

/// Default freshness timeout.
pub const DEFAULT_FRESHNESS_TIMEOUT: Duration = Duration::from_millis(500);

/// Freshness of a single feed at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Latest sample is within the timeout.
    Fresh { age: Duration },
    /// Latest sample is older than the timeout.
    Stale { age: Duration },
    /// No sample has ever been received.
    NeverReceived,
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh { .. })
    }
}

/// Classify an optional arrival instant against `timeout`.
///
/// An arrival later than `now` (an ingest racing the evaluating tick) counts
/// as age zero.
pub fn classify(last_arrival: Option<Instant>, now: Instant, timeout: Duration) -> Freshness {
    match last_arrival {
        None => Freshness::NeverReceived,
        Some(at) => {
            let age = now.saturating_duration_since(at);
            if age > timeout {
                Freshness::Stale { age }
            } else {
                Freshness::Fresh { age }
            }
        }
    }
}

/// Answers "is feed X fresh as of `now`?" against a single configured
/// timeout.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::{Duration, Instant};
/// use chrono::Utc;
/// use posest_kernel::{FeedStore, FreshnessTracker};
/// use posest_types::{FeedKind, FeedMessage, Quaternion, Vec3};
///
/// let store = Arc::new(FeedStore::new([FeedKind::Mocap]));
/// let tracker = FreshnessTracker::new(Arc::clone(&store), Duration::from_millis(500));
///
/// let t0 = Instant::now();
/// assert!(!tracker.is_fresh(FeedKind::Mocap, t0));
///
/// let msg = FeedMessage::pose(Utc::now(), Vec3::zero(), Quaternion::identity());
/// store.ingest(FeedKind::Mocap, msg.into(), t0);
/// assert!(tracker.is_fresh(FeedKind::Mocap, t0 + Duration::from_millis(100)));
/// assert!(!tracker.is_fresh(FeedKind::Mocap, t0 + Duration::from_millis(600)));
/// ```
#[derive(Debug, Clone)]
pub struct FreshnessTracker {
    store: Arc<FeedStore>,
    timeout: Duration,
}

impl FreshnessTracker {
    pub fn new(store: Arc<FeedStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn store(&self) -> &Arc<FeedStore> {
        &self.store
    }

    /// Freshness of `feed` at `now` using the configured timeout.
    ///
    /// Unconfigured feeds report [`Freshness::NeverReceived`].
    pub fn check(&self, feed: FeedKind, now: Instant) -> Freshness {
        let last_arrival = self.store.feed(feed).and_then(|f| f.last_arrival());
        classify(last_arrival, now, self.timeout)
    }

    /// Freshness of an already-loaded snapshot.
    pub fn check_snapshot(&self, snapshot: Option<&FeedSnapshot>, now: Instant) -> Freshness {
        classify(snapshot.map(|s| s.arrived_at), now, self.timeout)
    }

    pub fn is_fresh(&self, feed: FeedKind, now: Instant) -> bool {
        self.check(feed, now).is_fresh()
    }
}
