//! [`FeedStore`] – lock-free per-feed state container.
//!
//! Each configured feed owns one slot holding an immutable
//! [`FeedSnapshot`] (the latest sample plus its arrival instant).  Ingestion
//! replaces the whole snapshot with a single atomic swap, so a reader never
//! observes a sample from one message paired with the arrival time of
//! another.
//!
//! The set of feeds is fixed at construction from the active mode policy.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use posest_types::{FeedKind, PoseSample};

/// The latest sample of one feed together with the instant it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub sample: PoseSample,
    pub arrived_at: Instant,
}

/// State of a single feed.  Empty until the first message arrives.
#[derive(Debug)]
pub struct FeedState {
    kind: FeedKind,
    slot: ArcSwapOption<FeedSnapshot>,
}

impl FeedState {
    fn new(kind: FeedKind) -> Self {
        Self {
            kind,
            slot: ArcSwapOption::empty(),
        }
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    /// Replace the snapshot.
    pub fn store(&self, sample: PoseSample, arrived_at: Instant) {
        self.slot
            .store(Some(Arc::new(FeedSnapshot { sample, arrived_at })));
    }

    /// Load the current snapshot, if any message has been received.
    pub fn load(&self) -> Option<Arc<FeedSnapshot>> {
        self.slot.load_full()
    }

    pub fn last_arrival(&self) -> Option<Instant> {
        self.load().map(|s| s.arrived_at)
    }
}

/// Container of every configured [`FeedState`], shared by ingestors and the
/// publish scheduler.
///
/// # Example
///
/// ```
/// use std::time::Instant;
/// use chrono::Utc;
/// use posest_kernel::feed_store::FeedStore;
/// use posest_types::{FeedKind, FeedMessage, Quaternion, Vec3};
///
/// let store = FeedStore::new([FeedKind::Mocap]);
/// assert!(store.snapshot(FeedKind::Mocap).is_none());
///
/// let msg = FeedMessage::pose(Utc::now(), Vec3::new(0.0, 0.0, 1.0), Quaternion::identity());
/// assert!(store.ingest(FeedKind::Mocap, msg.into(), Instant::now()));
/// assert!(store.snapshot(FeedKind::Mocap).is_some());
///
/// // Feeds outside the configured set are rejected.
/// let other = FeedMessage::pose(Utc::now(), Vec3::zero(), Quaternion::identity());
/// assert!(!store.ingest(FeedKind::LidarOdom, other.into(), Instant::now()));
/// ```
#[derive(Debug, Default)]
pub struct FeedStore {
    feeds: Vec<FeedState>,
}

impl FeedStore {
    /// Create a store with one empty slot per distinct kind in `kinds`.
    pub fn new(kinds: impl IntoIterator<Item = FeedKind>) -> Self {
        let mut feeds: Vec<FeedState> = Vec::new();
        for kind in kinds {
            if !feeds.iter().any(|f| f.kind == kind) {
                feeds.push(FeedState::new(kind));
            }
        }
        Self { feeds }
    }

    /// The configured feed of `kind`, if any.
    pub fn feed(&self, kind: FeedKind) -> Option<&FeedState> {
        self.feeds.iter().find(|f| f.kind == kind)
    }

    /// Store `sample` as the latest value of `kind`.
    ///
    /// Returns `false` (and stores nothing) when `kind` is not configured.
    pub fn ingest(&self, kind: FeedKind, sample: PoseSample, arrived_at: Instant) -> bool {
        match self.feed(kind) {
            Some(feed) => {
                feed.store(sample, arrived_at);
                true
            }
            None => false,
        }
    }

    /// Latest snapshot of `kind`; `None` when unconfigured or never received.
    pub fn snapshot(&self, kind: FeedKind) -> Option<Arc<FeedSnapshot>> {
        self.feed(kind).and_then(FeedState::load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use posest_types::{FeedMessage, Quaternion, Vec3};
    use std::thread;
    use std::time::Duration;

    fn sample_at(x: f64) -> PoseSample {
        FeedMessage::pose(Utc::now(), Vec3::new(x, x, x), Quaternion::identity()).into()
    }

    #[test]
    fn new_store_is_empty() {
        let store = FeedStore::new([FeedKind::LidarOdom, FeedKind::SecondaryEkf]);
        assert!(store.snapshot(FeedKind::LidarOdom).is_none());
        assert!(store.snapshot(FeedKind::SecondaryEkf).is_none());
        assert_eq!(
            store.feeds.iter().map(|f| f.kind).collect::<Vec<_>>(),
            vec![FeedKind::LidarOdom, FeedKind::SecondaryEkf]
        );
    }

    #[test]
    fn duplicate_kinds_are_collapsed() {
        let store = FeedStore::new([FeedKind::Mocap, FeedKind::Mocap]);
        assert_eq!(store.feeds.len(), 1);
    }

    #[test]
    fn ingest_replaces_previous_snapshot() {
        let store = FeedStore::new([FeedKind::Mocap]);
        let t0 = Instant::now();
        store.ingest(FeedKind::Mocap, sample_at(1.0), t0);
        let t1 = t0 + Duration::from_millis(10);
        store.ingest(FeedKind::Mocap, sample_at(2.0), t1);

        let snap = store.snapshot(FeedKind::Mocap).unwrap();
        assert_eq!(snap.sample.position(), Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(snap.arrived_at, t1);
        assert_eq!(store.feed(FeedKind::Mocap).unwrap().last_arrival(), Some(t1));
    }

    #[test]
    fn unconfigured_feed_is_rejected() {
        let store = FeedStore::new([FeedKind::Mocap]);
        assert!(!store.ingest(FeedKind::SecondaryEkf, sample_at(1.0), Instant::now()));
        assert!(store.snapshot(FeedKind::SecondaryEkf).is_none());
    }

    #[test]
    fn loaded_snapshot_survives_later_ingest() {
        let store = FeedStore::new([FeedKind::Mocap]);
        store.ingest(FeedKind::Mocap, sample_at(1.0), Instant::now());
        let held = store.snapshot(FeedKind::Mocap).unwrap();
        store.ingest(FeedKind::Mocap, sample_at(5.0), Instant::now());
        // The held snapshot is immutable; the store has moved on.
        assert_eq!(held.sample.position(), Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(
            store.snapshot(FeedKind::Mocap).unwrap().sample.position(),
            Vec3::new(5.0, 5.0, 5.0)
        );
    }

    #[test]
    fn concurrent_reader_never_sees_torn_snapshot() {
        // Every sample written has position (i, i, i) and a stamp derived
        // from i; a reader must always see matching fields.
        let store = Arc::new(FeedStore::new([FeedKind::LidarOdom]));
        let base = Instant::now();

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..2_000u64 {
                    let at = base + Duration::from_micros(i);
                    store.ingest(FeedKind::LidarOdom, sample_at(i as f64), at);
                }
            })
        };

        for _ in 0..2_000 {
            if let Some(snap) = store.snapshot(FeedKind::LidarOdom) {
                let p = snap.sample.position();
                assert_eq!(p.x, p.y);
                assert_eq!(p.y, p.z);
                let expected = base + Duration::from_micros(p.x as u64);
                assert_eq!(snap.arrived_at, expected);
            }
        }
        writer.join().unwrap();
    }
}
