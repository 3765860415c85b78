//! [`PublishGate`] – the single decision point before a pose is published.
//!
//! [`PublishGate::evaluate`] applies two checks in order:
//!
//! 1. **Freshness** ([`FreshnessTracker`]): every mandatory feed of the
//!    selection, primary first, must have a sample no older than the timeout.
//!    The first failure yields [`SuppressReason::NeverReceived`] or
//!    [`SuppressReason::StaleFeed`].
//! 2. **Sanity** ([`SanityChecker`]): the mode's checked feed must pass every
//!    rule, otherwise [`SuppressReason::InvalidSample`].
//!
//! When both pass the candidate's snapshot is returned.  Each feed is loaded
//! once per evaluation, so freshness, sanity and the forwarded value are all
//! judged on the same snapshot.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//! use chrono::Utc;
//! use posest_kernel::{FeedStore, FreshnessTracker, PublishGate, SanityChecker, SourceSelector};
//! use posest_types::{FeedKind, FeedMessage, OperatingMode, Quaternion, Vec3};
//!
//! let selector = SourceSelector::new(OperatingMode::Mocap);
//! let store = Arc::new(FeedStore::new(selector.policy().feeds()));
//! let gate = PublishGate::new(
//!     selector,
//!     FreshnessTracker::new(Arc::clone(&store), Duration::from_millis(500)),
//!     SanityChecker::with_default_rules(1.0),
//! );
//!
//! let t0 = Instant::now();
//! assert!(gate.evaluate(t0).is_err());
//!
//! let msg = FeedMessage::pose(Utc::now(), Vec3::new(0.0, 0.0, 1.0), Quaternion::identity());
//! store.ingest(FeedKind::Mocap, msg.into(), t0);
//! let snapshot = gate.evaluate(t0 + Duration::from_millis(15)).unwrap();
//! assert_eq!(snapshot.sample.position(), Vec3::new(0.0, 0.0, 1.0));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use posest_types::FeedKind;
use tracing::trace;

use crate::feed_store::FeedSnapshot;
use crate::freshness::{Freshness, FreshnessTracker};
use crate::sanity::{InvalidSample, SanityChecker};
use crate::selector::{FeedRole, SourceSelector};

/// Why a tick did not publish.  Suppression is expected during start-up and
/// sensor dropouts; it is reported, never escalated.
#[derive(Debug, Clone, PartialEq)]
pub enum SuppressReason {
    /// A mandatory feed has produced no sample since startup.
    NeverReceived { feed: FeedKind, role: FeedRole },
    /// A mandatory feed's latest sample is older than the timeout.
    StaleFeed {
        feed: FeedKind,
        role: FeedRole,
        age: Duration,
    },
    /// The checked feed's latest sample failed a sanity rule.
    InvalidSample { feed: FeedKind, cause: InvalidSample },
}

impl SuppressReason {
    /// Coarse category: `"no data received"` or `"data invalid"`.
    pub fn category(&self) -> &'static str {
        match self {
            SuppressReason::NeverReceived { .. } | SuppressReason::StaleFeed { .. } => {
                "no data received"
            }
            SuppressReason::InvalidSample { .. } => "data invalid",
        }
    }

    pub fn feed(&self) -> FeedKind {
        match self {
            SuppressReason::NeverReceived { feed, .. }
            | SuppressReason::StaleFeed { feed, .. }
            | SuppressReason::InvalidSample { feed, .. } => *feed,
        }
    }

    /// `true` when `other` describes the same condition, ignoring how stale
    /// the feed has become.
    pub fn same_condition(&self, other: &SuppressReason) -> bool {
        match (self, other) {
            (
                SuppressReason::StaleFeed { feed: a, role: ra, .. },
                SuppressReason::StaleFeed { feed: b, role: rb, .. },
            ) => a == b && ra == rb,
            (
                SuppressReason::InvalidSample { feed: a, cause: ca },
                SuppressReason::InvalidSample { feed: b, cause: cb },
            ) => a == b && ca.rule == cb.rule,
            _ => self == other,
        }
    }
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressReason::NeverReceived { feed, role } => {
                write!(f, "{role} feed never received ({feed})")
            }
            SuppressReason::StaleFeed { feed, role, age } => {
                write!(f, "{role} feed stale ({feed}, last sample {} ms ago)", age.as_millis())
            }
            SuppressReason::InvalidSample { feed, cause } => {
                write!(f, "data invalid ({feed}, {cause})")
            }
        }
    }
}

/// Combines selection, freshness and sanity into one verdict per tick.
#[derive(Debug)]
pub struct PublishGate {
    selector: SourceSelector,
    freshness: FreshnessTracker,
    sanity: SanityChecker,
}

impl PublishGate {
    pub fn new(selector: SourceSelector, freshness: FreshnessTracker, sanity: SanityChecker) -> Self {
        Self {
            selector,
            freshness,
            sanity,
        }
    }

    pub fn selector(&self) -> &SourceSelector {
        &self.selector
    }

    pub fn freshness(&self) -> &FreshnessTracker {
        &self.freshness
    }

    pub fn sanity(&self) -> &SanityChecker {
        &self.sanity
    }

    /// Decide whether the candidate may be published at `now`.
    ///
    /// # Errors
    ///
    /// The first failing check, as a [`SuppressReason`].
    pub fn evaluate(&self, now: Instant) -> Result<Arc<FeedSnapshot>, SuppressReason> {
        let selection = self.selector.select();
        let store = self.freshness.store();

        let mut loaded: Vec<(FeedKind, Arc<FeedSnapshot>)> =
            Vec::with_capacity(selection.mandatory.len());
        for mandatory in selection.mandatory {
            let snapshot = store.snapshot(mandatory.kind);
            match self.freshness.check_snapshot(snapshot.as_deref(), now) {
                Freshness::Fresh { age } => {
                    trace!(feed = %mandatory.kind, age_ms = age.as_millis() as u64, "feed fresh");
                }
                Freshness::Stale { age } => {
                    return Err(SuppressReason::StaleFeed {
                        feed: mandatory.kind,
                        role: mandatory.role,
                        age,
                    });
                }
                Freshness::NeverReceived => {
                    return Err(SuppressReason::NeverReceived {
                        feed: mandatory.kind,
                        role: mandatory.role,
                    });
                }
            }
            if let Some(snapshot) = snapshot {
                loaded.push((mandatory.kind, snapshot));
            }
        }

        let find = |kind: FeedKind| {
            loaded
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, s)| Arc::clone(s))
        };

        if let Some(checked) = find(selection.checked) {
            self.sanity
                .verify(&checked.sample)
                .map_err(|cause| SuppressReason::InvalidSample {
                    feed: selection.checked,
                    cause,
                })?;
        }

        // Candidates outside the mandatory set fall back to a direct load.
        match find(selection.candidate).or_else(|| store.snapshot(selection.candidate)) {
            Some(snapshot) => Ok(snapshot),
            None => Err(SuppressReason::NeverReceived {
                feed: selection.candidate,
                role: FeedRole::Primary,
            }),
        }
    }
}
