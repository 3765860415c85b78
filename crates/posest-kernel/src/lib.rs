//! `posest-kernel` – Gating & Selection
//!
//! Holds the shared per-feed state and decides, for any instant, whether the
//! configured publish candidate may be forwarded.  Nothing here performs I/O.
//!
//! # Modules
//!
//! - [`feed_store`] – [`FeedStore`][feed_store::FeedStore]: one atomically
//!   swapped [`FeedSnapshot`][feed_store::FeedSnapshot] per configured feed.
//! - [`reference`] – [`ReferenceMirror`][reference::ReferenceMirror]:
//!   diagnostic mirror of the flight controller's own state.
//! - [`freshness`] – [`FreshnessTracker`][freshness::FreshnessTracker]:
//!   answers "has feed X been heard from within the timeout?".
//! - [`sanity`] – [`SanityChecker`][sanity::SanityChecker]: rule engine over
//!   a sample's consistency metadata.
//! - [`selector`] – [`SourceSelector`][selector::SourceSelector] and the
//!   per-mode [`ModePolicy`][selector::ModePolicy] implementations.
//! - [`gate`] – [`PublishGate`][gate::PublishGate]: freshness then sanity,
//!   yielding either the candidate snapshot or a
//!   [`SuppressReason`][gate::SuppressReason].

pub mod feed_store;
pub mod freshness;
pub mod gate;
pub mod reference;
pub mod sanity;
pub mod selector;

pub use feed_store::{FeedSnapshot, FeedState, FeedStore};
pub use freshness::{DEFAULT_FRESHNESS_TIMEOUT, Freshness, FreshnessTracker};
pub use gate::{PublishGate, SuppressReason};
pub use reference::{ReferenceAttitude, ReferenceMirror, ReferenceSnapshot};
pub use sanity::{
    CovarianceRule, DEFAULT_MAX_POSITION_VARIANCE, DegradedFlagRule, FiniteRule, InvalidSample, SanityChecker, SanityRule,
};
pub use selector::{FeedRole, MandatoryFeed, ModePolicy, Selection, SourceSelector, policy_for};
