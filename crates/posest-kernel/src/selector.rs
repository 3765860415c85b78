//! [`SourceSelector`] – static per-mode feed selection.
//!
//! Every [`OperatingMode`] maps to one [`ModePolicy`] chosen at startup by
//! [`policy_for`].  The policy names:
//!
//! - the **publish candidate**: the single feed whose latest sample is
//!   forwarded;
//! - the **mandatory-fresh set**: primary first, then the secondary EKF in
//!   combined modes;
//! - the **checked feed**: the only feed run through the sanity checker;
//! - whether the mode's source publishes to the flight controller on its own,
//!   in which case no scheduler is armed.
//!
//! | Mode | Mandatory | Candidate | Checked |
//! |---|---|---|---|
//! | `Mocap` | mocap | mocap | mocap |
//! | `VisualOdom` (self-publishing) | visual_odom | visual_odom | visual_odom |
//! | `LidarOdom` | lidar_odom | lidar_odom | lidar_odom |
//! | `LidarOdomEkf` | lidar_odom, secondary_ekf | secondary_ekf | lidar_odom |
//! | `ExternalOdomEkf` | visual_odom, secondary_ekf | secondary_ekf | visual_odom |
//! | `MocapEkf` | mocap, secondary_ekf | mocap | mocap |
//!
//! The secondary EKF feed is never sanity-checked, even where it is the
//! candidate.

use std::fmt;

use posest_types::{FeedKind, OperatingMode};

/// Role a mandatory feed plays within its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedRole {
    Primary,
    Secondary,
}

impl fmt::Display for FeedRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedRole::Primary => f.write_str("primary"),
            FeedRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// A feed that must be fresh before publishing is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MandatoryFeed {
    pub kind: FeedKind,
    pub role: FeedRole,
}

impl MandatoryFeed {
    pub const fn primary(kind: FeedKind) -> Self {
        Self {
            kind,
            role: FeedRole::Primary,
        }
    }

    pub const fn secondary(kind: FeedKind) -> Self {
        Self {
            kind,
            role: FeedRole::Secondary,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ModePolicy
// ────────────────────────────────────────────────────────────────────────────

/// Strategy object describing one operating mode.
pub trait ModePolicy: Send + Sync + fmt::Debug {
    fn mode(&self) -> OperatingMode;

    /// The feed whose sample is published.
    fn candidate(&self) -> FeedKind;

    /// Feeds that must be fresh, primary first.
    fn mandatory(&self) -> &[MandatoryFeed];

    /// The feed run through the sanity checker.
    fn checked_feed(&self) -> FeedKind;

    /// `true` when the source already pushes its pose to the flight
    /// controller and nothing must be republished.
    fn self_publishing(&self) -> bool {
        false
    }

    /// Every feed this mode ingests.
    fn feeds(&self) -> Vec<FeedKind> {
        self.mandatory().iter().map(|m| m.kind).collect()
    }
}

/// Modes driven by one feed.
#[derive(Debug, Clone)]
pub struct SingleSource {
    mode: OperatingMode,
    feed: [MandatoryFeed; 1],
    self_publishing: bool,
}

impl SingleSource {
    pub fn new(mode: OperatingMode, kind: FeedKind, self_publishing: bool) -> Self {
        Self {
            mode,
            feed: [MandatoryFeed::primary(kind)],
            self_publishing,
        }
    }
}

impl ModePolicy for SingleSource {
    fn mode(&self) -> OperatingMode {
        self.mode
    }

    fn candidate(&self) -> FeedKind {
        self.feed[0].kind
    }

    fn mandatory(&self) -> &[MandatoryFeed] {
        &self.feed
    }

    fn checked_feed(&self) -> FeedKind {
        self.feed[0].kind
    }

    fn self_publishing(&self) -> bool {
        self.self_publishing
    }
}

/// Modes pairing a primary feed with the secondary EKF estimate.
#[derive(Debug, Clone)]
pub struct PrimaryWithEkf {
    mode: OperatingMode,
    feeds: [MandatoryFeed; 2],
    candidate: FeedKind,
}

impl PrimaryWithEkf {
    /// `candidate` must be either `primary` or [`FeedKind::SecondaryEkf`].
    pub fn new(mode: OperatingMode, primary: FeedKind, candidate: FeedKind) -> Self {
        debug_assert!(candidate == primary || candidate == FeedKind::SecondaryEkf);
        Self {
            mode,
            feeds: [
                MandatoryFeed::primary(primary),
                MandatoryFeed::secondary(FeedKind::SecondaryEkf),
            ],
            candidate,
        }
    }
}

impl ModePolicy for PrimaryWithEkf {
    fn mode(&self) -> OperatingMode {
        self.mode
    }

    fn candidate(&self) -> FeedKind {
        self.candidate
    }

    fn mandatory(&self) -> &[MandatoryFeed] {
        &self.feeds
    }

    fn checked_feed(&self) -> FeedKind {
        self.feeds[0].kind
    }
}

/// Build the policy for `mode`.
pub fn policy_for(mode: OperatingMode) -> Box<dyn ModePolicy> {
    match mode {
        OperatingMode::Mocap => Box::new(SingleSource::new(mode, FeedKind::Mocap, false)),
        OperatingMode::VisualOdom => Box::new(SingleSource::new(mode, FeedKind::VisualOdom, true)),
        OperatingMode::LidarOdom => Box::new(SingleSource::new(mode, FeedKind::LidarOdom, false)),
        OperatingMode::LidarOdomEkf => Box::new(PrimaryWithEkf::new(
            mode,
            FeedKind::LidarOdom,
            FeedKind::SecondaryEkf,
        )),
        OperatingMode::ExternalOdomEkf => Box::new(PrimaryWithEkf::new(
            mode,
            FeedKind::VisualOdom,
            FeedKind::SecondaryEkf,
        )),
        OperatingMode::MocapEkf => {
            Box::new(PrimaryWithEkf::new(mode, FeedKind::Mocap, FeedKind::Mocap))
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SourceSelector
// ────────────────────────────────────────────────────────────────────────────

/// Result of a selection: which feed to publish and which must be fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'a> {
    pub candidate: FeedKind,
    pub checked: FeedKind,
    pub mandatory: &'a [MandatoryFeed],
}

/// Holds the startup-selected [`ModePolicy`].
///
/// # Example
///
/// ```
/// use posest_kernel::selector::{FeedRole, SourceSelector};
/// use posest_types::{FeedKind, OperatingMode};
///
/// let selector = SourceSelector::new(OperatingMode::LidarOdomEkf);
/// let selection = selector.select();
/// assert_eq!(selection.candidate, FeedKind::SecondaryEkf);
/// assert_eq!(selection.mandatory.len(), 2);
/// assert_eq!(selection.mandatory[1].role, FeedRole::Secondary);
/// ```
#[derive(Debug)]
pub struct SourceSelector {
    policy: Box<dyn ModePolicy>,
}

impl SourceSelector {
    pub fn new(mode: OperatingMode) -> Self {
        Self::from_policy(policy_for(mode))
    }

    pub fn from_policy(policy: Box<dyn ModePolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &dyn ModePolicy {
        self.policy.as_ref()
    }

    pub fn mode(&self) -> OperatingMode {
        self.policy.mode()
    }

    /// Candidate and mandatory-fresh set; depends on the mode only.
    pub fn select(&self) -> Selection<'_> {
        Selection {
            candidate: self.policy.candidate(),
            checked: self.policy.checked_feed(),
            mandatory: self.policy.mandatory(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_source_modes_have_one_mandatory_feed() {
        for (mode, kind) in [
            (OperatingMode::Mocap, FeedKind::Mocap),
            (OperatingMode::VisualOdom, FeedKind::VisualOdom),
            (OperatingMode::LidarOdom, FeedKind::LidarOdom),
        ] {
            let selector = SourceSelector::new(mode);
            let sel = selector.select();
            assert_eq!(sel.candidate, kind);
            assert_eq!(sel.checked, kind);
            assert_eq!(sel.mandatory, &[MandatoryFeed::primary(kind)]);
        }
    }

    #[test]
    fn combined_modes_require_primary_then_ekf() {
        for (mode, primary) in [
            (OperatingMode::LidarOdomEkf, FeedKind::LidarOdom),
            (OperatingMode::ExternalOdomEkf, FeedKind::VisualOdom),
            (OperatingMode::MocapEkf, FeedKind::Mocap),
        ] {
            let selector = SourceSelector::new(mode);
            let sel = selector.select();
            assert_eq!(
                sel.mandatory,
                &[
                    MandatoryFeed::primary(primary),
                    MandatoryFeed::secondary(FeedKind::SecondaryEkf)
                ]
            );
            assert_eq!(sel.checked, primary);
        }
    }

    #[test]
    fn odometry_ekf_modes_publish_the_ekf_estimate() {
        assert_eq!(
            SourceSelector::new(OperatingMode::LidarOdomEkf).select().candidate,
            FeedKind::SecondaryEkf
        );
        assert_eq!(
            SourceSelector::new(OperatingMode::ExternalOdomEkf).select().candidate,
            FeedKind::SecondaryEkf
        );
        assert_eq!(
            SourceSelector::new(OperatingMode::MocapEkf).select().candidate,
            FeedKind::Mocap
        );
    }

    #[test]
    fn selection_is_a_pure_function_of_mode() {
        for mode in OperatingMode::ALL {
            let a = SourceSelector::new(mode);
            let b = SourceSelector::new(mode);
            assert_eq!(a.select(), a.select());
            assert_eq!(a.select(), b.select());
            assert_eq!(a.mode(), mode);
        }
    }

    #[test]
    fn candidate_and_checked_feed_are_always_mandatory() {
        for mode in OperatingMode::ALL {
            let selector = SourceSelector::new(mode);
            let sel = selector.select();
            assert!(sel.mandatory.iter().any(|m| m.kind == sel.candidate));
            assert!(sel.mandatory.iter().any(|m| m.kind == sel.checked));
            assert_ne!(sel.checked, FeedKind::SecondaryEkf);
        }
    }

    #[test]
    fn only_visual_odom_is_self_publishing() {
        for mode in OperatingMode::ALL {
            let policy = policy_for(mode);
            assert_eq!(policy.self_publishing(), mode == OperatingMode::VisualOdom);
        }
    }

    #[test]
    fn feeds_lists_every_mandatory_kind() {
        assert_eq!(
            policy_for(OperatingMode::MocapEkf).feeds(),
            vec![FeedKind::Mocap, FeedKind::SecondaryEkf]
        );
        assert_eq!(policy_for(OperatingMode::LidarOdom).feeds(), vec![FeedKind::LidarOdom]);
    }

    #[test]
    fn feed_role_display() {
        assert_eq!(FeedRole::Primary.to_string(), "primary");
        assert_eq!(FeedRole::Secondary.to_string(), "secondary");
    }
}
