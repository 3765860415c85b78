//! [`ReferenceMirror`] – read-only mirror of the flight controller's own
//! state, kept for the status dump only.  Gating never consults it.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use posest_types::{BatteryState, EulerAngles, Quaternion, ReferenceUpdate, Vec3};

/// Attitude as received plus its Euler decomposition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceAttitude {
    pub orientation: Quaternion,
    pub euler: EulerAngles,
}

/// Each group is swapped independently as its message type arrives.
#[derive(Debug, Default)]
pub struct ReferenceMirror {
    position: ArcSwapOption<Vec3>,
    velocity: ArcSwapOption<Vec3>,
    attitude: ArcSwapOption<ReferenceAttitude>,
    battery: ArcSwapOption<BatteryState>,
}

/// Point-in-time copy of every mirrored group.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReferenceSnapshot {
    pub position: Option<Vec3>,
    pub velocity: Option<Vec3>,
    pub attitude: Option<ReferenceAttitude>,
    pub battery: Option<BatteryState>,
}

impl ReferenceMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the group that `update` belongs to.
    pub fn apply(&self, update: ReferenceUpdate) {
        match update {
            ReferenceUpdate::Position(p) => self.position.store(Some(Arc::new(p))),
            ReferenceUpdate::Velocity(v) => self.velocity.store(Some(Arc::new(v))),
            ReferenceUpdate::Attitude(q) => self.attitude.store(Some(Arc::new(ReferenceAttitude {
                orientation: q,
                euler: q.to_euler(),
            }))),
            ReferenceUpdate::Battery(b) => self.battery.store(Some(Arc::new(b))),
        }
    }

    pub fn snapshot(&self) -> ReferenceSnapshot {
        ReferenceSnapshot {
            position: self.position.load_full().map(|p| *p),
            velocity: self.velocity.load_full().map(|v| *v),
            attitude: self.attitude.load_full().map(|a| *a),
            battery: self.battery.load_full().map(|b| *b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mirror_has_no_groups() {
        assert_eq!(ReferenceMirror::new().snapshot(), ReferenceSnapshot::default());
    }

    #[test]
    fn groups_are_replaced_independently() {
        let mirror = ReferenceMirror::new();
        mirror.apply(ReferenceUpdate::Position(Vec3::new(1.0, 2.0, 3.0)));
        mirror.apply(ReferenceUpdate::Battery(BatteryState {
            voltage: Some(15.8),
            percentage: Some(0.76),
        }));
        mirror.apply(ReferenceUpdate::Position(Vec3::new(4.0, 5.0, 6.0)));

        let snap = mirror.snapshot();
        assert_eq!(snap.position, Some(Vec3::new(4.0, 5.0, 6.0)));
        assert_eq!(snap.velocity, None);
        assert_eq!(snap.attitude, None);
        assert_eq!(
            snap.battery,
            Some(BatteryState {
                voltage: Some(15.8),
                percentage: Some(0.76)
            })
        );
    }

    #[test]
    fn attitude_carries_euler_angles() {
        let mirror = ReferenceMirror::new();
        mirror.apply(ReferenceUpdate::Attitude(Quaternion::from_yaw(
            std::f64::consts::PI / 4.0,
        )));
        let attitude = mirror.snapshot().attitude.unwrap();
        assert!((attitude.euler.yaw_deg() - 45.0).abs() < 1e-6);
    }
}
