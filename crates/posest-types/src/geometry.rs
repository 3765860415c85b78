//! Minimal 3-D geometry primitives shared by every posest crate.
//!
//! Feeds deliver positions in metres and orientations as unit quaternions
//! (w, x, y, z convention).  Euler angles are derived purely for diagnostic
//! display; nothing in the gating path depends on them.

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector (position in metres or velocity in m/s).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// `true` when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `yaw` radians about +Z.
    pub fn from_yaw(yaw: f64) -> Self {
        let half = yaw * 0.5;
        Self::new(half.cos(), 0.0, 0.0, half.sin())
    }

    /// `true` when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Convert to roll/pitch/yaw (intrinsic Z-Y-X).
    ///
    /// Pitch is clamped to ±π/2 when the input is slightly off-unit so that
    /// gimbal-lock inputs never produce NaN.
    pub fn to_euler(&self) -> EulerAngles {
        let Self { w, x, y, z } = *self;

        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));

        EulerAngles { roll, pitch, yaw }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// EulerAngles
// ────────────────────────────────────────────────────────────────────────────

/// Roll, pitch and yaw in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EulerAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl EulerAngles {
    /// Yaw in degrees, as shown in the status dump.
    pub fn yaw_deg(&self) -> f64 {
        self.yaw.to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    const EPS: f64 = 1e-9;

    #[test]
    fn identity_has_zero_euler() {
        let e = Quaternion::identity().to_euler();
        assert!(e.roll.abs() < EPS);
        assert!(e.pitch.abs() < EPS);
        assert!(e.yaw.abs() < EPS);
    }

    #[test]
    fn yaw_quaternion_round_trips_through_euler() {
        let e = Quaternion::from_yaw(FRAC_PI_2).to_euler();
        assert!((e.yaw - FRAC_PI_2).abs() < EPS);
        assert!((e.yaw_deg() - 90.0).abs() < 1e-6);
        assert!(e.roll.abs() < EPS);
        assert!(e.pitch.abs() < EPS);
    }

    #[test]
    fn pure_roll_is_extracted() {
        let q = Quaternion::new(FRAC_PI_4.cos(), FRAC_PI_4.sin(), 0.0, 0.0);
        let e = q.to_euler();
        assert!((e.roll - FRAC_PI_2).abs() < EPS);
        assert!(e.yaw.abs() < EPS);
    }

    #[test]
    fn gimbal_lock_input_does_not_produce_nan() {
        // Slightly over-unit pitch of +90°.
        let q = Quaternion::new(0.7072, 0.0, 0.7072, 0.0);
        let e = q.to_euler();
        assert!(e.pitch.is_finite());
        assert!((e.pitch - FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn finiteness_checks() {
        assert!(Vec3::new(1.0, 2.0, 3.0).is_finite());
        assert!(!Vec3::new(f64::NAN, 0.0, 0.0).is_finite());
        assert!(!Quaternion::new(1.0, f64::INFINITY, 0.0, 0.0).is_finite());
    }
}
