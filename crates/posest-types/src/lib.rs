use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod geometry;

pub use geometry::{EulerAngles, Quaternion, Vec3};

/// One independent source of pose estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Motion-capture system (e.g. Vicon via VRPN).
    Mocap,
    /// Visual(-inertial) odometry (e.g. a tracking camera or VINS).
    VisualOdom,
    /// Lidar-inertial odometry.
    LidarOdom,
    /// Secondary filtered estimate produced by an IMU EKF.
    SecondaryEkf,
}

impl FeedKind {
    /// Every feed kind, in a stable order.
    pub const ALL: [FeedKind; 4] = [
        FeedKind::Mocap,
        FeedKind::VisualOdom,
        FeedKind::LidarOdom,
        FeedKind::SecondaryEkf,
    ];

    /// Short label used in logs and the status dump.
    pub fn label(&self) -> &'static str {
        match self {
            FeedKind::Mocap => "mocap",
            FeedKind::VisualOdom => "visual_odom",
            FeedKind::LidarOdom => "lidar_odom",
            FeedKind::SecondaryEkf => "secondary_ekf",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Startup-selected sensor configuration.
///
/// The numeric indices match the historical `sensor_type` parameter:
/// `0` mocap, `1` visual odometry, `2` lidar odometry, `3` lidar + EKF,
/// `4` external (VINS) odometry + EKF, `5` mocap + EKF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Mocap,
    VisualOdom,
    LidarOdom,
    LidarOdomEkf,
    ExternalOdomEkf,
    MocapEkf,
}

impl OperatingMode {
    pub const ALL: [OperatingMode; 6] = [
        OperatingMode::Mocap,
        OperatingMode::VisualOdom,
        OperatingMode::LidarOdom,
        OperatingMode::LidarOdomEkf,
        OperatingMode::ExternalOdomEkf,
        OperatingMode::MocapEkf,
    ];

    /// Historical numeric index of this mode.
    pub fn index(self) -> u8 {
        match self {
            OperatingMode::Mocap => 0,
            OperatingMode::VisualOdom => 1,
            OperatingMode::LidarOdom => 2,
            OperatingMode::LidarOdomEkf => 3,
            OperatingMode::ExternalOdomEkf => 4,
            OperatingMode::MocapEkf => 5,
        }
    }

    /// Inverse of [`OperatingMode::index`].
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.index() == index)
    }

    pub fn name(self) -> &'static str {
        match self {
            OperatingMode::Mocap => "mocap",
            OperatingMode::VisualOdom => "visual_odom",
            OperatingMode::LidarOdom => "lidar_odom",
            OperatingMode::LidarOdomEkf => "lidar_odom_ekf",
            OperatingMode::ExternalOdomEkf => "external_odom_ekf",
            OperatingMode::MocapEkf => "mocap_ekf",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperatingMode {
    type Err = PosestError;

    /// Accepts either the snake_case name or the numeric index.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(index) = s.parse::<u8>() {
            return Self::from_index(index)
                .ok_or_else(|| PosestError::Config(format!("unknown operating mode index {index}")));
        }
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PosestError::Config(format!("unknown operating mode '{s}'")))
    }
}

/// Leading covariance entry that marks an estimate as unavailable.
pub const UNAVAILABLE_COVARIANCE: f64 = -1.0;

/// Consistency metadata reported by sources that carry it (odometry
/// covariance and an explicit degraded flag).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConsistencyMetadata {
    /// Diagonal of the 6x6 pose covariance: x, y, z, roll, pitch, yaw.
    pub covariance_diagonal: [f64; 6],
    /// Set when the source flags a degraded or lost track.
    pub degraded: bool,
}

impl ConsistencyMetadata {
    /// Extract the diagonal from a row-major 6x6 covariance.
    ///
    /// A first entry of `-1` is the ROS marker for an unavailable estimate
    /// (emitted by odometry sources on track loss); it yields degraded
    /// metadata with a zero diagonal.  Returns `None` for arrays that are not
    /// exactly 36 entries long.
    pub fn from_covariance(covariance: &[f64]) -> Option<Self> {
        if covariance.len() != 36 {
            return None;
        }
        if covariance[0] == UNAVAILABLE_COVARIANCE {
            return Some(Self {
                covariance_diagonal: [0.0; 6],
                degraded: true,
            });
        }
        let mut covariance_diagonal = [0.0; 6];
        for (i, slot) in covariance_diagonal.iter_mut().enumerate() {
            *slot = covariance[i * 7];
        }
        Some(Self {
            covariance_diagonal,
            degraded: false,
        })
    }

    /// Largest of the x/y/z position variances.
    pub fn max_position_variance(&self) -> f64 {
        self.covariance_diagonal[..3]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// A raw inbound sample as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMessage {
    /// Source timestamp from the message header.
    pub stamp: DateTime<Utc>,
    pub position: Vec3,
    pub orientation: Quaternion,
    /// Odometry twist; carried but never used for gating or publishing.
    pub velocity: Option<Vec3>,
    pub consistency: Option<ConsistencyMetadata>,
}

impl FeedMessage {
    /// A pose-only message (motion capture) with no consistency metadata.
    pub fn pose(stamp: DateTime<Utc>, position: Vec3, orientation: Quaternion) -> Self {
        Self {
            stamp,
            position,
            orientation,
            velocity: None,
            consistency: None,
        }
    }

    /// An odometry message.
    pub fn odometry(
        stamp: DateTime<Utc>,
        position: Vec3,
        orientation: Quaternion,
        velocity: Vec3,
        consistency: Option<ConsistencyMetadata>,
    ) -> Self {
        Self {
            stamp,
            position,
            orientation,
            velocity: Some(velocity),
            consistency,
        }
    }
}

/// An ingested pose sample.  Immutable: each inbound message produces a new
/// value that replaces the previous one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    position: Vec3,
    orientation: Quaternion,
    euler: EulerAngles,
    stamp: DateTime<Utc>,
    consistency: Option<ConsistencyMetadata>,
}

impl PoseSample {
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Quaternion {
        self.orientation
    }

    /// Euler angles derived from the orientation at ingest time.
    pub fn euler(&self) -> EulerAngles {
        self.euler
    }

    pub fn stamp(&self) -> DateTime<Utc> {
        self.stamp
    }

    pub fn consistency(&self) -> Option<&ConsistencyMetadata> {
        self.consistency.as_ref()
    }
}

impl From<FeedMessage> for PoseSample {
    fn from(msg: FeedMessage) -> Self {
        Self {
            position: msg.position,
            orientation: msg.orientation,
            euler: msg.orientation.to_euler(),
            stamp: msg.stamp,
            consistency: msg.consistency,
        }
    }
}

/// The pose handed to the flight controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatedPose {
    /// Time of the publishing tick, not the source sample time.
    pub stamp: DateTime<Utc>,
    pub position: Vec3,
    pub orientation: Quaternion,
}

/// Battery state as reported by the flight controller.  `None` marks a
/// field the battery monitor does not measure.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BatteryState {
    pub voltage: Option<f32>,
    /// Charge fraction in `[0, 1]`.
    pub percentage: Option<f32>,
}

/// One update of the flight controller's self-reported state.  Each variant
/// replaces only its own group in the reference mirror.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReferenceUpdate {
    Position(Vec3),
    Velocity(Vec3),
    Attitude(Quaternion),
    Battery(BatteryState),
}

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "posest-middleware::rosbridge"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh envelope stamped now.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A raw sample for one pose feed.
    Feed { kind: FeedKind, message: FeedMessage },
    /// Flight-controller reference telemetry.
    Reference(ReferenceUpdate),
    /// A pose approved for the flight controller.
    VisionPose(EstimatedPose),
}

/// Error type for the fallible edges of the system: configuration, codecs,
/// channels and transport.  Gating outcomes are never errors.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum PosestError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Parsing Error: {0}")]
    Parsing(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}
