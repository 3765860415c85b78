//! The outbound seam.
//!
//! The scheduler never speaks to the flight controller directly.  It hands
//! approved poses to a [`PoseSink`]; [`BusPoseSink`] places them on the
//! [`Topic::VisionPose`] lane, where the rosbridge client (or any other
//! adapter) picks them up and translates them into its own protocol.

use std::sync::Arc;

use posest_types::{EstimatedPose, Event, EventPayload, PosestError};

use crate::bus::{EventBus, Topic};

/// Event source recorded on every outbound vision pose.
pub const VISION_POSE_SOURCE: &str = "posest-runtime::scheduler";

/// Destination for poses approved by the publish gate.
///
/// Called from inside the scheduler tick, so implementations must not block.
pub trait PoseSink: Send + Sync {
    fn publish_estimated_pose(&self, pose: &EstimatedPose) -> Result<(), PosestError>;
}

/// [`PoseSink`] that forwards onto the internal [`EventBus`].
#[derive(Clone, Debug)]
pub struct BusPoseSink {
    bus: Arc<EventBus>,
}

impl BusPoseSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl PoseSink for BusPoseSink {
    fn publish_estimated_pose(&self, pose: &EstimatedPose) -> Result<(), PosestError> {
        let event = Event::new(VISION_POSE_SOURCE, EventPayload::VisionPose(*pose));
        self.bus.publish_to(Topic::VisionPose, event).map(|_| ())
    }
}
