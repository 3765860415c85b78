//! Thin client for a `rosbridge_server` WebSocket.
//!
//! [`RosbridgeClient`]:
//!
//! 1. **Subscribes** to the active mode's feed topics and to the flight
//!    controller's reference topics, decodes each inbound JSON message and
//!    publishes it on the [`Topic::Feeds`] or [`Topic::Reference`] lane.
//!
//! 2. **Advertises** the vision-pose topic (when publishing is enabled) and
//!    forwards every [`EventPayload::VisionPose`] from [`Topic::VisionPose`]
//!    as a `geometry_msgs/PoseStamped` publish frame.
//!
//! The client only handles serialisation and transport.  It never inspects
//! what the poses mean.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use posest_types::{
    BatteryState, ConsistencyMetadata, EstimatedPose, Event, EventPayload, FeedKind, FeedMessage,
    OperatingMode, PosestError, Quaternion, ReferenceUpdate, Vec3,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic, TopicReceiver};

/// Event source recorded on every event this client publishes.
pub const ROSBRIDGE_SOURCE: &str = "posest-middleware::rosbridge";

/// Delay before reconnecting after the WebSocket drops.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

// ────────────────────────────────────────────────────────────────────────────
// Topic configuration
// ────────────────────────────────────────────────────────────────────────────

/// ROS topic names, one per feed and reference stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosbridgeTopics {
    pub mocap: String,
    /// Tracking-camera odometry (visual odometry mode).
    pub visual_odom: String,
    /// External visual-inertial odometry (VINS + EKF mode).
    pub external_odom: String,
    pub lidar_odom: String,
    pub secondary_ekf: String,
    pub reference_pose: String,
    pub reference_velocity: String,
    pub reference_imu: String,
    pub reference_battery: String,
    pub vision_pose: String,
}

impl Default for RosbridgeTopics {
    fn default() -> Self {
        Self {
            mocap: "/vrpn_client_node/rywang/pose".to_string(),
            visual_odom: "camera/odom/sample_throttled".to_string(),
            external_odom: "/vins_fusion/odometry".to_string(),
            lidar_odom: "Odometry".to_string(),
            secondary_ekf: "imu_ekf/odom".to_string(),
            reference_pose: "mavros/local_position/pose".to_string(),
            reference_velocity: "mavros/local_position/velocity_local".to_string(),
            reference_imu: "mavros/imu/data".to_string(),
            reference_battery: "mavros/battery".to_string(),
            vision_pose: "mavros/vision_pose/pose".to_string(),
        }
    }
}

impl RosbridgeTopics {
    /// Topic carrying `kind` under `mode`.  The visual-odometry feed is read
    /// from the external odometry topic in [`OperatingMode::ExternalOdomEkf`].
    pub fn feed_topic(&self, mode: OperatingMode, kind: FeedKind) -> &str {
        match kind {
            FeedKind::Mocap => &self.mocap,
            FeedKind::VisualOdom if mode == OperatingMode::ExternalOdomEkf => &self.external_odom,
            FeedKind::VisualOdom => &self.visual_odom,
            FeedKind::LidarOdom => &self.lidar_odom,
            FeedKind::SecondaryEkf => &self.secondary_ekf,
        }
    }

    /// Every subscription needed for `feeds` under `mode`, plus the four
    /// reference streams.
    pub fn subscriptions(&self, mode: OperatingMode, feeds: &[FeedKind]) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = feeds
            .iter()
            .map(|&kind| Subscription {
                topic: self.feed_topic(mode, kind).to_string(),
                stream: if kind == FeedKind::Mocap {
                    Stream::Feed(kind, RosMessageType::PoseStamped)
                } else {
                    Stream::Feed(kind, RosMessageType::Odometry)
                },
            })
            .collect();
        subs.extend([
            Subscription {
                topic: self.reference_pose.clone(),
                stream: Stream::ReferencePose,
            },
            Subscription {
                topic: self.reference_velocity.clone(),
                stream: Stream::ReferenceVelocity,
            },
            Subscription {
                topic: self.reference_imu.clone(),
                stream: Stream::ReferenceAttitude,
            },
            Subscription {
                topic: self.reference_battery.clone(),
                stream: Stream::ReferenceBattery,
            },
        ]);
        subs
    }
}

/// ROS message types the client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosMessageType {
    PoseStamped,
    Odometry,
    TwistStamped,
    Imu,
    BatteryState,
}

impl RosMessageType {
    pub fn type_name(&self) -> &'static str {
        match self {
            RosMessageType::PoseStamped => "geometry_msgs/PoseStamped",
            RosMessageType::Odometry => "nav_msgs/Odometry",
            RosMessageType::TwistStamped => "geometry_msgs/TwistStamped",
            RosMessageType::Imu => "sensor_msgs/Imu",
            RosMessageType::BatteryState => "sensor_msgs/BatteryState",
        }
    }
}

/// What an inbound topic feeds into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Feed(FeedKind, RosMessageType),
    ReferencePose,
    ReferenceVelocity,
    ReferenceAttitude,
    ReferenceBattery,
}

impl Stream {
    pub fn message_type(&self) -> RosMessageType {
        match self {
            Stream::Feed(_, ty) => *ty,
            Stream::ReferencePose => RosMessageType::PoseStamped,
            Stream::ReferenceVelocity => RosMessageType::TwistStamped,
            Stream::ReferenceAttitude => RosMessageType::Imu,
            Stream::ReferenceBattery => RosMessageType::BatteryState,
        }
    }

    fn lane(&self) -> Topic {
        match self {
            Stream::Feed(..) => Topic::Feeds,
            _ => Topic::Reference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub stream: Stream,
}

// ────────────────────────────────────────────────────────────────────────────
// Wire messages
// ────────────────────────────────────────────────────────────────────────────

/// `std_msgs/Time`.  Accepts both the ROS 1 (`secs`/`nsecs`) and the ROS 2
/// (`sec`/`nanosec`) field names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RosTime {
    #[serde(alias = "sec", default)]
    pub secs: i64,
    #[serde(alias = "nanosec", default)]
    pub nsecs: u32,
}

impl RosTime {
    pub fn from_datetime(t: DateTime<Utc>) -> Self {
        Self {
            secs: t.timestamp(),
            nsecs: t.timestamp_subsec_nanos(),
        }
    }

    /// Zero stamps (unset by the publisher) fall back to `fallback`.
    pub fn to_datetime_or(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        if self.secs == 0 && self.nsecs == 0 {
            return fallback;
        }
        Utc.timestamp_opt(self.secs, self.nsecs)
            .single()
            .unwrap_or(fallback)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub stamp: RosTime,
    #[serde(default)]
    pub frame_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quaternion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    #[serde(default)]
    pub header: Header,
    pub pose: Pose,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PoseWithCovariance {
    pub pose: Pose,
    #[serde(default)]
    pub covariance: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Twist {
    #[serde(default)]
    pub linear: Vec3,
    #[serde(default)]
    pub angular: Vec3,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TwistWithCovariance {
    #[serde(default)]
    pub twist: Twist,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Odometry {
    #[serde(default)]
    pub header: Header,
    pub pose: PoseWithCovariance,
    #[serde(default)]
    pub twist: TwistWithCovariance,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TwistStamped {
    #[serde(default)]
    pub header: Header,
    pub twist: Twist,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Imu {
    #[serde(default)]
    pub header: Header,
    pub orientation: Quaternion,
}

/// `sensor_msgs/BatteryState`.  Unmeasured fields are NaN on the ROS side
/// and arrive as `null`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Battery {
    #[serde(default)]
    pub voltage: Option<f32>,
    #[serde(default)]
    pub percentage: Option<f32>,
}

/// Decode one rosbridge `msg` object for `stream` into a bus payload.
///
/// # Errors
///
/// [`PosestError::Parsing`] when `msg` does not match the stream's type.
pub fn decode(stream: Stream, msg: Value, received_at: DateTime<Utc>) -> Result<EventPayload, PosestError> {
    fn parse<T: for<'de> Deserialize<'de>>(msg: Value, ty: RosMessageType) -> Result<T, PosestError> {
        serde_json::from_value(msg)
            .map_err(|e| PosestError::Parsing(format!("{}: {e}", ty.type_name())))
    }

    let ty = stream.message_type();
    let payload = match stream {
        Stream::Feed(kind, RosMessageType::PoseStamped) => {
            let m: PoseStamped = parse(msg, ty)?;
            EventPayload::Feed {
                kind,
                message: FeedMessage::pose(
                    m.header.stamp.to_datetime_or(received_at),
                    m.pose.position,
                    m.pose.orientation,
                ),
            }
        }
        Stream::Feed(kind, RosMessageType::Odometry) => {
            let m: Odometry = parse(msg, ty)?;
            EventPayload::Feed {
                kind,
                message: FeedMessage::odometry(
                    m.header.stamp.to_datetime_or(received_at),
                    m.pose.pose.position,
                    m.pose.pose.orientation,
                    m.twist.twist.linear,
                    ConsistencyMetadata::from_covariance(&m.pose.covariance),
                ),
            }
        }
        Stream::Feed(kind, other) => {
            return Err(PosestError::Parsing(format!(
                "feed {kind} cannot be carried by {}",
                other.type_name()
            )));
        }
        Stream::ReferencePose => {
            let m: PoseStamped = parse(msg, ty)?;
            EventPayload::Reference(ReferenceUpdate::Position(m.pose.position))
        }
        Stream::ReferenceVelocity => {
            let m: TwistStamped = parse(msg, ty)?;
            EventPayload::Reference(ReferenceUpdate::Velocity(m.twist.linear))
        }
        Stream::ReferenceAttitude => {
            let m: Imu = parse(msg, ty)?;
            EventPayload::Reference(ReferenceUpdate::Attitude(m.orientation))
        }
        Stream::ReferenceBattery => {
            let m: Battery = parse(msg, ty)?;
            EventPayload::Reference(ReferenceUpdate::Battery(BatteryState {
                voltage: m.voltage.filter(|v| v.is_finite()),
                percentage: m.percentage.filter(|p| p.is_finite()),
            }))
        }
    };
    Ok(payload)
}

// ────────────────────────────────────────────────────────────────────────────
// Protocol frames
// ────────────────────────────────────────────────────────────────────────────

pub fn subscribe_frame(sub: &Subscription) -> Value {
    json!({
        "op": "subscribe",
        "topic": sub.topic,
        "type": sub.stream.message_type().type_name(),
    })
}

pub fn advertise_frame(topic: &str) -> Value {
    json!({
        "op": "advertise",
        "topic": topic,
        "type": RosMessageType::PoseStamped.type_name(),
    })
}

/// `publish` frame carrying `pose` as a `geometry_msgs/PoseStamped`.
pub fn vision_pose_frame(topic: &str, pose: &EstimatedPose) -> Result<Value, PosestError> {
    let msg = PoseStamped {
        header: Header {
            stamp: RosTime::from_datetime(pose.stamp),
            frame_id: String::new(),
        },
        pose: Pose {
            position: pose.position,
            orientation: pose.orientation,
        },
    };
    let msg = serde_json::to_value(msg).map_err(|e| PosestError::Serialization(e.to_string()))?;
    Ok(json!({ "op": "publish", "topic": topic, "msg": msg }))
}

/// Inbound frame envelope.  Only `publish` frames carry data.
#[derive(Debug, Deserialize)]
struct IncomingFrame {
    op: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    msg: Option<Value>,
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// WebSocket client bridging a rosbridge server and the internal bus.
pub struct RosbridgeClient {
    url: String,
    bus: Arc<EventBus>,
    subscriptions: Vec<Subscription>,
    /// Present when vision poses must be forwarded.  Subscribed at
    /// construction so the pose sink has a listener while disconnected.
    vision: Option<(String, TopicReceiver)>,
}

impl RosbridgeClient {
    pub fn new(
        url: impl Into<String>,
        bus: Arc<EventBus>,
        subscriptions: Vec<Subscription>,
        vision_pose_topic: Option<String>,
    ) -> Self {
        let vision = vision_pose_topic.map(|topic| (topic, bus.subscribe_to(Topic::VisionPose)));
        Self {
            url: url.into(),
            bus,
            subscriptions,
            vision,
        }
    }

    /// Decode one inbound text frame and publish it on the bus.
    ///
    /// Returns `Ok(None)` for frames that carry nothing for us (status ops,
    /// unknown topics) and the lane written to otherwise.
    pub fn handle_text(&self, text: &str) -> Result<Option<Topic>, PosestError> {
        let frame: IncomingFrame =
            serde_json::from_str(text).map_err(|e| PosestError::Parsing(e.to_string()))?;
        if frame.op != "publish" {
            debug!(op = %frame.op, "ignoring rosbridge frame");
            return Ok(None);
        }
        let (Some(topic), Some(msg)) = (frame.topic, frame.msg) else {
            return Err(PosestError::Parsing("publish frame without topic or msg".to_string()));
        };
        let Some(sub) = self.subscriptions.iter().find(|s| s.topic == topic) else {
            debug!(%topic, "message for unsubscribed topic");
            return Ok(None);
        };

        let payload = decode(sub.stream, msg, Utc::now())?;
        let lane = sub.stream.lane();
        if let Err(e) = self.bus.publish_to(lane, Event::new(ROSBRIDGE_SOURCE, payload)) {
            debug!(%topic, error = %e, "no listener for decoded message");
        }
        Ok(Some(lane))
    }

    /// Keep a session alive until `shutdown` flips to `true`, reconnecting
    /// after [`RECONNECT_DELAY`] whenever the connection drops.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.run_session(&mut shutdown).await {
                Ok(()) => return,
                Err(e) => warn!(url = %self.url, error = %e, "rosbridge session ended"),
            }
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = shutdown.changed() => return,
            }
            if *shutdown.borrow() {
                return;
            }
        }
    }

    /// One connection.  `Ok(())` means shutdown was requested.
    async fn run_session(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), PosestError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| PosestError::Transport(format!("connect {}: {e}", self.url)))?;
        info!(url = %self.url, subscriptions = self.subscriptions.len(), "rosbridge connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let mut opening: Vec<Value> = self.subscriptions.iter().map(subscribe_frame).collect();
        if let Some((topic, rx)) = self.vision.as_mut() {
            opening.push(advertise_frame(topic));
            // Poses queued while disconnected are stale by now.
            let mut dropped = 0usize;
            while rx.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                debug!(dropped, "discarded vision poses queued while disconnected");
            }
        }
        for frame in opening {
            ws_tx
                .send(Message::Text(frame.to_string().into()))
                .await
                .map_err(|e| PosestError::Transport(e.to_string()))?;
        }

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_text(text.as_str()) {
                                warn!(error = %e, "dropping undecodable rosbridge message");
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(PosestError::Transport("connection closed".to_string()));
                        }
                        Some(Err(e)) => return Err(PosestError::Transport(e.to_string())),
                        _ => {}
                    }
                }
                event = async {
                    match self.vision.as_mut() {
                        Some((_, rx)) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match event {
                        Ok(Event { payload: EventPayload::VisionPose(pose), .. }) => {
                            if let Some((topic, _)) = &self.vision {
                                let frame = vision_pose_frame(topic, &pose)?;
                                ws_tx
                                    .send(Message::Text(frame.to_string().into()))
                                    .await
                                    .map_err(|e| PosestError::Transport(e.to_string()))?;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged_by = n, "vision pose forwarder lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => self.vision = None,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        info!(url = %self.url, "rosbridge client stopped");
                        return Ok(());
                    }
                }
            }
        }
    }
}
