//! `posest-middleware` – Transport plumbing
//!
//! Moves feed samples, reference telemetry and approved poses between the
//! outside world and the arbiter without caring what they mean.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`adapter`] – the outbound [`PoseSink`] seam and its bus-backed
//!   implementation.
//! - [`rosbridge`] – WebSocket client that decodes ROS messages from a
//!   `rosbridge_server` onto the bus and publishes vision poses back.

pub mod adapter;
pub mod bus;
pub mod rosbridge;

pub use adapter::{BusPoseSink, PoseSink};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use rosbridge::{RosbridgeClient, RosbridgeTopics};
