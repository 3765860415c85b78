//! `posest-runtime` – The publish loop
//!
//! Wires the kernel's gating to live data: ingestors fill the feed store from
//! the bus, the scheduler ticks at a fixed rate and forwards approved poses to
//! a [`PoseSink`][posest_middleware::PoseSink], and the status reporter dumps
//! a human-readable summary for the operator.
//!
//! # Modules
//!
//! - [`ingest`] – [`FeedIngestor`][ingest::FeedIngestor]: bus events into
//!   feed snapshots and the reference mirror.
//! - [`scheduler`] – [`PublishScheduler`][scheduler::PublishScheduler]: the
//!   50 Hz IdleWaiting / Suppressed / Publishing state machine.
//! - [`status`] – [`StatusReporter`][status::StatusReporter]: periodic status
//!   dump.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber with an optional OTLP exporter.

pub mod ingest;
pub mod scheduler;
pub mod status;
pub mod telemetry;

pub use ingest::FeedIngestor;
pub use scheduler::{DEFAULT_TICK_PERIOD, PublishScheduler, SchedulerState, TickCounters, TickOutcome};
pub use status::{DEFAULT_STATUS_INTERVAL, FeedStatus, StatusReport, StatusReporter};
pub use telemetry::{TracerProviderGuard, init_tracing};

// Callers assembling a scheduler need the gate without a direct kernel
// dependency.
pub use posest_kernel::PublishGate;
