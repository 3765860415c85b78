//! [`FeedIngestor`] – turns inbound bus events into feed snapshots.
//!
//! Ingestion performs no validation: every message for a configured feed
//! replaces that feed's snapshot with its arrival instant.  Judging the
//! sample is the publish gate's job.

use std::sync::Arc;
use std::time::Instant;

use posest_kernel::{FeedStore, ReferenceMirror};
use posest_middleware::TopicReceiver;
use posest_types::{Event, EventPayload, FeedKind, FeedMessage, PoseSample, ReferenceUpdate};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

/// Writes inbound samples into the shared [`FeedStore`] and
/// [`ReferenceMirror`].  Cheap to clone; every clone writes to the same
/// state.
#[derive(Debug, Clone)]
pub struct FeedIngestor {
    store: Arc<FeedStore>,
    reference: Arc<ReferenceMirror>,
}

impl FeedIngestor {
    pub fn new(store: Arc<FeedStore>, reference: Arc<ReferenceMirror>) -> Self {
        Self { store, reference }
    }

    /// Store `message` as the latest sample of `kind`, arrived now.
    pub fn ingest_feed(&self, kind: FeedKind, message: FeedMessage) -> bool {
        self.ingest_feed_at(kind, message, Instant::now())
    }

    /// Store `message` as the latest sample of `kind`, arrived at
    /// `arrived_at`.  Returns `false` when the active mode does not
    /// configure `kind`.
    pub fn ingest_feed_at(&self, kind: FeedKind, message: FeedMessage, arrived_at: Instant) -> bool {
        let sample = PoseSample::from(message);
        let position = sample.position();
        let stored = self.store.ingest(kind, sample, arrived_at);
        if stored {
            trace!(feed = %kind, x = position.x, y = position.y, z = position.z, "sample ingested");
        } else {
            debug!(feed = %kind, "dropping sample for unconfigured feed");
        }
        stored
    }

    pub fn ingest_reference(&self, update: ReferenceUpdate) {
        self.reference.apply(update);
    }

    /// Route one bus event.  Payloads that are not inbound data are ignored.
    pub fn handle_event(&self, event: Event) {
        match event.payload {
            EventPayload::Feed { kind, message } => {
                self.ingest_feed(kind, message);
            }
            EventPayload::Reference(update) => self.ingest_reference(update),
            EventPayload::VisionPose(_) => {}
        }
    }

    /// Drain `receiver` until the lane closes or `shutdown` flips to `true`.
    pub async fn run(self, mut receiver: TopicReceiver, mut shutdown: watch::Receiver<bool>) {
        let topic = receiver.topic();
        info!(?topic, "ingestor started");
        loop {
            tokio::select! {
                result = receiver.recv() => {
                    match result {
                        Ok(event) => self.handle_event(event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(?topic, lagged_by = n, "ingestor lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(?topic, "ingestor stopped");
    }
}
