use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::constants;

/// Latest detection result of one monitored camera.
///
/// Snapshots are immutable once published. Writers go through
/// [`StateStore`], which swaps in a modified copy and notifies subscribers,
/// so a reader always sees every field from the same update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionState {
    /// Result of the last health probe or detection call.
    pub api_connected: bool,

    /// Whether the last detection pass reported at least one defect.
    pub error_detected: bool,

    /// Mean detection confidence in percent, rounded to two decimals.
    pub avg_confidence: f64,

    /// Inference duration reported by the server.
    pub inference_ms: f64,

    /// Inference backend reported by the server.
    pub provider: String,

    /// Annotated image of the last pass, or the source image when the server
    /// did not annotate.
    #[serde(skip)]
    pub image_with_errors: Option<Arc<[u8]>>,

    /// Wall-clock time of the last completed detection pass.
    pub last_detection_timestamp: Option<DateTime<FixedOffset>>,
}

impl Default for DetectionState {
    fn default() -> Self {
        Self {
            api_connected: false,
            error_detected: false,
            avg_confidence: 0.0,
            inference_ms: 0.0,
            provider: constants::UNKNOWN_PROVIDER.to_string(),
            image_with_errors: None,
            last_detection_timestamp: None,
        }
    }
}

impl DetectionState {
    /// ISO-8601 rendering of the last run, as exposed in entity attributes.
    pub fn last_run(&self) -> Option<String> {
        self.last_detection_timestamp.map(|ts| ts.to_rfc3339())
    }
}

/// Copy-on-write holder of a coordinator's [`DetectionState`].
///
/// Every write is applied atomically against the current snapshot, which
/// lets the probe loop and a detection pass interleave without dropping each
/// other's fields.
pub struct StateStore {
    tx: watch::Sender<Arc<DetectionState>>,
    revision: AtomicU64,
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(DetectionState::default()));
        Self {
            tx,
            revision: AtomicU64::new(0),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<DetectionState> {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Arc<DetectionState>> {
        self.tx.subscribe()
    }

    /// Number of snapshots published since construction.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Apply `update` to a copy of the current snapshot and publish it,
    /// notifying subscribers even if nothing changed.
    pub fn publish<F>(&self, update: F)
    where
        F: FnOnce(&mut DetectionState),
    {
        self.tx.send_modify(|current| {
            update(Arc::make_mut(current));
            self.revision.fetch_add(1, Ordering::AcqRel);
        });
    }

    /// Compare-and-set: apply `update` only if `condition` holds on the
    /// current snapshot. Returns whether the update was published.
    pub fn publish_if<C, F>(&self, condition: C, update: F) -> bool
    where
        C: FnOnce(&DetectionState) -> bool,
        F: FnOnce(&mut DetectionState),
    {
        self.tx.send_if_modified(|current| {
            if !condition(current) {
                return false;
            }
            update(Arc::make_mut(current));
            self.revision.fetch_add(1, Ordering::AcqRel);
            true
        })
    }

    /// Seed the detection flag and timestamp from a restored entity state,
    /// unless a timestamp is already known.
    pub fn seed_detection(
        &self,
        error_detected: bool,
        last_detection_timestamp: Option<DateTime<FixedOffset>>,
    ) -> bool {
        self.publish_if(
            |state| state.last_detection_timestamp.is_none(),
            |state| {
                state.error_detected = error_detected;
                state.last_detection_timestamp = last_detection_timestamp;
            },
        )
    }

    /// Seed the average confidence while it is still zero.
    pub fn seed_avg_confidence(&self, avg_confidence: f64) -> bool {
        self.publish_if(
            |state| state.avg_confidence == 0.0,
            |state| state.avg_confidence = avg_confidence,
        )
    }

    /// Seed the inference duration while it is still zero.
    pub fn seed_inference_ms(&self, inference_ms: f64) -> bool {
        self.publish_if(
            |state| state.inference_ms == 0.0,
            |state| state.inference_ms = inference_ms,
        )
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
