use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One rigid body in a tracking snapshot.
///
/// `position` and `orientation` are present exactly when the body was seen
/// this frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedBody {
    pub id: i32,
    #[serde(rename = "isTracked")]
    pub is_tracked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<[f64; 3]>,
    /// Row-major 3x3 rotation matrix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<[f64; 9]>,
}

impl TrackedBody {
    pub fn untracked(id: i32) -> Self {
        Self {
            id,
            is_tracked: false,
            position: None,
            orientation: None,
        }
    }
}

/// Immutable pose snapshot handed from the tracking producer to the frame
/// pacer. Replaced wholesale, never mutated in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseSnapshot {
    pub frame: u64,
    pub time: f64,
    pub bodies: Vec<TrackedBody>,
}

impl PoseSnapshot {
    /// Sentinel served before the first publish, and forever when tracking
    /// integration is disabled.
    pub fn empty() -> Self {
        Self {
            frame: 0,
            time: 0.0,
            bodies: Vec::new(),
        }
    }
}

/// Latest-value cache between the tracking producer and the frame pacer.
///
/// `publish` swaps in a new `Arc` under a write lock held only for the swap;
/// `latest` hands out the current `Arc`. Readers always see a complete
/// snapshot, either the previous one or the newest.
pub struct PoseStore {
    latest: RwLock<Arc<PoseSnapshot>>,
}

impl PoseStore {
    pub fn new() -> Self {
        Self {
            latest: RwLock::new(Arc::new(PoseSnapshot::empty())),
        }
    }

    pub fn publish(&self, snapshot: PoseSnapshot) {
        *self.latest.write() = Arc::new(snapshot);
    }

    pub fn latest(&self) -> Arc<PoseSnapshot> {
        Arc::clone(&self.latest.read())
    }
}

impl Default for PoseStore {
    fn default() -> Self {
        Self::new()
    }
}
