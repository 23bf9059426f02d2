use std::collections::HashMap;

use cavesync_core::ClientId;
use parking_lot::Mutex;

/// Client registry and readiness barrier.
///
/// Tracks, per connected client, the last frame it acknowledged, and decides
/// when the previous frame may be presented. The barrier is edge-triggered:
/// each frame value is released at most once, on whichever event completes the
/// round — an ack, a disconnect, or the pacer advancing onto a frame whose
/// predecessor is already fully acknowledged.
///
/// The lock is held only for the lookup/update; callers broadcast the release
/// after it is gone.
pub struct FrameSync {
    state: Mutex<SyncState>,
}

#[derive(Default)]
struct SyncState {
    /// Last acknowledged frame per client, `None` until the first ack.
    clients: HashMap<ClientId, Option<u64>>,
    /// Frame currently gating presentation (`counter - 1`).
    target: Option<u64>,
    /// Frame already released, so repeated acks cannot double-fire.
    released: Option<u64>,
}

impl SyncState {
    /// Edge-triggered barrier check. `Some(frame)` means "broadcast
    /// displayFrame for this frame now". An empty room never fires: there is
    /// nothing to synchronize and no audience for the broadcast.
    fn evaluate(&mut self) -> Option<u64> {
        let target = self.target?;
        if self.released == Some(target) || self.clients.is_empty() {
            return None;
        }
        if self.clients.values().all(|acked| *acked == Some(target)) {
            self.released = Some(target);
            Some(target)
        } else {
            None
        }
    }
}

impl FrameSync {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SyncState::default()),
        }
    }

    /// A client joined; it can block the barrier from this point forward.
    pub fn on_connect(&self, id: ClientId) {
        self.state.lock().clients.insert(id, None);
    }

    /// A client left. Its pending ack no longer gates anyone, so this can
    /// complete the current round.
    pub fn on_disconnect(&self, id: &ClientId) -> Option<u64> {
        let mut state = self.state.lock();
        state.clients.remove(id);
        state.evaluate()
    }

    /// Record a readiness claim. Unknown ids (messages from connections that
    /// already went away) are ignored, and a client can only move its
    /// acknowledged frame forward.
    pub fn on_ready(&self, id: &ClientId, frame: u64) -> Option<u64> {
        let mut state = self.state.lock();
        match state.clients.get_mut(id) {
            Some(acked) => *acked = Some(acked.map_or(frame, |prev| prev.max(frame))),
            None => {
                tracing::debug!(client_id = %id, frame, "frameReady from unregistered client");
                return None;
            }
        }
        state.evaluate()
    }

    /// The pacer advanced its counter to `frame`; presentation now gates on
    /// `frame - 1`. The new target may already be fully acknowledged.
    pub fn begin_frame(&self, frame: u64) -> Option<u64> {
        let mut state = self.state.lock();
        state.target = frame.checked_sub(1);
        state.evaluate()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().clients.is_empty()
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }
}

impl Default for FrameSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_clients(sync: &FrameSync) -> (ClientId, ClientId) {
        let c1 = ClientId::new();
        let c2 = ClientId::new();
        sync.on_connect(c1.clone());
        sync.on_connect(c2.clone());
        (c1, c2)
    }

    #[test]
    fn empty_room_never_fires() {
        let sync = FrameSync::new();
        assert_eq!(sync.begin_frame(1), None);
        assert_eq!(sync.begin_frame(2), None);
        assert!(sync.is_empty());
    }

    #[test]
    fn fires_once_all_clients_ack_regardless_of_order() {
        let sync = FrameSync::new();
        let (c1, c2) = two_clients(&sync);

        assert_eq!(sync.begin_frame(1), None);
        assert_eq!(sync.on_ready(&c2, 0), None);
        assert_eq!(sync.on_ready(&c1, 0), Some(0));
    }

    #[test]
    fn repeated_acks_do_not_double_fire() {
        let sync = FrameSync::new();
        let (c1, c2) = two_clients(&sync);

        sync.begin_frame(1);
        sync.on_ready(&c1, 0);
        assert_eq!(sync.on_ready(&c2, 0), Some(0));

        // Same round, already released.
        assert_eq!(sync.on_ready(&c1, 0), None);
        assert_eq!(sync.on_ready(&c2, 0), None);
    }

    #[test]
    fn disconnect_of_straggler_completes_round() {
        let sync = FrameSync::new();
        let (c1, c2) = two_clients(&sync);

        sync.begin_frame(1);
        assert_eq!(sync.on_ready(&c1, 0), None);
        assert_eq!(sync.on_disconnect(&c2), Some(0));
        assert_eq!(sync.client_count(), 1);
    }

    #[test]
    fn disconnect_leaving_empty_room_does_not_fire() {
        let sync = FrameSync::new();
        let c1 = ClientId::new();
        sync.on_connect(c1.clone());

        sync.begin_frame(1);
        assert_eq!(sync.on_disconnect(&c1), None);
    }

    #[test]
    fn ack_from_unregistered_client_is_a_no_op() {
        let sync = FrameSync::new();
        let c1 = ClientId::new();
        sync.on_connect(c1.clone());
        sync.begin_frame(1);

        let stranger = ClientId::new();
        assert_eq!(sync.on_ready(&stranger, 5), None);
        // The real client still completes the round on its own.
        assert_eq!(sync.on_ready(&c1, 0), Some(0));
    }

    #[test]
    fn ack_cannot_regress() {
        let sync = FrameSync::new();
        let c1 = ClientId::new();
        sync.on_connect(c1.clone());

        sync.begin_frame(4);
        assert_eq!(sync.on_ready(&c1, 3), Some(3));

        // A stale lower ack must not pull the client back below the next target.
        sync.begin_frame(5);
        assert_eq!(sync.on_ready(&c1, 1), None);
        assert_eq!(sync.on_ready(&c1, 4), Some(4));
    }

    #[test]
    fn begin_frame_fires_when_target_already_acked() {
        let sync = FrameSync::new();
        let (c1, c2) = two_clients(&sync);

        sync.begin_frame(1);
        sync.on_ready(&c1, 1);
        sync.on_ready(&c2, 1);

        // Acks for frame 1 arrived while the target was still 0; the pacer's
        // advance onto frame 2 completes that round immediately.
        assert_eq!(sync.begin_frame(2), Some(1));
        assert_eq!(sync.begin_frame(2), None);
    }

    #[test]
    fn fresh_client_blocks_until_it_acks() {
        let sync = FrameSync::new();
        let c1 = ClientId::new();
        sync.on_connect(c1.clone());

        sync.begin_frame(3);
        assert_eq!(sync.on_ready(&c1, 2), Some(2));

        sync.begin_frame(4);
        let late_joiner = ClientId::new();
        sync.on_connect(late_joiner.clone());

        assert_eq!(sync.on_ready(&c1, 3), None);
        assert_eq!(sync.on_ready(&late_joiner, 3), Some(3));
    }

    #[test]
    fn each_round_fires_exactly_once_over_many_frames() {
        let sync = FrameSync::new();
        let (c1, c2) = two_clients(&sync);

        let mut releases = Vec::new();
        for frame in 1..=5u64 {
            if let Some(f) = sync.begin_frame(frame) {
                releases.push(f);
            }
            if let Some(f) = sync.on_ready(&c1, frame - 1) {
                releases.push(f);
            }
            if let Some(f) = sync.on_ready(&c2, frame - 1) {
                releases.push(f);
            }
        }
        assert_eq!(releases, vec![0, 1, 2, 3, 4]);
    }
}
