use std::sync::Arc;
use std::time::Duration;

use cavesync_core::{PoseStore, ServerMessage};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::ClientRegistry;
use crate::sync::FrameSync;

/// Drift-corrected fixed-rate frame clock.
///
/// Each elapsed deadline starts one frame: bump the counter, attach the
/// latest pose snapshot, broadcast `startFrame`, then re-aim the readiness
/// barrier at the frame before it. The next deadline is the previous deadline
/// plus the period, not "now" plus the period, so a late wakeup delays one
/// tick instead of every tick after it.
pub struct FramePacer {
    registry: Arc<ClientRegistry>,
    sync: Arc<FrameSync>,
    store: Arc<PoseStore>,
    rate: f64,
    cancel: CancellationToken,
}

impl FramePacer {
    pub fn new(
        registry: Arc<ClientRegistry>,
        sync: Arc<FrameSync>,
        store: Arc<PoseStore>,
        rate: f64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            sync,
            store,
            rate,
            cancel,
        }
    }

    /// Run until the cancellation token fires. Cancellation is observed while
    /// idle-waiting for the next deadline, so stop latency is below one tick.
    pub async fn run(self) {
        let period = Duration::from_secs_f64(1.0 / self.rate);
        let delta_time = 1.0 / self.rate;
        let mut deadline = Instant::now() + period;
        let mut frame: u64 = 0;

        tracing::info!(rate = self.rate, "running frame updates");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            deadline += period;

            // No audience: the counter holds still and nothing goes out.
            if self.sync.is_empty() {
                continue;
            }

            frame += 1;
            let time = frame as f64 / self.rate;
            let snapshot = self.store.latest();

            self.registry.broadcast(&ServerMessage::StartFrame {
                frame,
                time,
                delta_time,
                tracking_data: (*snapshot).clone(),
            });

            // The frame before this one may already be fully acknowledged.
            if let Some(released) = self.sync.begin_frame(frame) {
                self.registry
                    .broadcast(&ServerMessage::DisplayFrame { frame: released });
            }

            tracing::trace!(frame, time, "frame started");
        }

        tracing::debug!(frame, "frame pacer stopped");
    }
}
