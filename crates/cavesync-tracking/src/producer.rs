use std::sync::Arc;
use std::time::Duration;

use cavesync_core::PoseStore;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::parse::{self, RoomState};
use crate::TrackingError;

/// How long a receive may sit idle before we log a timeout and go around the
/// loop again. Keeps the stop flag responsive on a silent controller.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection descriptor for the motion-capture data stream.
#[derive(Clone, Debug)]
pub struct TrackingConfig {
    /// Local address tracking datagrams arrive on, e.g. "0.0.0.0:5001".
    pub listen_addr: String,
}

/// Spawn the tracking receive loop. Parsed snapshots land in `store`; every
/// failure is logged and retried until the token is cancelled.
pub fn spawn(
    config: TrackingConfig,
    store: Arc<PoseStore>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(config, store, cancel))
}

async fn run(config: TrackingConfig, store: Arc<PoseStore>, cancel: CancellationToken) {
    tracing::info!(addr = %config.listen_addr, "tracking producer starting");

    let socket = loop {
        if cancel.is_cancelled() {
            return;
        }
        match UdpSocket::bind(&config.listen_addr).await {
            Ok(socket) => break socket,
            Err(error) => {
                tracing::error!(%error, addr = %config.listen_addr, "failed to bind tracking socket, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(RECEIVE_TIMEOUT) => {}
                }
            }
        }
    };

    receive_loop(socket, store, cancel).await;
    tracing::debug!("tracking producer stopped");
}

async fn receive_loop(socket: UdpSocket, store: Arc<PoseStore>, cancel: CancellationToken) {
    let mut state = RoomState::new();
    let mut buf = vec![0u8; 65_536];

    while !cancel.is_cancelled() {
        match receive(&socket, &mut buf, &cancel).await {
            Ok(Some(datagram)) => match parse::parse_datagram(&datagram, &mut state) {
                // Stale-but-valid beats absent: a parse failure just leaves
                // the previous snapshot in the store.
                Ok(snapshot) => store.publish(snapshot),
                Err(error) => tracing::error!(%error, "dropping tracking datagram"),
            },
            Ok(None) => return, // cancelled mid-receive
            Err(error) => tracing::error!(%error, "tracking receive failed"),
        }
    }
}

async fn receive(
    socket: &UdpSocket,
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> Result<Option<String>, TrackingError> {
    tokio::select! {
        _ = cancel.cancelled() => Ok(None),
        received = tokio::time::timeout(RECEIVE_TIMEOUT, socket.recv_from(buf)) => {
            match received {
                Ok(Ok((len, _peer))) => Ok(Some(String::from_utf8_lossy(&buf[..len]).into_owned())),
                Ok(Err(error)) => Err(TrackingError::Net(error)),
                Err(_) => Err(TrackingError::Timeout),
            }
        }
    }
}
