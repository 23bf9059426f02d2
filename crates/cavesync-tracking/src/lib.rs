pub mod parse;
pub mod producer;

pub use parse::{parse_datagram, RoomState};
pub use producer::{spawn, TrackingConfig};

/// Tracking-producer failure taxonomy. Every variant is recoverable: the
/// receive loop logs it and keeps going, so clients continue to get the last
/// good snapshot instead of none at all.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("timeout while waiting for tracking data")]
    Timeout,
    #[error("error while receiving tracking data: {0}")]
    Net(#[from] std::io::Error),
    #[error("error while parsing tracking data: {0}")]
    Parse(String),
}
