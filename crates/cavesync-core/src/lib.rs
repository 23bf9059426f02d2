pub mod ids;
pub mod pose;
pub mod protocol;

pub use ids::ClientId;
pub use pose::{PoseSnapshot, PoseStore, TrackedBody};
pub use protocol::{decode_client_message, ClientMessage, DecodeError, ServerMessage};
