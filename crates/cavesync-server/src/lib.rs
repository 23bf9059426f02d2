pub mod client;
pub mod pacer;
pub mod server;
pub mod sync;

pub use client::ClientRegistry;
pub use pacer::FramePacer;
pub use server::{start, ServerConfig, ServerHandle};
pub use sync::FrameSync;
