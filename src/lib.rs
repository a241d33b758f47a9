pub mod config;
pub mod error;
pub mod peer;
pub mod store;
pub mod tracker;
pub mod wire;

// Re-export commonly used types and functions for easier access
pub use config::{CHUNK_SIZE, Config};
pub use error::{Error, Result};
pub use peer::PeerIdentity;
pub use peer::client::{PeerSession, download};
pub use peer::server::{PeerServer, serve_chunk_requests, share_file};
pub use peer::state::DownloadReport;
pub use store::ChunkStore;
pub use tracker::{Registry, TrackerClient, TrackerService, run_tracker};
