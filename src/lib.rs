pub mod bitfield;
pub mod client_options;
pub mod config;
pub mod disk;
pub mod error;
pub mod peer;
pub mod session;

pub use bitfield::Bitfield;
pub use config::{CommonConfig, Config, PeerInfo};
pub use error::{SessionError, StorageError, WireError};
pub use peer::PeerId;
pub use session::{Session, SessionOptions};

// TRACE > DEBUG > INFO > WARN > ERROR
// DEBUG - every frame sent or received
// INFO - the protocol event log (connections, choking, pieces)

pub const TRACING_LEVEL: tracing::Level = tracing::Level::INFO;
pub const MAX_CHANNEL_SIZE: usize = 100;
pub const DOWNLOAD_IDLE_MILLIS: u64 = 100;
pub const COMPLETION_POLL_INTERVAL_MILLIS: u64 = 2000;
pub const COMPLETION_LINGER_MILLIS: u64 = 2000;
pub const CONNECT_RETRIES: usize = 5;
pub const CONNECT_BACKOFF_MILLIS: u64 = 500;

pub const COMMON_CONFIG_FILE: &str = "Common.cfg";
pub const PEER_INFO_FILE: &str = "PeerInfo.cfg";
