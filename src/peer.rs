pub mod handshake;
pub use handshake::Handshake;

pub mod peer_message;
pub use peer_message::{Frame, MessageType, PeerCodec, PeerMessage};

pub mod peer_state;
pub use peer_state::PeerState;

pub mod connection;
pub use connection::{ConnectionHandle, ConnectionId, ConnectionType, PeerReader};

/// Identity carried in the handshake and used as the key for every per-peer record.
pub type PeerId = u32;
