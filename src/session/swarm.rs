use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::bitfield::Bitfield;
use crate::config::{CommonConfig, PeerInfo};
use crate::disk::{PieceLayout, PieceStore};
use crate::error::SessionError;
use crate::peer::{ConnectionHandle, PeerCodec, PeerId, PeerMessage, PeerState};

use super::choke_manager::{ChokeState, PeerView};
use super::registry::ConnectionRegistry;
use super::status::SessionStatus;
use super::SessionOptions;

/// Per remote peer: its configuration, mutable state and a wakeup for its download loop.
#[derive(Debug)]
pub struct PeerEntry {
    pub info: PeerInfo,
    pub state: Mutex<PeerState>,
    pub piece_arrived: Notify,
}

/// Shared state of one running peer process.
///
/// Lock order is `choke -> local -> peer state`, and `choke -> registry`.
/// No guard is held across a send.
#[derive(Debug)]
pub struct Swarm {
    pub local_id: PeerId,
    pub common: CommonConfig,
    pub options: SessionOptions,
    pub token: CancellationToken,

    pub local: Mutex<Bitfield>,
    pub registry: ConnectionRegistry,
    pub choke: Mutex<ChokeState>,
    pub store: PieceStore,

    peers: Vec<PeerEntry>,
}

impl Swarm {
    pub fn new(
        local_id: PeerId,
        common: CommonConfig,
        remote_peers: Vec<PeerInfo>,
        local: Bitfield,
        store: PieceStore,
        options: SessionOptions,
    ) -> Self {
        let piece_count = local.piece_count();
        let peers = remote_peers
            .into_iter()
            .map(|info| PeerEntry {
                state: Mutex::new(PeerState::new(info.peer_id, piece_count)),
                info,
                piece_arrived: Notify::new(),
            })
            .collect();

        let rng = match options.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            local_id,
            common,
            options,
            token: CancellationToken::new(),

            local: Mutex::new(local),
            registry: ConnectionRegistry::new(),
            choke: Mutex::new(ChokeState::new(rng)),
            store,

            peers,
        }
    }

    /// Remote peers in configured order.
    pub fn peers(&self) -> &[PeerEntry] {
        &self.peers
    }

    pub fn peer(&self, peer_id: PeerId) -> Option<&PeerEntry> {
        self.peers.iter().find(|entry| entry.info.peer_id == peer_id)
    }

    pub fn layout(&self) -> PieceLayout {
        PieceLayout::from_config(&self.common)
    }

    pub fn piece_count(&self) -> usize {
        self.common.piece_count()
    }

    pub fn codec(&self) -> PeerCodec {
        PeerCodec::for_piece_size(self.common.piece_size as usize, self.piece_count())
    }

    pub async fn local_bitfield(&self) -> Bitfield {
        self.local.lock().await.clone()
    }

    pub async fn send_to(&self, peer_id: PeerId, message: PeerMessage) -> Result<(), SessionError> {
        let handle = self
            .registry
            .get(peer_id)
            .await
            .ok_or(SessionError::NotConnected(peer_id))?;

        handle.send(message)
    }

    /// Sends to every connection registered when the broadcast starts. A peer whose
    /// queue is full is disconnected and reported; the others still get the message.
    pub async fn broadcast(&self, message: PeerMessage) -> Vec<(PeerId, Result<(), SessionError>)> {
        self.registry
            .handles()
            .await
            .iter()
            .map(|handle| (handle.peer_id, handle.send(message.clone())))
            .collect()
    }

    /// Compares our bitfield with theirs and tells them whether we are interested.
    /// Sent on every call, even when nothing changed.
    pub async fn declare_interest(&self, handle: &ConnectionHandle) -> Result<bool, SessionError> {
        let entry = self
            .peer(handle.peer_id)
            .ok_or(SessionError::UnknownPeer(handle.peer_id))?;

        let interested = {
            let local = self.local.lock().await;
            let mut state = entry.state.lock().await;
            state.am_interested = !local.missing_from(&state.bitfield).is_empty();
            state.am_interested
        };

        if interested {
            handle.send(PeerMessage::Interested)?;
            tracing::info!("Peer {} sent the 'interested' message to {}.", self.local_id, handle.peer_id);
        } else {
            handle.send(PeerMessage::NotInterested)?;
            tracing::info!("Peer {} sent the 'not interested' message to {}.", self.local_id, handle.peer_id);
        }

        Ok(interested)
    }

    /// What the choke cycles need to know about each peer, in configured order.
    pub async fn peer_views(&self) -> Vec<PeerView> {
        let connected = self.registry.peer_ids().await;

        let mut views = Vec::with_capacity(self.peers.len());
        for entry in &self.peers {
            let state = entry.state.lock().await;
            views.push(PeerView {
                peer_id: entry.info.peer_id,
                interested: state.remote_is_interested,
                connected: connected.contains(&entry.info.peer_id),
                download_rate: state.download_rate(),
            });
        }

        views
    }

    /// We hold every piece and so does every tracked peer, as far as we last heard.
    pub async fn is_swarm_complete(&self) -> bool {
        if !self.local.lock().await.is_complete() {
            return false;
        }

        for entry in &self.peers {
            if !entry.state.lock().await.bitfield.is_complete() {
                return false;
            }
        }

        true
    }

    pub async fn status(&self) -> SessionStatus {
        let (preferred_neighbors, optimistic_neighbor) = {
            let choke = self.choke.lock().await;
            (choke.preferred().iter().copied().collect(), choke.optimistic())
        };

        let local = self.local_bitfield().await;

        let mut peers = Vec::with_capacity(self.peers.len());
        for entry in &self.peers {
            peers.push(entry.state.lock().await.snapshot());
        }

        SessionStatus {
            peer_id: self.local_id,
            pieces: local.count(),
            piece_count: local.piece_count(),
            complete: local.is_complete(),
            preferred_neighbors,
            optimistic_neighbor,
            peers,
        }
    }
}
