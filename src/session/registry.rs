use tokio::sync::Mutex;

use std::collections::{HashMap, HashSet};

use crate::error::SessionError;
use crate::peer::{ConnectionHandle, ConnectionId, PeerId};

/// Peer identity -> live transport. At most one entry per identity.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<PeerId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses a second live connection for the same identity; the existing one is kept.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), SessionError> {
        let mut connections = self.connections.lock().await;

        if let Some(existing) = connections.get(&handle.peer_id) {
            if !existing.is_closed() {
                return Err(SessionError::DuplicateConnection(handle.peer_id));
            }
        }

        connections.insert(handle.peer_id, handle);
        Ok(())
    }

    /// Removes and closes the entry only if it still belongs to `connection_id`.
    pub async fn remove(&self, peer_id: PeerId, connection_id: ConnectionId) -> bool {
        let removed = {
            let mut connections = self.connections.lock().await;
            match connections.get(&peer_id) {
                Some(handle) if handle.id == connection_id => connections.remove(&peer_id),
                _ => None,
            }
        };

        match removed {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, peer_id: PeerId) -> Option<ConnectionHandle> {
        self.connections.lock().await.get(&peer_id).cloned()
    }

    pub async fn peer_ids(&self) -> HashSet<PeerId> {
        self.connections.lock().await.keys().copied().collect()
    }

    pub async fn handles(&self) -> Vec<ConnectionHandle> {
        self.connections.lock().await.values().cloned().collect()
    }

    /// Closes every transport and empties the registry.
    pub async fn close_all(&self) {
        let handles = self.connections.lock().await.drain().map(|(_, handle)| handle).collect::<Vec<_>>();
        for handle in handles {
            handle.close();
        }
    }
}
