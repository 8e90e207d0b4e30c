use anyhow::{Context, Result};
use serde::Serialize;

use std::path::Path;

use crate::peer::peer_state::PeerSnapshot;
use crate::peer::PeerId;

/// Summary written when a session ends. Informational only; nothing reads it back.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub peer_id: PeerId,
    pub pieces: usize,
    pub piece_count: usize,
    pub complete: bool,
    pub preferred_neighbors: Vec<PeerId>,
    pub optimistic_neighbor: Option<PeerId>,
    pub peers: Vec<PeerSnapshot>,
}

impl SessionStatus {
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.context("couldn't create status directory")?;
        }

        let status = serde_json::to_string_pretty(self).context("couldn't serialize session status")?;
        tokio::fs::write(path, status)
            .await
            .with_context(|| format!("couldn't write {}", path.display()))?;

        Ok(())
    }
}
