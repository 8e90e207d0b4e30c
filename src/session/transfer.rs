use anyhow::Result;
use bytes::Bytes;
use rand::seq::SliceRandom;

use std::sync::Arc;

use crate::peer::{ConnectionHandle, PeerMessage};

use super::swarm::Swarm;

/// Starts the download loop for this peer unless one is already running.
pub async fn ensure_download_loop(swarm: &Arc<Swarm>, handle: &ConnectionHandle) {
    let Some(entry) = swarm.peer(handle.peer_id) else {
        return;
    };

    {
        let mut state = entry.state.lock().await;
        if state.download_loop == Some(handle.id) {
            return;
        }
        state.download_loop = Some(handle.id);
    }

    let swarm = Arc::clone(swarm);
    let handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = download_loop(&swarm, &handle).await {
            tracing::warn!("download loop for peer {} stopped: {}", handle.peer_id, e);
        }

        if let Some(entry) = swarm.peer(handle.peer_id) {
            let mut state = entry.state.lock().await;
            if state.download_loop == Some(handle.id) {
                state.download_loop = None;
            }
        }
    });
}

/// One outstanding request at a time. Idles while choked or while the peer has
/// nothing we lack, and ends when the connection or the session is cancelled.
async fn download_loop(swarm: &Swarm, handle: &ConnectionHandle) -> Result<()> {
    let Some(entry) = swarm.peer(handle.peer_id) else {
        return Ok(());
    };
    let idle = swarm.options.download_idle;

    loop {
        if handle.is_closed() {
            return Ok(());
        }
        if entry.state.lock().await.download_loop != Some(handle.id) {
            // superseded by a newer connection to the same peer
            return Ok(());
        }

        let next = {
            let local = swarm.local.lock().await;
            let state = entry.state.lock().await;
            if state.choked_by_remote {
                None
            } else {
                pick_missing(&local.missing_from(&state.bitfield))
            }
        };

        let Some(index) = next else {
            tokio::select! {
                _ = handle.token().cancelled() => return Ok(()),
                _ = tokio::time::sleep(idle) => continue,
            }
        };

        handle.send(PeerMessage::Request(index as u32))?;
        tracing::debug!("Peer {} requested piece {} from {}", swarm.local_id, index, handle.peer_id);

        tokio::select! {
            _ = handle.token().cancelled() => return Ok(()),
            _ = entry.piece_arrived.notified() => {}
            _ = tokio::time::sleep(idle) => {}
        }
    }
}

fn pick_missing(missing: &[usize]) -> Option<usize> {
    missing.choose(&mut rand::thread_rng()).copied()
}

/// Answers a `request`. Pieces we do not hold are ignored.
pub async fn serve_request(swarm: &Swarm, handle: &ConnectionHandle, index: u32) -> Result<()> {
    if !swarm.local.lock().await.has(index as usize) {
        tracing::debug!("Peer {} ignored request for missing piece {} from {}", swarm.local_id, index, handle.peer_id);
        return Ok(());
    }

    let data = swarm.store.read_piece(index as usize).await?;
    handle.send(PeerMessage::Piece { index, data })?;

    tracing::debug!("Peer {} sent piece {} to {}", swarm.local_id, index, handle.peer_id);
    Ok(())
}

/// Stores a received piece, then announces it and refreshes interest.
///
/// The local bit is only set after the write succeeded. A failed write is logged
/// and the piece will be requested again later.
pub async fn receive_piece(swarm: &Swarm, handle: &ConnectionHandle, index: u32, data: Bytes) -> Result<()> {
    let Some(entry) = swarm.peer(handle.peer_id) else {
        return Ok(());
    };

    if swarm.local.lock().await.has(index as usize) {
        tracing::debug!("Peer {} already has piece {}, dropping duplicate from {}", swarm.local_id, index, handle.peer_id);
        entry.piece_arrived.notify_one();
        return Ok(());
    }

    if let Err(e) = swarm.store.write_piece(index as usize, &data).await {
        tracing::error!("Peer {} failed to store piece {} from {}: {}", swarm.local_id, index, handle.peer_id, e);
        entry.piece_arrived.notify_one();
        return Ok(());
    }

    let (pieces, complete) = {
        let mut local = swarm.local.lock().await;
        local.set(index as usize);
        (local.count(), local.is_complete())
    };

    entry.state.lock().await.record_download(data.len());
    entry.piece_arrived.notify_one();

    tracing::info!(
        "Peer {} has downloaded the piece {} from {}. Now the number of pieces it has is {}.",
        swarm.local_id,
        index,
        handle.peer_id,
        pieces
    );
    if complete {
        tracing::info!("Peer {} has downloaded the complete file.", swarm.local_id);
    }

    for (peer_id, result) in swarm.broadcast(PeerMessage::Have(index)).await {
        if let Err(e) = result {
            tracing::warn!("Peer {} failed to send 'have' for piece {} to {}: {}", swarm.local_id, index, peer_id, e);
        }
    }

    swarm.declare_interest(handle).await?;
    Ok(())
}
