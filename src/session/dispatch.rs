use anyhow::{anyhow, Result};
use futures::StreamExt;

use std::sync::Arc;

use crate::bitfield::Bitfield;
use crate::peer::{ConnectionHandle, PeerMessage, PeerReader};

use super::swarm::Swarm;
use super::transfer;

/// Reads frames from one connection in arrival order until EOF, error or cancellation,
/// then drops the connection from the registry.
pub async fn run(swarm: Arc<Swarm>, handle: ConnectionHandle, mut reader: PeerReader) {
    let token = handle.token().clone();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = reader.next() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::warn!("Peer {} read error from {}: {}", swarm.local_id, handle.peer_id, e);
                        break;
                    }
                    None => {
                        tracing::debug!("Peer {} connection to {} closed by remote", swarm.local_id, handle.peer_id);
                        break;
                    }
                };

                if let Err(e) = handle_message(&swarm, &handle, message).await {
                    tracing::warn!("Peer {} dropping connection to {}: {}", swarm.local_id, handle.peer_id, e);
                    break;
                }
            }
        }
    }

    if swarm.registry.remove(handle.peer_id, handle.id).await {
        tracing::info!("Peer {} lost the connection to Peer {}.", swarm.local_id, handle.peer_id);
    }
    handle.close();
}

async fn handle_message(swarm: &Arc<Swarm>, handle: &ConnectionHandle, message: PeerMessage) -> Result<()> {
    let entry = swarm
        .peer(handle.peer_id)
        .ok_or_else(|| anyhow!("no state for peer {}", handle.peer_id))?;

    tracing::debug!("Peer {} received {:?} from {}", swarm.local_id, message.message_type(), handle.peer_id);

    match message {
        PeerMessage::Bitfield(bytes) => {
            entry.state.lock().await.bitfield = Bitfield::from_bytes(&bytes, swarm.piece_count());
            tracing::info!("Peer {} received the 'bitfield' message from {}.", swarm.local_id, handle.peer_id);

            swarm.declare_interest(handle).await?;
        }
        PeerMessage::Have(index) => {
            let index = index as usize;
            if index >= swarm.piece_count() {
                return Err(anyhow!("'have' for piece {} out of {}", index, swarm.piece_count()));
            }

            entry.state.lock().await.bitfield.set(index);
            tracing::info!(
                "Peer {} received the 'have' message from {} for the piece {}.",
                swarm.local_id,
                handle.peer_id,
                index
            );

            swarm.declare_interest(handle).await?;
        }
        PeerMessage::Interested => {
            entry.state.lock().await.remote_is_interested = true;
            tracing::info!("Peer {} received the 'interested' message from {}.", swarm.local_id, handle.peer_id);
        }
        PeerMessage::NotInterested => {
            entry.state.lock().await.remote_is_interested = false;
            tracing::info!("Peer {} received the 'not interested' message from {}.", swarm.local_id, handle.peer_id);
        }
        PeerMessage::Choke => {
            entry.state.lock().await.choked_by_remote = true;
            tracing::info!("Peer {} is choked by {}.", swarm.local_id, handle.peer_id);
        }
        PeerMessage::Unchoke => {
            entry.state.lock().await.choked_by_remote = false;
            tracing::info!("Peer {} is unchoked by {}.", swarm.local_id, handle.peer_id);

            transfer::ensure_download_loop(swarm, handle).await;
        }
        PeerMessage::Request(index) => {
            transfer::serve_request(swarm, handle, index).await?;
        }
        PeerMessage::Piece { index, data } => {
            transfer::receive_piece(swarm, handle, index, data).await?;
        }
    }

    Ok(())
}
