use futures::SinkExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SessionError;

use super::{PeerCodec, PeerId, PeerMessage};

pub type ConnectionId = u64;

/// Read side of a connection, owned by its dispatch loop.
pub type PeerReader = FramedRead<OwnedReadHalf, PeerCodec>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Incoming,
    Outgoing,
}

/// Cheap, cloneable handle to a live transport.
///
/// Writes go through a bounded channel to a writer task that owns the write half,
/// so callers never touch the socket directly. Sending never waits: a peer that
/// stops reading fills its queue and gets disconnected instead of stalling the
/// sender. Cancelling the token closes both halves: the writer stops and the
/// dispatch loop stops reading.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub peer_id: PeerId,

    tx: mpsc::Sender<PeerMessage>,
    token: CancellationToken,
}

impl ConnectionHandle {
    /// Splits an already handshaken stream, starts its writer task and hands back
    /// the read side for the caller's dispatch loop.
    pub fn spawn(
        stream: TcpStream,
        peer_id: PeerId,
        codec: PeerCodec,
        parent: &CancellationToken,
        channel_size: usize,
    ) -> (Self, PeerReader) {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(channel_size);
        let token = parent.child_token();

        let reader = FramedRead::new(read_half, codec.clone());
        let writer = FramedWrite::new(write_half, codec);

        let handle = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer_id,
            tx,
            token: token.clone(),
        };

        tokio::spawn(write_loop(peer_id, writer, rx, token));

        (handle, reader)
    }

    /// Queues `message` for the writer task without waiting.
    ///
    /// A full queue means the peer is not draining its socket; the connection is
    /// closed and `SendQueueFull` returned.
    pub fn send(&self, message: PeerMessage) -> Result<(), SessionError> {
        if self.token.is_cancelled() {
            return Err(SessionError::ChannelClosed(self.peer_id));
        }

        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("send queue to peer {} is full, closing connection {}", self.peer_id, self.id);
                self.close();
                Err(SessionError::SendQueueFull(self.peer_id))
            }
            Err(TrySendError::Closed(_)) => Err(SessionError::ChannelClosed(self.peer_id)),
        }
    }

    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Drains the queue into the socket. A write blocked on a peer that stops reading
/// still yields to cancellation; dropping the write half then shuts it down.
async fn write_loop(
    peer_id: PeerId,
    mut writer: FramedWrite<OwnedWriteHalf, PeerCodec>,
    mut rx: mpsc::Receiver<PeerMessage>,
    token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => return,
            message = rx.recv() => message,
        };
        let Some(message) = message else {
            break;
        };

        let message_type = message.message_type();
        let written = tokio::select! {
            _ = token.cancelled() => return,
            written = writer.send(message) => written,
        };

        if let Err(e) = written {
            tracing::warn!("failed to write {:?} to peer {}: {}", message_type, peer_id, e);
            token.cancel();
            return;
        }
        tracing::trace!("sent {:?} to peer {}", message_type, peer_id);
    }

    if let Err(e) = writer.close().await {
        tracing::debug!("closing write half to peer {}: {}", peer_id, e);
    }
}
