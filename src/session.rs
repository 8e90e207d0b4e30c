use anyhow::{anyhow, Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::bitfield::Bitfield;
use crate::config::{Config, PeerInfo};
use crate::disk::{PieceLayout, PieceStore};
use crate::error::SessionError;
use crate::peer::handshake::{incoming_handshake, outgoing_handshake};
use crate::peer::{ConnectionHandle, ConnectionType, PeerId, PeerMessage};

pub mod choke_manager;
use choke_manager::ChokeManager;

pub mod dispatch;

pub mod registry;
pub use registry::ConnectionRegistry;

pub mod status;
pub use status::SessionStatus;

pub mod swarm;
pub use swarm::Swarm;

pub mod transfer;

/// Engine tunables that are not part of the shared configuration files.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub download_idle: Duration,
    pub completion_poll_interval: Duration,
    /// How long to keep serving after the swarm looks complete.
    pub completion_linger: Duration,
    pub connect_retries: usize,
    pub connect_backoff: Duration,
    pub channel_size: usize,
    /// Fixed seed for neighbor selection; entropy when `None`.
    pub rng_seed: Option<u64>,
    pub status_path: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            download_idle: Duration::from_millis(crate::DOWNLOAD_IDLE_MILLIS),
            completion_poll_interval: Duration::from_millis(crate::COMPLETION_POLL_INTERVAL_MILLIS),
            completion_linger: Duration::from_millis(crate::COMPLETION_LINGER_MILLIS),
            connect_retries: crate::CONNECT_RETRIES,
            connect_backoff: Duration::from_millis(crate::CONNECT_BACKOFF_MILLIS),
            channel_size: crate::MAX_CHANNEL_SIZE,
            rng_seed: None,
            status_path: None,
        }
    }
}

/// One peer process: listener, outbound connections, choke cycles and the
/// completion watcher, all sharing one [`Swarm`].
pub struct Session {
    swarm: Arc<Swarm>,
    local: PeerInfo,
    earlier: Vec<PeerInfo>,
}

impl Session {
    pub fn new(config: &Config, local_id: PeerId, store: PieceStore, options: SessionOptions) -> Result<Self> {
        let local = config
            .peer(local_id)
            .cloned()
            .ok_or(SessionError::UnknownPeer(local_id))?;

        let layout = PieceLayout::from_config(&config.common);
        if store.layout() != layout {
            return Err(anyhow!(
                "store layout {:?} does not match configuration {:?}",
                store.layout(),
                layout
            ));
        }

        let piece_count = config.piece_count();
        let bitfield = if local.has_file {
            Bitfield::full(piece_count)
        } else {
            Bitfield::new(piece_count)
        };

        let remote_peers = config
            .peers
            .iter()
            .filter(|peer| peer.peer_id != local_id)
            .cloned()
            .collect::<Vec<PeerInfo>>();

        let swarm = Swarm::new(local_id, config.common.clone(), remote_peers, bitfield, store, options);

        Ok(Self {
            swarm: Arc::new(swarm),
            local,
            earlier: config.earlier_peers(local_id).to_vec(),
        })
    }

    /// Cancelling this token shuts the session down.
    pub fn token(&self) -> CancellationToken {
        self.swarm.token.clone()
    }

    pub fn swarm(&self) -> &Arc<Swarm> {
        &self.swarm
    }

    /// Binds the configured address and runs until shutdown.
    pub async fn run(self) -> Result<SessionStatus> {
        let address = format!("0.0.0.0:{}", self.local.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(SessionError::Listener)
            .with_context(|| format!("couldn't listen on {}", address))?;

        self.run_with_listener(listener).await
    }

    /// Runs on an already bound listener until the swarm is complete, the token is
    /// cancelled, or accepting fails.
    pub async fn run_with_listener(self, listener: TcpListener) -> Result<SessionStatus> {
        let swarm = self.swarm;
        tracing::debug!("Peer {} listening on {:?}", swarm.local_id, listener.local_addr());

        let mut accept_task = tokio::spawn(accept_loop(Arc::clone(&swarm), listener));

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        for peer in self.earlier {
            tasks.push(tokio::spawn(connect_with_retry(Arc::clone(&swarm), peer)));
        }
        tasks.extend(ChokeManager::new(Arc::clone(&swarm)).spawn());
        tasks.push(tokio::spawn(completion_watcher(Arc::clone(&swarm))));

        let result = tokio::select! {
            _ = swarm.token.cancelled() => Ok(()),
            accepted = &mut accept_task => match accepted {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(anyhow!("accept task panicked: {}", e)),
            },
        };

        swarm.token.cancel();
        swarm.registry.close_all().await;

        accept_task.abort();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Peer {} task ended abnormally: {}", swarm.local_id, e);
            }
        }

        let status = swarm.status().await;
        if let Some(path) = &swarm.options.status_path {
            if let Err(e) = status.save(path).await {
                tracing::warn!("Peer {} couldn't save status: {:#}", swarm.local_id, e);
            }
        }

        tracing::info!("Peer {} is shutting down.", swarm.local_id);
        result.map(|_| status)
    }
}

async fn accept_loop(swarm: Arc<Swarm>, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, address) = tokio::select! {
            _ = swarm.token.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted.map_err(SessionError::Listener)?,
        };

        tracing::debug!("Peer {} accepted a connection from {}", swarm.local_id, address);

        let swarm = Arc::clone(&swarm);
        tokio::spawn(async move {
            if let Err(e) = handle_incoming(&swarm, stream).await {
                tracing::warn!("Peer {} rejected incoming connection from {}: {}", swarm.local_id, address, e);
            }
        });
    }
}

async fn handle_incoming(swarm: &Arc<Swarm>, mut stream: TcpStream) -> Result<(), SessionError> {
    let peer_id = tokio::select! {
        _ = swarm.token.cancelled() => return Ok(()),
        handshake = incoming_handshake(&mut stream, swarm.local_id) => handshake?,
    };

    if peer_id == swarm.local_id || swarm.peer(peer_id).is_none() {
        return Err(SessionError::UnknownPeer(peer_id));
    }

    establish(swarm, stream, peer_id, ConnectionType::Incoming).await
}

async fn connect(swarm: &Arc<Swarm>, peer: &PeerInfo) -> Result<(), SessionError> {
    let mut stream = TcpStream::connect(peer.address()).await?;
    outgoing_handshake(&mut stream, swarm.local_id, peer.peer_id).await?;

    establish(swarm, stream, peer.peer_id, ConnectionType::Outgoing).await
}

/// Connects to an earlier peer, retrying with doubling backoff.
async fn connect_with_retry(swarm: Arc<Swarm>, peer: PeerInfo) {
    let mut backoff = swarm.options.connect_backoff;

    for attempt in 1..=swarm.options.connect_retries.max(1) {
        let result = tokio::select! {
            _ = swarm.token.cancelled() => return,
            result = connect(&swarm, &peer) => result,
        };

        match result {
            Ok(()) => return,
            Err(SessionError::DuplicateConnection(_)) => return,
            Err(e) => {
                tracing::warn!(
                    "Peer {} couldn't connect to Peer {} at {} (attempt {}): {}",
                    swarm.local_id,
                    peer.peer_id,
                    peer.address(),
                    attempt,
                    e
                );
            }
        }

        tokio::select! {
            _ = swarm.token.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff *= 2;
    }

    tracing::error!("Peer {} gave up connecting to Peer {}", swarm.local_id, peer.peer_id);
}

/// Registers a handshaken stream, sends our bitfield and starts its dispatch loop.
async fn establish(
    swarm: &Arc<Swarm>,
    stream: TcpStream,
    peer_id: PeerId,
    connection_type: ConnectionType,
) -> Result<(), SessionError> {
    let (handle, reader) = ConnectionHandle::spawn(
        stream,
        peer_id,
        swarm.codec(),
        &swarm.token,
        swarm.options.channel_size,
    );

    if let Err(e) = swarm.registry.register(handle.clone()).await {
        handle.close();
        return Err(e);
    }
    swarm.choke.lock().await.forget(peer_id);

    match connection_type {
        ConnectionType::Outgoing => tracing::info!("Peer {} makes a connection to Peer {}.", swarm.local_id, peer_id),
        ConnectionType::Incoming => tracing::info!("Peer {} is connected from Peer {}.", swarm.local_id, peer_id),
    }

    let bitfield = swarm.local_bitfield().await;
    if !bitfield.is_empty() {
        if let Err(e) = handle.send(PeerMessage::Bitfield(bitfield.to_bytes())) {
            tracing::warn!("Peer {} failed to send bitfield to {}: {}", swarm.local_id, peer_id, e);
        }
    }

    tokio::spawn(dispatch::run(Arc::clone(swarm), handle, reader));
    Ok(())
}

/// Cancels the session once we and every tracked peer hold the whole file, after
/// lingering so the last `have` messages still go out.
async fn completion_watcher(swarm: Arc<Swarm>) {
    let poll = swarm.options.completion_poll_interval;

    loop {
        tokio::select! {
            _ = swarm.token.cancelled() => return,
            _ = tokio::time::sleep(poll) => {}
        }

        if swarm.is_swarm_complete().await {
            break;
        }
    }

    tracing::info!("Peer {} sees that every peer has the complete file.", swarm.local_id);

    tokio::select! {
        _ = swarm.token.cancelled() => return,
        _ = tokio::time::sleep(swarm.options.completion_linger) => {}
    }

    swarm.token.cancel();
}
