use serde::Serialize;

use std::time::Instant;

use crate::bitfield::Bitfield;

use super::{ConnectionId, PeerId};

/// Everything we know about one configured remote peer.
///
/// Created once per configured peer at startup and kept for the whole process;
/// it outlives any single connection to that peer.
#[derive(Debug)]
pub struct PeerState {
    pub peer_id: PeerId,
    /// They choked us; we may not request from them.
    pub choked_by_remote: bool,
    /// They declared interest in our pieces.
    pub remote_is_interested: bool,
    /// We declared interest in their pieces.
    pub am_interested: bool,
    pub bitfield: Bitfield,
    /// Connection whose download loop is currently running, if any.
    pub download_loop: Option<ConnectionId>,

    download_rate: f64,
    bytes_received: u64,
    bytes_at_last_sample: u64,
    last_sample: Instant,
}

impl PeerState {
    pub fn new(peer_id: PeerId, piece_count: usize) -> Self {
        Self {
            peer_id,
            choked_by_remote: true,
            remote_is_interested: false,
            am_interested: false,
            bitfield: Bitfield::new(piece_count),
            download_loop: None,

            download_rate: 0.0,
            bytes_received: 0,
            bytes_at_last_sample: 0,
            last_sample: Instant::now(),
        }
    }

    /// Bytes per second.
    pub fn download_rate(&self) -> f64 {
        self.download_rate
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn record_download(&mut self, bytes: usize) {
        self.record_download_at(bytes, Instant::now());
    }

    /// Instantaneous rate over the window since the previous sample; not smoothed.
    pub fn record_download_at(&mut self, bytes: usize, now: Instant) {
        self.bytes_received += bytes as u64;

        let elapsed = now.saturating_duration_since(self.last_sample).as_secs_f64();
        if elapsed > 0.0 {
            self.download_rate = (self.bytes_received - self.bytes_at_last_sample) as f64 / elapsed;
        }

        self.last_sample = now;
        self.bytes_at_last_sample = self.bytes_received;
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            peer_id: self.peer_id,
            pieces: self.bitfield.count(),
            choked_by_remote: self.choked_by_remote,
            remote_is_interested: self.remote_is_interested,
            am_interested: self.am_interested,
            download_rate: self.download_rate,
            bytes_received: self.bytes_received,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    pub pieces: usize,
    pub choked_by_remote: bool,
    pub remote_is_interested: bool,
    pub am_interested: bool,
    pub download_rate: f64,
    pub bytes_received: u64,
}
