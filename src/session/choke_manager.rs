use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::peer::{PeerId, PeerMessage};

use super::swarm::Swarm;

/// Snapshot of one remote peer as the choke cycles see it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerView {
    pub peer_id: PeerId,
    pub interested: bool,
    pub connected: bool,
    pub download_rate: f64,
}

/// Messages a cycle decided to send.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChokePlan {
    pub unchoke: Vec<PeerId>,
    pub choke: Vec<PeerId>,
}

impl ChokePlan {
    pub fn is_empty(&self) -> bool {
        self.unchoke.is_empty() && self.choke.is_empty()
    }
}

/// Up to `k` candidates: random when we are seeding, otherwise the fastest by
/// download rate with ties kept in candidate order.
pub fn select_preferred<R: Rng + ?Sized>(
    candidates: &[PeerView],
    k: usize,
    local_complete: bool,
    rng: &mut R,
) -> Vec<PeerId> {
    if local_complete {
        return candidates
            .choose_multiple(rng, k)
            .map(|view| view.peer_id)
            .collect();
    }

    let mut ranked = candidates.to_vec();
    ranked.sort_by(|a, b| b.download_rate.total_cmp(&a.download_rate));
    ranked.into_iter().take(k).map(|view| view.peer_id).collect()
}

pub fn select_optimistic<R: Rng + ?Sized>(candidates: &[PeerId], rng: &mut R) -> Option<PeerId> {
    candidates.choose(rng).copied()
}

/// Upload-side choking state. Guarded as a whole by one lock in [`Swarm`].
#[derive(Debug)]
pub struct ChokeState {
    preferred: BTreeSet<PeerId>,
    optimistic: Option<PeerId>,
    /// Peers we have unchoked and not choked again since.
    unchoked: BTreeSet<PeerId>,
    rng: StdRng,
}

impl ChokeState {
    pub fn new(rng: StdRng) -> Self {
        Self {
            preferred: BTreeSet::new(),
            optimistic: None,
            unchoked: BTreeSet::new(),
            rng,
        }
    }

    pub fn preferred(&self) -> &BTreeSet<PeerId> {
        &self.preferred
    }

    pub fn optimistic(&self) -> Option<PeerId> {
        self.optimistic
    }

    pub fn is_unchoked(&self, peer_id: PeerId) -> bool {
        self.unchoked.contains(&peer_id)
    }

    /// Drops everything recorded for `peer_id`. Called when it gets a new transport,
    /// which starts out choked.
    pub fn forget(&mut self, peer_id: PeerId) {
        self.preferred.remove(&peer_id);
        self.unchoked.remove(&peer_id);
        if self.optimistic == Some(peer_id) {
            self.optimistic = None;
        }
    }

    /// Picks the new preferred set and diffs it against what is currently unchoked.
    ///
    /// Newly preferred peers get `unchoke`. Every other unchoked peer except the
    /// current optimistic neighbor gets `choke`; that covers dropped preferred
    /// neighbors as well as a replaced optimistic neighbor. Disconnected peers are
    /// forgotten without a message, so they count as new if they come back.
    pub fn plan_preferred(&mut self, views: &[PeerView], k: usize, local_complete: bool) -> ChokePlan {
        let connected = |peer_id: &PeerId| views.iter().any(|view| view.peer_id == *peer_id && view.connected);
        self.unchoked.retain(connected);
        // a reconnecting neighbor starts choked on its new transport and must be unchoked again
        self.preferred.retain(connected);

        let candidates = views
            .iter()
            .filter(|view| view.interested && view.connected)
            .copied()
            .collect::<Vec<PeerView>>();

        let selected = select_preferred(&candidates, k, local_complete, &mut self.rng)
            .into_iter()
            .collect::<BTreeSet<PeerId>>();

        let mut plan = ChokePlan::default();
        for peer_id in &selected {
            if !self.preferred.contains(peer_id) {
                plan.unchoke.push(*peer_id);
            }
        }
        for peer_id in &self.unchoked {
            if !selected.contains(peer_id) && self.optimistic != Some(*peer_id) {
                plan.choke.push(*peer_id);
            }
        }

        for peer_id in &plan.choke {
            self.unchoked.remove(peer_id);
        }
        self.unchoked.extend(selected.iter().copied());
        self.preferred = selected;

        plan
    }

    /// Picks one interested, connected peer that we are currently choking.
    /// The previous optimistic neighbor is not choked here.
    pub fn plan_optimistic(&mut self, views: &[PeerView]) -> Option<PeerId> {
        let candidates = views
            .iter()
            .filter(|view| view.interested && view.connected && !self.unchoked.contains(&view.peer_id))
            .map(|view| view.peer_id)
            .collect::<Vec<PeerId>>();

        let selected = select_optimistic(&candidates, &mut self.rng)?;

        self.optimistic = Some(selected);
        self.unchoked.insert(selected);

        Some(selected)
    }
}

/// Drives the two periodic choke cycles against a [`Swarm`].
pub struct ChokeManager {
    swarm: Arc<Swarm>,
}

impl ChokeManager {
    pub fn new(swarm: Arc<Swarm>) -> Self {
        Self { swarm }
    }

    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let preferred_swarm = Arc::clone(&self.swarm);
        let optimistic_swarm = self.swarm;

        vec![
            tokio::spawn(async move {
                let period = preferred_swarm.common.unchoking_interval;
                run_periodically(&preferred_swarm, period, |swarm| async move {
                    select_preferred_neighbors(&swarm).await;
                })
                .await;
            }),
            tokio::spawn(async move {
                let period = optimistic_swarm.common.opt_unchoking_interval;
                run_periodically(&optimistic_swarm, period, |swarm| async move {
                    select_optimistic_neighbor(&swarm).await;
                })
                .await;
            }),
        ]
    }
}

async fn run_periodically<F, Fut>(swarm: &Arc<Swarm>, period: Duration, mut cycle: F)
where
    F: FnMut(Arc<Swarm>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticks = IntervalStream::new(interval_at(Instant::now() + period, period));

    loop {
        tokio::select! {
            _ = swarm.token.cancelled() => break,
            tick = ticks.next() => {
                if tick.is_none() {
                    break;
                }
                cycle(Arc::clone(swarm)).await;
            }
        }
    }
}

/// One preferred-neighbor cycle. Selection happens under the choke lock; the
/// resulting messages are sent after it is released.
pub async fn select_preferred_neighbors(swarm: &Swarm) -> ChokePlan {
    let (plan, preferred) = {
        let mut choke = swarm.choke.lock().await;
        let local_complete = swarm.local.lock().await.is_complete();
        let views = swarm.peer_views().await;

        let plan = choke.plan_preferred(&views, swarm.common.num_pref_neighbors, local_complete);
        (plan, choke.preferred().clone())
    };

    for peer_id in &plan.unchoke {
        if let Err(e) = swarm.send_to(*peer_id, PeerMessage::Unchoke).await {
            tracing::warn!("Peer {} failed to unchoke {}: {}", swarm.local_id, peer_id, e);
        }
    }
    for peer_id in &plan.choke {
        if let Err(e) = swarm.send_to(*peer_id, PeerMessage::Choke).await {
            tracing::warn!("Peer {} failed to choke {}: {}", swarm.local_id, peer_id, e);
        }
    }

    if !preferred.is_empty() || !plan.is_empty() {
        let names = preferred.iter().map(|id| id.to_string()).collect::<Vec<String>>();
        tracing::info!("Peer {} has the preferred neighbors {}.", swarm.local_id, names.join(", "));
    }

    plan
}

/// One optimistic-unchoke cycle.
pub async fn select_optimistic_neighbor(swarm: &Swarm) -> Option<PeerId> {
    let selected = {
        let mut choke = swarm.choke.lock().await;
        let views = swarm.peer_views().await;
        choke.plan_optimistic(&views)
    }?;

    match swarm.send_to(selected, PeerMessage::Unchoke).await {
        Ok(()) => tracing::info!("Peer {} has the optimistically unchoked neighbor {}.", swarm.local_id, selected),
        Err(e) => tracing::warn!("Peer {} failed to optimistically unchoke {}: {}", swarm.local_id, selected, e),
    }

    Some(selected)
}
