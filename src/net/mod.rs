//! Connection management: rejoin identity, backlog queues, liveness

pub mod connection;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::unix_millis;
use crate::ws::protocol::ServerMsg;

pub use connection::{ConnectionLifecycle, ConnectionPhase, RECONNECT_BUDGET};

/// Interval between server-initiated liveness pings
pub const PING_INTERVAL_SECS: u64 = 5;

/// Cap on messages buffered for a detached participant. Snapshots are
/// superseded every tick anyway; only the newest messages matter.
const BACKLOG_LIMIT: usize = 256;

/// Ticks a participant may sit without transport activity before one
/// reconnect attempt is charged (5 seconds at the 30Hz tick rate)
const REJOIN_WINDOW_TICKS: u64 = 150;

/// Outcome of a join request
#[derive(Debug, Clone, Copy)]
pub struct JoinOutcome {
    pub rejoin_id: Uuid,
    pub rejoined: bool,
}

/// One logical participant, persisting across transport drops
struct Participant {
    display_name: String,
    lifecycle: ConnectionLifecycle,
    /// Attached transport, if any
    sender: Option<mpsc::UnboundedSender<ServerMsg>>,
    /// Outbound messages queued while no transport is attached
    backlog: VecDeque<ServerMsg>,
    ping_sent_at: Option<u64>,
    rtt_ms: Option<u64>,
    /// Ticks elapsed since the last transport activity
    idle_ticks: u64,
    /// Registration order, fixed for the participant's lifetime
    seq: u64,
}

impl Participant {
    /// Deliver a message, flushing any backlog first so queued messages
    /// arrive in submission order.
    fn deliver(&mut self, msg: ServerMsg) {
        let Some(sender) = self.sender.clone() else {
            self.queue(msg);
            return;
        };
        while let Some(queued) = self.backlog.pop_front() {
            if let Err(err) = sender.send(queued) {
                // Transport task is gone; keep everything for the rejoin
                self.backlog.push_front(err.0);
                self.sender = None;
                self.queue(msg);
                return;
            }
        }
        if let Err(err) = sender.send(msg) {
            self.sender = None;
            self.queue(err.0);
        }
    }

    fn queue(&mut self, msg: ServerMsg) {
        if self.backlog.len() >= BACKLOG_LIMIT {
            self.backlog.pop_front();
        }
        self.backlog.push_back(msg);
    }
}

/// Registry of logical participants, keyed by rejoin identity.
///
/// Transport tasks attach and detach; the participant record survives drops
/// until its reconnect budget is exhausted.
pub struct ConnectionRegistry {
    participants: RwLock<HashMap<Uuid, Participant>>,
    next_seq: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            participants: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Handle a join. A known rejoin identity resumes the same logical
    /// participant with a fresh retry budget; anything else creates one.
    pub fn join(&self, rejoin_id: Option<Uuid>, display_name: Option<String>) -> JoinOutcome {
        let mut participants = self.participants.write();

        if let Some(id) = rejoin_id {
            if let Some(participant) = participants.get_mut(&id) {
                participant.lifecycle.record_open();
                participant.idle_ticks = 0;
                if let Some(name) = display_name {
                    participant.display_name = name;
                }
                info!(conn_id = %id, "Participant rejoined");
                return JoinOutcome {
                    rejoin_id: id,
                    rejoined: true,
                };
            }
            debug!(conn_id = %id, "Unknown rejoin identity, issuing a new one");
        }

        let id = Uuid::new_v4();
        let mut lifecycle = ConnectionLifecycle::new(RECONNECT_BUDGET);
        lifecycle.record_open();
        participants.insert(
            id,
            Participant {
                display_name: display_name
                    .unwrap_or_else(|| format!("Player_{}", &id.to_string()[..8])),
                lifecycle,
                sender: None,
                backlog: VecDeque::new(),
                ping_sent_at: None,
                rtt_ms: None,
                idle_ticks: 0,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        info!(conn_id = %id, "Participant joined");
        JoinOutcome {
            rejoin_id: id,
            rejoined: false,
        }
    }

    /// Attach a transport to a participant and flush its backlog in
    /// submission order.
    pub fn attach(&self, id: Uuid, sender: mpsc::UnboundedSender<ServerMsg>) -> bool {
        let mut participants = self.participants.write();
        let Some(participant) = participants.get_mut(&id) else {
            return false;
        };
        participant.lifecycle.record_open();
        participant.idle_ticks = 0;
        while let Some(queued) = participant.backlog.pop_front() {
            if sender.send(queued).is_err() {
                return false;
            }
        }
        participant.sender = Some(sender);
        true
    }

    /// Transport dropped. Returns the resulting phase; on exhaustion the
    /// participant is removed and its resources released.
    pub fn detach(&self, id: Uuid) -> Option<ConnectionPhase> {
        let mut participants = self.participants.write();
        let participant = participants.get_mut(&id)?;
        participant.sender = None;
        participant.idle_ticks = 0;
        let phase = participant.lifecycle.record_close();
        match phase {
            ConnectionPhase::Exhausted => {
                participants.remove(&id);
                warn!(conn_id = %id, "Reconnect budget exhausted, participant abandoned");
            }
            _ => {
                debug!(
                    conn_id = %id,
                    attempts_left = participants
                        .get(&id)
                        .map(|p| p.lifecycle.attempts_left())
                        .unwrap_or(0),
                    "Transport dropped, awaiting rejoin"
                );
            }
        }
        Some(phase)
    }

    /// Peer explicitly left; remove immediately.
    pub fn remove(&self, id: Uuid) {
        self.participants.write().remove(&id);
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.participants.read().contains_key(&id)
    }

    pub fn display_name(&self, id: Uuid) -> Option<String> {
        self.participants.read().get(&id).map(|p| p.display_name.clone())
    }

    pub fn count(&self) -> usize {
        self.participants.read().len()
    }

    /// Participant ids in registration order. Collect iterates connections
    /// in this fixed order for reproducibility.
    pub fn ordered_ids(&self) -> Vec<Uuid> {
        let participants = self.participants.read();
        let mut ids: Vec<(u64, Uuid)> = participants.iter().map(|(id, p)| (p.seq, *id)).collect();
        ids.sort_unstable_by_key(|(seq, _)| *seq);
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Send to one participant; queues if no transport is attached.
    pub fn send(&self, id: Uuid, msg: ServerMsg) {
        if let Some(participant) = self.participants.write().get_mut(&id) {
            participant.deliver(msg);
        }
    }

    /// Send to every participant.
    pub fn broadcast(&self, msg: &ServerMsg) {
        for participant in self.participants.write().values_mut() {
            participant.deliver(msg.clone());
        }
    }

    /// Drain queued messages for the degraded fallback transport. A poll
    /// counts as transport activity and resets the rejoin window.
    pub fn drain_backlog(&self, id: Uuid) -> Option<Vec<ServerMsg>> {
        let mut participants = self.participants.write();
        let participant = participants.get_mut(&id)?;
        participant.idle_ticks = 0;
        Some(participant.backlog.drain(..).collect())
    }

    /// Advance the idle clocks; called once per simulation tick. A
    /// participant with no attached transport is charged one reconnect
    /// attempt per elapsed rejoin window, so a peer that drops and never
    /// returns reaches exhaustion in bounded time. Fallback participants
    /// never attach a sender; their polls reset the clock instead.
    pub fn expire_idle(&self) {
        let mut participants = self.participants.write();
        let mut exhausted = Vec::new();
        for (id, participant) in participants.iter_mut() {
            if participant.sender.is_some() {
                continue;
            }
            participant.idle_ticks += 1;
            if participant.idle_ticks < REJOIN_WINDOW_TICKS {
                continue;
            }
            participant.idle_ticks = 0;
            if participant.lifecycle.record_close() == ConnectionPhase::Exhausted {
                exhausted.push(*id);
            }
        }
        for id in exhausted {
            participants.remove(&id);
            warn!(conn_id = %id, "Rejoin window expired, participant abandoned");
        }
    }

    /// Record that a liveness ping was sent. Returns the timestamp used.
    pub fn record_ping_sent(&self, id: Uuid) -> Option<u64> {
        let mut participants = self.participants.write();
        let participant = participants.get_mut(&id)?;
        let now = unix_millis();
        participant.ping_sent_at = Some(now);
        Some(now)
    }

    /// Record a pong and derive the round-trip time from the matching ping.
    pub fn record_pong(&self, id: Uuid, sent_at: u64) -> Option<u64> {
        let mut participants = self.participants.write();
        let participant = participants.get_mut(&id)?;
        // Only a pong answering the outstanding ping counts
        let ping_at = participant.ping_sent_at.take()?;
        if sent_at != ping_at {
            participant.ping_sent_at = Some(ping_at);
            return None;
        }
        let rtt = unix_millis().saturating_sub(ping_at);
        participant.rtt_ms = Some(rtt);
        Some(rtt)
    }

    pub fn rtt_ms(&self, id: Uuid) -> Option<u64> {
        self.participants.read().get(&id).and_then(|p| p.rtt_ms)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
