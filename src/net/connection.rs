//! Per-connection lifecycle state machine
//!
//! Connecting -> Open -> (Closed -> Reconnecting)* -> Exhausted.
//! An initial connect failure is fatal for that attempt and is never
//! retried automatically; only unexpected closes after a successful open
//! enter the reconnect path, bounded by an explicit attempt budget rather
//! than a wall-clock timeout.

/// Reconnect attempts granted after every successful open
pub const RECONNECT_BUDGET: u8 = 5;

/// Connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Transport attempt in flight, never been open
    Connecting,
    /// Transport open, normal operation
    Open,
    /// Transport dropped, retry budget not yet exhausted
    Reconnecting,
    /// Retry budget spent; terminal
    Exhausted,
}

/// Tracks one logical connection across transport drops
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    phase: ConnectionPhase,
    budget: u8,
    attempts_left: u8,
}

impl ConnectionLifecycle {
    pub fn new(budget: u8) -> Self {
        Self {
            phase: ConnectionPhase::Connecting,
            budget,
            attempts_left: budget,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn attempts_left(&self) -> u8 {
        self.attempts_left
    }

    pub fn is_exhausted(&self) -> bool {
        self.phase == ConnectionPhase::Exhausted
    }

    /// Transport opened (handshake completed). Restores the full retry
    /// budget, so a single success after N-1 failures resets to N.
    pub fn record_open(&mut self) {
        self.phase = ConnectionPhase::Open;
        self.attempts_left = self.budget;
    }

    /// Initial connect attempt failed before ever opening. Not retried.
    pub fn record_connect_failure(&mut self) {
        if self.phase == ConnectionPhase::Connecting {
            self.phase = ConnectionPhase::Exhausted;
        }
    }

    /// Unexpected transport close (or failed reconnect attempt). Depletes
    /// one attempt; the Nth consecutive failure is terminal.
    pub fn record_close(&mut self) -> ConnectionPhase {
        if self.phase == ConnectionPhase::Exhausted {
            return self.phase;
        }
        self.attempts_left = self.attempts_left.saturating_sub(1);
        self.phase = if self.attempts_left == 0 {
            ConnectionPhase::Exhausted
        } else {
            ConnectionPhase::Reconnecting
        };
        self.phase
    }
}
