//! # Health & Sync Monitor
//!
//! A pure state machine fed with the outcome of every status poll. It owns the
//! daemon's [`ProcessState`] and reports which lifecycle transitions a poll
//! caused. Timers and event emission live in the service actor.

use crate::events::StatusSnapshot;

/// The externally visible health of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Health {
    #[default]
    Down,
    /// Spawned and loaded, but no status poll has succeeded yet.
    Starting,
    AliveUnsynced,
    AliveSynced,
}

impl Health {
    pub fn is_alive(self) -> bool {
        matches!(self, Health::AliveUnsynced | Health::AliveSynced)
    }

    pub fn is_synced(self) -> bool {
        self == Health::AliveSynced
    }
}

/// A snapshot of everything the supervisor knows about the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessState {
    pub health: Health,
    pub known_block_count: u64,
    /// A down-debounce timer is armed.
    pub down_pending: bool,
}

/// Transitions a successful poll can cause, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Alive,
    Synced,
}

#[derive(Debug, Default)]
pub struct HealthMonitor {
    state: ProcessState,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// The daemon finished loading its container and polling begins.
    pub fn starting(&mut self) {
        self.state.health = Health::Starting;
        self.state.down_pending = false;
    }

    /// Applies a successful poll and returns the transitions it caused.
    pub fn on_status(&mut self, snapshot: &StatusSnapshot) -> Vec<Transition> {
        let was_alive = self.state.health.is_alive();
        let was_synced = self.state.health.is_synced();

        self.state.known_block_count = snapshot.known_block_count;
        self.state.down_pending = false;

        let synced = is_synced(snapshot).unwrap_or(was_synced);
        self.state.health = if synced {
            Health::AliveSynced
        } else {
            Health::AliveUnsynced
        };

        let mut transitions = Vec::with_capacity(2);
        if !was_alive {
            transitions.push(Transition::Alive);
        }
        if synced && !was_synced {
            transitions.push(Transition::Synced);
        }
        transitions
    }

    /// Records a failed poll. Returns `true` when a down-debounce timer must be armed.
    pub fn on_poll_failure(&mut self) -> bool {
        if self.state.down_pending || self.state.health == Health::Down {
            return false;
        }
        self.state.down_pending = true;
        true
    }

    /// The down-debounce timer fired. Returns `true` when `down` must be emitted.
    pub fn on_debounce_expired(&mut self) -> bool {
        self.state.down_pending = false;
        if self.state.health == Health::Down {
            return false;
        }
        self.state.health = Health::Down;
        true
    }

    /// Drops the synced flag without touching liveness.
    pub fn mark_unsynced(&mut self) {
        if self.state.health == Health::AliveSynced {
            self.state.health = Health::AliveUnsynced;
        }
    }

    /// A new process was spawned, or the old one is gone. No `down` event is implied.
    pub fn reset(&mut self) {
        self.state.health = Health::Down;
        self.state.down_pending = false;
    }
}

/// `Some(false)` when more than one block behind, `Some(true)` when at or one
/// block behind the known tip, `None` when the reply says nothing new.
fn is_synced(snapshot: &StatusSnapshot) -> Option<bool> {
    let block = snapshot.block_count;
    let known = snapshot.known_block_count;
    match known.checked_sub(block) {
        Some(0 | 1) => Some(true),
        Some(_) => Some(false),
        None => None,
    }
}
