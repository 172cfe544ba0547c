use shared::{Phase, GENERAL_ROOM};
use std::collections::HashSet;

/// The relay's mirror of game truth: the current phase plus who is dead
/// or muted. Only ever updated by explicit notifications.
#[derive(Debug, Clone)]
pub struct VoicePermissionState {
    phase: Phase,
    dead: HashSet<String>,
    muted: HashSet<String>,
}

impl Default for VoicePermissionState {
    fn default() -> Self {
        Self::new()
    }
}

impl VoicePermissionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Lobby,
            dead: HashSet::new(),
            muted: HashSet::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn is_night(&self) -> bool {
        self.phase == Phase::Night
    }

    pub fn mark_dead(&mut self, player: &str) {
        self.dead.insert(player.to_string());
    }

    pub fn is_alive(&self, player: &str) -> bool {
        !self.dead.contains(player)
    }

    pub fn set_muted(&mut self, player: &str, muted: bool) {
        if muted {
            self.muted.insert(player.to_string());
        } else {
            self.muted.remove(player);
        }
    }

    pub fn is_muted(&self, player: &str) -> bool {
        self.muted.contains(player)
    }

    /// Drops all flags held for a player who is gone.
    pub fn forget(&mut self, player: &str) {
        self.dead.remove(player);
        self.muted.remove(player);
    }

    /// Lifts match gating once a match is over.
    pub fn reset(&mut self) {
        self.phase = Phase::Lobby;
        self.dead.clear();
    }

    pub fn can_talk(&self, room: &str, player: &str) -> bool {
        room == GENERAL_ROOM && self.is_alive(player) && !self.is_night()
    }

    pub fn can_listen(&self, room: &str, player: &str) -> bool {
        room == GENERAL_ROOM && self.is_alive(player)
    }
}
