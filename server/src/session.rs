//! Room membership, the ready/start quorum and room-scoped broadcast.
//!
//! Two rooms exist for the whole life of the process: the general room that
//! every admitted player joins, and the faction room that is filled once a
//! match deals the faction's roles. Delivery to a player goes through the
//! unbounded line channel registered by that player's connection.

use log::{debug, info, warn};
use shared::{FACTION_ROOM, GENERAL_ROOM};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Outbound line queue of one connected player.
pub type PlayerTx = mpsc::UnboundedSender<String>;

pub type SharedSession = Arc<RwLock<SessionManager>>;

/// A named broadcast group with an ordered delivery list.
#[derive(Debug, Clone)]
pub struct Room {
    pub name: String,
    members: Vec<String>,
}

impl Room {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Vec::new(),
        }
    }

    pub fn contains(&self, player: &str) -> bool {
        self.members.iter().any(|m| m == player)
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Result of a ready or start signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuorumOutcome {
    /// Not enough ready players yet, or nobody asked to start
    Waiting,
    /// A start was requested without enough ready players
    Insufficient { ready: usize, needed: usize },
    /// Quorum reached: the general room roster at this instant
    Start(Vec<String>),
    AlreadyStarted,
}

/// Connected players, their rooms and the pre-match quorum.
///
/// Shared between connection workers and the game engine as a
/// [`SharedSession`].
pub struct SessionManager {
    rooms: HashMap<String, Room>,
    outbound: HashMap<String, PlayerTx>,
    ready: HashSet<String>,
    start_requested: bool,
    started: bool,
    min_players: usize,
}

impl SessionManager {
    /// Creates an empty session with the general and faction rooms in place.
    pub fn new(min_players: usize) -> Self {
        let mut rooms = HashMap::new();
        rooms.insert(GENERAL_ROOM.to_string(), Room::new(GENERAL_ROOM));
        rooms.insert(FACTION_ROOM.to_string(), Room::new(FACTION_ROOM));

        Self {
            rooms,
            outbound: HashMap::new(),
            ready: HashSet::new(),
            start_requested: false,
            started: false,
            min_players,
        }
    }

    pub fn shared(min_players: usize) -> SharedSession {
        Arc::new(RwLock::new(Self::new(min_players)))
    }

    /// Returns true while a connected player holds `name`.
    pub fn is_taken(&self, name: &str) -> bool {
        self.outbound.contains_key(name)
    }

    /// Registers the outbound queue of a newly admitted player. Returns
    /// false when the name is already in use.
    pub fn register(&mut self, name: &str, tx: PlayerTx) -> bool {
        if self.is_taken(name) {
            return false;
        }
        self.outbound.insert(name.to_string(), tx);
        true
    }

    /// Drops every trace of a disconnected player: outbound queue, room
    /// memberships and ready signal.
    pub fn unregister(&mut self, name: &str) {
        self.outbound.remove(name);
        self.ready.remove(name);
        let rooms: Vec<String> = self
            .rooms
            .values()
            .filter(|room| room.contains(name))
            .map(|room| room.name.clone())
            .collect();
        for room in rooms {
            self.leave(&room, name);
        }
        info!("{} unregistered", name);
    }

    /// Adds `player` to `room`. Joining the general room announces the
    /// arrival together with the resulting head count.
    pub fn join(&mut self, room: &str, player: &str) -> bool {
        let Some(target) = self.rooms.get_mut(room) else {
            warn!("join of unknown room {} by {}", room, player);
            return false;
        };
        if target.contains(player) {
            return false;
        }
        target.members.push(player.to_string());
        let count = target.len();
        info!("{} joined {} ({} members)", player, room, count);

        if room == GENERAL_ROOM {
            self.broadcast(
                GENERAL_ROOM,
                &format!("* {} joined the game ({} players)", player, count),
            );
        }
        true
    }

    /// Removes `player` from `room`. Leaving the general room is announced
    /// to those still in it. Returns false if `player` was not a member.
    pub fn leave(&mut self, room: &str, player: &str) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(target) => match target.members.iter().position(|m| m == player) {
                Some(index) => {
                    target.members.remove(index);
                    true
                }
                None => false,
            },
            None => false,
        };

        if removed {
            info!("{} left {}", player, room);
            if room == GENERAL_ROOM {
                self.broadcast(GENERAL_ROOM, &format!("* {} left the game", player));
            }
        } else {
            warn!("{} tried to leave {} without being a member", player, room);
        }
        removed
    }

    /// Sends `message` to every member of `room`; unknown rooms are ignored.
    pub fn broadcast(&self, room: &str, message: &str) {
        let Some(target) = self.rooms.get(room) else {
            debug!("broadcast to unknown room {}", room);
            return;
        };
        for member in &target.members {
            self.send_to(member, message);
        }
    }

    /// Queues `message` for one player. Returns false when the player is
    /// unknown or their connection is already closing.
    pub fn send_to(&self, player: &str, message: &str) -> bool {
        match self.outbound.get(player) {
            Some(tx) => {
                if tx.send(message.to_string()).is_err() {
                    debug!("outbound queue of {} is closed", player);
                    return false;
                }
                true
            }
            None => false,
        }
    }

    pub fn room(&self, room: &str) -> Option<&Room> {
        self.rooms.get(room)
    }

    /// Members of `room` in join order, empty for unknown rooms.
    pub fn members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|r| r.members.clone())
            .unwrap_or_default()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    /// Records a ready signal. Repeated signals from one player count once.
    pub fn mark_ready(&mut self, player: &str) -> QuorumOutcome {
        if self.started {
            return QuorumOutcome::AlreadyStarted;
        }
        if self.ready.insert(player.to_string()) {
            self.broadcast(
                GENERAL_ROOM,
                &format!(
                    "* {} is ready ({}/{})",
                    player,
                    self.ready.len(),
                    self.min_players
                ),
            );
        }
        self.evaluate(false)
    }

    pub fn mark_start(&mut self, player: &str) -> QuorumOutcome {
        if self.started {
            return QuorumOutcome::AlreadyStarted;
        }
        info!("{} requested the start", player);
        self.start_requested = true;
        self.evaluate(true)
    }

    fn evaluate(&mut self, announce_shortfall: bool) -> QuorumOutcome {
        if !self.start_requested {
            return QuorumOutcome::Waiting;
        }

        let ready = self.ready.len();
        if ready < self.min_players {
            if announce_shortfall {
                self.broadcast(
                    GENERAL_ROOM,
                    &format!(
                        "* Not enough players: {} ready, {} needed",
                        ready, self.min_players
                    ),
                );
                return QuorumOutcome::Insufficient {
                    ready,
                    needed: self.min_players,
                };
            }
            return QuorumOutcome::Waiting;
        }

        self.started = true;
        let roster = self.members(GENERAL_ROOM);
        info!("Quorum reached, starting with {} players", roster.len());
        self.broadcast(GENERAL_ROOM, "* The game is starting!");
        QuorumOutcome::Start(roster)
    }
}
