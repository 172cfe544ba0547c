//! Authoritative match state: roles, alive list, pending submissions and
//! their resolution at phase expiry.
//!
//! `Match` performs no I/O. Every transition returns the [`Outcome`]s it
//! produced and the engine turns those into player lines and relay
//! notifications.

use crate::ledger::ActionLedger;
use crate::roles::{Faction, NightVerb, RolePolicy, RoleRegistry};
use log::{debug, info};
use rand::Rng;
use shared::{
    Phase, ACTION_TAG, DAY_TAG, DEATH_TAG, ERROR_TAG, FACTION_ROOM, GAME_OVER_TAG, GENERAL_ROOM,
    HANGED_TAG, NIGHT_TAG, ROLE_TAG,
};
use std::collections::{HashMap, HashSet};

/// Timing and role rules a match is played under.
#[derive(Debug, Clone)]
pub struct MatchRules {
    pub night_seconds: u32,
    pub day_seconds: u32,
    pub role_policy: RolePolicy,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            night_seconds: 30,
            day_seconds: 30,
            role_policy: RolePolicy::default(),
        }
    }
}

/// A pending night submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NightAction {
    pub verb: NightVerb,
    pub target: String,
}

/// Something a transition produced that must leave the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Private line to one player
    Tell { to: String, text: String },
    /// Line to every original participant, dead or alive
    Announce(String),
    /// Line to the members of a session room
    Room { room: &'static str, text: String },
    PhaseChanged(Phase),
    Died(String),
    Ended(Faction),
}

/// One match from role reveal to game over.
///
/// Transitions return [`Outcome`]s instead of sending anything, so the
/// caller decides how lines reach players and the relay.
pub struct Match {
    players: Vec<String>,
    roles: RoleRegistry,
    night_actions: ActionLedger<NightAction>,
    votes: ActionLedger<String>,
    phase: Phase,
    remaining: u32,
    alive: Vec<String>,
    winner: Option<Faction>,
    rules: MatchRules,
}

impl Match {
    /// Deals roles to `players` and waits in the lobby phase until started.
    pub fn new<R: Rng + ?Sized>(players: Vec<String>, rules: MatchRules, rng: &mut R) -> Self {
        let roles = RoleRegistry::assign(&players, &rules.role_policy, rng);
        Self::with_roles(players, roles, rules)
    }

    /// Builds a match from roles dealt elsewhere.
    pub fn with_roles(players: Vec<String>, roles: RoleRegistry, rules: MatchRules) -> Self {
        Self {
            alive: players.clone(),
            players,
            roles,
            night_actions: ActionLedger::new(),
            votes: ActionLedger::new(),
            phase: Phase::Lobby,
            remaining: 0,
            winner: None,
            rules,
        }
    }

    pub fn players(&self) -> &[String] {
        &self.players
    }

    pub fn alive(&self) -> &[String] {
        &self.alive
    }

    pub fn is_alive(&self, player: &str) -> bool {
        self.alive.iter().any(|p| p == player)
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn winner(&self) -> Option<Faction> {
        self.winner
    }

    pub fn is_over(&self) -> bool {
        self.winner.is_some()
    }

    pub fn pending_night_action(&self, player: &str) -> Option<NightAction> {
        self.night_actions.get(player)
    }

    pub fn pending_vote(&self, player: &str) -> Option<String> {
        self.votes.get(player)
    }

    /// Reveals each role privately and enters the first night.
    pub fn start(&mut self) -> Vec<Outcome> {
        let mut out = Vec::new();
        for player in &self.players {
            if let Some(role) = self.roles.role_of(player) {
                out.push(Outcome::Tell {
                    to: player.clone(),
                    text: format!("{} {}", ROLE_TAG, role.name),
                });
            }
        }

        let mafia = self.roles.members_of(Faction::Mafia);
        if mafia.len() > 1 {
            out.push(Outcome::Room {
                room: FACTION_ROOM,
                text: format!("[MAFIA] Your family: {}", mafia.join(", ")),
            });
        }

        info!("Match started with {} players", self.players.len());
        out.extend(self.enter_night());
        out
    }

    /// Clears pending night actions, resets the countdown and announces the
    /// night to everyone.
    pub fn enter_night(&mut self) -> Vec<Outcome> {
        self.night_actions.clear();
        self.phase = Phase::Night;
        self.remaining = self.rules.night_seconds;
        info!("Night falls, {} alive", self.alive.len());

        let mut out = vec![
            Outcome::PhaseChanged(Phase::Night),
            Outcome::Announce(format!(
                "{} Night falls. {} seconds until dawn.",
                NIGHT_TAG, self.remaining
            )),
        ];
        for player in &self.alive {
            if let Some(role) = self.roles.role_of(player) {
                out.push(Outcome::Tell {
                    to: player.clone(),
                    text: format!("{} {}", ACTION_TAG, role.night_hint()),
                });
            }
        }
        out
    }

    /// Stores a night action when the phase, the submitter's liveness and
    /// the submitter's role all allow it. Returns whether it was stored.
    pub fn submit_night_action(&mut self, submitter: &str, verb: NightVerb, target: &str) -> bool {
        if self.is_over() || self.phase != Phase::Night || !self.is_alive(submitter) {
            debug!("dropped {:?} from {} outside its window", verb, submitter);
            return false;
        }
        let allowed = self
            .roles
            .role_of(submitter)
            .is_some_and(|role| role.night == Some(verb));
        if !allowed {
            debug!("{} may not {:?}", submitter, verb);
            return false;
        }

        self.night_actions.submit(
            submitter,
            NightAction {
                verb,
                target: target.to_string(),
            },
        );
        true
    }

    /// Clears pending votes, resets the countdown and lists the living.
    pub fn enter_day(&mut self) -> Vec<Outcome> {
        self.votes.clear();
        self.phase = Phase::Day;
        self.remaining = self.rules.day_seconds;
        info!("Day breaks, {} alive", self.alive.len());

        vec![
            Outcome::PhaseChanged(Phase::Day),
            Outcome::Announce(format!(
                "{} Day breaks. Alive ({}): {}. Vote with /vote <name> within {} seconds.",
                DAY_TAG,
                self.alive.len(),
                self.alive.join(", "),
                self.remaining
            )),
        ]
    }

    /// Stores a day vote from a living player. A later vote replaces an
    /// earlier one. Returns whether it was stored.
    pub fn submit_vote(&mut self, submitter: &str, target: &str) -> bool {
        if self.is_over() || self.phase != Phase::Day || !self.is_alive(submitter) {
            debug!("dropped vote from {}", submitter);
            return false;
        }
        self.votes.submit(submitter, target.to_string());
        true
    }

    /// Advances the display countdown by one unit.
    pub fn tick(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }

    /// Resolves the running phase and moves to the next one, or ends the
    /// match if a faction has won.
    pub fn expire(&mut self) -> Vec<Outcome> {
        if self.is_over() {
            return Vec::new();
        }
        match self.phase {
            Phase::Night => self.resolve_night(),
            Phase::Day => self.resolve_day(),
            Phase::Lobby => Vec::new(),
        }
    }

    fn resolve_night(&mut self) -> Vec<Outcome> {
        let actions = self.night_actions.snapshot();
        self.night_actions.clear();

        let healed: HashSet<&str> = actions
            .iter()
            .filter(|(_, a)| a.verb == NightVerb::Heal)
            .map(|(_, a)| a.target.as_str())
            .collect();

        let mut out = Vec::new();
        for (killer, action) in actions.iter().filter(|(_, a)| a.verb == NightVerb::Kill) {
            if healed.contains(action.target.as_str()) {
                debug!("{}'s kill on {} was healed", killer, action.target);
                continue;
            }
            if self.eliminate(&action.target) {
                info!("{} was killed during the night", action.target);
                out.push(Outcome::Died(action.target.clone()));
                out.push(Outcome::Announce(format!(
                    "{} {} was killed during the night",
                    DEATH_TAG, action.target
                )));
            }
        }

        out.extend(self.conclude_or(Self::enter_day));
        out
    }

    fn resolve_day(&mut self) -> Vec<Outcome> {
        let votes = self.votes.snapshot();
        self.votes.clear();

        let mut tally: HashMap<&str, usize> = HashMap::new();
        for (voter, target) in &votes {
            if self.is_alive(voter) {
                *tally.entry(target.as_str()).or_insert(0) += 1;
            }
        }

        let top = tally.values().copied().max().unwrap_or(0);
        let leaders: Vec<&str> = tally
            .iter()
            .filter(|(_, count)| **count == top)
            .map(|(target, _)| *target)
            .collect();

        let mut out = Vec::new();
        match leaders.as_slice() {
            [] => out.push(Outcome::Announce(format!(
                "{} Nobody voted, nobody is hanged.",
                DAY_TAG
            ))),
            [target] => {
                let target = target.to_string();
                if self.eliminate(&target) {
                    info!("{} was hanged with {} votes", target, top);
                    out.push(Outcome::Died(target.clone()));
                    out.push(Outcome::Announce(format!(
                        "{} {} ({} votes)",
                        HANGED_TAG, target, top
                    )));
                } else {
                    out.push(Outcome::Announce(format!(
                        "{} {} is not among the living, nobody is hanged.",
                        DAY_TAG, target
                    )));
                }
            }
            _ => out.push(Outcome::Announce(format!(
                "{} The vote is tied at {}, nobody is hanged.",
                DAY_TAG, top
            ))),
        }

        out.extend(self.conclude_or(Self::enter_night));
        out
    }

    /// Removes a disconnected player from the living and re-checks the win
    /// condition.
    pub fn remove_player(&mut self, player: &str) -> Vec<Outcome> {
        if self.is_over() || !self.eliminate(player) {
            return Vec::new();
        }
        info!("{} left the match while alive", player);
        let mut out = vec![
            Outcome::Died(player.to_string()),
            Outcome::Announce(format!("{} {} left the game", DEATH_TAG, player)),
        ];
        if let Some(winner) = self.check_winner() {
            out.extend(self.terminate(winner));
        }
        out
    }

    /// Counts the living by faction. The mafia loses once none of them are
    /// alive and wins once they match or outnumber everyone else.
    pub fn check_winner(&self) -> Option<Faction> {
        let mafia = self
            .alive
            .iter()
            .filter(|p| self.roles.faction_of(p) == Some(Faction::Mafia))
            .count();
        let others = self.alive.len() - mafia;

        if mafia == 0 {
            Some(Faction::Town)
        } else if mafia >= others {
            Some(Faction::Mafia)
        } else {
            None
        }
    }

    /// Ends the match in favor of `winner` and reveals every role. Does
    /// nothing once the match is over.
    pub fn terminate(&mut self, winner: Faction) -> Vec<Outcome> {
        if self.is_over() {
            return Vec::new();
        }
        self.winner = Some(winner);
        self.remaining = 0;
        info!("{} wins", winner);

        let reveal: Vec<String> = self
            .players
            .iter()
            .filter_map(|p| self.roles.role_of(p).map(|r| format!("{}={}", p, r.name)))
            .collect();

        vec![
            Outcome::Announce(format!("{} {} wins", GAME_OVER_TAG, winner)),
            Outcome::Announce(format!("* Roles: {}", reveal.join(", "))),
            Outcome::Ended(winner),
        ]
    }

    /// Relays a general room message from a living player during the day.
    pub fn chat(&self, from: &str, text: &str) -> Vec<Outcome> {
        if self.is_over() || self.phase != Phase::Day {
            return vec![self.refuse(from, "chat is only open during the day")];
        }
        if !self.is_alive(from) {
            return vec![self.refuse(from, "the dead do not speak")];
        }
        vec![Outcome::Room {
            room: GENERAL_ROOM,
            text: format!("{}: {}", from, text),
        }]
    }

    /// Relays a message to the faction room. Only living mafia may use it,
    /// in any phase.
    pub fn faction_chat(&self, from: &str, text: &str) -> Vec<Outcome> {
        if self.roles.faction_of(from) != Some(Faction::Mafia) {
            return vec![self.refuse(from, "you have no family to talk to")];
        }
        if !self.is_alive(from) {
            return vec![self.refuse(from, "the dead do not speak")];
        }
        vec![Outcome::Room {
            room: FACTION_ROOM,
            text: format!("[MAFIA] {}: {}", from, text),
        }]
    }

    fn refuse(&self, to: &str, reason: &str) -> Outcome {
        Outcome::Tell {
            to: to.to_string(),
            text: format!("{} {}", ERROR_TAG, reason),
        }
    }

    fn eliminate(&mut self, player: &str) -> bool {
        match self.alive.iter().position(|p| p == player) {
            Some(index) => {
                self.alive.remove(index);
                true
            }
            None => false,
        }
    }

    fn conclude_or(&mut self, next: fn(&mut Self) -> Vec<Outcome>) -> Vec<Outcome> {
        match self.check_winner() {
            Some(winner) => self.terminate(winner),
            None => next(self),
        }
    }
}
