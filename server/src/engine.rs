//! The game engine actor.
//!
//! A single task owns the running [`Match`] and both of its timers: a
//! repeating display tick and the one-shot phase deadline. Commands from
//! connection workers arrive over a channel, so submissions, ticks and
//! resolutions are applied strictly one after another and a resolution always
//! finishes before the next phase's timers are armed.

use crate::config::ServerConfig;
use crate::game::{Match, MatchRules, Outcome};
use crate::relay::RelayNotice;
use crate::roles::{Faction, NightVerb};
use crate::session::SharedSession;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{Phase, ERROR_TAG, FACTION_ROOM, GENERAL_ROOM, TIME_TAG};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

/// Requests from connection workers to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Start {
        roster: Vec<String>,
    },
    NightAction {
        player: String,
        verb: NightVerb,
        target: String,
    },
    Vote {
        player: String,
        target: String,
    },
    Chat {
        player: String,
        text: String,
    },
    FactionChat {
        player: String,
        text: String,
    },
    Who {
        player: String,
    },
    Disconnected {
        player: String,
    },
}

/// Cloneable sending side of the engine plus a view of the current phase.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    phase: watch::Receiver<Phase>,
}

impl EngineHandle {
    pub fn new(
        commands: mpsc::UnboundedSender<EngineCommand>,
        phase: watch::Receiver<Phase>,
    ) -> Self {
        Self { commands, phase }
    }

    /// Queues `command` for the engine. Commands sent after the engine
    /// stopped are dropped with a warning.
    pub fn send(&self, command: EngineCommand) {
        if self.commands.send(command).is_err() {
            warn!("Game engine stopped, dropping command");
        }
    }

    /// Phase most recently published by the engine.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }
}

/// Owns the running match and its timers.
///
/// Created together with an [`EngineHandle`] by [`GameEngine::new`]; call
/// [`GameEngine::run`] on a task of its own.
pub struct GameEngine {
    rules: MatchRules,
    tick: Duration,
    session: SharedSession,
    relay: mpsc::UnboundedSender<RelayNotice>,
    phase: watch::Sender<Phase>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    current: Option<Match>,
    ticker: Option<Interval>,
    deadline: Option<Instant>,
    rng: StdRng,
}

impl GameEngine {
    /// Builds an engine from the server settings. The phase starts at LOBBY.
    pub fn new(
        config: &ServerConfig,
        session: SharedSession,
        relay: mpsc::UnboundedSender<RelayNotice>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(Phase::Lobby);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let engine = Self {
            rules: MatchRules {
                night_seconds: config.night_seconds,
                day_seconds: config.day_seconds,
                role_policy: config.role_policy,
            },
            tick: config.tick,
            session,
            relay,
            phase: phase_tx,
            commands: command_rx,
            current: None,
            ticker: None,
            deadline: None,
            rng,
        };
        (engine, EngineHandle::new(command_tx, phase_rx))
    }

    /// Processes commands and timers until every handle is dropped.
    pub async fn run(mut self) {
        info!("Game engine running");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!("Game engine shutting down");
                            break;
                        }
                    }
                },

                _ = next_tick(&mut self.ticker) => {
                    self.on_tick().await;
                },

                _ = wait_until(self.deadline) => {
                    self.on_expiry().await;
                },
            }
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Start { roster } => self.start(roster).await,
            EngineCommand::NightAction {
                player,
                verb,
                target,
            } => {
                if let Some(current) = self.current.as_mut() {
                    if current.submit_night_action(&player, verb, &target) {
                        debug!("{} submitted {:?} on {}", player, verb, target);
                    }
                }
            }
            EngineCommand::Vote { player, target } => {
                if let Some(current) = self.current.as_mut() {
                    if current.submit_vote(&player, &target) {
                        debug!("{} votes for {}", player, target);
                    }
                }
            }
            EngineCommand::Chat { player, text } => {
                let out = match &self.current {
                    Some(current) => current.chat(&player, &text),
                    None => vec![refusal(player, "chat is only open during the day")],
                };
                self.deliver(out).await;
            }
            EngineCommand::FactionChat { player, text } => {
                let out = match &self.current {
                    Some(current) => current.faction_chat(&player, &text),
                    None => vec![refusal(player, "no match is running")],
                };
                self.deliver(out).await;
            }
            EngineCommand::Who { player } => self.who(&player).await,
            EngineCommand::Disconnected { player } => {
                let out = match self.current.as_mut() {
                    Some(current) => current.remove_player(&player),
                    None => Vec::new(),
                };
                self.deliver(out).await;
                self.notify(RelayNotice::PlayerLeft(player));
            }
        }
    }

    async fn start(&mut self, roster: Vec<String>) {
        if self.current.is_some() {
            warn!("A match already exists, ignoring start");
            return;
        }

        // Players who left between quorum and this command are never seated.
        let mut session = self.session.write().await;
        let (roster, gone): (Vec<String>, Vec<String>) =
            roster.into_iter().partition(|name| session.is_taken(name));
        if !gone.is_empty() {
            info!("Dropping disconnected players from the roster: {}", gone.join(", "));
        }
        if roster.is_empty() {
            warn!("Refusing to start a match without players");
            return;
        }

        let mut current = Match::new(roster, self.rules.clone(), &mut self.rng);
        for name in current.roles().members_of(Faction::Mafia) {
            session.join(FACTION_ROOM, &name);
        }
        drop(session);
        let out = current.start();
        self.current = Some(current);
        self.deliver(out).await;
        self.arm();
    }

    async fn on_tick(&mut self) {
        let (remaining, players) = match self.current.as_mut() {
            Some(current) if !current.is_over() => (current.tick(), current.players().to_vec()),
            _ => return,
        };
        // the deadline announces zero itself
        if remaining == 0 {
            return;
        }

        let line = format!("{} {}", TIME_TAG, remaining);
        let session = self.session.read().await;
        for player in &players {
            session.send_to(player, &line);
        }
    }

    async fn on_expiry(&mut self) {
        self.disarm();
        let out = match self.current.as_mut() {
            Some(current) => current.expire(),
            None => return,
        };
        self.deliver(out).await;
        self.arm();
    }

    async fn who(&self, player: &str) {
        let session = self.session.read().await;
        let members = session.members(GENERAL_ROOM);
        session.send_to(
            player,
            &format!("* Connected ({}): {}", members.len(), members.join(", ")),
        );
        if let Some(current) = self.current.as_ref().filter(|m| !m.is_over()) {
            session.send_to(
                player,
                &format!(
                    "* {} phase, {}s left. Alive ({}): {}",
                    current.phase(),
                    current.remaining(),
                    current.alive().len(),
                    current.alive().join(", ")
                ),
            );
        }
    }

    /// Routes transition outcomes to players, the phase watch and the relay.
    async fn deliver(&mut self, out: Vec<Outcome>) {
        if out.is_empty() {
            return;
        }
        let participants: Vec<String> = self
            .current
            .as_ref()
            .map(|m| m.players().to_vec())
            .unwrap_or_default();
        let session = Arc::clone(&self.session);
        let session = session.read().await;

        for outcome in out {
            match outcome {
                Outcome::Tell { to, text } => {
                    session.send_to(&to, &text);
                }
                Outcome::Announce(text) => {
                    for player in &participants {
                        session.send_to(player, &text);
                    }
                }
                Outcome::Room { room, text } => session.broadcast(room, &text),
                Outcome::PhaseChanged(phase) => {
                    self.phase.send_replace(phase);
                    self.notify(RelayNotice::PhaseChanged(phase));
                }
                Outcome::Died(name) => self.notify(RelayNotice::PlayerDied(name)),
                Outcome::Ended(winner) => {
                    info!("Match over, {} won", winner);
                    self.disarm();
                    self.phase.send_replace(Phase::Lobby);
                    self.notify(RelayNotice::MatchEnded);
                }
            }
        }
    }

    fn notify(&self, notice: RelayNotice) {
        if self.relay.send(notice).is_err() {
            debug!("Voice relay is not listening for notices");
        }
    }

    /// Schedules the display tick and the deadline for the current phase.
    fn arm(&mut self) {
        self.disarm();
        let remaining = match self.current.as_ref() {
            Some(current) if !current.is_over() => current.remaining(),
            _ => return,
        };

        let now = Instant::now();
        let deadline = self
            .tick
            .checked_mul(remaining)
            .and_then(|length| now.checked_add(length));
        let deadline = match deadline {
            Some(deadline) => deadline,
            None => {
                error!("Phase of {} ticks does not fit on the clock, timers left idle", remaining);
                return;
            }
        };
        self.deadline = Some(deadline);
        let mut ticker = interval_at(now + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
    }

    fn disarm(&mut self) {
        self.ticker = None;
        self.deadline = None;
    }
}

fn refusal(to: String, reason: &str) -> Outcome {
    Outcome::Tell {
        to,
        text: format!("{} {}", ERROR_TAG, reason),
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
