//! UDP voice relay: receives audio and control datagrams and fans them out
//! to the general room's voice participants.
//!
//! The receive loop neither decodes nor waits on handlers: each datagram is
//! handed to a task from a bounded pool, and datagrams arriving while the
//! pool is exhausted are dropped. Phase and death gating comes from
//! [`RelayNotice`]s pushed by the game engine, never from clients.

use crate::client_manager::ClientManager;
use crate::error::ServerError;
use crate::permissions::VoicePermissionState;
use log::{debug, error, info, warn};
use shared::{
    AudioPacket, ControlKind, ControlPacket, Phase, VoicePacket, GENERAL_ROOM, MAX_DATAGRAM,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock, Semaphore};

/// Sender identity stamped on packets the relay originates.
pub const RELAY_IDENTITY: &str = "server";

/// One-way notifications from the game engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayNotice {
    PhaseChanged(Phase),
    PlayerDied(String),
    PlayerLeft(String),
    MatchEnded,
}

/// How often stale client records are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Datagrams to send as the result of handling one input.
pub type Outgoing = Vec<(SocketAddr, VoicePacket)>;

/// Client records and permission mirror, shared by all packet tasks.
///
/// Lock order is always clients before permissions.
#[derive(Debug, Default)]
pub struct RelayState {
    clients: RwLock<ClientManager>,
    permissions: RwLock<VoicePermissionState>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one decoded datagram from `from` and returns what to send.
    pub async fn ingest(&self, packet: VoicePacket, from: SocketAddr) -> Outgoing {
        self.clients.write().await.touch(packet.sender(), from);

        match packet {
            VoicePacket::Audio(audio) => self.route_audio(audio).await,
            VoicePacket::Control(control) => self.route_control(control, from).await,
        }
    }

    async fn route_audio(&self, audio: AudioPacket) -> Outgoing {
        let clients = self.clients.read().await;
        let permissions = self.permissions.read().await;

        if !clients.is_participant(&audio.sender) {
            debug!("audio from {} who has not joined voice", audio.sender);
            return Vec::new();
        }
        if !permissions.can_talk(&audio.target_room, &audio.sender) {
            debug!("audio from {} suppressed", audio.sender);
            return Vec::new();
        }

        let targets: Vec<SocketAddr> = clients
            .participant_addrs(Some(&audio.sender))
            .into_iter()
            .filter(|(name, _)| permissions.can_listen(&audio.target_room, name))
            .map(|(_, addr)| addr)
            .collect();

        let packet = VoicePacket::Audio(audio);
        targets
            .into_iter()
            .map(|addr| (addr, packet.clone()))
            .collect()
    }

    async fn route_control(&self, control: ControlPacket, from: SocketAddr) -> Outgoing {
        match control.kind {
            ControlKind::Join => {
                let room = control.room.as_deref().unwrap_or(GENERAL_ROOM);
                if room != GENERAL_ROOM {
                    debug!("{} asked to join voice in {}", control.sender, room);
                    return Vec::new();
                }
                if self.clients.write().await.join(&control.sender) {
                    info!("{} joined voice", control.sender);
                }
                let phase = self.permissions.read().await.phase();
                vec![(from, phase_packet(phase))]
            }
            ControlKind::Leave => {
                if self.clients.write().await.leave(&control.sender) {
                    info!("{} left voice", control.sender);
                }
                Vec::new()
            }
            ControlKind::Mute | ControlKind::Unmute => {
                let clients = self.clients.read().await;
                self.permissions
                    .write()
                    .await
                    .set_muted(&control.sender, control.kind == ControlKind::Mute);
                if !clients.is_participant(&control.sender) {
                    return Vec::new();
                }
                let packet = VoicePacket::Control(control.clone());
                clients
                    .participant_addrs(Some(&control.sender))
                    .into_iter()
                    .map(|(_, addr)| (addr, packet.clone()))
                    .collect()
            }
            ControlKind::Heartbeat => Vec::new(),
            ControlKind::Ping => {
                let pong = ControlPacket::new(ControlKind::Pong, RELAY_IDENTITY)
                    .with_timestamp(control.timestamp);
                vec![(from, VoicePacket::Control(pong))]
            }
            ControlKind::Pong => {
                debug!("unsolicited pong from {}", control.sender);
                Vec::new()
            }
            ControlKind::PhaseChange | ControlKind::PlayerDied => {
                warn!(
                    "ignoring {:?} sent by client {}",
                    control.kind, control.sender
                );
                Vec::new()
            }
        }
    }

    /// Applies an engine notification and returns the control packets that
    /// tell participants about it.
    pub async fn apply_notice(&self, notice: RelayNotice) -> Outgoing {
        let packet = match notice {
            RelayNotice::PhaseChanged(phase) => {
                self.permissions.write().await.set_phase(phase);
                phase_packet(phase)
            }
            RelayNotice::PlayerDied(name) => {
                self.permissions.write().await.mark_dead(&name);
                VoicePacket::Control(
                    ControlPacket::new(ControlKind::PlayerDied, RELAY_IDENTITY)
                        .with_room(GENERAL_ROOM)
                        .with_data(name),
                )
            }
            RelayNotice::PlayerLeft(name) => {
                self.clients.write().await.remove_client(&name);
                self.permissions.write().await.forget(&name);
                return Vec::new();
            }
            RelayNotice::MatchEnded => {
                self.permissions.write().await.reset();
                phase_packet(Phase::Lobby)
            }
        };

        self.clients
            .read()
            .await
            .participant_addrs(None)
            .into_iter()
            .map(|(_, addr)| (addr, packet.clone()))
            .collect()
    }

    /// Removes records that have been silent for longer than `timeout`.
    /// Death flags survive so a returning identity stays silenced.
    pub async fn sweep(&self, timeout: Duration) -> Vec<String> {
        self.clients.write().await.check_timeouts(timeout)
    }

    pub async fn is_participant(&self, name: &str) -> bool {
        self.clients.read().await.is_participant(name)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn permissions(&self) -> VoicePermissionState {
        self.permissions.read().await.clone()
    }
}

fn phase_packet(phase: Phase) -> VoicePacket {
    VoicePacket::Control(
        ControlPacket::new(ControlKind::PhaseChange, RELAY_IDENTITY)
            .with_room(GENERAL_ROOM)
            .with_data(phase.as_str()),
    )
}

async fn send_all(socket: &UdpSocket, outgoing: Outgoing) {
    for (addr, packet) in outgoing {
        match packet.encode() {
            Ok(data) => {
                if let Err(e) = socket.send_to(&data, addr).await {
                    debug!("Failed to send voice packet to {}: {}", addr, e);
                }
            }
            Err(e) => error!("Failed to encode voice packet: {}", e),
        }
    }
}

pub struct VoiceRelay {
    socket: Arc<UdpSocket>,
    state: Arc<RelayState>,
    workers: Arc<Semaphore>,
    timeout: Duration,
    notices: mpsc::UnboundedReceiver<RelayNotice>,
}

impl VoiceRelay {
    pub async fn bind(
        addr: &str,
        workers: usize,
        timeout: Duration,
        notices: mpsc::UnboundedReceiver<RelayNotice>,
    ) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Voice relay listening on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            state: Arc::new(RelayState::new()),
            workers: Arc::new(Semaphore::new(workers)),
            timeout,
            notices,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn state(&self) -> Arc<RelayState> {
        Arc::clone(&self.state)
    }

    /// Hands one datagram to the worker pool, or drops it if the pool is
    /// exhausted.
    fn dispatch(&self, bytes: Vec<u8>, addr: SocketAddr) {
        let permit = match Arc::clone(&self.workers).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Voice workers saturated, dropping datagram from {}", addr);
                return;
            }
        };
        let socket = Arc::clone(&self.socket);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let _permit = permit;
            match VoicePacket::decode(&bytes) {
                Ok(packet) => {
                    let outgoing = state.ingest(packet, addr).await;
                    send_all(&socket, outgoing).await;
                }
                Err(e) => warn!("Dropping undecodable datagram from {}: {}", addr, e),
            }
        });
    }

    /// Receive loop. Also sweeps records of clients gone quiet, so dropping
    /// the task stops everything the relay runs except in-flight datagrams.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let mut notices_open = true;
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => {
                    match received {
                        Ok((len, addr)) => self.dispatch(buffer[..len].to_vec(), addr),
                        Err(e) => {
                            error!("Error receiving datagram: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                },

                _ = sweep.tick() => {
                    for name in self.state.sweep(self.timeout).await {
                        info!("Voice client {} timed out", name);
                    }
                },

                notice = self.notices.recv(), if notices_open => {
                    match notice {
                        Some(notice) => {
                            let outgoing = self.state.apply_notice(notice).await;
                            send_all(&self.socket, outgoing).await;
                        }
                        None => {
                            info!("Engine notification channel closed");
                            notices_open = false;
                        }
                    }
                },
            }
        }
    }
}
