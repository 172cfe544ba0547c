//! Wire-level types shared between the game server and voice tooling.
//!
//! The voice channel speaks bincode-encoded [`VoicePacket`]s over UDP. The
//! text channel is line based; the tag constants below are the only parts of
//! it clients are expected to match on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Largest datagram the relay will accept or produce.
pub const MAX_DATAGRAM: usize = 8192;

pub const GENERAL_ROOM: &str = "general";
pub const FACTION_ROOM: &str = "mafia";

pub const ACTION_TAG: &str = "AKSIYON:";
pub const ROLE_TAG: &str = "ROL:";
pub const NIGHT_TAG: &str = "[NIGHT]";
pub const DAY_TAG: &str = "[DAY]";
pub const TIME_TAG: &str = "TIME:";
pub const DEATH_TAG: &str = "DEATH:";
pub const HANGED_TAG: &str = "HANGED:";
pub const GAME_OVER_TAG: &str = "GAME OVER:";
pub const ERROR_TAG: &str = "ERROR:";

/// Segment of a session gating which submissions are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Lobby,
    Night,
    Day,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Lobby => "LOBBY",
            Phase::Night => "NIGHT",
            Phase::Day => "DAY",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chunk of captured audio.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AudioPacket {
    pub sender: String,
    pub target_room: String,
    pub sequence: u64,
    pub data: Vec<u8>,
    pub silent: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Join,
    Leave,
    Mute,
    Unmute,
    Heartbeat,
    PhaseChange,
    PlayerDied,
    Ping,
    Pong,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ControlPacket {
    pub kind: ControlKind,
    pub sender: String,
    pub room: Option<String>,
    pub data: Option<String>,
    /// Milliseconds since the Unix epoch, as stamped by the sender
    pub timestamp: u64,
}

impl ControlPacket {
    pub fn new(kind: ControlKind, sender: impl Into<String>) -> Self {
        Self {
            kind,
            sender: sender.into(),
            room: None,
            data: None,
            timestamp: timestamp_millis(),
        }
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Everything that travels over the voice socket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum VoicePacket {
    Audio(AudioPacket),
    Control(ControlPacket),
}

impl VoicePacket {
    pub fn sender(&self) -> &str {
        match self {
            VoicePacket::Audio(audio) => &audio.sender,
            VoicePacket::Control(control) => &control.sender,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let bytes = bincode::serialize(self)?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(CodecError::Oversize(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > MAX_DATAGRAM {
            return Err(CodecError::Oversize(bytes.len()));
        }
        Ok(bincode::deserialize(bytes)?)
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("datagram of {0} bytes exceeds the {MAX_DATAGRAM} byte limit")]
    Oversize(usize),
}

/// Current wall-clock time in milliseconds.
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
