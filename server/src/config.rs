use crate::error::ServerError;
use crate::roles::RolePolicy;
use std::time::Duration;

/// Longest wall-clock phase the engine will schedule.
pub const MAX_PHASE_LENGTH: Duration = Duration::from_secs(24 * 60 * 60);

/// Runtime settings for both transports and the match rules.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// TCP port of the line protocol
    pub port: u16,
    /// UDP port of the voice relay
    pub voice_port: u16,
    /// Ready players needed before a start request is honored
    pub min_players: usize,
    pub night_seconds: u32,
    pub day_seconds: u32,
    /// Wall-clock length of one countdown second
    pub tick: Duration,
    pub role_policy: RolePolicy,
    /// Datagrams processed concurrently before new ones are dropped
    pub voice_workers: usize,
    pub voice_timeout: Duration,
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            voice_port: 5001,
            min_players: 4,
            night_seconds: 30,
            day_seconds: 30,
            tick: Duration::from_secs(1),
            role_policy: RolePolicy::default(),
            voice_workers: 64,
            voice_timeout: Duration::from_secs(30),
            seed: None,
        }
    }
}

impl ServerConfig {
    /// Checks the settings before anything is bound or spawned.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.min_players < 3 {
            return Err(ServerError::InvalidConfig(format!(
                "min_players must be at least 3, got {}",
                self.min_players
            )));
        }
        if self.night_seconds == 0 || self.day_seconds == 0 {
            return Err(ServerError::InvalidConfig(
                "phase durations must be positive".to_string(),
            ));
        }
        if self.tick.is_zero() {
            return Err(ServerError::InvalidConfig(
                "tick length must be positive".to_string(),
            ));
        }
        let longest = self.night_seconds.max(self.day_seconds);
        match self.tick.checked_mul(longest) {
            Some(length) if length <= MAX_PHASE_LENGTH => {}
            _ => {
                return Err(ServerError::InvalidConfig(format!(
                    "a {} tick phase of {:?} per tick exceeds {:?}",
                    longest, self.tick, MAX_PHASE_LENGTH
                )));
            }
        }
        if self.role_policy.players_per_mafia < 2 {
            return Err(ServerError::InvalidConfig(format!(
                "players_per_mafia must be at least 2, got {}",
                self.role_policy.players_per_mafia
            )));
        }
        if self.voice_workers == 0 {
            return Err(ServerError::InvalidConfig(
                "voice_workers must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn text_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn voice_addr(&self) -> String {
        format!("{}:{}", self.host, self.voice_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.text_addr(), "127.0.0.1:5000");
        assert_eq!(config.voice_addr(), "127.0.0.1:5001");
        assert_eq!(config.night_seconds, 30);
    }

    #[test]
    fn test_rejects_tiny_quorum() {
        let config = ServerConfig {
            min_players: 2,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_durations() {
        let config = ServerConfig {
            day_seconds: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            tick: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_degenerate_role_policy() {
        let config = ServerConfig {
            role_policy: RolePolicy {
                players_per_mafia: 1,
                doctors: 1,
            },
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_phase_longer_than_a_day() {
        let config = ServerConfig {
            tick: Duration::from_secs(u64::MAX / 4),
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::InvalidConfig(_))));

        let config = ServerConfig {
            tick: Duration::from_secs(3600),
            day_seconds: 25,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            tick: Duration::from_secs(3600),
            night_seconds: 24,
            day_seconds: 24,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
