//! Wires the session, the game engine, the voice relay and the text listener
//! together and starts each on its own task.

use crate::config::ServerConfig;
use crate::connection::serve_text;
use crate::engine::{EngineHandle, GameEngine};
use crate::error::ServerError;
use crate::relay::{RelayState, VoiceRelay};
use crate::session::{SessionManager, SharedSession};
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A started server. Dropping it leaves the tasks running; call
/// [`Running::shutdown`] to stop them. Connection tasks and the relay's
/// staleness sweep are owned by the `text` and `voice` tasks.
pub struct Running {
    pub text_addr: SocketAddr,
    pub voice_addr: SocketAddr,
    pub session: SharedSession,
    pub engine: EngineHandle,
    pub relay: Arc<RelayState>,
    pub text: JoinHandle<Result<(), ServerError>>,
    pub voice: JoinHandle<Result<(), ServerError>>,
    pub game: JoinHandle<()>,
}

impl Running {
    /// Aborts every server task, closing open connections.
    pub fn shutdown(&self) {
        self.text.abort();
        self.voice.abort();
        self.game.abort();
    }
}

/// Validates `config`, binds both transports and spawns every task.
pub async fn launch(config: &ServerConfig) -> Result<Running, ServerError> {
    config.validate()?;

    let session = SessionManager::shared(config.min_players);
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();

    let relay = VoiceRelay::bind(
        &config.voice_addr(),
        config.voice_workers,
        config.voice_timeout,
        notice_rx,
    )
    .await?;
    let voice_addr = relay.local_addr()?;
    let relay_state = relay.state();

    let listener = TcpListener::bind(config.text_addr()).await?;
    let text_addr = listener.local_addr()?;

    let (engine, handle) = GameEngine::new(config, Arc::clone(&session), notice_tx);
    let game = tokio::spawn(engine.run());
    let voice = tokio::spawn(relay.run());
    let text = tokio::spawn(serve_text(listener, Arc::clone(&session), handle.clone()));

    info!(
        "Server up: text on {}, voice on {}, {} players to start",
        text_addr, voice_addr, config.min_players
    );

    Ok(Running {
        text_addr,
        voice_addr,
        session,
        engine: handle,
        relay: relay_state,
        text,
        voice,
        game,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    fn local() -> ServerConfig {
        ServerConfig {
            port: 0,
            voice_port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_launch_binds_ephemeral_ports() {
        let running = launch(&local()).await.unwrap();

        assert_ne!(running.text_addr.port(), 0);
        assert_ne!(running.voice_addr.port(), 0);
        assert_eq!(running.relay.client_count().await, 0);
        running.shutdown();
    }

    #[tokio::test]
    async fn test_launch_rejects_invalid_config() {
        let config = ServerConfig {
            min_players: 1,
            ..local()
        };
        assert!(matches!(
            launch(&config).await,
            Err(ServerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connections() {
        let running = launch(&local()).await.unwrap();
        let stream = TcpStream::connect(running.text_addr).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let prompt = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prompt.as_deref(), Some("NAME?"));

        running.shutdown();

        let after = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap();
        assert!(matches!(after, Ok(None) | Err(_)));
        assert!(TcpStream::connect(running.text_addr).await.is_err());
    }
}
