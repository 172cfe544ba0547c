//! Text protocol connections.
//!
//! Each accepted TCP stream is split in two: a writer task draining the
//! player's outbound line queue, and the reading side which admits the player
//! under a unique name and then dispatches one command per line to the
//! session or the game engine.

use crate::engine::{EngineCommand, EngineHandle};
use crate::error::ServerError;
use crate::roles::NightVerb;
use crate::session::{PlayerTx, QuorumOutcome, SharedSession};
use log::{debug, error, info, warn};
use shared::{Phase, ERROR_TAG, GENERAL_ROOM};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;

pub const NAME_PROMPT: &str = "NAME?";

/// One parsed inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ready,
    Start,
    Who,
    Quit,
    FactionChat(String),
    Kill(String),
    Heal(String),
    Vote(String),
    Chat(String),
}

/// Parses one line. Blank lines, unknown verbs and verbs with a malformed
/// argument yield `None`.
pub fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Chat(line.to_string()));
    };

    let (verb, arg) = match rest.split_once(char::is_whitespace) {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (rest, ""),
    };
    match verb {
        "ready" => Some(Command::Ready),
        "start" => Some(Command::Start),
        "who" => Some(Command::Who),
        "quit" => Some(Command::Quit),
        "m" if !arg.is_empty() => Some(Command::FactionChat(arg.to_string())),
        "kill" => single_target(arg).map(Command::Kill),
        "heal" => single_target(arg).map(Command::Heal),
        "vote" => single_target(arg).map(Command::Vote),
        _ => None,
    }
}

fn single_target(arg: &str) -> Option<String> {
    let mut words = arg.split_whitespace();
    let target = words.next()?;
    if words.next().is_some() {
        return None;
    }
    Some(target.to_string())
}

pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}

fn tell(tx: &PlayerTx, line: impl Into<String>) {
    // the writer only goes away together with the connection
    let _ = tx.send(line.into());
}

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections on `listener`, one task per player.
pub async fn serve_text(
    listener: TcpListener,
    session: SharedSession,
    engine: EngineHandle,
) -> Result<(), ServerError> {
    info!("Text server listening on {}", listener.local_addr()?);
    serve_connections(|| listener.accept(), session, engine).await
}

/// Runs the accept loop over any source of accepted streams.
///
/// A failed accept is logged and retried after a short pause. Connection
/// tasks live in a [`JoinSet`], so they are aborted together with this
/// future.
pub async fn serve_connections<A, F>(
    mut accept: A,
    session: SharedSession,
    engine: EngineHandle,
) -> Result<(), ServerError>
where
    A: FnMut() -> F,
    F: Future<Output = io::Result<(TcpStream, SocketAddr)>>,
{
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                info!("Text client connected from {}", peer);

                let session = Arc::clone(&session);
                let engine = engine.clone();
                connections.spawn(async move {
                    match handle_connection(stream, session, engine).await {
                        Ok(()) => info!("Connection from {} closed", peer),
                        Err(e) => warn!("Connection from {} ended with error: {}", peer, e),
                    }
                });
            },

            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    warn!("Connection task failed: {}", e);
                }
            },
        }
    }
}

/// Serves one player. Reading and writing run inside this future, so
/// dropping it closes both halves of the stream.
pub async fn handle_connection(
    stream: TcpStream,
    session: SharedSession,
    engine: EngineHandle,
) -> Result<(), ServerError> {
    let (rd, wr) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    let reading = async move {
        let mut reader = BufReader::new(rd);
        let result = drive(&mut reader, &tx, &session, &engine).await;
        // the writer stops once the session's copy of the sender is gone too
        drop(tx);
        result
    };
    let (result, ()) = tokio::join!(reading, write_lines(wr, rx));
    result
}

/// Writes queued lines until every sender is gone or the peer stops reading.
pub async fn write_lines<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        if let Err(e) = writer.write_all(&bytes).await {
            debug!("Dropping outbound lines: {}", e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Runs admission and the command loop on `reader`, then removes the player
/// from the session and tells the engine they are gone.
pub async fn drive<R>(
    reader: &mut R,
    tx: &PlayerTx,
    session: &SharedSession,
    engine: &EngineHandle,
) -> Result<(), ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(name) = admit(reader, tx, session).await? else {
        return Ok(());
    };

    let result = serve(reader, &name, tx, session, engine).await;

    session.write().await.unregister(&name);
    engine.send(EngineCommand::Disconnected {
        player: name.clone(),
    });
    info!("{} disconnected", name);
    result
}

async fn admit<R>(
    reader: &mut R,
    tx: &PlayerTx,
    session: &SharedSession,
) -> Result<Option<String>, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        tell(tx, NAME_PROMPT);
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let name = line.trim();
        if !is_valid_name(name) {
            tell(tx, format!("{} invalid name", ERROR_TAG));
            continue;
        }

        let mut guard = session.write().await;
        if !guard.register(name, tx.clone()) {
            drop(guard);
            debug!("Rejected duplicate name {}", name);
            tell(tx, format!("{} name taken", ERROR_TAG));
            continue;
        }
        tell(tx, format!("WELCOME {}", name));
        guard.join(GENERAL_ROOM, name);
        info!("{} admitted", name);
        return Ok(Some(name.to_string()));
    }
}

async fn serve<R>(
    reader: &mut R,
    name: &str,
    tx: &PlayerTx,
    session: &SharedSession,
    engine: &EngineHandle,
) -> Result<(), ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let Some(command) = parse_line(&line) else {
            debug!("Ignoring line from {}: {:?}", name, line.trim_end());
            continue;
        };

        let player = name.to_string();
        match command {
            Command::Quit => {
                tell(tx, "* Bye");
                return Ok(());
            }
            Command::Ready => {
                let mut guard = session.write().await;
                let outcome = guard.mark_ready(name);
                launch_on_quorum(outcome, engine);
            }
            Command::Start => {
                let mut guard = session.write().await;
                let outcome = guard.mark_start(name);
                if outcome == QuorumOutcome::AlreadyStarted {
                    tell(tx, format!("{} the game has already started", ERROR_TAG));
                }
                launch_on_quorum(outcome, engine);
            }
            Command::Chat(text) => {
                if engine.phase() == Phase::Day {
                    engine.send(EngineCommand::Chat { player, text });
                } else {
                    tell(
                        tx,
                        format!("{} chat is only open during the day", ERROR_TAG),
                    );
                }
            }
            Command::FactionChat(text) => {
                engine.send(EngineCommand::FactionChat { player, text });
            }
            Command::Kill(target) => engine.send(EngineCommand::NightAction {
                player,
                verb: NightVerb::Kill,
                target,
            }),
            Command::Heal(target) => engine.send(EngineCommand::NightAction {
                player,
                verb: NightVerb::Heal,
                target,
            }),
            Command::Vote(target) => engine.send(EngineCommand::Vote { player, target }),
            Command::Who => engine.send(EngineCommand::Who { player }),
        }
    }
}

/// Called with the session write guard held, so a `Disconnected` for any
/// roster member is queued behind the `Start`.
fn launch_on_quorum(outcome: QuorumOutcome, engine: &EngineHandle) {
    if let QuorumOutcome::Start(roster) = outcome {
        info!("Quorum reached with {} players", roster.len());
        engine.send(EngineCommand::Start { roster });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use tokio::sync::watch;
    use tokio::time::timeout;
    use tokio_test::io::Builder;

    struct Harness {
        session: SharedSession,
        engine: EngineHandle,
        commands: mpsc::UnboundedReceiver<EngineCommand>,
        _phase: watch::Sender<Phase>,
    }

    fn harness(phase: Phase, min_players: usize) -> Harness {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(phase);
        Harness {
            session: SessionManager::shared(min_players),
            engine: EngineHandle::new(command_tx, phase_rx),
            commands,
            _phase: phase_tx,
        }
    }

    async fn seat(session: &SharedSession, name: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = session.write().await;
        guard.register(name, tx);
        guard.join(GENERAL_ROOM, name);
        rx
    }

    fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
        let mut all = Vec::new();
        while let Ok(item) = rx.try_recv() {
            all.push(item);
        }
        all
    }

    async fn run(harness: &Harness, input: &[u8]) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut builder = Builder::new();
        if !input.is_empty() {
            builder.read(input);
        }
        let mock = builder.build();
        let mut reader = BufReader::new(mock);
        drive(&mut reader, &tx, &harness.session, &harness.engine)
            .await
            .unwrap();
        rx
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("/ready"), Some(Command::Ready));
        assert_eq!(parse_line("  /start \r\n"), Some(Command::Start));
        assert_eq!(parse_line("/kill ayse"), Some(Command::Kill("ayse".into())));
        assert_eq!(parse_line("/heal   ayse "), Some(Command::Heal("ayse".into())));
        assert_eq!(parse_line("/vote ayse"), Some(Command::Vote("ayse".into())));
        assert_eq!(
            parse_line("/m meet at dawn"),
            Some(Command::FactionChat("meet at dawn".into()))
        );
        assert_eq!(
            parse_line("hello there"),
            Some(Command::Chat("hello there".into()))
        );
    }

    #[test]
    fn test_parse_line_rejects_malformed() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   \n"), None);
        assert_eq!(parse_line("/dance"), None);
        assert_eq!(parse_line("/kill"), None);
        assert_eq!(parse_line("/vote ayse fatma"), None);
        assert_eq!(parse_line("/m"), None);
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("ayse"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("ayse yilmaz"));
    }

    #[tokio::test]
    async fn test_admission_retries_until_unique_name() {
        let mut harness = harness(Phase::Lobby, 3);
        let mut alice = seat(&harness.session, "alice").await;

        let mut rx = run(&harness, b"alice\nbad name\nbob\n").await;

        assert_eq!(
            drain(&mut rx),
            vec![
                "NAME?",
                "ERROR: name taken",
                "NAME?",
                "ERROR: invalid name",
                "NAME?",
                "WELCOME bob",
                "* bob joined the game (2 players)",
            ]
        );
        let seen = drain(&mut alice);
        assert!(seen.contains(&"* bob joined the game (2 players)".to_string()));
        assert!(seen.contains(&"* bob left the game".to_string()));
        assert_eq!(
            drain(&mut harness.commands),
            vec![EngineCommand::Disconnected {
                player: "bob".into()
            }]
        );
        assert!(!harness.session.read().await.is_taken("bob"));
    }

    #[tokio::test]
    async fn test_eof_before_name_is_quiet() {
        let mut harness = harness(Phase::Lobby, 3);
        let mut rx = run(&harness, b"").await;

        assert_eq!(drain(&mut rx), vec!["NAME?"]);
        assert!(drain(&mut harness.commands).is_empty());
    }

    #[tokio::test]
    async fn test_commands_reach_engine() {
        let mut harness = harness(Phase::Night, 3);
        let mut rx = run(
            &harness,
            b"carol\n/kill dave\n/heal carol\n/vote  dave\n/dance\n/who\n/m psst\n/quit\n",
        )
        .await;

        assert_eq!(
            drain(&mut harness.commands),
            vec![
                EngineCommand::NightAction {
                    player: "carol".into(),
                    verb: NightVerb::Kill,
                    target: "dave".into(),
                },
                EngineCommand::NightAction {
                    player: "carol".into(),
                    verb: NightVerb::Heal,
                    target: "carol".into(),
                },
                EngineCommand::Vote {
                    player: "carol".into(),
                    target: "dave".into(),
                },
                EngineCommand::Who {
                    player: "carol".into()
                },
                EngineCommand::FactionChat {
                    player: "carol".into(),
                    text: "psst".into(),
                },
                EngineCommand::Disconnected {
                    player: "carol".into()
                },
            ]
        );
        assert_eq!(drain(&mut rx).last().map(String::as_str), Some("* Bye"));
    }

    #[tokio::test]
    async fn test_chat_outside_day_is_refused() {
        let mut harness = harness(Phase::Night, 3);
        let mut rx = run(&harness, b"carol\nhello\n").await;

        assert!(drain(&mut rx).contains(&"ERROR: chat is only open during the day".to_string()));
        assert_eq!(
            drain(&mut harness.commands),
            vec![EngineCommand::Disconnected {
                player: "carol".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_chat_during_day_is_forwarded() {
        let mut harness = harness(Phase::Day, 3);
        run(&harness, b"carol\nhello all\n").await;

        assert_eq!(
            drain(&mut harness.commands)[0],
            EngineCommand::Chat {
                player: "carol".into(),
                text: "hello all".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_ready_then_start_launches_match_once() {
        let mut harness = harness(Phase::Lobby, 3);
        let _a = seat(&harness.session, "a").await;
        let _b = seat(&harness.session, "b").await;
        {
            let mut session = harness.session.write().await;
            session.mark_ready("a");
            session.mark_ready("b");
        }

        let mut rx = run(&harness, b"carol\n/ready\n/ready\n/start\n/start\n").await;

        let commands = drain(&mut harness.commands);
        assert_eq!(
            commands[0],
            EngineCommand::Start {
                roster: vec!["a".into(), "b".into(), "carol".into()]
            }
        );
        assert_eq!(commands.len(), 2);
        assert!(drain(&mut rx).contains(&"ERROR: the game has already started".to_string()));
    }

    #[tokio::test]
    async fn test_write_lines_appends_newlines() {
        let mock = Builder::new().write(b"NAME?\n").write(b"WELCOME ayse\n").build();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("NAME?".to_string()).unwrap();
        tx.send("WELCOME ayse".to_string()).unwrap();
        drop(tx);

        write_lines(mock, rx).await;
    }

    #[tokio::test]
    async fn test_accept_errors_do_not_stop_the_server() {
        let harness = harness(Phase::Lobby, 3);
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());
        let addr = listener.local_addr().unwrap();

        let mut failures: u32 = 2;
        let accept = move || {
            let listener = Arc::clone(&listener);
            let fail = failures > 0;
            failures = failures.saturating_sub(1);
            async move {
                if fail {
                    Err(io::Error::from(io::ErrorKind::ConnectionAborted))
                } else {
                    listener.accept().await
                }
            }
        };
        let server = tokio::spawn(serve_connections(
            accept,
            Arc::clone(&harness.session),
            harness.engine.clone(),
        ));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let first = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.as_deref(), Some(NAME_PROMPT));
        assert!(!server.is_finished());
        server.abort();
    }

    #[tokio::test]
    async fn test_aborting_the_server_closes_connections() {
        let harness = harness(Phase::Lobby, 3);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_text(
            listener,
            Arc::clone(&harness.session),
            harness.engine.clone(),
        ));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let first = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.as_deref(), Some(NAME_PROMPT));

        server.abort();
        let closed = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap();
        assert!(matches!(closed, Ok(None) | Err(_)));
    }
}
