use clap::Parser;
use env_logger::Env;
use log::{error, info};
use server::app::launch;
use server::config::ServerConfig;
use server::roles::RolePolicy;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address both listeners bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// TCP port of the text protocol
    #[clap(short, long, default_value = "5000")]
    port: u16,
    /// UDP port of the voice relay
    #[clap(long, default_value = "5001")]
    voice_port: u16,
    /// Ready players needed before a start request is honored
    #[clap(long, default_value = "4")]
    min_players: usize,
    #[clap(long, default_value = "30")]
    night_seconds: u32,
    #[clap(long, default_value = "30")]
    day_seconds: u32,
    /// Length of one countdown second in milliseconds
    #[clap(long, default_value = "1000")]
    tick_millis: u64,
    /// One mafia seat per this many players
    #[clap(long, default_value = "4")]
    players_per_mafia: usize,
    #[clap(long, default_value = "1")]
    doctors: usize,
    /// Datagrams handled concurrently before new ones are dropped
    #[clap(long, default_value = "64")]
    voice_workers: usize,
    /// Seconds of silence before a voice client record is dropped
    #[clap(long, default_value = "30")]
    voice_timeout_secs: u64,
    /// Seed for role assignment
    #[clap(long)]
    seed: Option<u64>,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            voice_port: args.voice_port,
            min_players: args.min_players,
            night_seconds: args.night_seconds,
            day_seconds: args.day_seconds,
            tick: Duration::from_millis(args.tick_millis),
            role_policy: RolePolicy {
                players_per_mafia: args.players_per_mafia,
                doctors: args.doctors,
            },
            voice_workers: args.voice_workers,
            voice_timeout: Duration::from_secs(args.voice_timeout_secs),
            seed: args.seed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from(Args::parse());
    let mut running = launch(&config).await?;

    tokio::select! {
        result = &mut running.text => {
            match result {
                Ok(Err(e)) => error!("Text server failed: {}", e),
                Err(e) => error!("Text server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        result = &mut running.voice => {
            match result {
                Ok(Err(e)) => error!("Voice relay failed: {}", e),
                Err(e) => error!("Voice relay task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        result = &mut running.game => {
            if let Err(e) = result {
                error!("Game engine task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    running.shutdown();
    Ok(())
}
