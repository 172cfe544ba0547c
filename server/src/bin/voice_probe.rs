use clap::Parser;
use env_logger::Env;
use server::probe::{probe, ProbeOptions};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Measures round-trip latency to a voice relay with PING/PONG packets.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Relay address
    #[clap(short, long, default_value = "127.0.0.1:5001")]
    relay: SocketAddr,
    /// Identity used on the voice channel
    #[clap(short, long, default_value = "probe")]
    name: String,
    /// Number of pings
    #[clap(short, long, default_value = "10")]
    count: usize,
    /// Pause between pings in milliseconds
    #[clap(long, default_value = "200")]
    interval_ms: u64,
    /// Milliseconds to wait for each pong
    #[clap(long, default_value = "1000")]
    wait_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!(
        "Probing {} from {} as {}",
        args.relay,
        socket.local_addr()?,
        args.name
    );

    let options = ProbeOptions {
        identity: args.name,
        count: args.count,
        interval: Duration::from_millis(args.interval_ms),
        wait: Duration::from_millis(args.wait_ms),
    };
    let stats = probe(&socket, args.relay, &options).await?;
    println!("{}", stats);

    Ok(())
}
