//! PING/PONG latency probe for a running voice relay.

use crate::error::ServerError;
use log::{debug, info, warn};
use shared::{timestamp_millis, ControlKind, ControlPacket, VoicePacket, GENERAL_ROOM, MAX_DATAGRAM};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout_at, Instant};

/// How a probe run is paced.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub identity: String,
    pub count: usize,
    pub interval: Duration,
    /// How long to wait for each pong before counting it lost
    pub wait: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            identity: "probe".to_string(),
            count: 10,
            interval: Duration::from_millis(200),
            wait: Duration::from_secs(1),
        }
    }
}

/// Summary of measured round trips.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyStats {
    pub sent: usize,
    pub received: usize,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    /// Statistics over `samples` out of `sent` pings. All times are zero
    /// when nothing came back.
    pub fn from_samples(sent: usize, samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self {
                sent,
                received: 0,
                min_ms: 0.0,
                avg_ms: 0.0,
                max_ms: 0.0,
            };
        }

        let millis: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        let min_ms = millis.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = millis.iter().copied().fold(0.0, f64::max);
        let avg_ms = millis.iter().sum::<f64>() / millis.len() as f64;

        Self {
            sent,
            received: samples.len(),
            min_ms,
            avg_ms,
            max_ms,
        }
    }

    pub fn loss_percent(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        (self.sent - self.received) as f64 * 100.0 / self.sent as f64
    }
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} replies ({:.1}% loss), rtt min/avg/max = {:.3}/{:.3}/{:.3} ms",
            self.received,
            self.sent,
            self.loss_percent(),
            self.min_ms,
            self.avg_ms,
            self.max_ms
        )
    }
}

async fn send(socket: &UdpSocket, relay: SocketAddr, packet: ControlPacket) -> Result<(), ServerError> {
    let bytes = VoicePacket::Control(packet).encode()?;
    socket.send_to(&bytes, relay).await?;
    Ok(())
}

/// Joins the voice channel as `options.identity`, measures `options.count`
/// round trips and leaves again.
pub async fn probe(
    socket: &UdpSocket,
    relay: SocketAddr,
    options: &ProbeOptions,
) -> Result<LatencyStats, ServerError> {
    let identity = options.identity.as_str();
    send(
        socket,
        relay,
        ControlPacket::new(ControlKind::Join, identity).with_room(GENERAL_ROOM),
    )
    .await?;

    let mut samples = Vec::with_capacity(options.count);
    let mut last_stamp = 0;
    for seq in 0..options.count {
        // pongs are matched by timestamp, so no two pings may share one
        let stamp = timestamp_millis().max(last_stamp + 1);
        last_stamp = stamp;

        let sent_at = Instant::now();
        send(
            socket,
            relay,
            ControlPacket::new(ControlKind::Ping, identity).with_timestamp(stamp),
        )
        .await?;

        if await_pong(socket, stamp, sent_at + options.wait).await? {
            let rtt = sent_at.elapsed();
            debug!("Pong {} after {:?}", seq, rtt);
            samples.push(rtt);
        } else {
            info!("Ping {} timed out", seq);
        }

        if seq + 1 < options.count {
            sleep(options.interval).await;
        }
    }

    send(socket, relay, ControlPacket::new(ControlKind::Leave, identity)).await?;
    Ok(LatencyStats::from_samples(options.count, &samples))
}

async fn await_pong(socket: &UdpSocket, stamp: u64, deadline: Instant) -> Result<bool, ServerError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, _) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => return Ok(false),
        };
        match VoicePacket::decode(&buf[..len]) {
            Ok(VoicePacket::Control(control))
                if control.kind == ControlKind::Pong && control.timestamp == stamp =>
            {
                return Ok(true)
            }
            Ok(other) => debug!("Skipping packet from {} while waiting", other.sender()),
            Err(e) => warn!("Undecodable reply: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_stats_from_samples() {
        let samples = [
            Duration::from_micros(1_500),
            Duration::from_micros(500),
            Duration::from_micros(2_500),
        ];
        let stats = LatencyStats::from_samples(4, &samples);

        assert_eq!(stats.received, 3);
        assert_approx_eq!(stats.min_ms, 0.5);
        assert_approx_eq!(stats.avg_ms, 1.5);
        assert_approx_eq!(stats.max_ms, 2.5);
        assert_approx_eq!(stats.loss_percent(), 25.0);
    }

    #[test]
    fn test_stats_without_replies() {
        let stats = LatencyStats::from_samples(3, &[]);
        assert_eq!(stats.received, 0);
        assert_approx_eq!(stats.avg_ms, 0.0);
        assert_approx_eq!(stats.loss_percent(), 100.0);
        assert!(stats.to_string().starts_with("0/3 replies"));
    }

    /// Answers every ping, preceded by a pong nobody asked for.
    async fn echo(socket: UdpSocket) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            let Ok(VoicePacket::Control(ping)) = VoicePacket::decode(&buf[..len]) else {
                continue;
            };
            if ping.kind != ControlKind::Ping {
                continue;
            }
            let stale = ControlPacket::new(ControlKind::Pong, "server").with_timestamp(1);
            let pong = ControlPacket::new(ControlKind::Pong, "server").with_timestamp(ping.timestamp);
            for reply in [stale, pong] {
                let bytes = VoicePacket::Control(reply).encode().unwrap();
                socket.send_to(&bytes, from).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_probe_matches_pongs_by_timestamp() {
        let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay.local_addr().unwrap();
        tokio::spawn(echo(relay));

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let options = ProbeOptions {
            count: 3,
            interval: Duration::from_millis(5),
            ..ProbeOptions::default()
        };
        let stats = probe(&socket, relay_addr, &options).await.unwrap();

        assert_eq!(stats.sent, 3);
        assert_eq!(stats.received, 3);
        assert!(stats.min_ms <= stats.avg_ms && stats.avg_ms <= stats.max_ms);
    }

    #[tokio::test]
    async fn test_probe_counts_silence_as_loss() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let options = ProbeOptions {
            count: 2,
            interval: Duration::from_millis(1),
            wait: Duration::from_millis(50),
            ..ProbeOptions::default()
        };

        let stats = probe(&socket, silent.local_addr().unwrap(), &options)
            .await
            .unwrap();
        assert_eq!(stats.received, 0);
        assert_approx_eq!(stats.loss_percent(), 100.0);
    }
}
