//! Voice relay client records and the general room's voice participant set
//!
//! This module tracks, per player identity:
//! - The transport address their last datagram came from
//! - When the relay last heard from them (any packet kind counts)
//! - Whether they have joined the general room's audio channel
//!
//! Records are created by the first datagram carrying an identity and are
//! removed when the player leaves the server or goes quiet for longer than
//! the configured timeout.

use log::info;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Bookkeeping for one identity seen on the voice socket
#[derive(Debug, Clone)]
pub struct VoiceClient {
    /// Display name carried in the packets
    pub name: String,
    /// Where replies and fan-out for this identity are sent
    pub addr: SocketAddr,
    /// Last time we received any packet from this identity
    pub last_seen: Instant,
}

impl VoiceClient {
    pub fn new(name: &str, addr: SocketAddr) -> Self {
        Self {
            name: name.to_string(),
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Checks if the client has exceeded the inactivity timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// All known voice clients plus the subset that joined the audio channel
#[derive(Debug, Default)]
pub struct ClientManager {
    clients: HashMap<String, VoiceClient>,
    participants: HashSet<String>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a packet from `name` arriving from `addr`
    ///
    /// Creates the record on first contact and otherwise refreshes the
    /// address and activity time. Returns true for a new record.
    pub fn touch(&mut self, name: &str, addr: SocketAddr) -> bool {
        match self.clients.get_mut(name) {
            Some(client) => {
                client.addr = addr;
                client.last_seen = Instant::now();
                false
            }
            None => {
                info!("Voice client {} seen from {}", name, addr);
                self.clients
                    .insert(name.to_string(), VoiceClient::new(name, addr));
                true
            }
        }
    }

    /// Removes a client record and its participation
    pub fn remove_client(&mut self, name: &str) -> bool {
        self.participants.remove(name);
        if self.clients.remove(name).is_some() {
            info!("Voice client {} removed", name);
            true
        } else {
            false
        }
    }

    pub fn addr_of(&self, name: &str) -> Option<SocketAddr> {
        self.clients.get(name).map(|c| c.addr)
    }

    /// Adds `name` to the audio channel. Returns false if already joined.
    pub fn join(&mut self, name: &str) -> bool {
        self.participants.insert(name.to_string())
    }

    pub fn leave(&mut self, name: &str) -> bool {
        self.participants.remove(name)
    }

    pub fn is_participant(&self, name: &str) -> bool {
        self.participants.contains(name)
    }

    /// Addresses of every participant except `exclude`
    ///
    /// Participants without a known address are skipped.
    pub fn participant_addrs(&self, exclude: Option<&str>) -> Vec<(String, SocketAddr)> {
        self.participants
            .iter()
            .filter(|name| Some(name.as_str()) != exclude)
            .filter_map(|name| self.clients.get(name).map(|c| (name.clone(), c.addr)))
            .collect()
    }

    /// Checks for and removes clients that have gone quiet
    ///
    /// Returns the removed identities so callers can log or clean up
    /// elsewhere.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<String> {
        let timed_out: Vec<String> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(name, _)| name.clone())
            .collect();

        for name in &timed_out {
            self.remove_client(name);
        }

        timed_out
    }

    /// Returns the number of known clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_touch_creates_then_updates() {
        let mut manager = ClientManager::new();

        assert!(manager.touch("elif", test_addr()));
        assert!(!manager.touch("elif", test_addr2()));

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.addr_of("elif"), Some(test_addr2()));
    }

    #[test]
    fn test_client_timeout() {
        let mut client = VoiceClient::new("elif", test_addr());
        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_check_timeouts_removes_stale_records() {
        let mut manager = ClientManager::new();
        manager.touch("elif", test_addr());
        manager.touch("omer", test_addr2());
        manager.join("elif");

        if let Some(client) = manager.clients.get_mut("elif") {
            client.last_seen = Instant::now() - Duration::from_secs(60);
        }

        let removed = manager.check_timeouts(Duration::from_secs(30));

        assert_eq!(removed, vec!["elif"]);
        assert!(!manager.is_participant("elif"));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_participant_addrs_excludes_sender() {
        let mut manager = ClientManager::new();
        manager.touch("elif", test_addr());
        manager.touch("omer", test_addr2());
        manager.join("elif");
        manager.join("omer");
        // joined but never heard from: no address to send to
        manager.join("ghost");

        let targets = manager.participant_addrs(Some("elif"));
        assert_eq!(targets, vec![("omer".to_string(), test_addr2())]);
        assert_eq!(manager.participant_addrs(None).len(), 2);
        assert_eq!(manager.participant_count(), 3);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new();
        manager.touch("elif", test_addr());
        manager.join("elif");

        assert!(manager.remove_client("elif"));
        assert!(!manager.remove_client("elif"));
        assert!(manager.is_empty());
        assert!(!manager.is_participant("elif"));
    }
}
