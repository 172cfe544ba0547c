//! # Mafia Night Server Library
//!
//! Authoritative server for a social-deduction party game. Players connect
//! over a line-based TCP protocol, pick a name, gather in the general room
//! and start a match once enough of them are ready. The match alternates
//! timed night and day phases in which role-gated kills and heals, and then
//! plurality votes, thin the living until one faction wins.
//!
//! A UDP voice relay runs alongside the text server. It fans audio out to the
//! other voice participants and mirrors the engine's phase and death state so
//! nobody talks at night and the dead stay silent.
//!
//! ## Architecture
//!
//! ### Game Engine Actor
//! One task owns the running match and both phase timers. Connection workers
//! send it commands over a channel, so submissions, countdown ticks and
//! phase resolutions never race each other.
//!
//! ### Connection Workers
//! Every TCP connection gets its own task reading commands and a writer task
//! draining the player's outbound queue. A failing connection only ends
//! itself.
//!
//! ### Voice Relay
//! The receive loop hands each datagram to a bounded pool of handler tasks.
//! Phase changes and deaths reach the relay as one-way notifications from
//! the engine; the relay never reads game state directly.
//!
//! ## Module Organization
//!
//! - `session`: rooms, membership, the ready/start quorum and broadcast
//! - `roles`, `ledger`, `game`: role catalog, pending submissions and the
//!   pure match state machine
//! - `engine`: timers, command intake and outcome delivery
//! - `permissions`, `client_manager`, `relay`: voice gating and fan-out
//! - `connection`: text protocol admission and command parsing
//! - `probe`: client side of the PING/PONG latency measurement
//! - `app`: starts everything from a [`config::ServerConfig`]
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::app::launch;
//! use server::config::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let running = launch(&ServerConfig::default()).await?;
//!     println!("text on {}, voice on {}", running.text_addr, running.voice_addr);
//!
//!     tokio::signal::ctrl_c().await?;
//!     running.shutdown();
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod client_manager;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod game;
pub mod ledger;
pub mod permissions;
pub mod probe;
pub mod relay;
pub mod roles;
pub mod session;
