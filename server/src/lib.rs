//! # Race Server Library
//!
//! This library holds the authoritative side of a multiplayer sailing race.
//! It owns the race state, advances it at a fixed frame rate, and streams
//! the result to every connected client over TCP.
//!
//! ## Architecture Overview
//!
//! The server is split into a single simulation task and one task group per
//! connection. They share the race behind an `Arc<RwLock<Race>>` and talk
//! through channels:
//!
//! ### Race Driver
//! The driver owns time. Every frame it drains the command queue, moves the
//! boats, rounds marks, detects collisions and publishes a [`Snapshot`] on a
//! broadcast channel.
//!
//! ### Connections
//! Each accepted socket gets a reader, a writer, a heartbeat and, after the
//! join handshake, a snapshot forwarder and a command translator. A
//! participant's boat actions become [`Command`]s on the shared queue.
//!
//! ### Identity Allocation
//! Participants are granted the first free identity from the race roster,
//! and only while the race still accepts joiners. Disconnecting frees the
//! identity for the next client.
//!
//! ## Module Organization
//!
//! ### Simulation
//! - `race`: race state, status machine and per-tick physics
//! - `boat`: one participant's kinematic state
//! - `course`: marks, legs and rounding geometry
//! - `polars`: boat speed as a function of wind
//! - `wind`: wind models
//! - `collider`: collision probe against marks and boats
//! - `clock`: race time and countdown thresholds
//! - `commands`: the command queue and manoeuvres
//!
//! ### Serving
//! - `driver`: the frame loop
//! - `snapshot`: per-frame message encoding
//! - `network`: TCP sessions
//! - `client_manager`: connected clients and identity allocation
//! - `heartbeat`: periodic liveness messages
//!
//! ### Setup
//! - `config`: race definition files and runtime settings
//! - `error`: error types
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{commands, RaceDefinition, RaceDriver, RaceSettings, Race, Server};
//! use std::sync::Arc;
//! use tokio::sync::{broadcast, RwLock};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let definition = RaceDefinition::load(None)?;
//!     let settings = RaceSettings::default();
//!     let race = Race::from_definition(&definition, &settings, shared::now_millis())?;
//!     let race = Arc::new(RwLock::new(race));
//!
//!     let (commands_tx, commands_rx) = commands::channel();
//!     let (snapshots, _) = broadcast::channel(server::network::SNAPSHOT_QUEUE_LEN);
//!
//!     let server = Server::bind("127.0.0.1:4942", Arc::clone(&race), commands_tx.clone(), snapshots.clone()).await?;
//!     let driver = RaceDriver::new(race, (commands_tx, commands_rx), snapshots, &settings);
//!
//!     tokio::spawn(driver.run());
//!     server.serve(std::future::pending()).await;
//!     Ok(())
//! }
//! ```

pub mod boat;
pub mod client_manager;
pub mod clock;
pub mod collider;
pub mod commands;
pub mod config;
pub mod course;
pub mod driver;
pub mod error;
pub mod heartbeat;
pub mod network;
pub mod polars;
pub mod race;
pub mod snapshot;
pub mod wind;

pub use client_manager::{allocate_identity, ClientManager};
pub use commands::Command;
pub use config::{RaceDefinition, RaceSettings};
pub use driver::RaceDriver;
pub use error::{AllocationError, ConfigError, HandshakeError};
pub use network::Server;
pub use race::Race;
pub use snapshot::{Snapshot, SnapshotEncoder};
