//! # Race Client Library
//!
//! Headless client for the race server. It joins a race as a participant or
//! spectator, keeps a local view of the race from the server's snapshots,
//! and can sail its boat on autopilot.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The TCP connection and join handshake:
//! - Requesting a participant or spectator seat
//! - Receiving server messages from a background reader task
//! - Sending boat actions
//!
//! ### Game Module (`game`)
//! The [`game::RaceView`] folded from server messages: race status, boat
//! positions and health, marks, collisions and the latest documents.
//!
//! ### Autopilot Module (`autopilot`)
//! Chooses boat actions once the race has started.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::{game::RaceView, network::RaceClient};
//! use shared::RequestToJoinKind;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = RaceClient::connect("127.0.0.1:4942", RequestToJoinKind::Spectator).await?;
//!     let mut view = RaceView::new();
//!
//!     while let Some(message) = client.next_message().await? {
//!         if let Some(status) = view.apply(message) {
//!             println!("race is now {:?}", status);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod autopilot;
pub mod game;
pub mod network;

pub use network::{ClientError, RaceClient};
