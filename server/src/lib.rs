//! # Coin Collector Server
//!
//! Authoritative server for the coin collector game. It owns the only copy of
//! match truth and streams snapshots of it to every seated client.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The authoritative simulation: player movement with the shared movement rule,
//! coin spawning and pickup, scores, the match clock and phase transitions.
//!
//! ### Client Manager Module (`client_manager`)
//! The connection roster: ids, per-connection state, names and liveness.
//!
//! ### Session Module (`session`)
//! Synchronous glue between transport and simulation. Decodes frames after the
//! simulated receive delay, applies lobby rules, and queues encoded replies
//! behind the simulated send delay.
//!
//! ### Network Module (`network`)
//! WebSocket accept loop, per-connection reader/writer tasks and the timer
//! driven server loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::session::Session;
//! use shared::GameConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new(GameConfig::default());
//!     let server = Server::bind("127.0.0.1:8765", session).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Ordering Guarantees
//!
//! Players and coins are always visited in ascending id order, so a coin
//! reachable by several players goes to the lowest id and equal final scores are
//! won by the lowest id.

pub mod client_manager;
pub mod game;
pub mod network;
pub mod session;
