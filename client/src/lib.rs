//! # Coin Collector Client Library
//!
//! Client side of the coin collector game. The server owns the truth; this crate
//! hides the network delay from the player in two ways.
//!
//! ### Client-Side Prediction
//! The local player moves as soon as a key is pressed, using the same movement
//! rule as the server. Unacknowledged inputs are kept until a snapshot reports
//! the last sequence number the server processed.
//!
//! ### Server Reconciliation
//! Each snapshot replays the inputs the server has not seen yet on top of the
//! authoritative position. Small errors are blended out over a few frames;
//! large ones snap.
//!
//! ### Entity Interpolation
//! Remote players are drawn a fixed delay in the past, between two snapshots the
//! client already has, with a short capped extrapolation when snapshots run late.
//!
//! ## Module Organization
//!
//! - `prediction`: local prediction and reconciliation
//! - `interpolation`: per-entity sample buffers and the server clock estimate
//! - `input`: key sampling and input sequencing
//! - `game`: the client model fed by server messages
//! - `network`: WebSocket connection on its own thread with simulated latency
//! - `rendering`: macroquad drawing of the world, HUD and menus
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::ClientGame;
//! use client::network::{NetworkEvent, NetworkHandle};
//! use client::ClientConfig;
//! use std::time::Instant;
//!
//! let config = ClientConfig::default();
//! let mut game = ClientGame::new(&config);
//! let mut network = NetworkHandle::spawn(&config.server_url, config.latency)?;
//!
//! while let Some(event) = network.try_recv() {
//!     match event {
//!         NetworkEvent::Connected => {
//!             network.send(game.handle_connected());
//!         }
//!         NetworkEvent::Message(message) => {
//!             game.handle_message(message, Instant::now(), shared::get_timestamp())
//!         }
//!         NetworkEvent::Disconnected(reason) => game.handle_disconnected(&reason),
//!     }
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

use shared::{
    BUFFER_RETENTION_MS, DEFAULT_PORT, INTERPOLATION_DELAY_MS, MAX_EXTRAPOLATION_MS,
    PLAYER_SPEED, SIMULATED_LATENCY_MS,
};
use std::time::Duration;

pub mod game;
pub mod input;
pub mod interpolation;
pub mod network;
pub mod prediction;
pub mod rendering;

/// Divergence in pixels above which reconciliation snaps instead of blending
pub const SNAP_THRESHOLD: f32 = 100.0;
/// Pixels per second a reconciliation error is blended out at
pub const CORRECTION_RATE: f32 = 150.0;
pub const INPUT_RESEND_MS: u64 = 16;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    /// Requested display name; empty lets the server pick one
    pub player_name: String,
    /// Artificial delay applied on each client hop
    pub latency: Duration,
    pub interpolation_delay_ms: u64,
    pub max_extrapolation_ms: u64,
    pub buffer_retention_ms: u64,
    pub snap_threshold: f32,
    pub correction_rate: f32,
    pub input_resend_interval: Duration,
    pub player_speed: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("ws://127.0.0.1:{}", DEFAULT_PORT),
            player_name: String::new(),
            latency: Duration::from_millis(SIMULATED_LATENCY_MS),
            interpolation_delay_ms: INTERPOLATION_DELAY_MS,
            max_extrapolation_ms: MAX_EXTRAPOLATION_MS,
            buffer_retention_ms: BUFFER_RETENTION_MS,
            snap_threshold: SNAP_THRESHOLD,
            correction_rate: CORRECTION_RATE,
            input_resend_interval: Duration::from_millis(INPUT_RESEND_MS),
            player_speed: PLAYER_SPEED,
        }
    }
}
