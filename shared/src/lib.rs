use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod config;
pub mod latency;
pub mod protocol;

pub use config::GameConfig;
pub use latency::LatencyQueue;
pub use protocol::{ClientMessage, MatchPhase, ProtocolError, ServerMessage, StateSnapshot};

pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
pub const PLAYER_RADIUS: f32 = 15.0;
pub const PLAYER_SPEED: f32 = 200.0;
pub const COIN_RADIUS: f32 = 10.0;
pub const PICKUP_RADIUS: f32 = PLAYER_RADIUS + COIN_RADIUS;
pub const PLAYER_COLOR_COUNT: u8 = 4;

pub const DEFAULT_PORT: u16 = 8765;
pub const SIMULATED_LATENCY_MS: u64 = 200;
pub const TICK_RATE: u32 = 60;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;
pub const COUNTDOWN_SECS: u32 = 3;
pub const MATCH_DURATION_SECS: f32 = 120.0;
pub const COIN_SPAWN_INTERVAL_SECS: f32 = 3.0;
pub const MAX_COINS: usize = 10;
pub const INITIAL_COINS: usize = 3;

pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 5000;

pub const INTERPOLATION_DELAY_MS: u64 = 100;
pub const MAX_EXTRAPOLATION_MS: u64 = 200;
pub const BUFFER_RETENTION_MS: u64 = 1000;

pub const MAX_NAME_LEN: usize = 16;

/// 2D vector in world space. `y` grows downwards, matching screen coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2::ZERO
        } else {
            Vector2::new(self.x / mag, self.y / mag)
        }
    }

    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2::new(self.x * scalar, self.y * scalar)
    }

    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2::new(self.x - other.x, self.y - other.y)
    }

    pub fn distance(&self, other: &Vector2) -> f32 {
        self.sub(other).magnitude()
    }

    /// Linear blend: `t = 0` yields `self`, `t = 1` yields `other`.
    pub fn lerp(&self, other: &Vector2, t: f32) -> Vector2 {
        Vector2::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Directional intent sampled on the client and validated on the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputIntent {
    pub sequence: u32,
    pub timestamp: u64,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl InputIntent {
    pub fn is_idle(&self) -> bool {
        !(self.up || self.down || self.left || self.right)
    }
}

/// Movement rule shared by the server simulation and client prediction.
///
/// Opposite directions cancel out and diagonals are normalized so that every
/// direction moves at exactly `speed`.
pub fn intent_velocity(intent: &InputIntent, speed: f32) -> Vector2 {
    let mut direction = Vector2::ZERO;
    if intent.up {
        direction.y -= 1.0;
    }
    if intent.down {
        direction.y += 1.0;
    }
    if intent.left {
        direction.x -= 1.0;
    }
    if intent.right {
        direction.x += 1.0;
    }
    direction.normalize().scale(speed)
}

/// Integrates `position` by `velocity * dt` and clamps the result so a circle of
/// `radius` stays fully inside the world.
pub fn integrate_position(position: Vector2, velocity: Vector2, dt: f32, radius: f32) -> Vector2 {
    let moved = position.add(&velocity.scale(dt));
    clamp_to_world(moved, radius)
}

pub fn clamp_to_world(position: Vector2, radius: f32) -> Vector2 {
    Vector2::new(
        position.x.clamp(radius, WORLD_WIDTH - radius),
        position.y.clamp(radius, WORLD_HEIGHT - radius),
    )
}

pub fn in_world_bounds(position: &Vector2, radius: f32) -> bool {
    position.is_finite()
        && position.x >= radius
        && position.x <= WORLD_WIDTH - radius
        && position.y >= radius
        && position.y <= WORLD_HEIGHT - radius
}

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
