//! Match tuning supplied from outside the simulation
//!
//! Every value the server core depends on lives here so binaries and tests can
//! override it. Defaults come from the crate-level constants.

use crate::{
    COIN_SPAWN_INTERVAL_SECS, COUNTDOWN_SECS, HEARTBEAT_TIMEOUT_MS, INITIAL_COINS,
    MATCH_DURATION_SECS, MAX_COINS, MAX_PLAYERS, MIN_PLAYERS, PLAYER_SPEED,
    SIMULATED_LATENCY_MS, TICK_RATE,
};
use std::time::Duration;

/// Externally supplied match configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    /// Players required before the countdown starts
    pub min_players: usize,
    /// Lobby capacity
    pub max_players: usize,
    /// Authoritative ticks per second
    pub tick_rate: u32,
    /// Artificial delay applied on each hop
    pub latency: Duration,
    pub coin_spawn_interval_secs: f32,
    pub max_coins: usize,
    pub initial_coins: usize,
    pub match_duration_secs: f32,
    pub countdown_secs: u32,
    pub player_speed: f32,
    /// Connections silent for this long are dropped
    pub heartbeat_timeout: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_players: MIN_PLAYERS,
            max_players: MAX_PLAYERS,
            tick_rate: TICK_RATE,
            latency: Duration::from_millis(SIMULATED_LATENCY_MS),
            coin_spawn_interval_secs: COIN_SPAWN_INTERVAL_SECS,
            max_coins: MAX_COINS,
            initial_coins: INITIAL_COINS,
            match_duration_secs: MATCH_DURATION_SECS,
            countdown_secs: COUNTDOWN_SECS,
            player_speed: PLAYER_SPEED,
            heartbeat_timeout: Duration::from_millis(HEARTBEAT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("min_players must be at least 1")]
    NoPlayersRequired,
    #[error("min_players ({min}) exceeds max_players ({max})")]
    InvertedPlayerBounds { min: usize, max: usize },
    #[error("tick_rate must be positive")]
    ZeroTickRate,
    #[error("{0} must be a positive, finite number of seconds")]
    InvalidDuration(&'static str),
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_players == 0 {
            return Err(ConfigError::NoPlayersRequired);
        }
        if self.min_players > self.max_players {
            return Err(ConfigError::InvertedPlayerBounds {
                min: self.min_players,
                max: self.max_players,
            });
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if !(self.match_duration_secs.is_finite() && self.match_duration_secs > 0.0) {
            return Err(ConfigError::InvalidDuration("match_duration_secs"));
        }
        if !(self.coin_spawn_interval_secs.is_finite() && self.coin_spawn_interval_secs > 0.0) {
            return Err(ConfigError::InvalidDuration("coin_spawn_interval_secs"));
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }

    /// Fixed simulation step in seconds
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Countdown length expressed in whole ticks
    pub fn countdown_ticks(&self) -> u32 {
        self.countdown_secs.saturating_mul(self.tick_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GameConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_players, 2);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.latency, Duration::from_millis(200));
    }

    #[test]
    fn test_inverted_player_bounds_rejected() {
        let config = GameConfig {
            min_players: 5,
            max_players: 4,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvertedPlayerBounds { min: 5, max: 4 })
        );
    }

    #[test]
    fn test_zero_tick_rate_rejected() {
        let config = GameConfig {
            tick_rate: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTickRate));
    }

    #[test]
    fn test_countdown_ticks() {
        let config = GameConfig {
            tick_rate: 10,
            countdown_secs: 3,
            ..Default::default()
        };
        assert_eq!(config.countdown_ticks(), 30);
        assert_eq!(config.tick_duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_countdown_ticks_saturate() {
        let config = GameConfig {
            tick_rate: u32::MAX,
            countdown_secs: 10,
            ..Default::default()
        };
        assert_eq!(config.countdown_ticks(), u32::MAX);
    }
}
