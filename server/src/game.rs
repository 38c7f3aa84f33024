//! Authoritative game state
//!
//! `GameState` is the single writer of match truth: player positions, coins,
//! scores and the match clock. The session feeds it validated inputs and calls
//! [`GameState::tick`] at a fixed rate; clients only ever see the snapshots it
//! produces.
//!
//! Players and coins live in ordered maps so every pass over them runs in
//! ascending id order. That order is the tie-break for simultaneous pickups and
//! for equal final scores: the lowest id wins.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::protocol::{CoinSnapshot, FinalScore, LobbyPlayer, PlayerSnapshot};
use shared::{
    in_world_bounds, intent_velocity, integrate_position, GameConfig, InputIntent, MatchPhase,
    StateSnapshot, Vector2, COIN_RADIUS, PICKUP_RADIUS, PLAYER_COLOR_COUNT, PLAYER_RADIUS,
    WORLD_HEIGHT, WORLD_WIDTH,
};
use std::collections::BTreeMap;

const SPAWN_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEntity {
    pub id: u32,
    pub name: String,
    pub position: Vector2,
    pub velocity: Vector2,
    pub score: u32,
    pub status: ConnectionStatus,
    pub color_index: u8,
    pub last_input_sequence: u32,
}

impl PlayerEntity {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoinEntity {
    pub id: u32,
    pub position: Vector2,
    /// Match time in seconds when the coin appeared
    pub spawned_at: f32,
}

/// Phase plus the timers that drive its transitions
#[derive(Debug, Clone, PartialEq)]
pub struct MatchState {
    pub phase: MatchPhase,
    pub countdown_ticks_remaining: u32,
    pub clock_remaining: f32,
    pub min_players: usize,
    pub max_players: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    ClockExpired,
    NotEnoughPlayers,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    PhaseChanged {
        from: MatchPhase,
        to: MatchPhase,
    },
    CoinSpawned {
        coin_id: u32,
        position: Vector2,
    },
    CoinCollected {
        coin_id: u32,
        player_id: u32,
        new_score: u32,
    },
    MatchEnded {
        reason: EndReason,
        final_scores: Vec<FinalScore>,
        winner: Option<(u32, String)>,
    },
}

/// Why an input was dropped without touching the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRejection {
    UnknownPlayer,
    Disconnected,
    NotPlaying,
    StaleSequence { last: u32, received: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    LobbyFull,
    MatchInProgress,
    AlreadyJoined,
}

impl JoinError {
    pub fn reason(&self) -> &'static str {
        match self {
            JoinError::LobbyFull => "Lobby is full",
            JoinError::MatchInProgress => "Match already in progress",
            JoinError::AlreadyJoined => "Already joined",
        }
    }
}

#[derive(Debug)]
pub struct GameState {
    config: GameConfig,
    players: BTreeMap<u32, PlayerEntity>,
    coins: BTreeMap<u32, CoinEntity>,
    match_state: MatchState,
    tick: u64,
    elapsed: f32,
    spawn_timer: f32,
    next_coin_id: u32,
    next_color_index: u8,
    rng: StdRng,
}

impl GameState {
    pub fn new(config: GameConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic coin placement for reproducible simulations
    pub fn with_seed(config: GameConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: GameConfig, rng: StdRng) -> Self {
        let match_state = MatchState {
            phase: MatchPhase::Lobby,
            countdown_ticks_remaining: 0,
            clock_remaining: config.match_duration_secs,
            min_players: config.min_players,
            max_players: config.max_players,
        };

        Self {
            config,
            players: BTreeMap::new(),
            coins: BTreeMap::new(),
            match_state,
            tick: 0,
            elapsed: 0.0,
            spawn_timer: 0.0,
            next_coin_id: 1,
            next_color_index: 0,
            rng,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn phase(&self) -> MatchPhase {
        self.match_state.phase
    }

    pub fn match_state(&self) -> &MatchState {
        &self.match_state
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn clock_remaining(&self) -> f32 {
        self.match_state.clock_remaining
    }

    pub fn player(&self, id: u32) -> Option<&PlayerEntity> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerEntity> {
        self.players.values()
    }

    pub fn coins(&self) -> impl Iterator<Item = &CoinEntity> {
        self.coins.values()
    }

    pub fn coin_count(&self) -> usize {
        self.coins.len()
    }

    pub fn connected_count(&self) -> usize {
        self.players.values().filter(|p| p.is_connected()).count()
    }

    pub fn add_player(&mut self, id: u32, name: &str) -> Result<&PlayerEntity, JoinError> {
        if self.players.contains_key(&id) {
            return Err(JoinError::AlreadyJoined);
        }
        if self.match_state.phase != MatchPhase::Lobby {
            return Err(JoinError::MatchInProgress);
        }
        if self.players.len() >= self.match_state.max_players {
            return Err(JoinError::LobbyFull);
        }

        // Spread players across the four quadrants
        let spawn_points = [
            Vector2::new(WORLD_WIDTH * 0.25, WORLD_HEIGHT * 0.25),
            Vector2::new(WORLD_WIDTH * 0.75, WORLD_HEIGHT * 0.25),
            Vector2::new(WORLD_WIDTH * 0.25, WORLD_HEIGHT * 0.75),
            Vector2::new(WORLD_WIDTH * 0.75, WORLD_HEIGHT * 0.75),
        ];
        let position = spawn_points[self.players.len() % spawn_points.len()];

        let color_index = self.next_color_index % PLAYER_COLOR_COUNT;
        self.next_color_index = self.next_color_index.wrapping_add(1);

        let player = PlayerEntity {
            id,
            name: name.to_string(),
            position,
            velocity: Vector2::ZERO,
            score: 0,
            status: ConnectionStatus::Connected,
            color_index,
            last_input_sequence: 0,
        };

        info!(
            "Added player {} ({}) at ({:.0}, {:.0})",
            id, name, position.x, position.y
        );
        Ok(self.players.entry(id).or_insert(player))
    }

    /// Stops a player from moving or receiving further input
    ///
    /// The entity stays in place until [`GameState::purge_disconnected`] runs so
    /// the session can notify peers on its own cadence.
    pub fn mark_disconnected(&mut self, id: u32) -> bool {
        match self.players.get_mut(&id) {
            Some(player) if player.is_connected() => {
                player.status = ConnectionStatus::Disconnected;
                player.velocity = Vector2::ZERO;
                info!("Player {} marked disconnected", id);
                true
            }
            _ => false,
        }
    }

    pub fn remove_player(&mut self, id: u32) -> Option<PlayerEntity> {
        let removed = self.players.remove(&id);
        if removed.is_some() {
            info!("Removed player {}", id);
        }
        removed
    }

    /// Removes every disconnected player and returns them
    pub fn purge_disconnected(&mut self) -> Vec<PlayerEntity> {
        let gone: Vec<u32> = self
            .players
            .values()
            .filter(|p| !p.is_connected())
            .map(|p| p.id)
            .collect();

        gone.into_iter()
            .filter_map(|id| self.remove_player(id))
            .collect()
    }

    /// Validates an intent and stores the resulting velocity for the next tick
    pub fn apply_input(&mut self, player_id: u32, intent: &InputIntent) -> Result<(), InputRejection> {
        let playing = self.match_state.phase == MatchPhase::Playing;
        let speed = self.config.player_speed;

        let player = self
            .players
            .get_mut(&player_id)
            .ok_or(InputRejection::UnknownPlayer)?;
        if !player.is_connected() {
            return Err(InputRejection::Disconnected);
        }
        if !playing {
            return Err(InputRejection::NotPlaying);
        }
        if intent.sequence <= player.last_input_sequence {
            return Err(InputRejection::StaleSequence {
                last: player.last_input_sequence,
                received: intent.sequence,
            });
        }

        player.last_input_sequence = intent.sequence;
        player.velocity = intent_velocity(intent, speed);
        Ok(())
    }

    pub fn can_start(&self) -> bool {
        let count = self.connected_count();
        self.match_state.phase == MatchPhase::Lobby
            && count >= self.match_state.min_players
            && count <= self.match_state.max_players
    }

    /// Moves Lobby -> Countdown when the player count allows it
    pub fn begin_countdown(&mut self) -> Vec<GameEvent> {
        if !self.can_start() {
            return Vec::new();
        }

        self.match_state.countdown_ticks_remaining = self.config.countdown_ticks();
        let mut events = vec![self.set_phase(MatchPhase::Countdown)];
        if self.match_state.countdown_ticks_remaining == 0 {
            events.extend(self.start_playing());
        }
        events
    }

    /// Advances the match by one fixed step of `dt` seconds
    pub fn tick(&mut self, dt: f32) -> Vec<GameEvent> {
        debug_assert!(dt.is_finite() && dt >= 0.0, "invalid tick dt {}", dt);
        self.tick += 1;

        match self.match_state.phase {
            MatchPhase::Lobby | MatchPhase::Ended => Vec::new(),
            MatchPhase::Countdown => {
                self.match_state.countdown_ticks_remaining =
                    self.match_state.countdown_ticks_remaining.saturating_sub(1);
                if self.match_state.countdown_ticks_remaining == 0 {
                    self.start_playing()
                } else {
                    Vec::new()
                }
            }
            MatchPhase::Playing => self.simulate(dt),
        }
    }

    fn simulate(&mut self, dt: f32) -> Vec<GameEvent> {
        let mut events = Vec::new();
        self.elapsed += dt;

        for player in self.players.values_mut() {
            if !player.is_connected() {
                continue;
            }
            player.position = integrate_position(player.position, player.velocity, dt, PLAYER_RADIUS);
            assert!(
                in_world_bounds(&player.position, PLAYER_RADIUS),
                "player {} left the world at {:?}",
                player.id,
                player.position
            );
        }

        events.extend(self.collect_coins());

        self.spawn_timer += dt;
        if self.spawn_timer >= self.config.coin_spawn_interval_secs {
            self.spawn_timer -= self.config.coin_spawn_interval_secs;
            if self.coins.len() < self.config.max_coins {
                events.push(self.spawn_coin());
            }
        }

        self.match_state.clock_remaining = (self.match_state.clock_remaining - dt).max(0.0);
        if self.match_state.clock_remaining <= 0.0 {
            events.extend(self.end_match(EndReason::ClockExpired));
        } else if self.connected_count() < self.match_state.min_players {
            events.extend(self.end_match(EndReason::NotEnoughPlayers));
        }

        events
    }

    /// Each coin goes to the lowest-id connected player within pickup range
    fn collect_coins(&mut self) -> Vec<GameEvent> {
        let mut collected = Vec::new();

        for coin in self.coins.values() {
            let collector = self
                .players
                .values()
                .filter(|p| p.is_connected())
                .find(|p| p.position.distance(&coin.position) < PICKUP_RADIUS)
                .map(|p| p.id);

            if let Some(player_id) = collector {
                collected.push((coin.id, player_id));
            }
        }

        let mut events = Vec::with_capacity(collected.len());
        for (coin_id, player_id) in collected {
            self.coins.remove(&coin_id);
            if let Some(player) = self.players.get_mut(&player_id) {
                player.score = player.score.saturating_add(1);
                info!(
                    "Player {} collected coin {} (score {})",
                    player_id, coin_id, player.score
                );
                events.push(GameEvent::CoinCollected {
                    coin_id,
                    player_id,
                    new_score: player.score,
                });
            }
        }
        events
    }

    fn spawn_coin(&mut self) -> GameEvent {
        let margin = COIN_RADIUS * 2.0;
        let mut position = Vector2::new(WORLD_WIDTH / 2.0, WORLD_HEIGHT / 2.0);

        for _ in 0..SPAWN_ATTEMPTS {
            position = Vector2::new(
                self.rng.gen_range(margin..WORLD_WIDTH - margin),
                self.rng.gen_range(margin..WORLD_HEIGHT - margin),
            );
            if self.is_unoccupied(&position) {
                break;
            }
        }

        let id = self.next_coin_id;
        self.next_coin_id += 1;
        self.coins.insert(
            id,
            CoinEntity {
                id,
                position,
                spawned_at: self.elapsed,
            },
        );
        debug!("Spawned coin {} at ({:.0}, {:.0})", id, position.x, position.y);

        GameEvent::CoinSpawned {
            coin_id: id,
            position,
        }
    }

    fn is_unoccupied(&self, position: &Vector2) -> bool {
        let near_player = self
            .players
            .values()
            .any(|p| p.position.distance(position) < PICKUP_RADIUS);
        let near_coin = self
            .coins
            .values()
            .any(|c| c.position.distance(position) < PICKUP_RADIUS);
        !near_player && !near_coin
    }

    fn start_playing(&mut self) -> Vec<GameEvent> {
        let mut events = vec![self.set_phase(MatchPhase::Playing)];
        self.match_state.clock_remaining = self.config.match_duration_secs;
        self.elapsed = 0.0;
        self.spawn_timer = 0.0;

        for _ in 0..self.config.initial_coins.min(self.config.max_coins) {
            events.push(self.spawn_coin());
        }
        events
    }

    /// Ends the match, clearing coins and freezing players
    ///
    /// Returns no events when the match already ended.
    pub fn end_match(&mut self, reason: EndReason) -> Vec<GameEvent> {
        if self.match_state.phase == MatchPhase::Ended {
            return Vec::new();
        }

        let phase_change = self.set_phase(MatchPhase::Ended);
        self.coins.clear();
        for player in self.players.values_mut() {
            player.velocity = Vector2::ZERO;
        }

        let final_scores = self.final_scores();
        let winner = self.winner().map(|p| (p.id, p.name.clone()));
        info!(
            "Match ended ({:?}); winner: {}",
            reason,
            winner
                .as_ref()
                .map(|(_, name)| name.as_str())
                .unwrap_or("no one")
        );

        vec![
            phase_change,
            GameEvent::MatchEnded {
                reason,
                final_scores,
                winner,
            },
        ]
    }

    /// Ends a running match early when too few players remain
    pub fn check_player_count(&mut self) -> Vec<GameEvent> {
        if self.match_state.phase == MatchPhase::Playing
            && self.connected_count() < self.match_state.min_players
        {
            self.end_match(EndReason::NotEnoughPlayers)
        } else {
            Vec::new()
        }
    }

    fn set_phase(&mut self, to: MatchPhase) -> GameEvent {
        let from = self.match_state.phase;
        self.match_state.phase = to;
        info!("Match phase {:?} -> {:?}", from, to);
        GameEvent::PhaseChanged { from, to }
    }

    /// Highest score wins; equal scores go to the lowest id
    pub fn winner(&self) -> Option<&PlayerEntity> {
        let mut best: Option<&PlayerEntity> = None;
        for player in self.players.values() {
            match best {
                Some(current) if player.score <= current.score => {}
                _ => best = Some(player),
            }
        }
        best
    }

    pub fn final_scores(&self) -> Vec<FinalScore> {
        let mut scores: Vec<FinalScore> = self
            .players
            .values()
            .map(|p| FinalScore {
                id: p.id,
                name: p.name.clone(),
                score: p.score,
            })
            .collect();
        scores.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        scores
    }

    pub fn lobby_players(&self) -> Vec<LobbyPlayer> {
        self.players
            .values()
            .filter(|p| p.is_connected())
            .map(|p| LobbyPlayer {
                id: p.id,
                name: p.name.clone(),
                color_index: p.color_index,
            })
            .collect()
    }

    pub fn snapshot(&self, server_time: u64) -> StateSnapshot {
        StateSnapshot {
            players: self
                .players
                .values()
                .filter(|p| p.is_connected())
                .map(|p| PlayerSnapshot {
                    id: p.id,
                    name: p.name.clone(),
                    pos: p.position,
                    score: p.score,
                    color_index: p.color_index,
                    last_seq: p.last_input_sequence,
                })
                .collect(),
            coins: self
                .coins
                .values()
                .map(|c| CoinSnapshot {
                    id: c.id,
                    pos: c.position,
                })
                .collect(),
            clock_remaining: self.match_state.clock_remaining,
            tick: self.tick,
            server_time,
            phase: self.match_state.phase,
        }
    }

    #[cfg(test)]
    pub(crate) fn place_coin(&mut self, position: Vector2) -> u32 {
        let id = self.next_coin_id;
        self.next_coin_id += 1;
        self.coins.insert(
            id,
            CoinEntity {
                id,
                position,
                spawned_at: self.elapsed,
            },
        );
        id
    }

    #[cfg(test)]
    pub(crate) fn place_player(&mut self, id: u32, position: Vector2) {
        if let Some(player) = self.players.get_mut(&id) {
            player.position = position;
        }
    }
}
