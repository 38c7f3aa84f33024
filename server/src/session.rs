//! Session management between the transport and the game state
//!
//! The `Session` is a synchronous state machine. The network layer hands it raw
//! frames and connection events and collects encoded frames from it, so every
//! rule about joining, starting, leaving and restarting can be exercised without
//! sockets or a runtime.
//!
//! Both directions pass through a [`LatencyQueue`]: frames are decoded only once
//! the receive delay has elapsed, and outgoing frames become available only once
//! the send delay has elapsed.

use crate::client_manager::{ClientManager, ConnectionState};
use crate::game::{GameEvent, GameState};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::protocol::{
    self, CoinCollectedPayload, GameOverPayload, GameStartPayload, JoinRejectedPayload,
    LobbyUpdatePayload, PlayerLeftPayload, WelcomePayload,
};
use shared::{
    get_timestamp, ClientMessage, GameConfig, InputIntent, LatencyQueue, MatchPhase,
    ServerMessage, MAX_NAME_LEN,
};
use std::net::SocketAddr;
use std::time::Instant;

/// Upper bound on simultaneously open sockets, joined or not
pub const MAX_CONNECTIONS: usize = 64;

const NAME_ADJECTIVES: &[&str] = &[
    "Swift", "Brave", "Clever", "Lucky", "Sneaky", "Mighty", "Jolly", "Quiet", "Rapid", "Bold",
];
const NAME_ANIMALS: &[&str] = &[
    "Fox", "Otter", "Falcon", "Badger", "Panda", "Tiger", "Heron", "Lynx", "Moose", "Koala",
];

/// An encoded frame ready for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub connection_id: u32,
    pub text: String,
}

#[derive(Debug)]
struct Inbound {
    connection_id: u32,
    text: String,
}

#[derive(Debug)]
pub struct Session {
    config: GameConfig,
    clients: ClientManager,
    game: GameState,
    incoming: LatencyQueue<Inbound>,
    outgoing: LatencyQueue<Outbound>,
    seed: Option<u64>,
    matches_created: u64,
    rng: StdRng,
    closing: Vec<u32>,
}

impl Session {
    pub fn new(config: GameConfig) -> Self {
        Self::build(config, None)
    }

    /// Reproducible coin placement and generated names
    pub fn with_seed(config: GameConfig, seed: u64) -> Self {
        Self::build(config, Some(seed))
    }

    fn build(config: GameConfig, seed: Option<u64>) -> Self {
        let game = match seed {
            Some(seed) => GameState::with_seed(config.clone(), seed),
            None => GameState::new(config.clone()),
        };
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ 0x5eed),
            None => StdRng::from_entropy(),
        };

        Self {
            incoming: LatencyQueue::new(config.latency),
            outgoing: LatencyQueue::new(config.latency),
            clients: ClientManager::new(MAX_CONNECTIONS),
            game,
            config,
            seed,
            matches_created: 1,
            rng,
            closing: Vec::new(),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn phase(&self) -> MatchPhase {
        self.game.phase()
    }

    /// Frames still waiting out the receive delay
    pub fn pending_incoming(&self) -> usize {
        self.incoming.len()
    }

    pub fn handle_connect(&mut self, addr: SocketAddr, now: Instant) -> Option<u32> {
        let id = self.clients.add_connection(addr, now);
        if id.is_none() {
            warn!("Refusing connection from {}: roster full", addr);
        }
        id
    }

    /// Queues a raw text frame behind the receive delay
    pub fn receive_frame(&mut self, connection_id: u32, text: String, now: Instant) {
        if !self.clients.touch(connection_id, now) {
            debug!("Ignoring frame from closed connection {}", connection_id);
            return;
        }
        self.incoming.push(
            Inbound {
                connection_id,
                text,
            },
            now,
        );
    }

    /// Transport closed; takes effect immediately, bypassing the receive delay
    pub fn handle_disconnect(&mut self, connection_id: u32) {
        self.disconnect(connection_id);
    }

    fn disconnect(&mut self, connection_id: u32) {
        self.clients.mark_disconnected(connection_id);
        self.game.mark_disconnected(connection_id);
        self.incoming
            .discard_where(|frame| frame.connection_id == connection_id);
    }

    /// Drops connections that went quiet and returns their ids
    pub fn check_heartbeats(&mut self, now: Instant) -> Vec<u32> {
        let timed_out = self
            .clients
            .check_timeouts(self.config.heartbeat_timeout, now);
        for id in &timed_out {
            self.disconnect(*id);
        }
        self.closing.extend(timed_out.iter().copied());
        timed_out
    }

    /// Connections the transport should close (left or timed out)
    pub fn take_closed(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.closing)
    }

    /// Processes delivered frames and cleans up departed players
    pub fn update(&mut self, now: Instant) {
        for frame in self.incoming.drain(now) {
            self.handle_frame(frame, now);
        }
        self.purge_disconnected(now);
    }

    /// Runs one simulation step and broadcasts its results
    pub fn tick(&mut self, now: Instant) {
        if !matches!(self.game.phase(), MatchPhase::Countdown | MatchPhase::Playing) {
            return;
        }

        let events = self.game.tick(self.config.tick_dt());
        let playing = self.game.phase() == MatchPhase::Playing;
        self.dispatch_events(events, now);
        if playing {
            self.broadcast_snapshot(now);
        }
    }

    /// Frames whose send delay has elapsed
    pub fn drain_outgoing(&mut self, now: Instant) -> Vec<Outbound> {
        self.outgoing.drain(now)
    }

    fn handle_frame(&mut self, frame: Inbound, now: Instant) {
        let id = frame.connection_id;
        match self.clients.get(id) {
            Some(conn) if conn.state != ConnectionState::Disconnected => {}
            _ => return,
        }

        match protocol::decode_client_message(&frame.text) {
            Ok(message) => self.handle_message(id, message, now),
            Err(e) => warn!("Dropping frame from connection {}: {}", id, e),
        }
    }

    fn handle_message(&mut self, id: u32, message: ClientMessage, now: Instant) {
        match message {
            ClientMessage::Join(payload) => self.handle_join(id, &payload.name, now),
            ClientMessage::Input(payload) => {
                let intent = InputIntent::from(payload);
                if let Err(rejection) = self.game.apply_input(id, &intent) {
                    debug!("Input {} from {} rejected: {:?}", intent.sequence, id, rejection);
                }
            }
            ClientMessage::Heartbeat {} => {}
            ClientMessage::Leave {} => {
                info!("Connection {} left", id);
                self.disconnect(id);
                self.closing.push(id);
            }
        }
    }

    fn handle_join(&mut self, id: u32, raw_name: &str, now: Instant) {
        if self.game.phase() == MatchPhase::Ended {
            self.reset_match(now);
        }

        // A seated player asking again, typically to play another round
        if let Some(player) = self.game.player(id) {
            if self.game.phase() == MatchPhase::Lobby {
                let welcome = WelcomePayload {
                    player_id: id,
                    name: player.name.clone(),
                    color_index: player.color_index,
                };
                self.send(id, ServerMessage::Welcome(welcome), now);
                self.broadcast_lobby(now);
                self.maybe_begin_countdown(now);
            } else {
                debug!("Ignoring duplicate join from {}", id);
            }
            return;
        }

        let name = self.sanitize_name(raw_name);
        match self.game.add_player(id, &name).map(|p| p.color_index) {
            Ok(color_index) => {
                self.clients.seat(id, &name, ConnectionState::Lobby);
                let welcome = WelcomePayload {
                    player_id: id,
                    name,
                    color_index,
                };
                self.send(id, ServerMessage::Welcome(welcome), now);
                self.broadcast_lobby(now);
                self.maybe_begin_countdown(now);
            }
            Err(e) => {
                info!("Rejected join from {}: {}", id, e.reason());
                let rejected = JoinRejectedPayload {
                    reason: e.reason().to_string(),
                };
                self.send(id, ServerMessage::JoinRejected(rejected), now);
            }
        }
    }

    /// Trims and truncates a requested name, generating one when empty
    fn sanitize_name(&mut self, raw: &str) -> String {
        let truncated: String = raw.trim().chars().take(MAX_NAME_LEN).collect();
        let name = truncated.trim_end();
        if name.is_empty() {
            self.generate_name()
        } else {
            name.to_string()
        }
    }

    fn generate_name(&mut self) -> String {
        let adjective = NAME_ADJECTIVES.choose(&mut self.rng).unwrap_or(&"Quick");
        let animal = NAME_ANIMALS.choose(&mut self.rng).unwrap_or(&"Fox");
        format!("{}{}", adjective, animal)
    }

    fn maybe_begin_countdown(&mut self, now: Instant) {
        let events = self.game.begin_countdown();
        self.dispatch_events(events, now);
    }

    fn dispatch_events(&mut self, events: Vec<GameEvent>, now: Instant) {
        let mut game_over = None;

        for event in events {
            match event {
                GameEvent::PhaseChanged { to, .. } => match to {
                    MatchPhase::Countdown => {
                        self.clients.set_joined_state(ConnectionState::Countdown);
                        let start = GameStartPayload {
                            countdown_seconds: self.config.countdown_secs,
                        };
                        self.broadcast(ServerMessage::GameStart(start), now);
                    }
                    MatchPhase::Playing => self.clients.set_joined_state(ConnectionState::Playing),
                    MatchPhase::Ended => self.clients.set_joined_state(ConnectionState::Lobby),
                    MatchPhase::Lobby => {}
                },
                GameEvent::CoinSpawned { .. } => {}
                GameEvent::CoinCollected {
                    coin_id,
                    player_id,
                    new_score,
                } => {
                    let collected = CoinCollectedPayload {
                        coin_id,
                        player_id,
                        new_score,
                    };
                    self.broadcast(ServerMessage::CoinCollected(collected), now);
                }
                GameEvent::MatchEnded {
                    final_scores,
                    winner,
                    ..
                } => {
                    let (winner_id, winner_name) = match winner {
                        Some((id, name)) => (Some(id), Some(name)),
                        None => (None, None),
                    };
                    game_over = Some(GameOverPayload {
                        final_scores,
                        winner_id,
                        winner_name,
                    });
                }
            }
        }

        if let Some(payload) = game_over {
            self.broadcast_snapshot(now);
            self.broadcast(ServerMessage::GameOver(payload), now);
        }
    }

    fn purge_disconnected(&mut self, now: Instant) {
        let removed_connections = self.clients.remove_disconnected();
        let removed_players = self.game.purge_disconnected();
        if removed_connections.is_empty() && removed_players.is_empty() {
            return;
        }

        for player in &removed_players {
            let left = PlayerLeftPayload {
                player_id: player.id,
            };
            self.broadcast(ServerMessage::PlayerLeft(left), now);
        }

        match self.game.phase() {
            MatchPhase::Lobby => {
                if !removed_players.is_empty() {
                    self.broadcast_lobby(now);
                }
            }
            MatchPhase::Countdown => {
                if self.game.connected_count() < self.config.min_players {
                    info!("Countdown abandoned: not enough players");
                    self.reset_match(now);
                }
            }
            MatchPhase::Playing => {
                let events = self.game.check_player_count();
                self.dispatch_events(events, now);
            }
            MatchPhase::Ended => {}
        }

        if self.clients.joined_count() == 0 && self.game.phase() != MatchPhase::Lobby {
            self.reset_match(now);
        }
    }

    /// Replaces the match with a fresh lobby, keeping joined connections seated
    fn reset_match(&mut self, now: Instant) {
        self.game = match self.seed {
            Some(seed) => {
                GameState::with_seed(self.config.clone(), seed.wrapping_add(self.matches_created))
            }
            None => GameState::new(self.config.clone()),
        };
        self.matches_created += 1;
        info!("Match {} created", self.matches_created);

        let seated: Vec<(u32, String)> = self
            .clients
            .joined()
            .map(|c| (c.id, c.name.clone().unwrap_or_default()))
            .collect();
        for (id, name) in &seated {
            if let Err(e) = self.game.add_player(*id, name) {
                warn!("Could not re-seat connection {}: {}", id, e.reason());
            }
        }
        self.clients.set_joined_state(ConnectionState::Lobby);

        if !seated.is_empty() {
            self.broadcast_lobby(now);
        }
    }

    fn broadcast_lobby(&mut self, now: Instant) {
        let update = LobbyUpdatePayload {
            players: self.game.lobby_players(),
            min: self.config.min_players,
            max: self.config.max_players,
        };
        self.broadcast(ServerMessage::LobbyUpdate(update), now);
    }

    fn broadcast_snapshot(&mut self, now: Instant) {
        let snapshot = self.game.snapshot(get_timestamp());
        self.broadcast(ServerMessage::GameState(snapshot), now);
    }

    fn broadcast(&mut self, message: ServerMessage, now: Instant) {
        let text = match protocol::encode(&message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {}: {}", message.kind(), e);
                return;
            }
        };
        for connection_id in self.clients.joined_ids() {
            self.outgoing.push(
                Outbound {
                    connection_id,
                    text: text.clone(),
                },
                now,
            );
        }
    }

    fn send(&mut self, connection_id: u32, message: ServerMessage, now: Instant) {
        match protocol::encode(&message) {
            Ok(text) => self.outgoing.push(
                Outbound {
                    connection_id,
                    text,
                },
                now,
            ),
            Err(e) => error!("Failed to encode {}: {}", message.kind(), e),
        }
    }

    #[cfg(test)]
    pub(crate) fn game_mut(&mut self) -> &mut GameState {
        &mut self.game
    }
}
