//! Client-side model of the match
//!
//! Everything the render loop needs lives here: the last authoritative
//! snapshot, the local prediction, interpolation buffers for everybody else and
//! the lobby / countdown / game-over screens. The model never touches the
//! network directly; it consumes decoded [`ServerMessage`]s and returns the
//! [`ClientMessage`]s it wants sent.

use crate::input::{ControlKeys, DirectionKeys, InputSequencer};
use crate::interpolation::{RemoteEntities, ServerClock};
use crate::prediction::{PredictionEngine, Reconciliation};
use crate::ClientConfig;
use log::{debug, info, warn};
use shared::protocol::{
    CoinSnapshot, GameOverPayload, InputPayload, JoinPayload, LobbyUpdatePayload,
};
use shared::{ClientMessage, MatchPhase, ServerMessage, StateSnapshot, Vector2, PICKUP_RADIUS};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// How long a locally predicted pickup hides a coin without server confirmation
const PREDICTED_PICKUP_TIMEOUT: Duration = Duration::from_secs(2);
/// Weight of the previous estimate in the round-trip average
const RTT_SMOOTHING: f32 = 0.7;
const MAX_TRACKED_INPUTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Connecting,
    Lobby,
    Countdown,
    Playing,
    GameOver,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugToggles {
    pub prediction: bool,
    pub reconciliation: bool,
    pub interpolation: bool,
}

impl Default for DebugToggles {
    fn default() -> Self {
        Self {
            prediction: true,
            reconciliation: true,
            interpolation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalPlayer {
    pub id: u32,
    pub name: String,
    pub color_index: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlayer {
    pub id: u32,
    pub name: String,
    pub position: Vector2,
    pub score: u32,
    pub color_index: u8,
    pub is_local: bool,
}

/// Everything the renderer draws for one frame
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub phase: ClientPhase,
    pub local_id: Option<u32>,
    pub players: Vec<RenderPlayer>,
    pub coins: Vec<CoinSnapshot>,
    pub clock_remaining: f32,
    pub countdown_remaining: Option<f32>,
    pub lobby: Option<LobbyUpdatePayload>,
    pub game_over: Option<GameOverPayload>,
    pub status: Option<String>,
    pub toggles: DebugToggles,
    pub rtt_ms: Option<f32>,
}

pub struct ClientGame {
    name: String,
    phase: ClientPhase,
    connected: bool,
    local: Option<LocalPlayer>,
    toggles: DebugToggles,

    prediction: PredictionEngine,
    prediction_seeded: bool,
    sequencer: InputSequencer,
    remotes: RemoteEntities,
    clock: ServerClock,

    latest: Option<StateSnapshot>,
    lobby: Option<LobbyUpdatePayload>,
    countdown: Option<(Instant, u32)>,
    game_over: Option<GameOverPayload>,
    status: Option<String>,

    predicted_pickups: BTreeMap<u32, Instant>,
    sent_inputs: VecDeque<(u32, Instant)>,
    last_acked_sequence: u32,
    rtt_ms: Option<f32>,
}

impl ClientGame {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            name: config.player_name.clone(),
            phase: ClientPhase::Connecting,
            connected: false,
            local: None,
            toggles: DebugToggles::default(),
            prediction: PredictionEngine::new(
                config.player_speed,
                config.snap_threshold,
                config.correction_rate,
            ),
            prediction_seeded: false,
            sequencer: InputSequencer::new(config.input_resend_interval),
            remotes: RemoteEntities::new(
                config.interpolation_delay_ms,
                config.max_extrapolation_ms,
                config.buffer_retention_ms,
            ),
            clock: ServerClock::new(),
            latest: None,
            lobby: None,
            countdown: None,
            game_over: None,
            status: None,
            predicted_pickups: BTreeMap::new(),
            sent_inputs: VecDeque::new(),
            last_acked_sequence: 0,
            rtt_ms: None,
        }
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn local_player(&self) -> Option<&LocalPlayer> {
        self.local.as_ref()
    }

    pub fn toggles(&self) -> DebugToggles {
        self.toggles
    }

    pub fn latest_snapshot(&self) -> Option<&StateSnapshot> {
        self.latest.as_ref()
    }

    pub fn rtt_ms(&self) -> Option<f32> {
        self.rtt_ms
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Socket is open; the returned join must be sent before anything else
    pub fn handle_connected(&mut self) -> ClientMessage {
        info!("Connected, joining as {:?}", self.name);
        self.connected = true;
        self.phase = ClientPhase::Connecting;
        self.status = None;
        self.join_message()
    }

    pub fn handle_disconnected(&mut self, reason: &str) {
        warn!("Disconnected: {}", reason);
        self.connected = false;
        self.phase = ClientPhase::Disconnected;
        self.status = Some(reason.to_string());
        self.local = None;
        self.lobby = None;
        self.countdown = None;
        self.clock.reset();
        self.clear_match();
    }

    /// Asks to play again after a match, or retries a rejected join
    pub fn request_rejoin(&mut self) -> Option<ClientMessage> {
        if !self.connected {
            return None;
        }
        match self.phase {
            ClientPhase::GameOver => Some(self.join_message()),
            ClientPhase::Connecting if self.local.is_none() => Some(self.join_message()),
            _ => None,
        }
    }

    fn join_message(&self) -> ClientMessage {
        ClientMessage::Join(JoinPayload {
            name: self.name.clone(),
        })
    }

    /// Applies debug toggles; returns a join when a rejoin was requested
    pub fn apply_controls(&mut self, controls: &ControlKeys) -> Option<ClientMessage> {
        if controls.toggle_prediction {
            self.toggles.prediction = !self.toggles.prediction;
            info!("Client-side prediction: {}", self.toggles.prediction);
            // Start over from the server's view so the two modes never mix
            self.prediction_seeded = false;
            self.seed_prediction();
        }
        if controls.toggle_reconciliation {
            self.toggles.reconciliation = !self.toggles.reconciliation;
            info!("Server reconciliation: {}", self.toggles.reconciliation);
        }
        if controls.toggle_interpolation {
            self.toggles.interpolation = !self.toggles.interpolation;
            info!("Interpolation: {}", self.toggles.interpolation);
        }

        if controls.rejoin {
            self.request_rejoin()
        } else {
            None
        }
    }

    pub fn handle_message(&mut self, message: ServerMessage, now: Instant, local_ms: u64) {
        match message {
            ServerMessage::Welcome(welcome) => {
                info!(
                    "Joined as {} ({}), color {}",
                    welcome.name, welcome.player_id, welcome.color_index
                );
                self.local = Some(LocalPlayer {
                    id: welcome.player_id,
                    name: welcome.name,
                    color_index: welcome.color_index,
                });
                self.status = None;
                self.phase = ClientPhase::Lobby;
            }
            ServerMessage::JoinRejected(rejected) => {
                warn!("Join rejected: {}", rejected.reason);
                self.status = Some(format!("Join rejected: {}", rejected.reason));
            }
            ServerMessage::LobbyUpdate(update) => {
                debug!("Lobby: {} of {} players", update.players.len(), update.max);
                if self.local.is_some() {
                    self.phase = ClientPhase::Lobby;
                    self.countdown = None;
                    self.game_over = None;
                }
                self.lobby = Some(update);
            }
            ServerMessage::GameStart(start) => {
                info!("Match starting in {}s", start.countdown_seconds);
                self.phase = ClientPhase::Countdown;
                self.countdown = Some((now, start.countdown_seconds));
                self.game_over = None;
                self.clear_match();
            }
            ServerMessage::GameState(snapshot) => self.apply_snapshot(snapshot, now, local_ms),
            ServerMessage::CoinCollected(collected) => {
                self.predicted_pickups.remove(&collected.coin_id);
                if let Some(latest) = self.latest.as_mut() {
                    latest.coins.retain(|c| c.id != collected.coin_id);
                    if let Some(player) = latest
                        .players
                        .iter_mut()
                        .find(|p| p.id == collected.player_id)
                    {
                        player.score = collected.new_score;
                    }
                }
            }
            ServerMessage::PlayerLeft(left) => {
                info!("Player {} left", left.player_id);
                self.remotes.remove(left.player_id);
                if let Some(latest) = self.latest.as_mut() {
                    latest.players.retain(|p| p.id != left.player_id);
                }
                if let Some(lobby) = self.lobby.as_mut() {
                    lobby.players.retain(|p| p.id != left.player_id);
                }
            }
            ServerMessage::GameOver(over) => {
                match &over.winner_name {
                    Some(winner) => info!("Match over, {} wins", winner),
                    None => info!("Match over, no winner"),
                }
                self.phase = ClientPhase::GameOver;
                self.countdown = None;
                self.game_over = Some(over);
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: StateSnapshot, now: Instant, local_ms: u64) {
        self.clock.observe(snapshot.server_time, local_ms);

        if snapshot.phase == MatchPhase::Playing && self.phase == ClientPhase::Countdown {
            self.phase = ClientPhase::Playing;
            self.countdown = None;
        }

        let local_id = self.local.as_ref().map(|l| l.id);
        if let Some(me) = local_id.and_then(|id| snapshot.player(id)) {
            let (position, last_seq) = (me.pos, me.last_seq);
            self.track_round_trip(last_seq, now);

            if !self.prediction_seeded || !self.toggles.prediction {
                self.prediction.reset(position);
                self.prediction_seeded = true;
            } else if self.toggles.reconciliation {
                match self.prediction.reconcile(position, last_seq) {
                    Reconciliation::Snapped { divergence } => {
                        debug!("Snapped local player by {:.1}px", divergence)
                    }
                    Reconciliation::Smoothed { .. } => {}
                }
            } else {
                self.prediction.acknowledge(last_seq);
            }
        }

        self.remotes.ingest(&snapshot, local_id);
        self.predicted_pickups
            .retain(|id, _| snapshot.coins.iter().any(|c| c.id == *id));
        self.latest = Some(snapshot);
    }

    fn track_round_trip(&mut self, last_seq: u32, now: Instant) {
        if last_seq <= self.last_acked_sequence {
            return;
        }
        self.last_acked_sequence = last_seq;

        let mut acked_at = None;
        while let Some(&(sequence, sent_at)) = self.sent_inputs.front() {
            if sequence > last_seq {
                break;
            }
            if sequence == last_seq {
                acked_at = Some(sent_at);
            }
            self.sent_inputs.pop_front();
        }

        if let Some(sent_at) = acked_at {
            let sample = now.duration_since(sent_at).as_secs_f32() * 1000.0;
            self.rtt_ms = Some(match self.rtt_ms {
                Some(rtt) => rtt * RTT_SMOOTHING + sample * (1.0 - RTT_SMOOTHING),
                None => sample,
            });
        }
    }

    /// Advances one render frame and returns the messages to send
    pub fn frame(
        &mut self,
        keys: DirectionKeys,
        dt: f32,
        now: Instant,
        local_ms: u64,
    ) -> Vec<ClientMessage> {
        let mut outgoing = Vec::new();

        if self.phase == ClientPhase::Playing && self.local.is_some() {
            if let Some(intent) = self.sequencer.sample(keys, now, local_ms) {
                self.sent_inputs.push_back((intent.sequence, now));
                if self.sent_inputs.len() > MAX_TRACKED_INPUTS {
                    self.sent_inputs.pop_front();
                }
                outgoing.push(ClientMessage::Input(InputPayload::from(&intent)));
            }

            if self.toggles.prediction && self.prediction_seeded {
                let intent = *self.sequencer.current();
                self.prediction.apply_input(&intent, dt);
                self.predict_pickups(now);
            }
        } else {
            self.prediction.decay_correction(dt);
        }

        self.predicted_pickups
            .retain(|_, touched| now.duration_since(*touched) < PREDICTED_PICKUP_TIMEOUT);

        outgoing
    }

    /// Hides coins the predicted player is touching until the server decides
    fn predict_pickups(&mut self, now: Instant) {
        let position = self.prediction.position();
        let Some(latest) = self.latest.as_ref() else {
            return;
        };
        for coin in &latest.coins {
            if position.distance(&coin.pos) < PICKUP_RADIUS
                && !self.predicted_pickups.contains_key(&coin.id)
            {
                debug!("Predicted pickup of coin {}", coin.id);
                self.predicted_pickups.insert(coin.id, now);
            }
        }
    }

    pub fn is_coin_hidden(&self, coin_id: u32) -> bool {
        self.predicted_pickups.contains_key(&coin_id)
    }

    /// Positions are computed here so interpolation can prune as it goes
    pub fn render_frame(&mut self, now: Instant, local_ms: u64) -> RenderFrame {
        let server_now = self.clock.to_server_time(local_ms);
        let remote_positions = if self.toggles.interpolation {
            self.remotes.render_positions(server_now)
        } else {
            self.remotes.latest_positions()
        };
        let local_id = self.local.as_ref().map(|l| l.id);

        let mut players = Vec::new();
        let mut coins = Vec::new();
        let mut clock_remaining = 0.0;

        if let Some(latest) = self.latest.as_ref() {
            clock_remaining = latest.clock_remaining;
            for player in &latest.players {
                let is_local = Some(player.id) == local_id;
                let position = if is_local {
                    if self.toggles.prediction && self.prediction_seeded {
                        self.prediction.position()
                    } else {
                        player.pos
                    }
                } else {
                    remote_positions.get(&player.id).copied().unwrap_or(player.pos)
                };
                players.push(RenderPlayer {
                    id: player.id,
                    name: player.name.clone(),
                    position,
                    score: player.score,
                    color_index: player.color_index,
                    is_local,
                });
            }
            coins = latest
                .coins
                .iter()
                .filter(|c| !self.predicted_pickups.contains_key(&c.id))
                .cloned()
                .collect();
        }

        let countdown_remaining = self.countdown.map(|(started, seconds)| {
            (seconds as f32 - now.duration_since(started).as_secs_f32()).max(0.0)
        });

        RenderFrame {
            phase: self.phase,
            local_id,
            players,
            coins,
            clock_remaining,
            countdown_remaining,
            lobby: self.lobby.clone(),
            game_over: self.game_over.clone(),
            status: self.status.clone(),
            toggles: self.toggles,
            rtt_ms: self.rtt_ms,
        }
    }

    fn seed_prediction(&mut self) {
        let local_id = self.local.as_ref().map(|l| l.id);
        let position = self
            .latest
            .as_ref()
            .zip(local_id)
            .and_then(|(latest, id)| latest.player(id))
            .map(|p| p.pos);
        if let Some(position) = position {
            self.prediction.reset(position);
            self.prediction_seeded = true;
        }
    }

    /// Forgets everything tied to one match
    fn clear_match(&mut self) {
        self.latest = None;
        self.prediction.reset(Vector2::ZERO);
        self.prediction_seeded = false;
        self.sequencer.reset();
        self.remotes.clear();
        self.predicted_pickups.clear();
        self.sent_inputs.clear();
        self.last_acked_sequence = 0;
    }
}
