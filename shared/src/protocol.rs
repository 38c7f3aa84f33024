//! Wire protocol shared by server and client
//!
//! Every frame is a JSON object `{"type": ..., "data": {...}}`. Frames are decoded
//! once at the connection boundary into the closed [`ClientMessage`] /
//! [`ServerMessage`] enums; everything past that point matches exhaustively.

use crate::{InputIntent, Vector2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Messages a client sends to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Join(JoinPayload),
    Input(InputPayload),
    Heartbeat {},
    Leave {},
}

/// Messages the server sends to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome(WelcomePayload),
    JoinRejected(JoinRejectedPayload),
    LobbyUpdate(LobbyUpdatePayload),
    GameStart(GameStartPayload),
    GameState(StateSnapshot),
    CoinCollected(CoinCollectedPayload),
    PlayerLeft(PlayerLeftPayload),
    GameOver(GameOverPayload),
}

pub const CLIENT_MESSAGE_TYPES: &[&str] = &["join", "input", "heartbeat", "leave"];

pub const SERVER_MESSAGE_TYPES: &[&str] = &[
    "welcome",
    "join_rejected",
    "lobby_update",
    "game_start",
    "game_state",
    "coin_collected",
    "player_left",
    "game_over",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPayload {
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub down: bool,
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
    pub seq: u32,
    #[serde(default)]
    pub timestamp: u64,
}

impl From<InputPayload> for InputIntent {
    fn from(payload: InputPayload) -> Self {
        Self {
            sequence: payload.seq,
            timestamp: payload.timestamp,
            up: payload.up,
            down: payload.down,
            left: payload.left,
            right: payload.right,
        }
    }
}

impl From<&InputIntent> for InputPayload {
    fn from(intent: &InputIntent) -> Self {
        Self {
            up: intent.up,
            down: intent.down,
            left: intent.left,
            right: intent.right,
            seq: intent.sequence,
            timestamp: intent.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    pub player_id: u32,
    pub name: String,
    pub color_index: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRejectedPayload {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayer {
    pub id: u32,
    pub name: String,
    pub color_index: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyUpdatePayload {
    pub players: Vec<LobbyPlayer>,
    pub min: usize,
    pub max: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartPayload {
    pub countdown_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinCollectedPayload {
    pub coin_id: u32,
    pub player_id: u32,
    pub new_score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeftPayload {
    pub player_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalScore {
    pub id: u32,
    pub name: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverPayload {
    /// Sorted by score, highest first; equal scores by ascending id
    pub final_scores: Vec<FinalScore>,
    pub winner_id: Option<u32>,
    pub winner_name: Option<String>,
}

/// Lifecycle phase of one match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Lobby,
    Countdown,
    Playing,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: u32,
    pub name: String,
    pub pos: Vector2,
    pub score: u32,
    pub color_index: u8,
    /// Highest input sequence applied to this player
    pub last_seq: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinSnapshot {
    pub id: u32,
    pub pos: Vector2,
}

/// Immutable copy of the authoritative world after one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub players: Vec<PlayerSnapshot>,
    pub coins: Vec<CoinSnapshot>,
    pub clock_remaining: f32,
    pub tick: u64,
    /// Server wall clock in milliseconds since the Unix epoch
    pub server_time: u64,
    pub phase: MatchPhase,
}

impl StateSnapshot {
    pub fn player(&self, id: u32) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message has no `type` tag")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join(_) => "join",
            ClientMessage::Input(_) => "input",
            ClientMessage::Heartbeat {} => "heartbeat",
            ClientMessage::Leave {} => "leave",
        }
    }
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome(_) => "welcome",
            ServerMessage::JoinRejected(_) => "join_rejected",
            ServerMessage::LobbyUpdate(_) => "lobby_update",
            ServerMessage::GameStart(_) => "game_start",
            ServerMessage::GameState(_) => "game_state",
            ServerMessage::CoinCollected(_) => "coin_collected",
            ServerMessage::PlayerLeft(_) => "player_left",
            ServerMessage::GameOver(_) => "game_over",
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    decode(text, CLIENT_MESSAGE_TYPES)
}

pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    decode(text, SERVER_MESSAGE_TYPES)
}

fn decode<T: DeserializeOwned>(text: &str, known_types: &[&str]) -> Result<T, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = match value.get("type") {
        Some(serde_json::Value::String(kind)) => kind.clone(),
        Some(_) => return Err(ProtocolError::Malformed("`type` is not a string".into())),
        None => return Err(ProtocolError::MissingType),
    };
    if !known_types.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_wire_shape() {
        let text = encode(&ClientMessage::Join(JoinPayload {
            name: "Alice".into(),
        }))
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "join", "data": {"name": "Alice"}}));
    }

    #[test]
    fn test_decode_input_with_missing_directions() {
        let message =
            decode_client_message(r#"{"type":"input","data":{"up":true,"seq":7}}"#).unwrap();
        match message {
            ClientMessage::Input(payload) => {
                let intent = InputIntent::from(payload);
                assert!(intent.up);
                assert!(!intent.down && !intent.left && !intent.right);
                assert_eq!(intent.sequence, 7);
                assert_eq!(intent.timestamp, 0);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty_payload_variants() {
        assert_eq!(
            decode_client_message(r#"{"type":"heartbeat","data":{}}"#).unwrap(),
            ClientMessage::Heartbeat {}
        );
        assert_eq!(
            decode_client_message(r#"{"type":"leave","data":{}}"#).unwrap(),
            ClientMessage::Leave {}
        );
    }

    #[test]
    fn test_welcome_uses_camel_case() {
        let text = encode(&ServerMessage::Welcome(WelcomePayload {
            player_id: 3,
            name: "Bob".into(),
            color_index: 2,
        }))
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "welcome", "data": {"playerId": 3, "name": "Bob", "colorIndex": 2}})
        );
    }

    #[test]
    fn test_game_state_wire_shape() {
        let snapshot = StateSnapshot {
            players: vec![PlayerSnapshot {
                id: 1,
                name: "A".into(),
                pos: Vector2::new(10.0, 20.0),
                score: 4,
                color_index: 0,
                last_seq: 9,
            }],
            coins: vec![CoinSnapshot {
                id: 5,
                pos: Vector2::new(1.0, 2.0),
            }],
            clock_remaining: 60.0,
            tick: 42,
            server_time: 1000,
            phase: MatchPhase::Playing,
        };
        let text = encode(&ServerMessage::GameState(snapshot.clone())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "game_state");
        assert_eq!(value["data"]["clockRemaining"], 60.0);
        assert_eq!(value["data"]["players"][0]["pos"]["x"], 10.0);
        assert_eq!(value["data"]["players"][0]["lastSeq"], 9);
        assert_eq!(value["data"]["phase"], "playing");

        match decode_server_message(&text).unwrap() {
            ServerMessage::GameState(decoded) => assert_eq!(decoded, snapshot),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_reported() {
        assert_eq!(
            decode_client_message(r#"{"type":"teleport","data":{}}"#),
            Err(ProtocolError::UnknownType("teleport".into()))
        );
        // A server-only kind is unknown in the client->server direction.
        assert_eq!(
            decode_client_message(r#"{"type":"welcome","data":{}}"#),
            Err(ProtocolError::UnknownType("welcome".into()))
        );
    }

    #[test]
    fn test_missing_type_is_reported() {
        assert_eq!(
            decode_client_message(r#"{"data":{"name":"x"}}"#),
            Err(ProtocolError::MissingType)
        );
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(
            decode_client_message("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_client_message(r#"{"type":5}"#),
            Err(ProtocolError::Malformed(_))
        ));
        // Negative sequence numbers cannot be represented.
        assert!(matches!(
            decode_client_message(r#"{"type":"input","data":{"seq":-1}}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_client_message(r#"{"type":"input","data":{"up":"yes","seq":1}}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_message_kinds_are_known_types() {
        assert!(CLIENT_MESSAGE_TYPES.contains(&ClientMessage::Leave {}.kind()));
        let over = ServerMessage::GameOver(GameOverPayload {
            final_scores: vec![],
            winner_id: None,
            winner_name: None,
        });
        assert!(SERVER_MESSAGE_TYPES.contains(&over.kind()));
    }
}
