//! Realtime wire format: named events with a JSON payload and an optional ack id.
//!
//! Client frame: `{"event":"joinRoom","data":{"roomCode":"XJ7K2"},"ack":1}`
//! Server frame: `{"event":"roomState","data":{...}}` (`data` omitted for unit events)

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::GameError;
use crate::room::state::{PublicRoom, Role};
use crate::util::id::ConnId;

#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default)]
    pub ack: Option<u64>,
}

fn empty_object() -> Value {
    json!({})
}

impl ClientFrame {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Interpret the frame as a typed command. Fails on unknown event names
    /// and payloads of the wrong shape.
    pub fn command(&self) -> serde_json::Result<ClientCommand> {
        let data = if self.data.is_null() { empty_object() } else { self.data.clone() };
        serde_json::from_value(json!({ "event": self.event, "data": data }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    CreateRoom(CreateRoom),
    JoinRoom(JoinRoom),
    StartGame(RoomRef),
    SendQuestion(SendQuestion),
    MakeGuess(MakeGuess),
    RestartGame(RoomRef),
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::CreateRoom(_) => "createRoom",
            ClientCommand::JoinRoom(_) => "joinRoom",
            ClientCommand::StartGame(_) => "startGame",
            ClientCommand::SendQuestion(_) => "sendQuestion",
            ClientCommand::MakeGuess(_) => "makeGuess",
            ClientCommand::RestartGame(_) => "restartGame",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    #[serde(default)]
    pub room_code: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendQuestion {
    pub text: String,
    pub room_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MakeGuess {
    pub room_code: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    YouAreHost,
    RoomState(PublicRoom),
    ImagesReady { images: Vec<String> },
    GameStarted,
    #[serde(rename_all = "camelCase")]
    SecretAssigned { secret_index: usize },
    #[serde(rename_all = "camelCase")]
    GuessResult { guesser: String, guesser_id: ConnId, correct: bool, index: usize },
    GameEnded { winner: ConnId },
    RestartReady,
    #[serde(rename_all = "camelCase")]
    ReceiveQuestion { text: String, sender: String, sender_id: ConnId },
    Ack(Ack),
    /// Failure report for a command sent without an ack id.
    Error { event: String, kind: String, error: String },
}

impl ServerEvent {
    pub fn error(event: &str, err: &GameError) -> Self {
        ServerEvent::Error { event: event.to_string(), kind: err.kind().to_string(), error: err.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Ack {
    pub fn ok(id: u64) -> Self {
        Self { id, ok: true, room_code: None, role: None, error: None, kind: None }
    }

    pub fn joined(id: u64, room_code: String, role: Role) -> Self {
        Self { room_code: Some(room_code), role: Some(role), ..Self::ok(id) }
    }

    pub fn failed(id: u64, err: &GameError) -> Self {
        Self {
            ok: false,
            error: Some(err.to_string()),
            kind: Some(err.kind().to_string()),
            ..Self::ok(id)
        }
    }
}
