//! Error taxonomy shared by the room layer, the realtime dispatcher and the HTTP routes.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    IllegalState(String),
    #[error("only the host may {0}")]
    NotHost(&'static str),
    #[error("Room is full")]
    RoomFull,
    #[error("{0}")]
    TooLarge(String),
}

impl GameError {
    pub fn room_not_found() -> Self {
        GameError::NotFound("Room not found".into())
    }

    /// Stable machine-readable code carried on the wire next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::NotFound(_) => "notFound",
            GameError::InvalidInput(_) => "invalidInput",
            GameError::IllegalState(_) => "illegalState",
            GameError::NotHost(_) => "notHost",
            GameError::RoomFull => "roomFull",
            GameError::TooLarge(_) => "tooLarge",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GameError::NotFound(_) => StatusCode::NOT_FOUND,
            GameError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GameError::IllegalState(_) | GameError::RoomFull => StatusCode::CONFLICT,
            GameError::NotHost(_) => StatusCode::FORBIDDEN,
            GameError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for GameError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({ "ok": false, "error": self.to_string(), "kind": self.kind() });
        (self.status(), Json(body)).into_response()
    }
}

pub type GameResult<T> = Result<T, GameError>;
