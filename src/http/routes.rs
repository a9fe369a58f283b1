//! HTTP routes: health, deck upload, image retrieval.

use std::sync::Arc;

use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::config::Config;
use crate::error::{GameError, GameResult};
use crate::room::manager::RoomRegistry;
use crate::room::state::Image;
use crate::util::id::normalize_code;
use crate::ws::protocol::ServerEvent;
use crate::ws::sessions::Sessions;

const UPLOAD_FIELD: &str = "files";

/// Process-wide state shared by every handler. Created once at startup and
/// dropped with the router at shutdown.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomRegistry>,
    pub sessions: Arc<Sessions>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            rooms: Arc::new(RoomRegistry::new()),
            sessions: Arc::new(Sessions::new()),
            config: Arc::new(config),
        }
    }
}

pub async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub ok: bool,
    pub count: usize,
    pub images: Vec<String>,
}

/// `POST /upload/:room`: replace the room's deck with the `files` parts.
pub async fn upload(
    State(state): State<AppState>,
    Path(room): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> GameResult<Json<UploadResponse>> {
    let code = normalize_code(&room);
    // Checked before reading the body so an unknown room never has side effects.
    if !state.rooms.contains(&code) {
        return Err(GameError::room_not_found());
    }
    let mut multipart = multipart.map_err(|rej| GameError::InvalidInput(rej.body_text()))?;
    let limits = state.config.limits;

    let mut images = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        if images.len() == limits.max_upload_files {
            return Err(GameError::InvalidInput(format!(
                "at most {} images per upload",
                limits.max_upload_files
            )));
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(GameError::InvalidInput(format!("not an image: {content_type:?}")));
        }
        let bytes = field.bytes().await.map_err(multipart_error)?;
        if bytes.len() > limits.max_image_bytes {
            return Err(GameError::TooLarge(format!(
                "image larger than {} bytes",
                limits.max_image_bytes
            )));
        }
        images.push(Image { bytes, content_type });
    }
    if images.is_empty() {
        return Err(GameError::InvalidInput("no files uploaded".into()));
    }

    let count = images.len();
    let urls = state.rooms.with_room_mut(&code, |room| -> GameResult<Vec<String>> {
        room.set_images(images)?;
        let urls = room.image_urls();
        state
            .sessions
            .broadcast(&room.player_ids(), &ServerEvent::ImagesReady { images: urls.clone() });
        Ok(urls)
    })??;
    tracing::info!(room = %code, count, "deck uploaded");
    Ok(Json(UploadResponse { ok: true, count, images: urls }))
}

/// `GET /img/:room/:idx`: raw bytes of one card.
pub async fn image(
    State(state): State<AppState>,
    Path((room, idx)): Path<(String, String)>,
) -> GameResult<Response> {
    let not_found = || GameError::NotFound("Image not found".into());
    let idx: usize = idx.parse().map_err(|_| not_found())?;
    let img = state
        .rooms
        .with_room(&room, |r| r.image(idx).cloned())?
        .ok_or_else(not_found)?;
    let headers = [
        (header::CONTENT_TYPE, img.content_type),
        (header::CACHE_CONTROL, "no-store".to_string()),
    ];
    Ok((headers, img.bytes).into_response())
}

fn multipart_error(err: MultipartError) -> GameError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GameError::TooLarge(err.body_text())
    } else {
        GameError::InvalidInput(err.body_text())
    }
}
