//! Two-player "guess the secret card" game server.
//!
//! Players meet in a room identified by a short code, the host uploads a deck
//! of card images, each player is dealt a hidden secret card, and players try
//! to name the opponent's card. Room state lives in memory only.

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod http;
pub mod room;
pub mod telemetry;
pub mod util;
pub mod ws;

pub use crate::config::Config;
pub use crate::error::GameError;
pub use crate::http::routes::AppState;

/// Build the full application router over `state`.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.limits.upload_body_limit();
    let static_dir = state.config.static_dir.clone();

    Router::new()
        .route("/healthz", get(http::routes::healthz))
        .route("/ws", get(ws::connection::ws_handler))
        .route(
            "/upload/:room",
            post(http::routes::upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/img/:room/:idx", get(http::routes::image))
        // Browser client
        .fallback_service(ServeDir::new(static_dir))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
