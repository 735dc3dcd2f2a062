//! Filmhub room hub.
//!
//! Accepts WebSocket connections per room, relays chat, playback sync, call
//! signaling and moderation events between the room's members, and mirrors
//! membership and chat into the storage collaborators.

pub mod api_ws;
pub mod cleanup;
pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod emit;
pub mod frames;
pub mod identity;
pub mod registry;
pub mod session;

use axum::{routing::get, Extension, Json, Router};
use collaborators::Collaborators;
use config::HubConfig;
use filmhub_db::DbPool;
use identity::{IdentityResolver, TokenIdentityResolver};
use registry::ConnectionRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections per room.
    pub registry: ConnectionRegistry,
    /// Storage collaborators.
    pub collaborators: Collaborators,
    /// Resolves the handshake into an identity.
    pub identities: Arc<dyn IdentityResolver>,
    pub hub: Arc<HubConfig>,
}

impl AppState {
    /// State backed by a migrated SQLite pool with token-based identities.
    pub fn with_sqlite(pool: DbPool, token_secret: [u8; 32], hub: HubConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            collaborators: Collaborators::sqlite(pool.clone()),
            identities: Arc::new(TokenIdentityResolver::new(token_secret, pool)),
            hub: Arc::new(hub),
        }
    }
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": state.registry.room_count().await,
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/player/{room_name}", get(api_ws::ws_handler))
        .route("/ws/player/{room_name}/", get(api_ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
