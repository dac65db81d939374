//! HTTP surface of the relay

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::auth::AuthState;
use crate::relay::Relay;

pub use error::ApiError;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub auth: AuthState,
}

impl AppState {
    pub fn new(relay: Relay, auth: AuthState) -> Self {
        Self {
            relay: Arc::new(relay),
            auth,
        }
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Build the relay router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/api/agent", get(handlers::agent_info))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
