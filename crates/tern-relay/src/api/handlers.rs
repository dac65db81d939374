//! HTTP handlers

use std::time::Instant;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use serde_json::json;
use tern_ai::{AgentMetadata, ChatRequest};

use super::AppState;
use super::error::ApiError;
use crate::auth::CurrentUser;
use crate::error::RelayError;
use crate::relay::frame_stream;
use crate::validate::validate_request;

/// `POST /api/chat`: validate, open the upstream run, stream frames as SSE
pub async fn chat(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let Json(request) = payload.map_err(|e| ApiError::invalid_argument(e.body_text()))?;
    let validated = validate_request(request).map_err(RelayError::from)?;

    tracing::debug!(
        user = %user.id(),
        new_conversation = validated.thread_id.is_none(),
        images = validated.message.images.len(),
        "chat request accepted"
    );

    let rx = state.relay.open(validated, started).await?;
    let events = frame_stream(rx).map(|frame| Event::default().json_data(&frame));

    // Proxies must not buffer the stream
    let headers = [("x-accel-buffering", "no")];
    Ok((headers, Sse::new(events).keep_alive(KeepAlive::default())).into_response())
}

/// `GET /api/agent`: cached agent metadata for the UI
pub async fn agent_info(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<AgentMetadata>, ApiError> {
    let meta = state
        .relay
        .metadata()
        .get_or_load()
        .await
        .map_err(RelayError::Metadata)?;
    Ok(Json(meta.as_ref().clone()))
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
