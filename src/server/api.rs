use crate::errors::{ RelayError, INVALID_JSON_BODY };
use crate::llm::RelayMode;
use crate::relay::ArtifactRelay;
use std::sync::Arc;
use axum::{
    body::{ Body, Bytes },
    extract::{ rejection::BytesRejection, DefaultBodyLimit, State },
    http::{ header::{ CACHE_CONTROL, CONTENT_TYPE }, StatusCode },
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{ Any, CorsLayer };

#[derive(Serialize, Debug)]
pub struct ArtifactResponse {
    pub artifact: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Each turn resends the whole conversation, generated artifacts included,
/// so this sits well above axum's 2 MiB default.
pub const DEFAULT_BODY_LIMIT: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    relay: Arc<ArtifactRelay>,
    body_limit: usize,
}

pub fn router(relay: Arc<ArtifactRelay>) -> Router {
    router_with_body_limit(relay, DEFAULT_BODY_LIMIT)
}

pub fn router_with_body_limit(relay: Arc<ArtifactRelay>, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", post(stream_handler))
        .route("/api/chat/complete", post(complete_handler))
        .route("/health", get(health_handler))
        .layer(ServiceBuilder::new().layer(cors).layer(DefaultBodyLimit::max(body_limit)))
        .with_state(AppState { relay, body_limit })
}

type BodyResult = Result<Bytes, BytesRejection>;

async fn chat_handler(State(state): State<AppState>, body: BodyResult) -> Response {
    let mode = state.relay.mode();
    relay_response(&state, mode, body).await
}

async fn stream_handler(State(state): State<AppState>, body: BodyResult) -> Response {
    relay_response(&state, RelayMode::Stream, body).await
}

async fn complete_handler(State(state): State<AppState>, body: BodyResult) -> Response {
    relay_response(&state, RelayMode::Complete, body).await
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn relay_response(state: &AppState, mode: RelayMode, body: BodyResult) -> Response {
    let body = match read_body(body, state.body_limit) {
        Ok(body) => body,
        Err(e) => {
            return e.into_response();
        }
    };
    let relay = state.relay.as_ref();
    let result = match mode {
        RelayMode::Stream => stream_artifact(relay, &body).await,
        RelayMode::Complete => complete_artifact(relay, &body).await,
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

/// Keeps body rejections inside the relay's JSON error shape.
fn read_body(body: BodyResult, limit: usize) -> Result<Bytes, RelayError> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            RelayError::PayloadTooLarge { limit }
        } else {
            RelayError::BadRequest(INVALID_JSON_BODY)
        }
    })
}

async fn complete_artifact(relay: &ArtifactRelay, body: &[u8]) -> Result<Response, RelayError> {
    let request = relay.prepare(body)?;
    let artifact = relay.complete(request).await?;
    Ok((StatusCode::OK, Json(ArtifactResponse { artifact })).into_response())
}

async fn stream_artifact(relay: &ArtifactRelay, body: &[u8]) -> Result<Response, RelayError> {
    let request = relay.prepare(body)?;
    let stream = relay.stream(request).await?;
    Ok(
        (
            StatusCode::OK,
            [
                (CONTENT_TYPE, "text/plain; charset=utf-8"),
                (CACHE_CONTROL, "no-cache, no-transform"),
            ],
            Body::from_stream(stream),
        ).into_response()
    )
}
