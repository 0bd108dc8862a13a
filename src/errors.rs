use axum::{ http::StatusCode, response::{ IntoResponse, Response }, Json };
use log::{ error, warn };
use serde_json::{ json, Value };
use thiserror::Error;

pub const DEFAULT_UPSTREAM_MESSAGE: &str = "Failed to fetch Thesys response.";
pub const INVALID_JSON_BODY: &str = "Invalid JSON body.";
pub const MESSAGES_REQUIRED: &str = "messages array required.";
pub const API_KEY_VAR: &str = "THESYS_API_KEY";

/// A failed call to the generation service, with whatever status and
/// message it reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.message())]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub message: Option<String>,
}

impl UpstreamError {
    pub fn new(status: Option<u16>, message: Option<String>) -> Self {
        let message = message.filter(|m| !m.trim().is_empty());
        Self { status, message }
    }

    /// Builds an error from a non-success upstream response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        Self::new(Some(status), extract_error_message(body))
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or(DEFAULT_UPSTREAM_MESSAGE)
    }

    /// Upstream status when it is a usable HTTP error status, 502 otherwise.
    pub fn status_code(&self) -> StatusCode {
        self.status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY)
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(
            err.status().map(|s| s.as_u16()),
            Some(err.to_string())
        )
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let candidate = match value.get("error") {
        Some(Value::String(message)) => Some(message.as_str()),
        Some(err) => err.get("message").and_then(Value::as_str),
        None => value.get("message").and_then(Value::as_str),
    };
    candidate.map(str::to_string)
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{key} is not configured.")] Misconfigured {
        key: &'static str,
    },
    #[error("{0}")] BadRequest(&'static str),
    #[error("Request body exceeds {limit} bytes.")] PayloadTooLarge {
        limit: usize,
    },
    #[error(transparent)] Upstream(#[from] UpstreamError),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Misconfigured { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Upstream(err) => err.status_code(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            RelayError::Upstream(err) => {
                error!("Thesys API error: {} {}", status.as_u16(), err.message());
            }
            RelayError::Misconfigured { key } => {
                error!("Rejecting request: {} is not configured", key);
            }
            RelayError::PayloadTooLarge { limit } => {
                warn!("Rejecting request body over {} bytes", limit);
            }
            RelayError::BadRequest(_) => {}
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
