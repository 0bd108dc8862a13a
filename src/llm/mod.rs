pub mod chat;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;

pub const DEFAULT_BASE_URL: &str = "https://api.thesys.dev/v1/embed";
pub const DEFAULT_MODEL: &str = "c1/anthropic/claude-sonnet-4/v-20250617";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// How `POST /api/chat` answers: one JSON payload, or a live byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    Stream,
    Complete,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseRelayModeError {
    message: String,
}

impl fmt::Display for ParseRelayModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseRelayModeError {}

impl FromStr for RelayMode {
    type Err = ParseRelayModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stream" | "streaming" => Ok(RelayMode::Stream),
            "complete" | "json" => Ok(RelayMode::Complete),
            _ =>
                Err(ParseRelayModeError {
                    message: format!("Invalid relay mode: '{}'", s),
                }),
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMode::Stream => write!(f, "stream"),
            RelayMode::Complete => write!(f, "complete"),
        }
    }
}

/// Everything needed to reach the generation service. The credential is
/// optional here; requests fail with `Misconfigured` until it is set.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub mode: RelayMode,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            mode: RelayMode::Stream,
        }
    }
}

impl UpstreamConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into()).filter(|k: &String| !k.trim().is_empty());
        self
    }

    /// The credential, if one is configured and non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}
