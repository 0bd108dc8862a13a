use serde_json::Value;

use crate::errors::{ RelayError, INVALID_JSON_BODY, MESSAGES_REQUIRED };

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Anything other than `assistant` is treated as the user speaking, so a
    /// caller cannot smuggle in a `system` turn.
    pub fn from_raw(raw: &str) -> Self {
        if raw == "assistant" { Role::Assistant } else { Role::User }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    /// Accepts only objects whose `role` and `content` are both strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        let role = value.get("role")?.as_str()?;
        let content = value.get("content")?.as_str()?;
        Some(Self::new(Role::from_raw(role), content.trim()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationRequest {
    pub turns: Vec<Turn>,
    pub intent: Option<String>,
}

impl ConversationRequest {
    pub fn from_json_slice(body: &[u8]) -> Result<Self, RelayError> {
        let value: Value = serde_json
            ::from_slice(body)
            .map_err(|_| RelayError::BadRequest(INVALID_JSON_BODY))?;
        Self::from_value(&value)
    }

    /// Non-object bodies carry no `messages` and are rejected the same way as
    /// an empty conversation.
    pub fn from_value(value: &Value) -> Result<Self, RelayError> {
        let turns = normalize_turns(value.get("messages"));
        if turns.is_empty() {
            return Err(RelayError::BadRequest(MESSAGES_REQUIRED));
        }

        let intent = value
            .get("intent")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .map(str::to_string);

        Ok(Self { turns, intent })
    }
}

pub fn normalize_turns(messages: Option<&Value>) -> Vec<Turn> {
    messages
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(Turn::from_value).collect())
        .unwrap_or_default()
}
