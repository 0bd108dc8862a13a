//! Incremental content as the generation service delivers it.
//!
//! A delta's `content` shows up in three shapes: a bare string, a list of
//! parts, or a single object with a `text` field. All three normalize to the
//! same plain text.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Fragment {
    Text(String),
    Parts(Vec<FragmentPart>),
    Object(TextPart),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FragmentPart {
    Text(String),
    Object(TextPart),
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TextPart {
    #[serde(default)]
    pub text: Option<String>,
}

impl Fragment {
    pub fn text(content: impl Into<String>) -> Self {
        Fragment::Text(content.into())
    }

    pub fn into_text(self) -> String {
        match self {
            Fragment::Text(text) => text,
            Fragment::Parts(parts) => normalize_parts(parts),
            Fragment::Object(part) => part.into_text(),
        }
    }
}

impl FragmentPart {
    fn into_text(self) -> String {
        match self {
            FragmentPart::Text(text) => text,
            FragmentPart::Object(part) => part.into_text(),
            FragmentPart::Other(_) => String::new(),
        }
    }
}

impl TextPart {
    fn into_text(self) -> String {
        self.text.unwrap_or_default()
    }
}

fn normalize_parts(parts: Vec<FragmentPart>) -> String {
    parts.into_iter().map(FragmentPart::into_text).collect()
}

impl From<&str> for Fragment {
    fn from(text: &str) -> Self {
        Fragment::Text(text.to_string())
    }
}
