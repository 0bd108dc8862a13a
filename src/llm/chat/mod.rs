pub mod fragment;
pub mod sse;
pub mod thesys;

use async_trait::async_trait;
use futures::{ Future, Stream };
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::errors::UpstreamError;
use crate::models::chat::Turn;
use self::fragment::Fragment;

pub use self::thesys::ThesysChatClient;

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, UpstreamError>> + Send>>;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UpstreamMessage {
    pub role: String,
    pub content: String,
}

impl UpstreamMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
}

impl From<&Turn> for UpstreamMessage {
    fn from(turn: &Turn) -> Self {
        Self { role: turn.role.as_str().to_string(), content: turn.content.clone() }
    }
}

/// One call's worth of input for the generation service. Only constructible
/// once a credential is in hand.
#[derive(Clone)]
pub struct CompletionRequest {
    pub api_key: String,
    pub model: String,
    pub messages: Vec<UpstreamMessage>,
    pub temperature: f32,
}

impl fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("messages", &self.messages)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, UpstreamError>;

    /// Opens an incremental completion. Failures to connect or a non-success
    /// status surface here; later failures arrive as stream items.
    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, UpstreamError>;
}

/// Runs `response_fn` on its own task, handing it the sending half of a
/// bounded channel. The producer suspends while the channel is full.
pub fn create_streaming_response<T, F, Fut>(
    capacity: usize,
    response_fn: F
) -> ReceiverStream<T>
    where
        T: Send + 'static,
        F: FnOnce(mpsc::Sender<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(capacity);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    ReceiverStream::new(rx)
}
