pub mod stream;

use log::info;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::prompt::build_system_message;
use crate::errors::{ RelayError, API_KEY_VAR };
use crate::llm::{ RelayMode, UpstreamConfig };
use crate::llm::chat::{ ChatClient, CompletionRequest, UpstreamMessage };
use crate::models::chat::ConversationRequest;

pub use self::stream::{ ArtifactStream, CHANNEL_CAPACITY, PhaseTracker, StreamAborted, StreamPhase };

/// A validated conversation, ready to forward.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub id: Uuid,
    pub completion: CompletionRequest,
}

/// Forwards conversations to the generation service. Holds no per-request
/// state; every call stands alone.
#[derive(Clone)]
pub struct ArtifactRelay {
    config: Arc<UpstreamConfig>,
    client: Arc<dyn ChatClient>,
}

impl ArtifactRelay {
    pub fn new(config: UpstreamConfig, client: Arc<dyn ChatClient>) -> Self {
        Self { config: Arc::new(config), client }
    }

    pub fn mode(&self) -> RelayMode {
        self.config.mode
    }

    /// Credential first, then the body, then the turns. Nothing here touches
    /// the network.
    pub fn prepare(&self, body: &[u8]) -> Result<PreparedRequest, RelayError> {
        let api_key = self.config
            .credential()
            .ok_or(RelayError::Misconfigured { key: API_KEY_VAR })?;
        let conversation = ConversationRequest::from_json_slice(body)?;

        let id = Uuid::new_v4();
        info!(
            "Relay request {}: {} turn(s), intent={}",
            id,
            conversation.turns.len(),
            conversation.intent.as_deref().unwrap_or("none")
        );

        Ok(PreparedRequest {
            id,
            completion: self.build_completion(api_key, &conversation),
        })
    }

    pub fn build_completion(
        &self,
        api_key: &str,
        conversation: &ConversationRequest
    ) -> CompletionRequest {
        let mut messages = Vec::with_capacity(conversation.turns.len() + 1);
        messages.push(UpstreamMessage::system(build_system_message(conversation.intent.as_deref())));
        messages.extend(conversation.turns.iter().map(UpstreamMessage::from));

        CompletionRequest {
            api_key: api_key.to_string(),
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
        }
    }

    /// Waits for the whole completion and returns it trimmed.
    pub async fn complete(&self, request: PreparedRequest) -> Result<String, RelayError> {
        let completion = self.client.complete(request.completion).await?;
        let artifact = completion.response.trim().to_string();
        info!("Relay request {} completed ({} bytes)", request.id, artifact.len());
        Ok(artifact)
    }

    pub async fn stream(&self, request: PreparedRequest) -> Result<ArtifactStream, RelayError> {
        stream::open(self.client.as_ref(), request).await
    }
}
