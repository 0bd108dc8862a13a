use async_trait::async_trait;
use bytes::Bytes;
use futures::{ stream, Stream, StreamExt };
use log::{ debug, warn };
use reqwest::{ Client as HttpClient, Response, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;

use super::fragment::Fragment;
use super::sse::{ SseEvent, SseLineBuffer };
use super::{ ChatClient, CompletionRequest, CompletionResponse, FragmentStream, UpstreamMessage };
use crate::errors::UpstreamError;

/// OpenAI-compatible chat-completions client for the Thesys embed API.
#[derive(Clone)]
pub struct ThesysChatClient {
    http: HttpClient,
    base_url: String,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [UpstreamMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<Fragment>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<Fragment>,
}

impl ThesysChatClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<Response, UpstreamError> {
        let body = ChatCompletionBody {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            stream,
        };

        debug!(
            "POST {} (model={}, messages={}, stream={})",
            self.endpoint(),
            request.model,
            request.messages.len(),
            stream
        );

        let resp = self.http
            .post(self.endpoint())
            .bearer_auth(&request.api_key)
            .json(&body)
            .send().await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::from_response(status.as_u16(), &text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatClient for ThesysChatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, UpstreamError> {
        let parsed = self.send(&request, false).await?.json::<ChatCompletionResponse>().await?;

        let response = parsed.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .map(Fragment::into_text)
            .unwrap_or_default();

        Ok(CompletionResponse { response })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, UpstreamError> {
        let resp = self.send(&request, true).await?;
        Ok(fragment_stream(resp.bytes_stream()))
    }
}

struct SseState {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: SseLineBuffer,
    pending: VecDeque<Result<Fragment, UpstreamError>>,
    finished: bool,
}

impl SseState {
    fn absorb(&mut self, events: impl IntoIterator<Item = SseEvent>) {
        for event in events {
            match event {
                SseEvent::Done => {
                    self.finished = true;
                    return;
                }
                SseEvent::Data(data) => {
                    self.pending.extend(parse_stream_data(&data));
                }
            }
        }
    }
}

/// Turns an SSE byte stream into fragments. Dropping the returned stream
/// drops the underlying response, which releases the connection.
pub fn fragment_stream<S>(bytes: S) -> FragmentStream
    where S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static
{
    let state = SseState {
        bytes: Box::pin(bytes),
        buffer: SseLineBuffer::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(
        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    if item.is_err() {
                        state.pending.clear();
                        state.finished = true;
                    }
                    return Some((item, state));
                }

                if state.finished {
                    return None;
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let events = state.buffer.feed(&chunk);
                        state.absorb(events);
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(UpstreamError::from(e)), state));
                    }
                    None => {
                        let tail = state.buffer.flush();
                        state.absorb(tail);
                        state.finished = true;
                    }
                }
            }
        })
    )
}

fn parse_stream_data(data: &str) -> Vec<Result<Fragment, UpstreamError>> {
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            warn!("Skipping unparseable stream event: {} ({})", e, data);
            return Vec::new();
        }
    };

    if let Some(err) = value.get("error") {
        let status = err
            .get("code")
            .or_else(|| err.get("status"))
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok());
        let message = match err {
            Value::String(message) => Some(message.clone()),
            _ => err.get("message").and_then(Value::as_str).map(str::to_string),
        };
        return vec![Err(UpstreamError::new(status, message))];
    }

    match serde_json::from_value::<StreamChunk>(value) {
        Ok(chunk) =>
            chunk.choices
                .into_iter()
                .filter_map(|choice| choice.delta)
                .filter_map(|delta| delta.content)
                .map(Ok)
                .collect(),
        Err(e) => {
            warn!("Skipping unexpected stream event shape: {}", e);
            Vec::new()
        }
    }
}
