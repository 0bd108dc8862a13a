use bytes::Bytes;
use futures::StreamExt;
use log::{ debug, error, info, warn };
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::PreparedRequest;
use crate::errors::{ RelayError, UpstreamError };
use crate::llm::chat::{ create_streaming_response, ChatClient, FragmentStream };

pub const CHANNEL_CAPACITY: usize = 32;

pub type ArtifactStream = ReceiverStream<Result<Bytes, StreamAborted>>;

/// Yielded on the body stream when the upstream fails after bytes went out.
/// The HTTP stack aborts the connection on it.
#[derive(Debug, Error)]
#[error("upstream stream aborted: {0}")]
pub struct StreamAborted(pub UpstreamError);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    AwaitingUpstream,
    Streaming,
    Closed,
    Aborted,
}

impl StreamPhase {
    fn can_become(self, next: StreamPhase) -> bool {
        use StreamPhase::*;
        matches!(
            (self, next),
            (Idle, AwaitingUpstream) |
                (AwaitingUpstream, Streaming) |
                (AwaitingUpstream, Aborted) |
                (Streaming, Closed) |
                (Streaming, Aborted)
        )
    }

    #[cfg(test)]
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamPhase::Closed | StreamPhase::Aborted)
    }
}

/// Lifecycle of one streamed relay. Each request gets a fresh tracker.
#[derive(Debug)]
pub struct PhaseTracker {
    id: Uuid,
    phase: StreamPhase,
}

impl PhaseTracker {
    pub fn new(id: Uuid) -> Self {
        Self { id, phase: StreamPhase::Idle }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    fn advance(&mut self, next: StreamPhase) {
        if self.phase == next {
            return;
        }
        if self.phase.can_become(next) {
            debug!("Relay request {}: {:?} -> {:?}", self.id, self.phase, next);
            self.phase = next;
        } else {
            warn!("Relay request {}: ignoring {:?} -> {:?}", self.id, self.phase, next);
        }
    }

    pub fn request_accepted(&mut self) {
        self.advance(StreamPhase::AwaitingUpstream);
    }

    pub fn fragment_received(&mut self) {
        self.advance(StreamPhase::Streaming);
    }

    /// Upstream ran dry. With no fragments at all this still passes through
    /// `Streaming` so an empty body closes cleanly.
    pub fn exhausted(&mut self) {
        self.advance(StreamPhase::Streaming);
        self.advance(StreamPhase::Closed);
    }

    pub fn abort(&mut self) {
        self.advance(StreamPhase::Aborted);
    }
}

/// Opens the upstream and holds the response back until there is either a
/// first fragment, a clean end, or a failure that can still become a JSON
/// error.
pub async fn open(
    client: &dyn ChatClient,
    request: PreparedRequest
) -> Result<ArtifactStream, RelayError> {
    let mut phase = PhaseTracker::new(request.id);
    phase.request_accepted();

    let mut upstream = match client.stream(request.completion).await {
        Ok(upstream) => upstream,
        Err(e) => {
            phase.abort();
            return Err(e.into());
        }
    };

    let first = loop {
        match upstream.next().await {
            Some(Ok(fragment)) => {
                let text = fragment.into_text();
                if !text.is_empty() {
                    break Some(text);
                }
            }
            Some(Err(e)) => {
                phase.abort();
                return Err(e.into());
            }
            None => {
                break None;
            }
        }
    };

    Ok(forward(phase, first, upstream))
}

fn forward(mut phase: PhaseTracker, first: Option<String>, mut upstream: FragmentStream) -> ArtifactStream {
    create_streaming_response(CHANNEL_CAPACITY, move |tx| async move {
        let id = phase.id;
        let mut forwarded = 0usize;

        if let Some(text) = first {
            phase.fragment_received();
            forwarded += text.len();
            if tx.send(Ok(Bytes::from(text))).await.is_err() {
                warn!("Relay request {}: client disconnected", id);
                phase.abort();
                return;
            }
        }

        loop {
            let item = tokio::select! {
                _ = tx.closed() => {
                    warn!("Relay request {}: client disconnected after {} bytes", id, forwarded);
                    phase.abort();
                    return;
                }
                item = upstream.next() => item,
            };

            match item {
                Some(Ok(fragment)) => {
                    let text = fragment.into_text();
                    if text.is_empty() {
                        continue;
                    }
                    phase.fragment_received();
                    forwarded += text.len();
                    if tx.send(Ok(Bytes::from(text))).await.is_err() {
                        warn!("Relay request {}: client disconnected after {} bytes", id, forwarded);
                        phase.abort();
                        return;
                    }
                }
                Some(Err(e)) => {
                    error!(
                        "Thesys API error mid-stream for {}: {} {}",
                        id,
                        e.status_code().as_u16(),
                        e.message()
                    );
                    phase.abort();
                    let _ = tx.send(Err(StreamAborted(e))).await;
                    return;
                }
                None => {
                    phase.exhausted();
                    info!("Relay request {} streamed {} bytes", id, forwarded);
                    return;
                }
            }
        }
    })
}
