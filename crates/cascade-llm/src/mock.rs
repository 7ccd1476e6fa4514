use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use cascade_core::descriptor::GenerationParams;
use cascade_core::errors::GatewayError;
use cascade_core::generator::ResponseGenerator;
use cascade_core::messages::ChatMessage;
use cascade_core::stream::{TokenEvent, TokenStream};

/// Pre-programmed replies for deterministic testing without API calls.
pub enum MockReply {
    /// Yield a fixed sequence of TokenEvents.
    Stream(Vec<TokenEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner reply.
    Delay(Duration, Box<MockReply>),
    /// Echo the most recent assistant message in the transcript,
    /// prefixed. Yields the prefix and the echoed text as separate
    /// deltas. Useful for asserting that later models see earlier
    /// models' output.
    EchoLastAssistant { prefix: String },
}

impl MockReply {
    /// Convenience: a single delta followed by the terminal event.
    pub fn stream_text(text: &str) -> Self {
        let text = text.to_string();
        Self::Stream(vec![
            TokenEvent::Delta {
                delta: text.clone(),
            },
            TokenEvent::Done { text },
        ])
    }

    /// Convenience: several deltas followed by the terminal event.
    pub fn stream_chunks(chunks: &[&str]) -> Self {
        let mut events: Vec<TokenEvent> = chunks
            .iter()
            .map(|c| TokenEvent::Delta {
                delta: (*c).to_string(),
            })
            .collect();
        events.push(TokenEvent::Done {
            text: chunks.concat(),
        });
        Self::Stream(events)
    }

    /// Convenience: a response with no text at all.
    pub fn empty() -> Self {
        Self::Stream(vec![TokenEvent::Done {
            text: String::new(),
        }])
    }

    /// Convenience: a stream that ends with an in-stream error event.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![TokenEvent::Error { error }])
    }

    /// Convenience: deltas that stop without any terminal event. Models
    /// a generator defect.
    pub fn truncated(text: &str) -> Self {
        Self::Stream(vec![TokenEvent::Delta {
            delta: text.to_string(),
        }])
    }

    /// Convenience: wrap any reply with a delay.
    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock generator that pops pre-programmed replies in order.
pub struct MockGenerator {
    replies: Mutex<VecDeque<MockReply>>,
    call_count: AtomicUsize,
}

impl MockGenerator {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResponseGenerator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        _model: &str,
        transcript: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<TokenStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);

        let reply = self.replies.lock().pop_front().ok_or_else(|| {
            GatewayError::InvalidRequest(format!("MockGenerator: no reply configured for call {idx}"))
        })?;

        resolve_reply(reply, transcript).await
    }
}

/// Resolve a MockReply, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_reply(
    reply: MockReply,
    transcript: &[ChatMessage],
) -> Result<TokenStream, GatewayError> {
    let mut current = reply;
    loop {
        match current {
            MockReply::Stream(events) => {
                return Ok(Box::pin(stream::iter(events)));
            }
            MockReply::Error(e) => return Err(e),
            MockReply::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
            MockReply::EchoLastAssistant { prefix } => {
                let echoed = transcript
                    .iter()
                    .rev()
                    .find(|m| m.is_assistant())
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                let events = vec![
                    TokenEvent::Delta {
                        delta: prefix.clone(),
                    },
                    TokenEvent::Delta {
                        delta: echoed.clone(),
                    },
                    TokenEvent::Done {
                        text: format!("{prefix}{echoed}"),
                    },
                ];
                return Ok(Box::pin(stream::iter(events)));
            }
        }
    }
}
