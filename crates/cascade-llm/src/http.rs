use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::instrument;

use cascade_core::descriptor::GenerationParams;
use cascade_core::errors::GatewayError;
use cascade_core::generator::ResponseGenerator;
use cascade_core::messages::{ChatMessage, Role};
use cascade_core::stream::{TokenEvent, TokenStream};

use crate::sse::{self, DeltaParser};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Streams completions from an OpenAI-compatible chat-completions
/// endpoint.
pub struct ChatCompletionsGenerator {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl ChatCompletionsGenerator {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn build_body(
        model: &str,
        transcript: &[ChatMessage],
        params: &GenerationParams,
    ) -> RequestBody {
        let messages = transcript
            .iter()
            .map(|msg| WireMessage {
                role: match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: msg.content.clone(),
            })
            .collect();

        RequestBody {
            model: model.to_string(),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: true,
        }
    }
}

#[async_trait]
impl ResponseGenerator for ChatCompletionsGenerator {
    fn name(&self) -> &str {
        "chat_completions"
    }

    #[instrument(skip(self, transcript, params), fields(model = %model, transcript_len = transcript.len()))]
    async fn stream(
        &self,
        model: &str,
        transcript: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<TokenStream, GatewayError> {
        let body = Self::build_body(model, transcript, params);

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        let byte_stream = resp.bytes_stream();
        Ok(Box::pin(SseStream::new(byte_stream)))
    }
}

#[derive(Serialize)]
struct RequestBody {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

/// Wraps a byte stream from reqwest and yields TokenEvents.
/// Includes an idle timeout — if no data arrives within `idle_duration`,
/// emits an error event.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: DeltaParser,
    buffer: String,
    pending: Vec<TokenEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    terminated: bool,
}

impl SseStream {
    fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self::with_idle_timeout(byte_stream, SSE_IDLE_TIMEOUT)
    }

    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: DeltaParser::new(),
            buffer: String::new(),
            pending: Vec::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            terminated: false,
        }
    }

    fn drain_buffer_events(&mut self, chunk: &str) {
        for payload in sse::parse_sse_data(chunk) {
            let events = self.parser.parse_data(&payload);
            self.pending.extend(events);
        }
    }
}

impl Stream for SseStream {
    type Item = TokenEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        // Return pending events first
        if !self.pending.is_empty() {
            return std::task::Poll::Ready(Some(self.pending.remove(0)));
        }
        if self.terminated {
            return std::task::Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                std::task::Poll::Ready(Some(Ok(bytes))) => {
                    // Data received — reset idle timer
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    self.buffer.push_str(&text);

                    // Process complete SSE events from the buffer
                    while let Some(pos) = self.buffer.find("\n\n") {
                        let chunk = self.buffer[..pos + 2].to_string();
                        self.buffer = self.buffer[pos + 2..].to_string();
                        self.drain_buffer_events(&chunk);
                    }

                    if !self.pending.is_empty() {
                        return std::task::Poll::Ready(Some(self.pending.remove(0)));
                    }
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    self.terminated = true;
                    return std::task::Poll::Ready(Some(TokenEvent::Error {
                        error: GatewayError::StreamInterrupted(e.to_string()),
                    }));
                }
                std::task::Poll::Ready(None) => {
                    self.terminated = true;
                    // Stream ended — process remaining buffer
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        self.drain_buffer_events(&remaining);
                    }
                    if !self.pending.is_empty() {
                        return std::task::Poll::Ready(Some(self.pending.remove(0)));
                    }
                    // Connection closed before [DONE]
                    if !self.parser.is_finished() {
                        return std::task::Poll::Ready(Some(TokenEvent::Error {
                            error: GatewayError::StreamInterrupted(
                                "stream ended before [DONE]".to_string(),
                            ),
                        }));
                    }
                    return std::task::Poll::Ready(None);
                }
                std::task::Poll::Pending => {
                    // No data available — check idle timeout
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.terminated = true;
                        return std::task::Poll::Ready(Some(TokenEvent::Error {
                            error: GatewayError::StreamInterrupted(format!(
                                "idle timeout after {}s",
                                self.idle_duration.as_secs()
                            )),
                        }));
                    }
                    return std::task::Poll::Pending;
                }
            }
        }
    }
}
