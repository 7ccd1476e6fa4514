use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{error, instrument, warn};

use cascade_core::descriptor::ModelDescriptor;
use cascade_core::events::{ErrorCode, SequenceEvent};
use cascade_core::generator::ResponseGenerator;
use cascade_core::ids::SessionId;
use cascade_core::messages::ChatMessage;
use cascade_core::stream::TokenEvent;
use cascade_store::SessionStore;

use crate::config::ModelLineup;
use crate::error::EngineError;

/// Marks response text that stands in for a failed generation. The
/// client distinguishes soft failures by this prefix alone.
pub const ERROR_PREFIX: &str = "Error:";

/// Drives one user message through every configured model in order,
/// streaming fragments out on the event channel as they arrive.
pub struct Sequencer {
    generator: Arc<dyn ResponseGenerator>,
    store: Arc<SessionStore>,
    event_tx: broadcast::Sender<SequenceEvent>,
    models: Vec<ModelDescriptor>,
}

impl Sequencer {
    pub fn new(
        generator: Arc<dyn ResponseGenerator>,
        store: Arc<SessionStore>,
        event_tx: broadcast::Sender<SequenceEvent>,
        lineup: ModelLineup,
    ) -> Self {
        Self {
            generator,
            store,
            event_tx,
            models: lineup.models,
        }
    }

    fn send_event(&self, event: SequenceEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("no event receivers — event dropped");
        }
    }

    fn send_chunk(
        &self,
        session_id: &SessionId,
        descriptor: &ModelDescriptor,
        message: String,
        is_complete: bool,
    ) {
        self.send_event(SequenceEvent::Chunk {
            session_id: session_id.clone(),
            model_id: descriptor.id.clone(),
            message,
            is_complete,
            order: descriptor.order,
        });
    }

    /// Run the full sequence for one user message. Model steps are
    /// strictly sequential; model k sees the stored replies of models
    /// 1..k-1 in its transcript.
    #[instrument(skip(self, text), fields(session_id = %session_id, models = self.models.len()))]
    pub async fn run(&self, session_id: SessionId, text: String) -> Result<(), EngineError> {
        if !self.store.exists(&session_id) {
            self.send_event(SequenceEvent::Error {
                session_id: session_id.clone(),
                code: ErrorCode::InvalidSession,
                message: format!("unknown session: {session_id}"),
            });
            return Err(EngineError::SessionNotFound(session_id.to_string()));
        }

        self.store
            .append_message(&session_id, ChatMessage::user(text))
            .map_err(|e| self.abort(&session_id, e.into()))?;
        let mut transcript = self
            .store
            .history(&session_id)
            .map_err(|e| self.abort(&session_id, e.into()))?;

        for descriptor in &self.models {
            let final_text = match self.run_model(descriptor, &transcript, &session_id).await {
                Ok(text) => text,
                Err(e) => return Err(self.abort(&session_id, e)),
            };

            let message = ChatMessage::assistant(descriptor.id.clone(), final_text);
            self.store
                .append_message(&session_id, message.clone())
                .map_err(|e| self.abort(&session_id, e.into()))?;
            transcript.push(message);

            self.send_event(SequenceEvent::ModelComplete {
                session_id: session_id.clone(),
                model_id: descriptor.id.clone(),
                order: descriptor.order,
            });
        }

        self.send_event(SequenceEvent::SequenceComplete { session_id });
        Ok(())
    }

    /// Defect exit: log the detail, put a generic `model_error` on the
    /// wire, and hand the error back for propagation.
    fn abort(&self, session_id: &SessionId, e: EngineError) -> EngineError {
        error!(error = %e, "sequence aborted");
        self.send_event(SequenceEvent::Error {
            session_id: session_id.clone(),
            code: ErrorCode::ModelError,
            message: "internal error while generating a response".to_string(),
        });
        e
    }

    /// One model's step. The `Err` arm is reserved for defects; every
    /// expected failure folds into the returned text so the sequence
    /// keeps going.
    #[instrument(skip(self, transcript), fields(session_id = %session_id, model = %descriptor.id, order = descriptor.order))]
    async fn run_model(
        &self,
        descriptor: &ModelDescriptor,
        transcript: &[ChatMessage],
        session_id: &SessionId,
    ) -> Result<String, EngineError> {
        let outcome = self
            .generator
            .stream(&descriptor.backend_model, transcript, &descriptor.params)
            .await;

        let final_text = match outcome {
            Err(e) => {
                warn!(model = %descriptor.id, error = %e, kind = e.error_kind(), "generator call failed");
                let text = format!("{ERROR_PREFIX} {e}");
                self.send_chunk(session_id, descriptor, text.clone(), false);
                text
            }
            Ok(mut stream) => {
                let mut terminal: Option<String> = None;
                while let Some(event) = stream.next().await {
                    match event {
                        TokenEvent::Delta { delta } => {
                            self.send_chunk(session_id, descriptor, delta, false);
                        }
                        TokenEvent::Done { text } => {
                            terminal = Some(text);
                            break;
                        }
                        TokenEvent::Error { error } => {
                            warn!(model = %descriptor.id, error = %error, kind = error.error_kind(), "generation failed mid-stream");
                            let text = format!("{ERROR_PREFIX} {error}");
                            self.send_chunk(session_id, descriptor, text.clone(), false);
                            terminal = Some(text);
                            break;
                        }
                    }
                }

                match terminal {
                    // Whitespace-only output gets the fixed diagnostic;
                    // Error:-prefixed text was already handled above.
                    Some(text) if text.trim().is_empty() => {
                        let diagnostic =
                            format!("Model {} returned an empty response", descriptor.id);
                        self.send_chunk(session_id, descriptor, diagnostic.clone(), false);
                        diagnostic
                    }
                    Some(text) => text,
                    None => {
                        return Err(EngineError::Internal(format!(
                            "generator stream for {} ended without a terminal event",
                            descriptor.id
                        )))
                    }
                }
            }
        };

        // Every model's chunk stream closes with an empty terminal chunk.
        self.send_chunk(session_id, descriptor, String::new(), true);

        Ok(final_text)
    }
}
