use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Error codes carried by wire `error` events.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The inbound message referenced an unknown session; the sequence
    /// never started.
    InvalidSession,
    /// An unrecovered defect aborted a running sequence.
    ModelError,
    /// The inbound frame could not be parsed (transport-level only).
    InvalidRequest,
}

/// Events emitted during a sequence run, delivered to the clients bound
/// to the session that originated the message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SequenceEvent {
    /// One incremental output fragment from a model. A terminal chunk
    /// with empty text and `is_complete: true` closes each model's
    /// stream; no further fragments for that model will arrive.
    #[serde(rename = "receive_message", rename_all = "camelCase")]
    Chunk {
        session_id: SessionId,
        model_id: String,
        message: String,
        is_complete: bool,
        order: u32,
    },

    /// A model finished and its assistant message is in the transcript.
    #[serde(rename = "model_complete", rename_all = "camelCase")]
    ModelComplete {
        session_id: SessionId,
        model_id: String,
        order: u32,
    },

    /// Every configured model has answered.
    #[serde(rename = "all_responses_complete", rename_all = "camelCase")]
    SequenceComplete { session_id: SessionId },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        session_id: SessionId,
        code: ErrorCode,
        message: String,
    },
}

impl SequenceEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Chunk { session_id, .. }
            | Self::ModelComplete { session_id, .. }
            | Self::SequenceComplete { session_id }
            | Self::Error { session_id, .. } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "receive_message",
            Self::ModelComplete { .. } => "model_complete",
            Self::SequenceComplete { .. } => "all_responses_complete",
            Self::Error { .. } => "error",
        }
    }
}
