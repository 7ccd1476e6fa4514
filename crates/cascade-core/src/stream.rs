use std::pin::Pin;

use futures::Stream;

use crate::errors::GatewayError;

/// Events yielded by a generator while streaming one completion.
/// Ordering contract:
///
/// Delta* → (Done | Error)
///
/// Exactly one terminal event closes the stream. A stream that ends
/// without one violates the generator contract and is treated as a
/// defect by the sequencer, not an operational error.
#[derive(Clone, Debug)]
pub enum TokenEvent {
    /// One incremental text fragment, in arrival order.
    Delta { delta: String },
    /// The full concatenated completion text.
    Done { text: String },
    Error { error: GatewayError },
}

impl TokenEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// A lazy, finite, non-restartable stream of token events.
pub type TokenStream = Pin<Box<dyn Stream<Item = TokenEvent> + Send>>;
