use serde::Deserialize;

use cascade_core::stream::TokenEvent;

/// Sentinel the chat-completions endpoint sends after the final chunk.
const DONE_SENTINEL: &str = "[DONE]";

/// State machine for parsing an OpenAI-style chat-completions SSE stream.
/// Accumulates delta fragments so the terminal event can carry the
/// complete response text.
pub struct DeltaParser {
    accumulated: String,
    finished: bool,
}

impl Default for DeltaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaParser {
    pub fn new() -> Self {
        Self {
            accumulated: String::new(),
            finished: false,
        }
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Parse one `data:` payload and return zero or more TokenEvents.
    pub fn parse_data(&mut self, data: &str) -> Vec<TokenEvent> {
        if self.finished {
            return Vec::new();
        }

        if data.trim() == DONE_SENTINEL {
            self.finished = true;
            return vec![TokenEvent::Done {
                text: std::mem::take(&mut self.accumulated),
            }];
        }

        let chunk: ChunkEvent = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            // Malformed chunks are skipped; the idle timeout catches a
            // stream that stops making progress.
            Err(_) => return Vec::new(),
        };

        let mut events = Vec::new();
        if let Some(choice) = chunk.choices.first() {
            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    self.accumulated.push_str(content);
                    events.push(TokenEvent::Delta {
                        delta: content.clone(),
                    });
                }
            }
        }
        events
    }
}

/// Extract the `data:` payloads from a block of SSE text. Comment lines
/// and other fields are ignored; a multi-line data payload is joined
/// with newlines.
pub fn parse_sse_data(raw: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current = String::new();

    for line in raw.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(data.strip_prefix(' ').unwrap_or(data));
        } else if line.is_empty() && !current.is_empty() {
            payloads.push(std::mem::take(&mut current));
        }
    }

    // Trailing payload without a blank line
    if !current.is_empty() {
        payloads.push(current);
    }

    payloads
}

// --- Deserialization types for chat-completions chunks ---

#[derive(Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sse_data_basic() {
        let raw = "data: {\"a\":1}\n\ndata: {\"b\":2}\n\n";
        let payloads = parse_sse_data(raw);
        assert_eq!(payloads, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[test]
    fn parse_sse_data_ignores_comments_and_trailing() {
        let raw = ": keep-alive\n\ndata: [DONE]";
        let payloads = parse_sse_data(raw);
        assert_eq!(payloads, vec!["[DONE]"]);
    }

    #[test]
    fn delta_accumulation() {
        let mut parser = DeltaParser::new();

        let events = parser.parse_data(
            r#"{"choices":[{"delta":{"role":"assistant","content":"Hel"},"index":0}]}"#,
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TokenEvent::Delta { delta } if delta == "Hel"));

        let events =
            parser.parse_data(r#"{"choices":[{"delta":{"content":"lo"},"index":0}]}"#);
        assert!(matches!(&events[0], TokenEvent::Delta { delta } if delta == "lo"));

        let events = parser.parse_data("[DONE]");
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TokenEvent::Done { text } if text == "Hello"));
        assert!(parser.is_finished());
    }

    #[test]
    fn empty_content_chunks_yield_nothing() {
        let mut parser = DeltaParser::new();
        let events =
            parser.parse_data(r#"{"choices":[{"delta":{"content":""},"index":0}]}"#);
        assert!(events.is_empty());

        // Final chunk carries finish_reason and no content
        let events = parser
            .parse_data(r#"{"choices":[{"delta":{},"finish_reason":"stop","index":0}]}"#);
        assert!(events.is_empty());

        let events = parser.parse_data("[DONE]");
        assert!(matches!(&events[0], TokenEvent::Done { text } if text.is_empty()));
    }

    #[test]
    fn malformed_chunk_is_skipped() {
        let mut parser = DeltaParser::new();
        let events = parser.parse_data("not json at all");
        assert!(events.is_empty());
        assert!(!parser.is_finished());
    }

    #[test]
    fn data_after_done_is_ignored() {
        let mut parser = DeltaParser::new();
        parser.parse_data("[DONE]");
        let events =
            parser.parse_data(r#"{"choices":[{"delta":{"content":"late"},"index":0}]}"#);
        assert!(events.is_empty());
    }
}
