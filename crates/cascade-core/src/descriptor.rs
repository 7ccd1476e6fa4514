use serde::{Deserialize, Serialize};

/// Generation parameters passed through to the backend, fixed per model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Static configuration for one model in the sequential pipeline.
/// The lineup is loaded once at startup and never changes afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Stable identifier shown to clients in events and transcripts.
    pub id: String,
    /// Backend-specific model reference sent on the wire.
    pub backend_model: String,
    pub params: GenerationParams,
    /// Fixed 1-based position in the sequence.
    pub order: u32,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, backend_model: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            backend_model: backend_model.into(),
            params: GenerationParams::default(),
            order,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_defaults() {
        let params = GenerationParams::default();
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_tokens, 1024);
    }

    #[test]
    fn descriptor_builder() {
        let desc = ModelDescriptor::new("alpha", "gpt-4o-mini", 1).with_params(GenerationParams {
            temperature: 0.2,
            max_tokens: 256,
        });
        assert_eq!(desc.id, "alpha");
        assert_eq!(desc.backend_model, "gpt-4o-mini");
        assert_eq!(desc.order, 1);
        assert_eq!(desc.params.max_tokens, 256);
    }

    #[test]
    fn descriptor_serde_roundtrip() {
        let desc = ModelDescriptor::new("beta", "claude-sonnet", 2);
        let json = serde_json::to_string(&desc).unwrap();
        let parsed: ModelDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, "beta");
        assert_eq!(parsed.order, 2);
    }
}
