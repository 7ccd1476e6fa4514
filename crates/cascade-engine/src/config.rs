use tracing::warn;

use cascade_core::descriptor::{GenerationParams, ModelDescriptor};

const DEFAULT_MODELS: &str = "gpt-4o-mini,gpt-4o";

/// The ordered list of models a sequence runs through. Loaded once at
/// startup; the sequencer treats it as fixed input.
#[derive(Clone, Debug)]
pub struct ModelLineup {
    pub models: Vec<ModelDescriptor>,
}

impl ModelLineup {
    /// Load the lineup from `CASCADE_MODELS` and the per-model override
    /// variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let list = lookup("CASCADE_MODELS").unwrap_or_else(|| DEFAULT_MODELS.to_string());

        let models = list
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .enumerate()
            .map(|(idx, id)| {
                let backend_model =
                    lookup(&env_key(id, "REF")).unwrap_or_else(|| id.to_string());
                let defaults = GenerationParams::default();
                let params = GenerationParams {
                    temperature: parse_or_default(
                        &lookup(&env_key(id, "TEMPERATURE")),
                        defaults.temperature,
                        id,
                        "temperature",
                    ),
                    max_tokens: parse_or_default(
                        &lookup(&env_key(id, "MAX_TOKENS")),
                        defaults.max_tokens,
                        id,
                        "max_tokens",
                    ),
                };
                ModelDescriptor::new(id, backend_model, idx as u32 + 1).with_params(params)
            })
            .collect();

        Self { models }
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }
}

/// `CASCADE_MODEL_<ID>_<SUFFIX>` with the id uppercased and `-`/`.`
/// mapped to `_`.
fn env_key(model_id: &str, suffix: &str) -> String {
    let normalized: String = model_id
        .to_uppercase()
        .chars()
        .map(|c| if c == '-' || c == '.' { '_' } else { c })
        .collect();
    format!("CASCADE_MODEL_{normalized}_{suffix}")
}

fn parse_or_default<T: std::str::FromStr + Copy>(
    raw: &Option<String>,
    default: T,
    model_id: &str,
    field: &str,
) -> T {
    match raw {
        None => default,
        Some(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(model = %model_id, field, value = %value, "malformed override, using default");
                default
            }
        },
    }
}
