use turbo_core::LlmConfig;

/// Name of the request field carrying the completion token limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenParam {
    MaxTokens,
    MaxCompletionTokens,
}

impl TokenParam {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxTokens => "max_tokens",
            Self::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

/// Request parameters for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub token_param: TokenParam,
    pub max_tokens: u32,
    /// `None` for models that reject a temperature.
    pub temperature: Option<f32>,
}

const KNOWN_CHAT_MODELS: &[&str] = &[
    "gpt-3.5-turbo",
    "gpt-4",
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4.1-mini",
    "gpt-4.1-nano",
    "gpt-4-turbo",
    "gpt-4-turbo-preview",
];

const REASONING_PREFIXES: &[&str] = &["o1", "o3", "o4"];

pub fn is_known_model(model: &str) -> bool {
    KNOWN_CHAT_MODELS.contains(&model) || is_reasoning_model(model)
}

fn is_reasoning_model(model: &str) -> bool {
    REASONING_PREFIXES
        .iter()
        .any(|prefix| model == *prefix || model.starts_with(&format!("{prefix}-")))
}

/// Parameters for `model`; unknown models get the chat defaults from `cfg`.
pub fn model_config(model: &str, cfg: &LlmConfig) -> ModelConfig {
    if is_reasoning_model(model) {
        return ModelConfig {
            token_param: TokenParam::MaxCompletionTokens,
            max_tokens: cfg.max_tokens,
            temperature: None,
        };
    }
    ModelConfig {
        token_param: TokenParam::MaxTokens,
        max_tokens: cfg.max_tokens,
        temperature: Some(cfg.temperature),
    }
}
