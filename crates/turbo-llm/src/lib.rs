use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io::Read;
use std::thread;
use std::time::Duration;
use turbo_core::{ChatRequest, LlmConfig};

pub mod models;
pub mod retry;

pub use models::{ModelConfig, TokenParam, is_known_model, model_config};
pub use retry::RetryPolicy;
use retry::{retryable_status, server_wait};

/// Raw server-sent-event body of one streamed completion.
pub type StreamBody = Box<dyn Read + Send>;

/// Opens a streamed chat completion. Framing of the returned body is left to
/// the caller.
pub trait ChatTransport: Send + Sync {
    fn open_stream(&self, request: &ChatRequest) -> Result<StreamBody, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid API key. Please check your OpenAI API key.")]
    CredentialInvalid,
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("OpenAI service is temporarily unavailable. Please try again.")]
    ServiceUnavailable,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("{detail}")]
    Http { status: u16, detail: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out. The API did not respond within {0} seconds.")]
    Timeout(u64),
    #[error("No API key configured. Set {0} or llm.api_key in .turbo/settings.json.")]
    MissingApiKey(String),
    #[error("LLM provider \"{0}\" not found")]
    ProviderNotFound(String),
    #[error("stream read error: {0}")]
    Stream(String),
    /// Error object delivered inside the event stream.
    #[error("OpenAI API error: {0}")]
    Remote(String),
}

impl TransportError {
    /// Whether the failure means the stored API key should be considered bad.
    pub fn is_credential_invalid(&self) -> bool {
        match self {
            Self::CredentialInvalid => true,
            Self::Http { status, .. } => *status == 401,
            Self::Remote(message) => message.contains("Invalid API key"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    cfg: LlmConfig,
    retry: RetryPolicy,
    client: Client,
}

impl OpenAiClient {
    pub fn new(cfg: LlmConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self {
            retry: RetryPolicy::from_config(&cfg),
            cfg,
            client,
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.cfg
    }

    pub fn build_chat_payload(&self, req: &ChatRequest) -> Value {
        let model = model_config(&req.model, &self.cfg);
        let mut payload = json!({
            "model": req.model,
            "messages": req.messages,
            "stream": true,
        });
        payload[model.token_param.as_str()] = json!(model.max_tokens);
        if let Some(temperature) = model.temperature {
            payload["temperature"] = json!(temperature);
        }
        payload
    }

    /// POST the payload, re-sending on rate limits, server errors and
    /// connection failures while the retry policy allows.
    fn send(&self, payload: &Value, api_key: &str) -> Result<StreamBody, TransportError> {
        let mut attempt: u8 = 0;
        loop {
            let request = self
                .client
                .post(&self.cfg.endpoint)
                .bearer_auth(api_key)
                .json(payload);
            let (err, wait) = match request.send() {
                Ok(resp) if resp.status().is_success() => return Ok(Box::new(resp)),
                Ok(resp) => {
                    let status = resp.status();
                    let wait = server_wait(resp.headers());
                    let err = format_api_error(status, &resp.text().unwrap_or_default());
                    if !retryable_status(status) {
                        return Err(err);
                    }
                    (err, wait)
                }
                Err(err) => {
                    let retryable = err.is_timeout() || err.is_connect();
                    let mapped = format_transport_error(&err, self.cfg.timeout_seconds);
                    if !retryable {
                        return Err(mapped);
                    }
                    (mapped, None)
                }
            };
            if !self.retry.allows(attempt) {
                return Err(err);
            }
            thread::sleep(self.retry.delay(attempt, wait));
            attempt += 1;
        }
    }
}

impl ChatTransport for OpenAiClient {
    fn open_stream(&self, request: &ChatRequest) -> Result<StreamBody, TransportError> {
        let key = self
            .cfg
            .resolve_api_key()
            .ok_or_else(|| TransportError::MissingApiKey(self.cfg.api_key_env.clone()))?;
        self.send(&self.build_chat_payload(request), &key)
    }
}

// ── Provider registry ───────────────────────────────────────────────────

pub type TransportFactory = fn(&LlmConfig) -> anyhow::Result<Box<dyn ChatTransport>>;

/// Providers by lowercase name.
pub struct ProviderRegistry {
    factories: BTreeMap<String, TransportFactory>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        registry.register("openai", openai_transport);
        registry
    }
}

fn openai_transport(cfg: &LlmConfig) -> anyhow::Result<Box<dyn ChatTransport>> {
    Ok(Box::new(OpenAiClient::new(cfg.clone())?))
}

impl ProviderRegistry {
    pub fn register(&mut self, name: &str, factory: TransportFactory) {
        self.factories.insert(name.to_ascii_lowercase(), factory);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, name: &str, cfg: &LlmConfig) -> anyhow::Result<Box<dyn ChatTransport>> {
        let factory = self
            .factories
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| TransportError::ProviderNotFound(name.to_string()))?;
        factory(cfg)
    }
}

// ── Error mapping ───────────────────────────────────────────────────────

fn format_api_error(status: StatusCode, body: &str) -> TransportError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(ToString::to_string))
        })
        .map(|message| format!("OpenAI API error: {message}"))
        .or_else(|| {
            let text: String = body.trim().chars().take(200).collect();
            (!text.is_empty()).then(|| format!("OpenAI API error: {text}"))
        });

    match status {
        StatusCode::UNAUTHORIZED => TransportError::CredentialInvalid,
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited,
        StatusCode::INTERNAL_SERVER_ERROR => TransportError::ServiceUnavailable,
        StatusCode::BAD_REQUEST => TransportError::BadRequest(
            detail.unwrap_or_else(|| format!("OpenAI API failed: {}", status_line(status))),
        ),
        _ => TransportError::Http {
            status: status.as_u16(),
            detail: detail
                .unwrap_or_else(|| format!("OpenAI API failed: {}", status_line(status))),
        },
    }
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}

const DNS_HINTS: [&str; 5] = [
    "dns",
    "resolve",
    "name or service not known",
    "no such host",
    "getaddrinfo",
];

fn format_transport_error(err: &reqwest::Error, timeout_seconds: u64) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout(timeout_seconds);
    }
    let cause = err
        .source()
        .map(|source| source.to_string().to_ascii_lowercase())
        .unwrap_or_default();
    if DNS_HINTS.iter().any(|hint| cause.contains(hint)) {
        return TransportError::Network(
            "DNS resolution failed. Check your internet connection and DNS settings.".to_string(),
        );
    }
    if err.is_connect() {
        return TransportError::Network(
            "Connection refused. Could not reach the configured endpoint.".to_string(),
        );
    }
    TransportError::Network(err.to_string())
}
