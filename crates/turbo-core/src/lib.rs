use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub mod schema;

pub use schema::{
    Insertion, PENDING_ID_PREFIX, Replacement, ResponseDocument, ResponseMetadata,
    SchemaViolation, Suggestion, SuggestionKind, validate_document,
};

pub type Result<T> = anyhow::Result<T>;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const CHAT_HISTORY_KEY: &str = "turbo-chat-history";
pub const EDITOR_CONTENT_KEY: &str = "turbo-editor-content";

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".turbo")
}

pub fn model_display_name(model: &str) -> &str {
    match model {
        "gpt-3.5-turbo" => "GPT-3.5 Turbo",
        "gpt-4" => "GPT-4",
        "gpt-4-turbo" => "GPT-4 Turbo",
        other => other,
    }
}

/// Lifecycle of one assistant turn. Terminal states are final for the turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Streaming,
    Completed,
    Incomplete,
    Malformed,
    Aborted,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Incomplete | Self::Malformed | Self::Aborted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Malformed => "malformed",
            Self::Aborted => "aborted",
        }
    }
}

/// `Idle -> Streaming -> terminal`; a turn may also abort before it streams.
pub fn is_valid_turn_transition(from: TurnState, to: TurnState) -> bool {
    match from {
        TurnState::Idle => matches!(to, TurnState::Streaming | TurnState::Aborted),
        TurnState::Streaming => to.is_terminal(),
        TurnState::Completed
        | TurnState::Incomplete
        | TurnState::Malformed
        | TurnState::Aborted => false,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message of a chat-completions conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String },
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        let content = content.into();
        match role {
            MessageRole::System => Self::System { content },
            MessageRole::User => Self::User { content },
            MessageRole::Assistant => Self::Assistant { content },
        }
    }

    pub fn role(&self) -> MessageRole {
        match self {
            Self::System { .. } => MessageRole::System,
            Self::User { .. } => MessageRole::User,
            Self::Assistant { .. } => MessageRole::Assistant,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content } | Self::User { content } | Self::Assistant { content } => {
                content
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub provider: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Persisted form of one chat message. Used-suggestion sets are stored as
/// id lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replacements: Vec<Replacement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insertions: Vec<Insertion>,
    #[serde(default)]
    pub used_replacements: Vec<String>,
    #[serde(default)]
    pub used_insertions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq_no: u64,
    pub at: DateTime<Utc>,
    pub turn_id: Uuid,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    TurnStarted {
        model: String,
    },
    TurnPublished {
        response_chars: usize,
        replacements: usize,
        insertions: usize,
    },
    TurnFinished {
        state: TurnState,
        raw_chars: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    SuggestionApplied {
        message_id: Uuid,
        suggestion_id: String,
        kind: SuggestionKind,
    },
    SseLineRejected {
        reason: String,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TurnStarted { .. } => "turn.started",
            Self::TurnPublished { .. } => "turn.published",
            Self::TurnFinished { .. } => "turn.finished",
            Self::SuggestionApplied { .. } => "suggestion.applied",
            Self::SseLineRejected { .. } => "sse.rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub telemetry: TelemetryConfig,
}

/// One source of settings, lowest precedence first in [`AppConfig::layers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLayer {
    LegacyToml(PathBuf),
    Json(PathBuf),
}

impl ConfigLayer {
    pub fn path(&self) -> &Path {
        match self {
            Self::LegacyToml(path) | Self::Json(path) => path,
        }
    }

    /// The layer as a JSON object, or `None` when its file does not exist.
    fn read(&self) -> Result<Option<serde_json::Value>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let value = match self {
            Self::LegacyToml(_) => serde_json::to_value(toml::from_str::<AppConfig>(&raw)?)?,
            Self::Json(_) => serde_json::from_str(&raw)?,
        };
        Ok(Some(value))
    }
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))?;
        Some(PathBuf::from(home).join(".turbo").join("settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn legacy_toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    /// Legacy TOML, then user, project and local JSON settings.
    pub fn layers(workspace: &Path) -> Vec<ConfigLayer> {
        let mut layers = vec![ConfigLayer::LegacyToml(Self::legacy_toml_path(workspace))];
        layers.extend(Self::user_settings_path().map(ConfigLayer::Json));
        layers.push(ConfigLayer::Json(Self::project_settings_path(workspace)));
        layers.push(ConfigLayer::Json(Self::project_local_settings_path(workspace)));
        layers
    }

    /// Defaults overlaid key by key with every existing layer.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        for layer in Self::layers(workspace) {
            if let Some(value) = layer.read()? {
                overlay_json(&mut merged, value);
            }
        }
        Ok(serde_json::from_value(merged)?)
    }

    /// Load, or write the defaults to the project settings when no layer exists.
    pub fn ensure(workspace: &Path) -> Result<Self> {
        if Self::layers(workspace).iter().any(|l| l.path().exists()) {
            return Self::load(workspace);
        }
        let cfg = Self::default();
        cfg.save(workspace)?;
        Ok(cfg)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        fs::create_dir_all(runtime_dir(workspace))?;
        fs::write(
            Self::project_settings_path(workspace),
            serde_json::to_vec_pretty(self)?,
        )?;
        Ok(())
    }
}

/// Objects merge recursively; any other overlay value replaces the base.
fn overlay_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    use serde_json::Value;
    match (base, overlay) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(slot) => overlay_json(slot, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub default_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_retries: u8,
    pub retry_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            timeout_seconds: 60,
            max_retries: 0,
            retry_base_ms: 400,
        }
    }
}

impl LlmConfig {
    /// Environment variable first, then the configured key. Blank values are ignored.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| {
                self.api_key
                    .as_ref()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Number of most recent messages sent along as conversation context.
    pub history_window: usize,
    /// Include the editor selection in the user message.
    pub context_aware: bool,
    pub auto_save: bool,
    /// Cooperative deadline for one streamed turn, checked between chunks.
    pub max_turn_seconds: u64,
    /// Emit a pending suggestion while a suggestion array is open but empty.
    pub emit_placeholders: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: 10,
            context_aware: true,
            auto_save: true,
            max_turn_seconds: 120,
            emit_placeholders: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn turn_state_strategy() -> impl Strategy<Value = TurnState> {
        prop_oneof![
            Just(TurnState::Idle),
            Just(TurnState::Streaming),
            Just(TurnState::Completed),
            Just(TurnState::Incomplete),
            Just(TurnState::Malformed),
            Just(TurnState::Aborted),
        ]
    }

    proptest! {
        #[test]
        fn terminal_states_never_transition(
            from in turn_state_strategy(),
            to in turn_state_strategy(),
        ) {
            if from.is_terminal() {
                prop_assert!(!is_valid_turn_transition(from, to));
            }
        }

        #[test]
        fn overlay_keeps_base_keys_and_prefers_overlay_values(
            base in prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..10),
            overlay in prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..10),
        ) {
            let mut merged = json!({ "chat": base.clone() });
            overlay_json(&mut merged, json!({ "chat": overlay.clone() }));
            for (key, value) in &base {
                let expected = overlay.get(key).unwrap_or(value);
                prop_assert_eq!(&merged["chat"][key], &json!(expected));
            }
            for (key, value) in &overlay {
                prop_assert_eq!(&merged["chat"][key], &json!(value));
            }
        }
    }

    #[test]
    fn streaming_reaches_every_terminal_state() {
        for to in [
            TurnState::Completed,
            TurnState::Incomplete,
            TurnState::Malformed,
            TurnState::Aborted,
        ] {
            assert!(is_valid_turn_transition(TurnState::Streaming, to));
        }
        assert!(!is_valid_turn_transition(
            TurnState::Idle,
            TurnState::Completed
        ));
        assert!(!is_valid_turn_transition(
            TurnState::Streaming,
            TurnState::Streaming
        ));
    }

    #[test]
    fn chat_message_serializes_in_chat_completions_shape() {
        let value = serde_json::to_value(ChatMessage::new(MessageRole::User, "hi")).expect("json");
        assert_eq!(value, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn project_settings_override_defaults() {
        let workspace = tempfile::tempdir().expect("workspace");
        let dir = runtime_dir(workspace.path());
        fs::create_dir_all(&dir).expect("runtime dir");
        fs::write(
            dir.join("config.toml"),
            "[llm]\ndefault_model = \"gpt-4o\"\ntemperature = 0.3\n",
        )
        .expect("legacy toml");
        fs::write(
            dir.join("settings.local.json"),
            r#"{"llm":{"temperature":0.9},"chat":{"history_window":4}}"#,
        )
        .expect("local settings");

        let layers = AppConfig::layers(workspace.path());
        assert!(matches!(layers.first(), Some(ConfigLayer::LegacyToml(_))));
        assert_eq!(
            layers.last().map(ConfigLayer::path),
            Some(dir.join("settings.local.json").as_path())
        );

        let cfg = AppConfig::load(workspace.path()).expect("load");
        assert_eq!(cfg.llm.default_model, "gpt-4o");
        assert!((cfg.llm.temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(cfg.chat.history_window, 4);
        assert!(cfg.chat.context_aware);
    }

    #[test]
    fn resolve_api_key_ignores_blank_values() {
        let cfg = LlmConfig {
            api_key: Some("   ".to_string()),
            api_key_env: "TURBO_NONEXISTENT_KEY_FOR_TEST".to_string(),
            ..LlmConfig::default()
        };
        assert_eq!(cfg.resolve_api_key(), None);

        let cfg = LlmConfig {
            api_key: Some(" sk-test ".to_string()),
            ..cfg
        };
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn display_names_fall_back_to_model_id() {
        assert_eq!(model_display_name("gpt-3.5-turbo"), "GPT-3.5 Turbo");
        assert_eq!(model_display_name("gpt-4o-mini"), "gpt-4o-mini");
    }
}
