//! Conversation state for one chat panel: message list, request building,
//! turn-scoped snapshot application and one-shot suggestion use.

use crate::controller::{ControllerOptions, GENERATING_TEXT, SnapshotCallback, TurnController, TurnSnapshot};
use crate::editor::{EditorCapabilities, EditorError};
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, with_selected_text};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use turbo_core::{
    ChatConfig, ChatMessage, ChatRequest, EventKind, Insertion, MessageRole, Replacement,
    StoredMessage, Suggestion, SuggestionKind, TurnState,
};
use turbo_observe::Observer;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub replacements: Vec<Replacement>,
    pub insertions: Vec<Insertion>,
    pub used_replacements: BTreeSet<String>,
    pub used_insertions: BTreeSet<String>,
    /// Turn whose snapshots this assistant message displays.
    pub turn_id: Option<Uuid>,
    pub state: Option<TurnState>,
    /// User text as sent to the model, selection included.
    pub sent: Option<String>,
}

impl SessionMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            replacements: Vec::new(),
            insertions: Vec::new(),
            used_replacements: BTreeSet::new(),
            used_insertions: BTreeSet::new(),
            turn_id: None,
            state: None,
            sent: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state == Some(TurnState::Streaming)
    }
}

impl From<StoredMessage> for SessionMessage {
    fn from(stored: StoredMessage) -> Self {
        Self {
            id: stored.id,
            role: stored.role,
            content: stored.content,
            timestamp: stored.timestamp,
            replacements: stored.replacements,
            insertions: stored.insertions,
            used_replacements: stored.used_replacements.into_iter().collect(),
            used_insertions: stored.used_insertions.into_iter().collect(),
            turn_id: None,
            state: None,
            sent: None,
        }
    }
}

impl From<&SessionMessage> for StoredMessage {
    fn from(message: &SessionMessage) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content.clone(),
            timestamp: message.timestamp,
            replacements: message.replacements.clone(),
            insertions: message.insertions.clone(),
            used_replacements: message.used_replacements.iter().cloned().collect(),
            used_insertions: message.used_insertions.iter().cloned().collect(),
        }
    }
}

/// A turn the caller should now stream.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub turn_id: Uuid,
    /// Assistant message that will display the turn.
    pub message_id: Uuid,
    pub request: ChatRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("message {0} not found")]
    UnknownMessage(Uuid),
    #[error("suggestion \"{0}\" not found")]
    UnknownSuggestion(String),
    #[error("suggestion \"{0}\" is still being generated")]
    PendingSuggestion(String),
    #[error(transparent)]
    Editor(#[from] EditorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    /// Already used earlier; the editor was not touched.
    AlreadyUsed,
}

pub struct ChatSession {
    provider: String,
    model: String,
    config: ChatConfig,
    system_prompt: String,
    messages: Vec<SessionMessage>,
    credential_invalid: bool,
    observer: Option<Arc<Observer>>,
}

impl ChatSession {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, config: ChatConfig) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            config,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            messages: Vec::new(),
            credential_invalid: false,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the conversation with persisted history.
    pub fn restore(&mut self, history: Vec<StoredMessage>) {
        self.messages = history
            .into_iter()
            .filter(|m| m.role != MessageRole::System)
            .map(SessionMessage::from)
            .collect();
    }

    pub fn messages(&self) -> &[SessionMessage] {
        &self.messages
    }

    pub fn message(&self, id: Uuid) -> Option<&SessionMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn credential_invalid(&self) -> bool {
        self.credential_invalid
    }

    pub fn clear_credential_invalid(&mut self) {
        self.credential_invalid = false;
    }

    pub fn to_stored(&self) -> Vec<StoredMessage> {
        self.messages.iter().map(StoredMessage::from).collect()
    }

    /// Drop every message; in-flight turns lose their target message, so
    /// their snapshots are discarded.
    pub fn new_conversation(&mut self) {
        self.messages.clear();
    }

    // ── Turns ───────────────────────────────────────────────────────────

    /// Append the user message and an assistant placeholder. Returns `None`
    /// for blank input.
    pub fn submit(&mut self, input: &str, selected_text: Option<&str>) -> Option<PendingTurn> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        let selection = selected_text.filter(|_| self.config.context_aware);
        let sent = with_selected_text(input, selection);
        let request = self.build_request(&self.messages, &sent);
        let mut user = SessionMessage::new(MessageRole::User, input);
        user.sent = Some(sent);
        self.messages.push(user);
        Some(self.start_turn(request))
    }

    /// Resubmit the latest user message, discarding the replies after it.
    pub fn retry(&mut self) -> Option<PendingTurn> {
        let idx = self
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::User)?;
        self.messages.truncate(idx + 1);
        let user = &self.messages[idx];
        let sent = user.sent.clone().unwrap_or_else(|| user.content.clone());
        let request = self.build_request(&self.messages[..idx], &sent);
        Some(self.start_turn(request))
    }

    fn start_turn(&mut self, request: ChatRequest) -> PendingTurn {
        let turn_id = Uuid::now_v7();
        let mut assistant = SessionMessage::new(MessageRole::Assistant, GENERATING_TEXT);
        assistant.turn_id = Some(turn_id);
        assistant.state = Some(TurnState::Streaming);
        let message_id = assistant.id;
        self.messages.push(assistant);
        PendingTurn {
            turn_id,
            message_id,
            request,
        }
    }

    /// System prompt, the most recent history window and the new user text.
    fn build_request(&self, history: &[SessionMessage], user_text: &str) -> ChatRequest {
        let eligible: Vec<&SessionMessage> = history
            .iter()
            .filter(|m| m.role != MessageRole::System && !m.is_streaming())
            .collect();
        let skip = eligible.len().saturating_sub(self.config.history_window);
        let mut messages = vec![ChatMessage::new(MessageRole::System, self.system_prompt.clone())];
        messages.extend(
            eligible[skip..]
                .iter()
                .map(|m| ChatMessage::new(m.role, m.content.clone())),
        );
        messages.push(ChatMessage::new(MessageRole::User, user_text));
        ChatRequest {
            provider: self.provider.clone(),
            model: self.model.clone(),
            messages,
        }
    }

    /// Controller for `pending`, configured from this session.
    pub fn controller(&self, pending: &PendingTurn, on_snapshot: SnapshotCallback) -> TurnController {
        let controller = TurnController::new(
            pending.turn_id,
            ControllerOptions::from_config(&self.config),
            on_snapshot,
        );
        match &self.observer {
            Some(observer) => controller.with_observer(Arc::clone(observer)),
            None => controller,
        }
    }

    /// Show `snapshot` on the message owning its turn. Returns `false` when
    /// the turn was superseded or already finished.
    pub fn apply_snapshot(&mut self, snapshot: &TurnSnapshot) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| m.turn_id == Some(snapshot.turn_id))
        else {
            return false;
        };
        if message.state.is_some_and(TurnState::is_terminal) {
            return false;
        }
        message.content = snapshot.document.response.clone();
        message.replacements = snapshot.document.replacements.clone();
        message.insertions = snapshot.document.insertions.clone();
        message.state = Some(snapshot.state);
        if snapshot.failure.as_ref().is_some_and(|f| f.credential_invalid) {
            self.credential_invalid = true;
        }
        true
    }

    // ── Suggestions ─────────────────────────────────────────────────────

    /// Replace the editor selection with the suggestion's text, once.
    pub fn use_replacement(
        &mut self,
        message_id: Uuid,
        suggestion_id: &str,
        editor: &mut dyn EditorCapabilities,
    ) -> Result<ApplyOutcome, SessionError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(SessionError::UnknownMessage(message_id))?;
        let outcome = use_once(
            &message.replacements,
            &mut message.used_replacements,
            suggestion_id,
            |text| editor.apply_replacement(text),
        )?;
        if outcome == ApplyOutcome::Applied {
            self.record_applied(message_id, suggestion_id, SuggestionKind::Replacement);
        }
        Ok(outcome)
    }

    /// Insert the suggestion's text at the editor cursor, once.
    pub fn use_insertion(
        &mut self,
        message_id: Uuid,
        suggestion_id: &str,
        editor: &mut dyn EditorCapabilities,
    ) -> Result<ApplyOutcome, SessionError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(SessionError::UnknownMessage(message_id))?;
        let outcome = use_once(
            &message.insertions,
            &mut message.used_insertions,
            suggestion_id,
            |text| editor.insert_at_cursor(text),
        )?;
        if outcome == ApplyOutcome::Applied {
            self.record_applied(message_id, suggestion_id, SuggestionKind::Insertion);
        }
        Ok(outcome)
    }

    fn record_applied(&self, message_id: Uuid, suggestion_id: &str, kind: SuggestionKind) {
        let (Some(observer), Some(turn_id)) = (
            &self.observer,
            self.message(message_id).map(|m| m.turn_id.unwrap_or(m.id)),
        ) else {
            return;
        };
        let _ = observer.record(
            turn_id,
            EventKind::SuggestionApplied {
                message_id,
                suggestion_id: suggestion_id.to_string(),
                kind,
            },
        );
    }
}

fn use_once<T: Suggestion>(
    items: &[T],
    used: &mut BTreeSet<String>,
    id: &str,
    apply: impl FnOnce(&str) -> Result<(), EditorError>,
) -> Result<ApplyOutcome, SessionError> {
    if used.contains(id) {
        return Ok(ApplyOutcome::AlreadyUsed);
    }
    let suggestion = items
        .iter()
        .find(|s| s.id() == id)
        .ok_or_else(|| SessionError::UnknownSuggestion(id.to_string()))?;
    if suggestion.is_placeholder() {
        return Err(SessionError::PendingSuggestion(id.to_string()));
    }
    apply(suggestion.text())?;
    used.insert(id.to_string());
    Ok(ApplyOutcome::Applied)
}
