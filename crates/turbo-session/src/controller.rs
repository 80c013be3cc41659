//! Lifecycle of one streamed assistant turn.
//!
//! A [`TurnController`] owns the raw accumulator and the last published
//! document for exactly one turn id. It publishes a placeholder on start,
//! a merged snapshot whenever a chunk adds information, and exactly one
//! terminal snapshot. Nothing escapes as an error: transport failures,
//! cancellation and deadlines all end in an `Aborted` snapshot.

use crate::merge::merge_document;
use crate::sse::{SseEvent, SseFramer};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use turbo_core::{
    ChatConfig, ChatRequest, EventKind, ResponseDocument, Suggestion, TurnState,
    is_valid_turn_transition,
};
use turbo_decoder::{DecodeOutcome, Decoder, DecoderOptions, FinalVerdict};
use turbo_llm::{ChatTransport, TransportError};
use turbo_observe::Observer;
use uuid::Uuid;

pub const GENERATING_TEXT: &str = "Generating…";
pub const INCOMPLETE_MESSAGE: &str =
    "❌ LLM response was incomplete. Please try regenerating the response.";
pub const MALFORMED_MESSAGE: &str =
    "❌ LLM response was malformed. Please try regenerating the response.";
pub const ERROR_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

const READ_BUFFER: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Incomplete,
    Malformed,
    Transport,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Leading raw text, for malformed replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    /// The provider rejected the API key.
    #[serde(default)]
    pub credential_invalid: bool,
}

/// One published state of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSnapshot {
    pub turn_id: Uuid,
    /// Publication counter within the turn, starting at 0.
    pub seq: u32,
    pub state: TurnState,
    /// `document.response` is the generating stand-in, not model output.
    pub placeholder: bool,
    pub document: ResponseDocument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TurnFailure>,
}

impl TurnSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

pub type SnapshotCallback = Arc<dyn Fn(TurnSnapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerOptions {
    pub decoder: DecoderOptions,
    /// Checked between chunks; `None` disables the deadline.
    pub max_turn: Option<Duration>,
}

impl ControllerOptions {
    pub fn from_config(cfg: &ChatConfig) -> Self {
        Self {
            decoder: DecoderOptions {
                emit_placeholders: cfg.emit_placeholders,
            },
            max_turn: (cfg.max_turn_seconds > 0).then(|| Duration::from_secs(cfg.max_turn_seconds)),
        }
    }
}

pub struct TurnController {
    turn_id: Uuid,
    state: TurnState,
    raw: String,
    published: ResponseDocument,
    last: Option<TurnSnapshot>,
    seq: u32,
    decoder: Decoder,
    max_turn: Option<Duration>,
    started: Option<Instant>,
    cancel_flag: Arc<AtomicBool>,
    on_snapshot: SnapshotCallback,
    observer: Option<Arc<Observer>>,
}

impl TurnController {
    pub fn new(turn_id: Uuid, options: ControllerOptions, on_snapshot: SnapshotCallback) -> Self {
        Self {
            turn_id,
            state: TurnState::Idle,
            raw: String::new(),
            published: ResponseDocument::default(),
            last: None,
            seq: 0,
            decoder: Decoder::new(options.decoder),
            max_turn: options.max_turn,
            started: None,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            on_snapshot,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Raw text accumulated for this turn.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Setting the flag aborts the turn before the next chunk is processed.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    /// Drive the whole turn: open the stream, consume it, and return the
    /// terminal snapshot (which has also been published).
    pub fn run(&mut self, transport: &dyn ChatTransport, request: &ChatRequest) -> TurnSnapshot {
        if let Some(terminal) = self.terminal_snapshot() {
            return terminal;
        }
        self.begin(&request.model);
        if let Some(terminal) = self.check_interrupted() {
            return terminal;
        }
        let mut body = match transport.open_stream(request) {
            Ok(body) => body,
            Err(err) => return self.abort(&err),
        };

        let mut framer = SseFramer::new();
        let mut buf = [0_u8; READ_BUFFER];
        loop {
            let read = body.read(&mut buf);
            if let Some(terminal) = self.check_interrupted() {
                return terminal;
            }
            let events = match read {
                Ok(0) => {
                    if let Some(terminal) = self.handle_events(framer.finish()) {
                        return terminal;
                    }
                    // Body ended without the done sentinel.
                    return self.finish();
                }
                Ok(n) => framer.push(&buf[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return self.abort(&TransportError::Stream(err.to_string())),
            };
            if let Some(terminal) = self.handle_events(events) {
                return terminal;
            }
        }
    }

    /// `Idle -> Streaming`: reset the accumulator and publish the placeholder.
    pub fn begin(&mut self, model: &str) {
        if !is_valid_turn_transition(self.state, TurnState::Streaming) {
            return;
        }
        self.state = TurnState::Streaming;
        self.raw.clear();
        self.published = ResponseDocument::default();
        self.started = Some(Instant::now());
        self.record(EventKind::TurnStarted {
            model: model.to_string(),
        });
        self.publish(None);
    }

    /// Append one delta and publish if the decoded candidate adds anything.
    pub fn push_delta(&mut self, delta: &str) {
        if self.state != TurnState::Streaming || delta.is_empty() {
            return;
        }
        self.raw.push_str(delta);
        let candidate = match self.decoder.decode(&self.raw) {
            DecodeOutcome::Partial(doc) | DecodeOutcome::Complete(doc) => doc,
            DecodeOutcome::Empty | DecodeOutcome::PlainText(_) => return,
        };
        let merged = merge_document(&self.published, &candidate);
        if merged == self.published {
            return;
        }
        let counts_changed = merged.replacements.len() != self.published.replacements.len()
            || merged.insertions.len() != self.published.insertions.len();
        self.published = merged;
        if counts_changed {
            self.record(EventKind::TurnPublished {
                response_chars: self.published.response.chars().count(),
                replacements: self.published.replacements.len(),
                insertions: self.published.insertions.len(),
            });
        }
        self.publish(None);
    }

    /// End of stream: classify the accumulated text and publish the
    /// terminal snapshot.
    pub fn finish(&mut self) -> TurnSnapshot {
        match self.decoder.finish(&self.raw) {
            FinalVerdict::Completed { document } | FinalVerdict::PlainText { document } => {
                self.terminate(TurnState::Completed, document, None)
            }
            FinalVerdict::Incomplete { .. } => {
                let mut shown = self.published.clone();
                shown.replacements.retain(|s| !s.is_placeholder());
                shown.insertions.retain(|s| !s.is_placeholder());
                shown.response = if shown.response.is_empty() {
                    INCOMPLETE_MESSAGE.to_string()
                } else {
                    format!("{}\n\n{INCOMPLETE_MESSAGE}", shown.response)
                };
                self.terminate(
                    TurnState::Incomplete,
                    shown,
                    Some(TurnFailure {
                        kind: FailureKind::Incomplete,
                        message: INCOMPLETE_MESSAGE.to_string(),
                        excerpt: None,
                        credential_invalid: false,
                    }),
                )
            }
            FinalVerdict::Malformed { diagnostic, excerpt } => {
                let document = ResponseDocument::from_text(format!(
                    "{MALFORMED_MESSAGE}\n\nParser said: {diagnostic}\nReceived: {excerpt}"
                ));
                self.terminate(
                    TurnState::Malformed,
                    document,
                    Some(TurnFailure {
                        kind: FailureKind::Malformed,
                        message: diagnostic,
                        excerpt: Some(excerpt),
                        credential_invalid: false,
                    }),
                )
            }
        }
    }

    /// Transport failure: publish the error document and stop.
    pub fn abort(&mut self, err: &TransportError) -> TurnSnapshot {
        self.abort_with(FailureKind::Transport, err.to_string(), err.is_credential_invalid())
    }

    fn abort_with(&mut self, kind: FailureKind, message: String, credential_invalid: bool) -> TurnSnapshot {
        self.terminate(
            TurnState::Aborted,
            ResponseDocument::from_text(format!("{ERROR_MESSAGE}\n\n{message}")),
            Some(TurnFailure {
                kind,
                message,
                excerpt: None,
                credential_invalid,
            }),
        )
    }

    fn check_interrupted(&mut self) -> Option<TurnSnapshot> {
        if self.cancel_flag.load(Ordering::SeqCst) {
            return Some(self.abort_with(
                FailureKind::Cancelled,
                "Request cancelled.".to_string(),
                false,
            ));
        }
        let limit = self.max_turn?;
        let elapsed = self.started?.elapsed();
        (elapsed >= limit).then(|| {
            self.abort_with(
                FailureKind::TimedOut,
                format!("Request timed out after {} seconds.", limit.as_secs()),
                false,
            )
        })
    }

    fn handle_events(&mut self, events: Vec<SseEvent>) -> Option<TurnSnapshot> {
        for event in events {
            match event {
                SseEvent::Delta(text) => self.push_delta(&text),
                SseEvent::Done => return Some(self.finish()),
                SseEvent::Error(message) => {
                    return Some(self.abort(&TransportError::Remote(message)));
                }
                SseEvent::Rejected(reason) => {
                    if let Some(observer) = &self.observer {
                        observer.warn_log(&format!("Failed to parse SSE data: {reason}"));
                    }
                    self.record(EventKind::SseLineRejected { reason });
                }
            }
        }
        None
    }

    fn terminal_snapshot(&self) -> Option<TurnSnapshot> {
        self.last.clone().filter(TurnSnapshot::is_terminal)
    }

    /// Publish the terminal snapshot, unless `state` is not reachable from the
    /// current one; then the latest snapshot is returned unchanged.
    fn terminate(
        &mut self,
        state: TurnState,
        document: ResponseDocument,
        failure: Option<TurnFailure>,
    ) -> TurnSnapshot {
        if !is_valid_turn_transition(self.state, state) {
            return self.last.clone().unwrap_or_else(|| self.snapshot(None));
        }
        self.state = state;
        self.published = document;
        let detail = failure.as_ref().map(|f| f.message.clone());
        self.record(EventKind::TurnFinished {
            state,
            raw_chars: self.raw.chars().count(),
            detail,
        });
        self.publish(failure)
    }

    fn snapshot(&self, failure: Option<TurnFailure>) -> TurnSnapshot {
        let placeholder = self.state == TurnState::Streaming && self.published.response.is_empty();
        let mut document = self.published.clone();
        if placeholder {
            document.response = GENERATING_TEXT.to_string();
        }
        TurnSnapshot {
            turn_id: self.turn_id,
            seq: self.seq,
            state: self.state,
            placeholder,
            document,
            failure,
        }
    }

    fn publish(&mut self, failure: Option<TurnFailure>) -> TurnSnapshot {
        let snapshot = self.snapshot(failure);
        self.seq += 1;
        self.last = Some(snapshot.clone());
        (self.on_snapshot)(snapshot.clone());
        snapshot
    }

    fn record(&self, kind: EventKind) {
        if let Some(observer) = &self.observer {
            let _ = observer.record(self.turn_id, kind);
        }
    }
}
