//! Streaming chat turns for the writing assistant.
//!
//! [`TurnController`] consumes one server-sent-event body, decodes after every
//! chunk and publishes monotonically improving [`TurnSnapshot`]s ending in one
//! terminal snapshot. [`ChatSession`] owns the conversation, builds requests
//! and routes snapshots to the message of the turn that produced them.

pub mod chat;
pub mod controller;
pub mod editor;
pub mod merge;
pub mod prompts;
pub mod sse;

pub use chat::{ApplyOutcome, ChatSession, PendingTurn, SessionError, SessionMessage};
pub use controller::{
    ControllerOptions, ERROR_MESSAGE, FailureKind, GENERATING_TEXT, INCOMPLETE_MESSAGE,
    MALFORMED_MESSAGE, SnapshotCallback, TurnController, TurnFailure, TurnSnapshot,
};
pub use editor::{EditorCapabilities, EditorError, TextBuffer};
pub use prompts::DEFAULT_SYSTEM_PROMPT;
pub use sse::{SseEvent, SseFramer};
