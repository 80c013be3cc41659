//! Incremental decoder for streamed assistant replies.
//!
//! The decoder is a pure function of the text accumulated so far. While the
//! stream is open, [`Decoder::decode`] returns the best currently extractable
//! document; once it has ended, [`Decoder::finish`] gives the stricter verdict.
//! Neither ever panics or returns an error: every failure is a value.

pub mod legacy;
mod scan;
mod strategies;

use serde::Serialize;
use turbo_core::{ResponseDocument, TurnState};

pub use legacy::{LEGACY_DESCRIPTION, parse_legacy};

const EXCERPT_CHARS: usize = 100;

/// Result of one decode attempt on the accumulated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "document", rename_all = "snake_case")]
pub enum DecodeOutcome {
    /// Nothing usable yet.
    Empty,
    /// Some fields extracted; the input is not a complete document.
    Partial(ResponseDocument),
    /// The input parsed as a fully valid document.
    Complete(ResponseDocument),
    /// The input never attempted structured output.
    PlainText(ResponseDocument),
}

impl DecodeOutcome {
    pub fn document(&self) -> Option<&ResponseDocument> {
        match self {
            Self::Empty => None,
            Self::Partial(doc) | Self::Complete(doc) | Self::PlainText(doc) => Some(doc),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Classification of the accumulated text once the stream has ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum FinalVerdict {
    Completed {
        document: ResponseDocument,
    },
    /// Not JSON-shaped; accepted verbatim (with any legacy blocks lifted out).
    PlainText {
        document: ResponseDocument,
    },
    /// The payload never closed, or nothing arrived at all.
    Incomplete {
        partial: Option<ResponseDocument>,
    },
    /// JSON-shaped but invalid.
    Malformed {
        diagnostic: String,
        excerpt: String,
    },
}

impl FinalVerdict {
    pub fn turn_state(&self) -> TurnState {
        match self {
            Self::Completed { .. } | Self::PlainText { .. } => TurnState::Completed,
            Self::Incomplete { .. } => TurnState::Incomplete,
            Self::Malformed { .. } => TurnState::Malformed,
        }
    }

    pub fn document(&self) -> Option<&ResponseDocument> {
        match self {
            Self::Completed { document } | Self::PlainText { document } => Some(document),
            Self::Incomplete { partial } => partial.as_ref(),
            Self::Malformed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Emit a pending suggestion while a suggestion array is open but has no
    /// readable element yet.
    pub emit_placeholders: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            emit_placeholders: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    options: DecoderOptions,
}

impl Decoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> DecoderOptions {
        self.options
    }

    pub fn decode(&self, raw: &str) -> DecodeOutcome {
        self.decode_traced(raw).1
    }

    /// Like [`decode`](Self::decode), also naming the strategy that claimed
    /// the input.
    pub fn decode_traced(&self, raw: &str) -> (Option<&'static str>, DecodeOutcome) {
        let cascade = strategies::COMPLETE.iter().chain([&strategies::PARTIAL]);
        for strategy in cascade {
            if let Some(outcome) = (strategy.run)(raw, &self.options) {
                return (Some(strategy.name), outcome);
            }
        }
        (None, DecodeOutcome::Empty)
    }

    pub fn finish(&self, raw: &str) -> FinalVerdict {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return FinalVerdict::Incomplete { partial: None };
        }
        for strategy in &strategies::COMPLETE {
            if let Some(DecodeOutcome::Complete(document)) = (strategy.run)(raw, &self.options) {
                return FinalVerdict::Completed { document };
            }
        }

        let payload = if scan::starts_like_json(trimmed) {
            // Trailing text after a closed value stays in so the parser reports it.
            let (_, complete) = scan::value_extent(trimmed.as_bytes(), 0);
            complete.then_some(trimmed)
        } else {
            match scan::fenced_payload(raw) {
                Some(scan::FencedPayload::Closed(payload)) => Some(payload),
                Some(scan::FencedPayload::Open) => None,
                None => return plain_text(raw),
            }
        };

        let Some(payload) = payload else {
            let quiet = DecoderOptions {
                emit_placeholders: false,
            };
            return FinalVerdict::Incomplete {
                partial: strategies::scrape(raw, &quiet),
            };
        };
        match strategies::parse_document(payload) {
            Ok(document) => FinalVerdict::Completed { document },
            Err(rejection) => FinalVerdict::Malformed {
                diagnostic: rejection.diagnostic(),
                excerpt: trimmed.chars().take(EXCERPT_CHARS).collect(),
            },
        }
    }
}

fn plain_text(raw: &str) -> FinalVerdict {
    let document = parse_legacy(raw).unwrap_or_else(|| ResponseDocument::from_text(raw));
    FinalVerdict::PlainText { document }
}

/// Decode with default options while the stream is still open.
pub fn decode(raw: &str) -> DecodeOutcome {
    Decoder::default().decode(raw)
}

/// Classify the accumulated text after the stream has ended.
pub fn finish(raw: &str) -> FinalVerdict {
    Decoder::default().finish(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use turbo_core::{Replacement, SuggestionKind};

    #[test]
    fn plain_prose_is_accepted_verbatim_at_end() {
        assert_eq!(decode("Hello, how are you?"), DecodeOutcome::Empty);
        let verdict = finish("Hello, how are you?");
        let FinalVerdict::PlainText { document } = &verdict else {
            panic!("expected plain text, got {verdict:?}");
        };
        assert_eq!(document.response, "Hello, how are you?");
        assert!(document.replacements.is_empty());
        assert!(document.insertions.is_empty());
        assert_eq!(verdict.turn_state(), TurnState::Completed);
    }

    #[test]
    fn markdown_fenced_document_decodes() {
        let raw = "```json\n{\"response\":\"Parsed from markdown\",\"replacements\":[],\"insertions\":[]}\n```";
        let outcome = decode(raw);
        assert!(outcome.is_complete());
        assert_eq!(
            outcome.document().map(|d| d.response.as_str()),
            Some("Parsed from markdown")
        );
        assert!(matches!(finish(raw), FinalVerdict::Completed { .. }));
    }

    #[test]
    fn invalid_braces_are_malformed_not_plain_text() {
        let verdict = finish("{ invalid json }");
        let FinalVerdict::Malformed {
            diagnostic,
            excerpt,
        } = verdict
        else {
            panic!("expected malformed, got {verdict:?}");
        };
        assert!(diagnostic.starts_with("unexpected token"));
        assert_eq!(excerpt, "{ invalid json }");
    }

    #[test]
    fn truncated_replacement_text_is_partial() {
        let raw = r#"{"response":"Here","replacements":[{"id":"replacement-1","text":"Improved te"#;
        let (strategy, outcome) = Decoder::default().decode_traced(raw);
        assert_eq!(strategy, Some("partial"));
        let DecodeOutcome::Partial(doc) = outcome else {
            panic!("expected partial");
        };
        assert_eq!(
            doc.replacements,
            vec![Replacement {
                id: "replacement-1".to_string(),
                text: "Improved te".to_string(),
                description: String::new(),
                kind: SuggestionKind::Replacement,
            }]
        );
    }

    #[test]
    fn unclosed_payload_at_end_is_incomplete_with_preserved_fields() {
        let verdict = finish(r#"{"response":"Half a sent"#);
        assert_eq!(verdict.turn_state(), TurnState::Incomplete);
        assert_eq!(
            verdict.document().map(|d| d.response.as_str()),
            Some("Half a sent")
        );

        let verdict = finish(r#"{"response":"ok","insertions":["#);
        let FinalVerdict::Incomplete {
            partial: Some(doc),
        } = verdict
        else {
            panic!("expected incomplete");
        };
        assert!(doc.insertions.is_empty());
    }

    #[test]
    fn nothing_received_is_incomplete() {
        assert_eq!(finish("  \n"), FinalVerdict::Incomplete { partial: None });
    }

    #[test]
    fn closed_value_failing_schema_is_malformed() {
        let verdict = finish(r#"{"message":"hi"}"#);
        assert_eq!(
            verdict,
            FinalVerdict::Malformed {
                diagnostic: "missing string field \"response\"".to_string(),
                excerpt: r#"{"message":"hi"}"#.to_string(),
            }
        );
        assert_eq!(
            finish("[1, 2]").turn_state(),
            TurnState::Malformed
        );
    }

    #[test]
    fn trailing_garbage_after_document_is_malformed() {
        let verdict = finish(r#"{"response":"ok"} trailing"#);
        assert_eq!(verdict.turn_state(), TurnState::Malformed);
    }

    #[test]
    fn fence_outcomes_at_end_of_stream() {
        let open = finish("Sure:\n```json\n{\"response\":\"cut");
        assert_eq!(open.turn_state(), TurnState::Incomplete);
        assert_eq!(
            open.document().map(|d| d.response.as_str()),
            Some("cut")
        );

        let empty = finish("```json\n```");
        assert_eq!(
            empty,
            FinalVerdict::Malformed {
                diagnostic: "unexpected end of input".to_string(),
                excerpt: "```json\n```".to_string(),
            }
        );

        let broken = finish("```json\n{\"response\": 1}\n```");
        assert_eq!(broken.turn_state(), TurnState::Malformed);
    }

    #[test]
    fn excerpt_is_limited_to_first_hundred_characters() {
        let raw = format!("{{\"x\": {}}}", "é".repeat(300));
        let FinalVerdict::Malformed { excerpt, .. } = finish(&raw) else {
            panic!("expected malformed");
        };
        assert_eq!(excerpt.chars().count(), 100);
    }

    #[test]
    fn legacy_blocks_surface_at_end() {
        let verdict = finish("Consider:\n```replacement\nBetter words.\n```");
        let FinalVerdict::PlainText { document } = verdict else {
            panic!("expected plain text");
        };
        assert_eq!(document.response, "Consider:");
        assert_eq!(document.replacements[0].description, LEGACY_DESCRIPTION);
    }

    #[test]
    fn prose_quoting_a_document_stays_plain_text() {
        let raw = "Sure thing! {\"response\":\"wrapped\",\"replacements\":[],\"insertions\":[]}";
        assert!(!decode(raw).is_complete());
        let verdict = finish(raw);
        let FinalVerdict::PlainText { document } = &verdict else {
            panic!("expected plain text, got {verdict:?}");
        };
        assert_eq!(document.response, raw);
        assert!(document.replacements.is_empty());
        assert!(document.insertions.is_empty());
    }

    #[test]
    fn outcomes_serialize_with_tags() {
        let value = serde_json::to_value(decode("{\"response\":\"a")).expect("json");
        assert_eq!(value["outcome"], "partial");
        assert_eq!(value["document"]["response"], "a");
        let value = serde_json::to_value(finish("{ bad }")).expect("json");
        assert_eq!(value["verdict"], "malformed");
    }
}
