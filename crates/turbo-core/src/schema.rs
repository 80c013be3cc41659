//! Shape of one fully-formed assistant turn and the lenient validator that
//! decides whether a parsed JSON value qualifies as one.
//!
//! Validation runs on every streamed chunk, so it only rejects a candidate
//! when the `response` string is missing. Everything else is normalized:
//! non-array `replacements`/`insertions` become empty, elements missing fields
//! keep whatever is present, and duplicate ids collapse onto the first
//! position with the latest values.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Id prefix of the synthetic entry emitted while a suggestion array is open
/// but no element has become readable yet.
pub const PENDING_ID_PREFIX: &str = "pending:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDocument {
    pub response: String,
    #[serde(default)]
    pub replacements: Vec<Replacement>,
    #[serde(default)]
    pub insertions: Vec<Insertion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

impl ResponseDocument {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            response: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    #[default]
    Replacement,
    Insertion,
}

impl SuggestionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replacement => "replacement",
            Self::Insertion => "insertion",
        }
    }
}

/// Substitutes the editor's current selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: SuggestionKind,
}

/// Inserted at the editor's cursor, independent of any selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insertion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub description: String,
}

/// Common view over replacements and insertions.
pub trait Suggestion: Clone {
    fn id(&self) -> &str;
    fn text(&self) -> &str;
    fn description(&self) -> &str;
    fn placeholder() -> Self;

    fn is_placeholder(&self) -> bool {
        self.id().starts_with(PENDING_ID_PREFIX)
    }
}

impl Suggestion for Replacement {
    fn id(&self) -> &str {
        &self.id
    }
    fn text(&self) -> &str {
        &self.text
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn placeholder() -> Self {
        Self {
            id: PENDING_ID_PREFIX.to_string(),
            ..Self::default()
        }
    }
}

impl Suggestion for Insertion {
    fn id(&self) -> &str {
        &self.id
    }
    fn text(&self) -> &str {
        &self.text
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn placeholder() -> Self {
        Self {
            id: PENDING_ID_PREFIX.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
    #[error("missing string field \"response\"")]
    MissingResponse,
}

/// Decide whether `value` is a response document, normalizing it leniently.
pub fn validate_document(value: &Value) -> Result<ResponseDocument, SchemaViolation> {
    let obj = value
        .as_object()
        .ok_or_else(|| SchemaViolation::NotAnObject(json_type_name(value)))?;
    let response = obj
        .get("response")
        .and_then(Value::as_str)
        .ok_or(SchemaViolation::MissingResponse)?
        .to_string();

    let replacements = obj
        .get("replacements")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(replacement_from_object)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let insertions = obj
        .get("insertions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(insertion_from_object)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let metadata = obj
        .get("metadata")
        .and_then(Value::as_object)
        .map(|meta| ResponseMetadata {
            model: meta.get("model").and_then(Value::as_str).map(str::to_string),
            timestamp: meta
                .get("timestamp")
                .and_then(Value::as_str)
                .map(str::to_string),
        });

    Ok(ResponseDocument {
        response,
        replacements: dedupe_by_id(replacements),
        insertions: dedupe_by_id(insertions),
        metadata,
    })
}

pub fn replacement_from_object(obj: &Map<String, Value>) -> Replacement {
    let kind = match lenient_string(obj.get("type").or_else(|| obj.get("kind"))).as_str() {
        "insertion" => SuggestionKind::Insertion,
        _ => SuggestionKind::Replacement,
    };
    Replacement {
        id: lenient_string(obj.get("id")),
        text: lenient_string(obj.get("text")),
        description: lenient_string(obj.get("description")),
        kind,
    }
}

pub fn insertion_from_object(obj: &Map<String, Value>) -> Insertion {
    Insertion {
        id: lenient_string(obj.get("id")),
        text: lenient_string(obj.get("text")),
        description: lenient_string(obj.get("description")),
    }
}

/// Collapse entries sharing a non-empty id onto the first position; the
/// latest occurrence supplies the content.
pub fn dedupe_by_id<T: Suggestion>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let existing = if item.id().is_empty() {
            None
        } else {
            out.iter().position(|seen| seen.id() == item.id())
        };
        match existing {
            Some(idx) => out[idx] = item,
            None => out.push(item),
        }
    }
    out
}

fn lenient_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_response_is_a_valid_document() {
        let doc = validate_document(&json!({"response": ""})).expect("valid");
        assert_eq!(doc, ResponseDocument::default());
    }

    #[test]
    fn missing_response_is_rejected() {
        let err = validate_document(&json!({"replacements": []})).unwrap_err();
        assert_eq!(err, SchemaViolation::MissingResponse);
        let err = validate_document(&json!({"response": 3})).unwrap_err();
        assert_eq!(err, SchemaViolation::MissingResponse);
        let err = validate_document(&json!(["response"])).unwrap_err();
        assert_eq!(err, SchemaViolation::NotAnObject("an array"));
    }

    #[test]
    fn non_array_suggestions_default_to_empty() {
        let doc = validate_document(&json!({
            "response": "ok",
            "replacements": "nope",
            "insertions": {"id": "x"}
        }))
        .expect("valid");
        assert!(doc.replacements.is_empty());
        assert!(doc.insertions.is_empty());
    }

    #[test]
    fn elements_are_normalized_leniently() {
        let doc = validate_document(&json!({
            "response": "ok",
            "replacements": [
                {"text": "no id yet"},
                {"id": 7, "text": "numeric id", "description": "d"},
                "not an object",
                {"id": "r-2", "text": "t", "type": "insertion"}
            ],
            "insertions": [{"id": "i-1", "text": "added"}]
        }))
        .expect("valid");
        assert_eq!(doc.replacements.len(), 3);
        assert_eq!(doc.replacements[0].id, "");
        assert_eq!(doc.replacements[0].text, "no id yet");
        assert_eq!(doc.replacements[0].kind, SuggestionKind::Replacement);
        assert_eq!(doc.replacements[1].id, "7");
        assert_eq!(doc.replacements[2].kind, SuggestionKind::Insertion);
        assert_eq!(doc.insertions[0].description, "");
    }

    #[test]
    fn duplicate_ids_keep_first_position_and_latest_text() {
        let doc = validate_document(&json!({
            "response": "ok",
            "replacements": [
                {"id": "a", "text": "first"},
                {"id": "b", "text": "other"},
                {"id": "a", "text": "second"}
            ]
        }))
        .expect("valid");
        let ids: Vec<_> = doc.replacements.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(doc.replacements[0].text, "second");
    }

    #[test]
    fn metadata_is_carried_when_present() {
        let doc = validate_document(&json!({
            "response": "ok",
            "metadata": {"model": "gpt-4o", "timestamp": "2024-01-01T00:00:00Z"}
        }))
        .expect("valid");
        let meta = doc.metadata.expect("metadata");
        assert_eq!(meta.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn placeholder_suggestions_are_recognizable() {
        assert!(Replacement::placeholder().is_placeholder());
        assert!(Insertion::placeholder().is_placeholder());
        assert!(Insertion::placeholder().text.is_empty());
        let real = Replacement {
            id: "replacement-1".to_string(),
            ..Replacement::default()
        };
        assert!(!real.is_placeholder());
    }

    #[test]
    fn replacement_serializes_kind_as_type() {
        let value = serde_json::to_value(Replacement {
            id: "r".to_string(),
            text: "t".to_string(),
            description: "d".to_string(),
            kind: SuggestionKind::Replacement,
        })
        .expect("serialize");
        assert_eq!(value["type"], "replacement");
    }
}
