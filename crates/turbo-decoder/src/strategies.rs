//! The decode cascade as a prioritized list of pure functions. Each strategy
//! either claims the input or passes it on to the next one.

use crate::scan::{self, FencedPayload};
use crate::{DecodeOutcome, DecoderOptions};
use serde_json::{Map, Value};
use turbo_core::schema::{dedupe_by_id, insertion_from_object, replacement_from_object};
use turbo_core::{ResponseDocument, SchemaViolation, Suggestion, validate_document};

pub(crate) type StrategyFn = fn(&str, &DecoderOptions) -> Option<DecodeOutcome>;

#[derive(Clone, Copy)]
pub(crate) struct Strategy {
    pub name: &'static str,
    pub run: StrategyFn,
}

/// Strategies able to prove a document complete.
pub(crate) const COMPLETE: [Strategy; 2] = [
    Strategy {
        name: "strict",
        run: strict,
    },
    Strategy {
        name: "fenced",
        run: fenced,
    },
];

pub(crate) const PARTIAL: Strategy = Strategy {
    name: "partial",
    run: partial,
};

/// Why a candidate payload was not accepted as a document.
#[derive(Debug)]
pub(crate) enum Rejection {
    Json(serde_json::Error),
    Schema(SchemaViolation),
}

impl Rejection {
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Json(err) => match err.classify() {
                serde_json::error::Category::Eof => "unexpected end of input".to_string(),
                serde_json::error::Category::Syntax => format!(
                    "unexpected token at line {} column {}",
                    err.line(),
                    err.column()
                ),
                serde_json::error::Category::Data | serde_json::error::Category::Io => {
                    err.to_string()
                }
            },
            Self::Schema(violation) => violation.to_string(),
        }
    }
}

pub(crate) fn parse_document(text: &str) -> Result<ResponseDocument, Rejection> {
    let value: Value = serde_json::from_str(text).map_err(Rejection::Json)?;
    validate_document(&value).map_err(Rejection::Schema)
}

// ── Complete-document strategies ────────────────────────────────────────

fn strict(raw: &str, _: &DecoderOptions) -> Option<DecodeOutcome> {
    parse_document(raw.trim()).ok().map(DecodeOutcome::Complete)
}

/// Payload of a ```` ```json ```` fence. Input that already starts like JSON
/// is left to the other strategies, since a fence marker there can only sit
/// inside a string value.
fn fenced(raw: &str, _: &DecoderOptions) -> Option<DecodeOutcome> {
    if scan::starts_like_json(raw) {
        return None;
    }
    match scan::fenced_payload(raw)? {
        FencedPayload::Closed(payload) => parse_document(payload).ok().map(DecodeOutcome::Complete),
        FencedPayload::Open => None,
    }
}

// ── Partial-field scraping ──────────────────────────────────────────────

fn partial(raw: &str, options: &DecoderOptions) -> Option<DecodeOutcome> {
    scrape(raw, options).map(DecodeOutcome::Partial)
}

/// Best-effort document from a payload that has not closed yet.
pub(crate) fn scrape(raw: &str, options: &DecoderOptions) -> Option<ResponseDocument> {
    let open = scan::object_start(raw)?;
    let mut doc = ResponseDocument::default();
    let mut found = false;

    for field in scan::object_fields(raw, open) {
        match field.key.as_str() {
            "response" if field.value.starts_with('"') => {
                doc.response = scan::read_string_prefix(field.value).0;
                found = true;
            }
            "replacements" => {
                if let Some(items) =
                    scrape_suggestions(field.value, options, replacement_from_object)
                {
                    doc.replacements = items;
                    found = true;
                }
            }
            "insertions" => {
                if let Some(items) = scrape_suggestions(field.value, options, insertion_from_object)
                {
                    doc.insertions = items;
                    found = true;
                }
            }
            _ => {}
        }
    }

    found.then_some(doc)
}

/// Suggestions readable from an array value so far, or a lone placeholder
/// while the array is still open and nothing is readable.
fn scrape_suggestions<T: Suggestion>(
    value: &str,
    options: &DecoderOptions,
    build: fn(&Map<String, Value>) -> T,
) -> Option<Vec<T>> {
    let (items, open) = if value.is_empty() {
        (Vec::new(), true)
    } else if value.starts_with('[') {
        let (elements, closed) = scan::array_elements(value);
        let items = elements
            .into_iter()
            .filter_map(|(element, complete)| element_fields(element, complete))
            .map(|fields| build(&fields))
            .collect::<Vec<_>>();
        (items, !closed)
    } else {
        return None;
    };

    if !items.is_empty() {
        return Some(dedupe_by_id(items));
    }
    (open && options.emit_placeholders).then(|| vec![T::placeholder()])
}

/// Fields of one array element, provided it is an object carrying an `id`.
fn element_fields(element: &str, complete: bool) -> Option<Map<String, Value>> {
    if !element.starts_with('{') {
        return None;
    }
    if complete
        && let Ok(Value::Object(map)) = serde_json::from_str::<Value>(element)
    {
        return map.contains_key("id").then_some(map);
    }

    let mut map = Map::new();
    for field in scan::object_fields(element, 0) {
        let value = if field.value.starts_with('"') {
            Value::String(scan::read_string_prefix(field.value).0)
        } else if field.complete {
            match serde_json::from_str::<Value>(field.value) {
                Ok(value) => value,
                Err(_) => continue,
            }
        } else {
            continue;
        };
        map.insert(field.key, value);
    }
    map.contains_key("id").then_some(map)
}
