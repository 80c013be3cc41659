//! Monotonic merge of a freshly decoded candidate into the document already
//! published for a streaming turn.
//!
//! Published values only move toward "more complete": the response grows by
//! extension, suggestions are matched by position, and a candidate that is a
//! prefix of what is already shown never replaces it.

use turbo_core::{ResponseDocument, Suggestion};

pub fn merge_document(published: &ResponseDocument, candidate: &ResponseDocument) -> ResponseDocument {
    ResponseDocument {
        response: merge_response(&published.response, &candidate.response),
        replacements: merge_suggestions(&published.replacements, &candidate.replacements),
        insertions: merge_suggestions(&published.insertions, &candidate.insertions),
        metadata: candidate
            .metadata
            .clone()
            .or_else(|| published.metadata.clone()),
    }
}

fn merge_response(published: &str, candidate: &str) -> String {
    if candidate.len() > published.len() && candidate.starts_with(published) {
        candidate.to_string()
    } else {
        published.to_string()
    }
}

fn merge_suggestions<T: Suggestion + PartialEq>(published: &[T], candidate: &[T]) -> Vec<T> {
    let had_placeholder = published.iter().any(Suggestion::is_placeholder);
    let mut merged: Vec<T> = published
        .iter()
        .filter(|item| !item.is_placeholder())
        .cloned()
        .collect();
    let incoming: Vec<&T> = candidate.iter().filter(|item| !item.is_placeholder()).collect();

    for (idx, item) in incoming.iter().enumerate() {
        match merged.get(idx) {
            None => merged.push((*item).clone()),
            Some(current) if current == *item || is_regression(current, item) => {}
            Some(_) => merged[idx] = (*item).clone(),
        }
    }

    // A duplicate id collapses onto its first position in later candidates;
    // drop the stale trailing copy.
    let settled = incoming.len().min(merged.len());
    let (head, tail) = merged.split_at(settled);
    let mut tail: Vec<T> = tail.to_vec();
    tail.retain(|item| item.id().is_empty() || !head.iter().any(|h| h.id() == item.id()));
    let mut merged = head.to_vec();
    merged.extend(tail);

    if merged.is_empty() && (had_placeholder || candidate.iter().any(Suggestion::is_placeholder)) {
        merged.push(T::placeholder());
    }
    merged
}

/// `candidate` carries nothing `current` does not already show.
fn is_regression<T: Suggestion>(current: &T, candidate: &T) -> bool {
    current.id().starts_with(candidate.id())
        && current.text().starts_with(candidate.text())
        && current.description().starts_with(candidate.description())
}
