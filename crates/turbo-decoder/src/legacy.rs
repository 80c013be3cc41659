//! Reply format used before the JSON contract: suggestions fenced as
//! ```` ```replacement ```` blocks or `-replacement` backtick lines inside
//! ordinary prose. Kept so older stored history still renders its cards.

use regex::Regex;
use std::sync::OnceLock;
use turbo_core::{Replacement, ResponseDocument, SuggestionKind};

pub const LEGACY_DESCRIPTION: &str = "Text replacement suggestion";

const LEGACY_PATTERNS: [&str; 4] = [
    r"```replacement\n([\s\S]*?)\n```",
    r"-replacement\n`([\s\S]*?)`\n",
    r"```replacement\s*\n([\s\S]*?)```",
    r"-replacement\n`([\s\S]*?)`\n•",
];

fn block_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        LEGACY_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

fn blank_runs() -> Option<&'static Regex> {
    static BLANK_RUNS: OnceLock<Option<Regex>> = OnceLock::new();
    BLANK_RUNS
        .get_or_init(|| Regex::new(r"\n\s*\n\s*\n").ok())
        .as_ref()
}

struct Block {
    start: usize,
    end: usize,
    replacement: Replacement,
}

/// Pull legacy replacement blocks out of `content`. Returns `None` when the
/// text holds no such block; otherwise the prose with the blocks removed and
/// one replacement per block in source order.
pub fn parse_legacy(content: &str) -> Option<ResponseDocument> {
    let mut blocks: Vec<Block> = Vec::new();
    for pattern in block_patterns() {
        for caps in pattern.captures_iter(content) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if blocks.iter().any(|block| block.start == whole.start()) {
                continue;
            }
            let text = clean_block_text(inner.as_str());
            if text.is_empty() {
                continue;
            }
            blocks.push(Block {
                start: whole.start(),
                end: whole.end(),
                replacement: Replacement {
                    id: format!("legacy-{}-{}", whole.start(), text.chars().count()),
                    text,
                    description: LEGACY_DESCRIPTION.to_string(),
                    kind: SuggestionKind::Replacement,
                },
            });
        }
    }
    if blocks.is_empty() {
        return None;
    }
    blocks.sort_by_key(|block| block.start);

    let mut prose = String::with_capacity(content.len());
    let mut cursor = 0;
    for block in &blocks {
        if block.start >= cursor {
            prose.push_str(&content[cursor..block.start]);
        }
        cursor = cursor.max(block.end);
    }
    prose.push_str(&content[cursor..]);
    let prose = match blank_runs() {
        Some(re) => re.replace_all(&prose, "\n\n").trim().to_string(),
        None => prose.trim().to_string(),
    };

    Some(ResponseDocument {
        response: prose,
        replacements: blocks.into_iter().map(|block| block.replacement).collect(),
        ..ResponseDocument::default()
    })
}

fn clean_block_text(raw: &str) -> String {
    let text = raw.trim();
    let text = text
        .strip_prefix(['"', '\''])
        .unwrap_or(text);
    let text = text.strip_suffix(['"', '\'']).unwrap_or(text);
    let text = text.strip_prefix('`').unwrap_or(text);
    let text = text.strip_suffix('`').unwrap_or(text);
    text.trim().to_string()
}
