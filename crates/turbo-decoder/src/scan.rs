//! Byte-level walker over JSON text that may stop at any point.
//!
//! Every delimiter inspected here is ASCII, so each index the walker returns
//! lands on a UTF-8 character boundary and slicing with it cannot panic.

pub(crate) const JSON_FENCE: &str = "```json";
const CLOSING_FENCE: &str = "```";

/// One `"key": value` member of an object being scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Field<'a> {
    pub key: String,
    /// Raw value text. Empty when the value has not started yet.
    pub value: &'a str,
    pub complete: bool,
}

/// Where a ```` ```json ```` fence payload stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FencedPayload<'a> {
    Closed(&'a str),
    Open,
}

pub(crate) fn starts_like_json(text: &str) -> bool {
    matches!(text.trim_start().as_bytes().first(), Some(b'{' | b'['))
}

/// Index of the `{` opening the object worth scraping: the input itself when
/// it starts with a brace, else the first brace after a json fence, else the
/// first brace anywhere.
pub(crate) fn object_start(text: &str) -> Option<usize> {
    let leading = text.len() - text.trim_start().len();
    if text[leading..].starts_with('{') {
        return Some(leading);
    }
    let from = text
        .find(JSON_FENCE)
        .map(|idx| idx + JSON_FENCE.len())
        .unwrap_or(0);
    text[from..].find('{').map(|idx| from + idx)
}

/// Payload of the first json fence, measured string-aware so braces or
/// backticks inside JSON strings never end it early.
pub(crate) fn fenced_payload(text: &str) -> Option<FencedPayload<'_>> {
    let marker = text.find(JSON_FENCE)?;
    let after = text[marker + JSON_FENCE.len()..].trim_start();
    if starts_like_json(after) {
        let (end, complete) = value_extent(after.as_bytes(), 0);
        return Some(if complete {
            FencedPayload::Closed(&after[..end])
        } else {
            FencedPayload::Open
        });
    }
    Some(match after.find(CLOSING_FENCE) {
        Some(end) => FencedPayload::Closed(after[..end].trim()),
        None => FencedPayload::Open,
    })
}

/// Members of the object opening at `open`, in source order. Stops quietly at
/// the end of input, at the closing brace, or at anything unexpected.
pub(crate) fn object_fields(text: &str, open: usize) -> Vec<Field<'_>> {
    let bytes = text.as_bytes();
    let mut fields = Vec::new();
    let mut pos = open + 1;
    loop {
        pos = skip_separators(bytes, pos);
        if bytes.get(pos) != Some(&b'"') {
            return fields;
        }
        let Some(key_end) = string_end(bytes, pos) else {
            return fields;
        };
        let (key, _) = read_string_prefix(&text[pos..key_end]);
        pos = skip_whitespace(bytes, key_end);
        if bytes.get(pos) != Some(&b':') {
            return fields;
        }
        pos = skip_whitespace(bytes, pos + 1);
        if pos >= bytes.len() {
            fields.push(Field {
                key,
                value: "",
                complete: false,
            });
            return fields;
        }
        let (end, complete) = value_extent(bytes, pos);
        fields.push(Field {
            key,
            value: &text[pos..end],
            complete,
        });
        if !complete {
            return fields;
        }
        pos = end;
    }
}

/// Elements of the array `text` (which starts with `[`) plus whether the array
/// has closed. Only the last element can be incomplete.
pub(crate) fn array_elements(text: &str) -> (Vec<(&str, bool)>, bool) {
    let bytes = text.as_bytes();
    let mut items = Vec::new();
    let mut pos = 1;
    loop {
        pos = skip_separators(bytes, pos);
        match bytes.get(pos) {
            None => return (items, false),
            Some(b']') => return (items, true),
            Some(_) => {}
        }
        let (end, complete) = value_extent(bytes, pos);
        items.push((&text[pos..end], complete));
        if !complete {
            return (items, false);
        }
        pos = end;
    }
}

/// End of the value starting at `start` and whether it is closed.
pub(crate) fn value_extent(bytes: &[u8], start: usize) -> (usize, bool) {
    match bytes.get(start) {
        None => (bytes.len(), false),
        Some(b'"') => match string_end(bytes, start) {
            Some(end) => (end, true),
            None => (bytes.len(), false),
        },
        Some(b'{' | b'[') => container_end(bytes, start),
        Some(_) => {
            let rest = bytes.get(start + 1..).unwrap_or_default();
            match rest
                .iter()
                .position(|b| matches!(b, b',' | b'}' | b']') || b.is_ascii_whitespace())
            {
                Some(offset) => (start + 1 + offset, true),
                None => (bytes.len(), false),
            }
        }
    }
}

fn container_end(bytes: &[u8], start: usize) -> (usize, bool) {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => match string_end(bytes, i) {
                Some(end) => {
                    i = end;
                    continue;
                }
                None => return (bytes.len(), false),
            },
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return (i + 1, true);
                }
            }
            _ => {}
        }
        i += 1;
    }
    (bytes.len(), false)
}

/// Index just past the closing quote of the string opening at `start`.
fn string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
        pos += 1;
    }
    pos
}

fn skip_separators(bytes: &[u8], mut pos: usize) -> usize {
    while bytes
        .get(pos)
        .is_some_and(|b| b.is_ascii_whitespace() || *b == b',')
    {
        pos += 1;
    }
    pos
}

/// Decode the JSON string literal at the start of `raw` as far as it goes.
///
/// Returns the decoded text and whether the closing quote was seen. An escape
/// cut off by the end of input is held back rather than guessed, so feeding a
/// longer prefix only ever extends the result.
pub(crate) fn read_string_prefix(raw: &str) -> (String, bool) {
    let Some(body) = raw.strip_prefix('"') else {
        return (String::new(), false);
    };
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    loop {
        let Some(idx) = rest.find(['"', '\\']) else {
            out.push_str(rest);
            return (out, false);
        };
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if tail.starts_with('"') {
            return (out, true);
        }
        match decode_escape(tail) {
            Escape::Char(ch, used) => {
                out.push(ch);
                rest = &tail[used..];
            }
            Escape::Truncated => return (out, false),
        }
    }
}

enum Escape {
    Char(char, usize),
    Truncated,
}

enum Hex {
    Unit(u32),
    Invalid,
    Truncated,
}

fn decode_escape(esc: &str) -> Escape {
    let Some(kind) = esc[1..].chars().next() else {
        return Escape::Truncated;
    };
    let simple = match kind {
        '"' => '"',
        '\\' => '\\',
        '/' => '/',
        'b' => '\u{8}',
        'f' => '\u{c}',
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'u' => return decode_unicode(esc),
        other => return Escape::Char(other, 1 + other.len_utf8()),
    };
    Escape::Char(simple, 2)
}

fn decode_unicode(esc: &str) -> Escape {
    match hex_unit(esc, 2) {
        Hex::Truncated => Escape::Truncated,
        Hex::Invalid => Escape::Char(char::REPLACEMENT_CHARACTER, 2),
        Hex::Unit(high @ 0xD800..=0xDBFF) => {
            let tail = &esc[6..];
            if tail.is_empty() || tail == "\\" {
                return Escape::Truncated;
            }
            if !tail.starts_with("\\u") {
                return Escape::Char(char::REPLACEMENT_CHARACTER, 6);
            }
            match hex_unit(esc, 8) {
                Hex::Truncated => Escape::Truncated,
                Hex::Unit(low @ 0xDC00..=0xDFFF) => {
                    let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    Escape::Char(
                        char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER),
                        12,
                    )
                }
                _ => Escape::Char(char::REPLACEMENT_CHARACTER, 6),
            }
        }
        Hex::Unit(unit) => Escape::Char(
            char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER),
            6,
        ),
    }
}

fn hex_unit(esc: &str, at: usize) -> Hex {
    let available = esc.as_bytes().get(at..).unwrap_or_default();
    let digits = &available[..available.len().min(4)];
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return Hex::Invalid;
    }
    if digits.len() < 4 {
        return Hex::Truncated;
    }
    digits
        .iter()
        .try_fold(0u32, |acc, b| {
            char::from(*b).to_digit(16).map(|digit| acc * 16 + digit)
        })
        .map_or(Hex::Invalid, Hex::Unit)
}
