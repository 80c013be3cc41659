//! Editor capabilities handed to the chat session for applying suggestions.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditorError {
    #[error("no text is selected")]
    NoSelection,
    #[error("position {position} is outside the document ({len} characters)")]
    OutOfBounds { position: usize, len: usize },
    #[error("selection start {start} is after its end {end}")]
    InvertedSelection { start: usize, end: usize },
}

/// What the session may do to the editor. Implemented by whatever owns the
/// text; the session never touches editor state directly.
pub trait EditorCapabilities {
    /// Replace the current selection with `text`.
    fn apply_replacement(&mut self, text: &str) -> Result<(), EditorError>;
    /// Insert `text` at the cursor.
    fn insert_at_cursor(&mut self, text: &str) -> Result<(), EditorError>;
}

/// Plain-text editor state. Positions are character offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBuffer {
    text: String,
    selection: Option<Range<usize>>,
    cursor: usize,
}

impl TextBuffer {
    /// Cursor starts at the end of `text`.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let cursor = text.chars().count();
        Self {
            text,
            selection: None,
            cursor,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn selection(&self) -> Option<Range<usize>> {
        self.selection.clone()
    }

    fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    fn check(&self, position: usize) -> Result<(), EditorError> {
        let len = self.char_len();
        if position > len {
            return Err(EditorError::OutOfBounds { position, len });
        }
        Ok(())
    }

    /// Select `start..end`; the cursor moves to `end`.
    pub fn select(&mut self, start: usize, end: usize) -> Result<(), EditorError> {
        if start > end {
            return Err(EditorError::InvertedSelection { start, end });
        }
        self.check(end)?;
        self.selection = (start < end).then_some(start..end);
        self.cursor = end;
        Ok(())
    }

    pub fn set_cursor(&mut self, position: usize) -> Result<(), EditorError> {
        self.check(position)?;
        self.cursor = position;
        self.selection = None;
        Ok(())
    }

    pub fn selected_text(&self) -> Option<&str> {
        let range = self.selection.as_ref()?;
        let bytes = self.byte_offset(range.start)..self.byte_offset(range.end);
        Some(&self.text[bytes])
    }

    fn byte_offset(&self, chars: usize) -> usize {
        self.text
            .char_indices()
            .nth(chars)
            .map_or(self.text.len(), |(idx, _)| idx)
    }
}

impl EditorCapabilities for TextBuffer {
    fn apply_replacement(&mut self, text: &str) -> Result<(), EditorError> {
        let range = self.selection.clone().ok_or(EditorError::NoSelection)?;
        let bytes = self.byte_offset(range.start)..self.byte_offset(range.end);
        self.text.replace_range(bytes, text);
        self.selection = None;
        self.cursor = range.start + text.chars().count();
        Ok(())
    }

    fn insert_at_cursor(&mut self, text: &str) -> Result<(), EditorError> {
        let at = self.byte_offset(self.cursor);
        self.text.insert_str(at, text);
        self.selection = None;
        self.cursor += text.chars().count();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_substitutes_the_selection() {
        let mut buffer = TextBuffer::new("The quick fox.");
        buffer.select(4, 9).expect("select");
        assert_eq!(buffer.selected_text(), Some("quick"));
        buffer.apply_replacement("nimble").expect("replace");
        assert_eq!(buffer.text(), "The nimble fox.");
        assert_eq!(buffer.cursor(), 10);
        assert_eq!(buffer.selection(), None);
    }

    #[test]
    fn replacement_without_selection_fails() {
        let mut buffer = TextBuffer::new("text");
        assert_eq!(buffer.apply_replacement("x"), Err(EditorError::NoSelection));
        buffer.select(2, 2).expect("empty selection");
        assert_eq!(buffer.apply_replacement("x"), Err(EditorError::NoSelection));
        assert_eq!(buffer.text(), "text");
    }

    #[test]
    fn insertion_uses_character_offsets() {
        let mut buffer = TextBuffer::new("café bar");
        buffer.set_cursor(4).expect("cursor");
        buffer.insert_at_cursor("-au-lait").expect("insert");
        assert_eq!(buffer.text(), "café-au-lait bar");
        assert_eq!(buffer.cursor(), 12);
    }

    #[test]
    fn positions_are_bounds_checked() {
        let mut buffer = TextBuffer::new("abc");
        assert_eq!(
            buffer.set_cursor(4),
            Err(EditorError::OutOfBounds { position: 4, len: 3 })
        );
        assert_eq!(
            buffer.select(2, 1),
            Err(EditorError::InvertedSelection { start: 2, end: 1 })
        );
    }
}
