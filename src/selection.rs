use crate::context::{clean_selected_text, sentence_context};
use serde::{Deserialize, Serialize};

const MIN_RAW_CHARS: usize = 1;
const MAX_RAW_CHARS: usize = 100;
const MIN_EXPANDED_CHARS: usize = 2;

/// The text node a page selection starts and ends in, with byte offsets.
#[derive(Debug, Clone, Copy)]
pub struct TextNodeRange<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

/// A selection accepted for lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSelection {
    pub selected_text: String,
    pub context: String,
}

/// Turns a raw page selection into a lookup, or `None` when it should be ignored.
///
/// Selections of more than 100 characters are dropped. When the selection
/// sits inside a single text node it is widened to whole words first, and
/// anything still shorter than two characters is dropped too.
pub fn capture_selection(
    raw: &str,
    node: Option<TextNodeRange<'_>>,
    parent_text: &str,
) -> Option<PageSelection> {
    let trimmed = raw.trim();
    let length = trimmed.chars().count();
    if !(MIN_RAW_CHARS..=MAX_RAW_CHARS).contains(&length) {
        return None;
    }

    let selected = node
        .and_then(expanded_text)
        .unwrap_or(trimmed);
    if selected.chars().count() < MIN_EXPANDED_CHARS {
        return None;
    }

    Some(PageSelection {
        selected_text: clean_selected_text(selected),
        context: sentence_context(parent_text, selected),
    })
}

/// Host context-menu selections carry no surrounding text, so the term is its own context.
pub fn context_menu_selection(raw: &str) -> Option<PageSelection> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PageSelection {
        selected_text: trimmed.to_string(),
        context: trimmed.to_string(),
    })
}

fn expanded_text<'a>(range: TextNodeRange<'a>) -> Option<&'a str> {
    let TextNodeRange { text, start, end } = range;
    if start > end || end > text.len() || !text.is_char_boundary(start) || !text.is_char_boundary(end)
    {
        return None;
    }
    let (start, end) = expand_to_word_boundaries(text, start, end);
    Some(&text[start..end])
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Widens `[start, end)` outward until both ends sit on word boundaries.
pub fn expand_to_word_boundaries(text: &str, mut start: usize, mut end: usize) -> (usize, usize) {
    while let Some(prev) = text[..start].chars().next_back() {
        if !is_word_char(prev) {
            break;
        }
        start -= prev.len_utf8();
    }
    while let Some(next) = text[end..].chars().next() {
        if !is_word_char(next) {
            break;
        }
        end += next.len_utf8();
    }
    (start, end)
}
