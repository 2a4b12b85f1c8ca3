//! Picks the text sent upstream alongside a selected term.
//!
//! HTML pages get the enclosing sentence; PDF documents get a wide
//! character window because technical prose needs more grounding.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Characters kept on each side of a term in window mode.
pub const DEFAULT_CONTEXT_SIZE: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    #[default]
    Sentence,
    Window,
}

impl fmt::Display for ContextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextMode::Sentence => write!(f, "sentence"),
            ContextMode::Window => write!(f, "window"),
        }
    }
}

pub fn extract(mode: ContextMode, text: &str, selected: &str, context_size: usize) -> String {
    match mode {
        ContextMode::Sentence => sentence_context(text, selected),
        ContextMode::Window => window_context(text, selected, context_size),
    }
}

/// Returns the trimmed sentence holding the first occurrence of `selected`.
///
/// A terminator (`.`, `!`, `?`) only closes the previous sentence when
/// whitespace follows it, so decimals and abbreviations glued to the next
/// word do not cut the sentence short. Falls back to `selected` when it does
/// not occur in `full_text`.
pub fn sentence_context(full_text: &str, selected: &str) -> String {
    let Some(index) = full_text.find(selected) else {
        return selected.to_string();
    };
    let start = sentence_start(full_text, index);
    let end = sentence_end(full_text, index + selected.len());
    full_text[start..end].trim().to_string()
}

fn is_terminator(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

fn sentence_start(text: &str, from: usize) -> usize {
    let mut start = from;
    while let Some(prev) = text[..start].chars().next_back() {
        if is_terminator(prev) {
            let at_origin = start == prev.len_utf8();
            let followed_by_space = text[start..].chars().next().is_some_and(char::is_whitespace);
            if at_origin || followed_by_space {
                break;
            }
        }
        start -= prev.len_utf8();
    }
    start
}

fn sentence_end(text: &str, from: usize) -> usize {
    let mut end = from;
    for ch in text[from..].chars() {
        end += ch.len_utf8();
        if is_terminator(ch) {
            break;
        }
    }
    end
}

/// Returns up to `context_size` characters on each side of the term.
///
/// The first case-insensitive whole-word match wins, so "state" does not
/// land inside "states"; a plain substring search is the fallback, and the
/// selected text itself is returned when neither finds anything.
pub fn window_context(document: &str, selected: &str, context_size: usize) -> String {
    let Some((start, end)) = locate_term(document, selected) else {
        debug!(term = selected, "term not found in document, using selection as context");
        return selected.to_string();
    };
    let from = chars_before(document, start, context_size);
    let to = chars_after(document, end, context_size);
    document[from..to].to_string()
}

fn locate_term(document: &str, term: &str) -> Option<(usize, usize)> {
    if term.is_empty() {
        return None;
    }
    let pattern = format!(r"(?i)\b{}\b", regex::escape(term));
    if let Some(found) = Regex::new(&pattern)
        .ok()
        .and_then(|re| re.find(document))
    {
        return Some((found.start(), found.end()));
    }
    debug!(term, "no whole-word match, trying substring search");
    document.find(term).map(|index| (index, index + term.len()))
}

fn chars_before(text: &str, index: usize, count: usize) -> usize {
    text[..index]
        .char_indices()
        .rev()
        .take(count)
        .last()
        .map_or(index, |(offset, _)| offset)
}

fn chars_after(text: &str, index: usize, count: usize) -> usize {
    text[index..]
        .char_indices()
        .nth(count)
        .map_or(text.len(), |(offset, _)| index + offset)
}

/// Trims a raw selection and drops trailing punctuation.
pub fn clean_selected_text(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', ',', ';', ':', '!', '?'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_mode_returns_enclosing_sentence() {
        let text = "The cat sat. The dog ran fast. The bird flew.";
        assert_eq!(sentence_context(text, "dog"), "The dog ran fast.");
        assert_eq!(sentence_context(text, "cat"), "The cat sat.");
        assert_eq!(sentence_context(text, "bird"), "The bird flew.");
    }

    #[test]
    fn sentence_mode_covers_whole_single_sentence() {
        let text = "The mitochondria is the powerhouse of the cell.";
        assert_eq!(sentence_context(text, "mitochondria"), text);
    }

    #[test]
    fn sentence_mode_skips_decimal_points() {
        let text = "Intro. Pi is roughly 3.14 in value! Done?";
        assert_eq!(
            sentence_context(text, "value"),
            "Pi is roughly 3.14 in value!"
        );
    }

    #[test]
    fn sentence_mode_runs_to_end_without_terminator() {
        let text = "First one. then a trailing clause";
        assert_eq!(sentence_context(text, "trailing"), "then a trailing clause");
    }

    #[test]
    fn sentence_mode_falls_back_to_selection() {
        assert_eq!(sentence_context("Nothing here.", "absent"), "absent");
    }

    #[test]
    fn sentence_mode_handles_multibyte_text() {
        let text = "Café au lait. Über große Straßen? Ja.";
        assert_eq!(sentence_context(text, "große"), "Über große Straßen?");
    }

    #[test]
    fn window_mode_is_centered_on_term() {
        let mut document = "x ".repeat(2500);
        let offset = document.len();
        document.push_str("needle");
        document.push_str(&" y".repeat(2497));
        assert_eq!(document.len(), 10_000);
        assert_eq!(offset, 5000);

        let context = window_context(&document, "needle", 2000);
        assert!(context.len() <= 4000 + "needle".len());
        assert_eq!(context.len(), 4000 + "needle".len());
        assert_eq!(&context[2000..2006], "needle");
        assert_eq!(context, &document[3000..7006]);
    }

    #[test]
    fn window_mode_clamps_at_document_edges() {
        let document = "kinase activity regulates the cell cycle";
        assert_eq!(window_context(document, "kinase", 10), "kinase activity ");
        assert_eq!(window_context(document, "cycle", 6), " cell cycle");
    }

    #[test]
    fn window_mode_prefers_whole_word_case_insensitive() {
        let document = "Many states exist. A State machine has one state.";
        let context = window_context(document, "state", 0);
        assert_eq!(context, "State");
    }

    #[test]
    fn window_mode_falls_back_to_substring_then_selection() {
        let document = "photosynthesisrelated pathways";
        assert_eq!(window_context(document, "synthesis", 2), "tosynthesisre");
        assert_eq!(window_context(document, "absent", 20), "absent");
    }

    #[test]
    fn window_mode_escapes_regex_metacharacters() {
        let document = "compile with c++ (gnu) flags";
        assert_eq!(window_context(document, "(gnu)", 1), " (gnu) ");
    }

    #[test]
    fn cleans_trailing_punctuation() {
        assert_eq!(clean_selected_text("  enzyme,; "), "enzyme");
        assert_eq!(clean_selected_text("Really?!"), "Really");
        assert_eq!(clean_selected_text("e.g. example"), "e.g. example");
    }
}
