use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static DELIMITER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+|-").expect("valid delimiter pattern"));

/// What followed a word in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Delimiter {
    #[serde(rename = " ")]
    Space,
    #[serde(rename = "-")]
    Dash,
    #[default]
    #[serde(rename = "")]
    None,
}

impl Delimiter {
    fn classify(fragment: &str) -> Self {
        if fragment == "-" {
            Delimiter::Dash
        } else {
            Delimiter::Space
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Delimiter::Space => " ",
            Delimiter::Dash => "-",
            Delimiter::None => "",
        }
    }
}

/// One selectable word of a rendered definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub word: String,
    pub delimiter: Delimiter,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.word, self.delimiter.as_str())
    }
}

/// Splits `text` into words, remembering whether a space run or a dash came next.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut cursor = 0;
    for found in DELIMITER.find_iter(text) {
        push_word(
            &mut tokens,
            &text[cursor..found.start()],
            Delimiter::classify(found.as_str()),
        );
        cursor = found.end();
    }
    push_word(&mut tokens, &text[cursor..], Delimiter::None);
    tokens
}

fn push_word(tokens: &mut Vec<Token>, fragment: &str, delimiter: Delimiter) {
    if fragment.is_empty() {
        return;
    }
    tokens.push(Token {
        word: fragment.to_string(),
        delimiter,
    });
}

/// Joins tokens back into display text.
pub fn render_tokens(tokens: &[Token]) -> String {
    tokens.iter().map(Token::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_spaces_and_dashes() {
        let tokens = tokenize("state-of-the-art cell biology");
        let words: Vec<_> = tokens.iter().map(|t| t.word.as_str()).collect();
        assert_eq!(words, ["state", "of", "the", "art", "cell", "biology"]);
        assert_eq!(tokens[0].delimiter, Delimiter::Dash);
        assert_eq!(tokens[3].delimiter, Delimiter::Space);
        assert_eq!(tokens[5].delimiter, Delimiter::None);
    }

    #[test]
    fn single_spaced_text_round_trips() {
        for input in [
            "Organelle producing ATP through cellular respiration.",
            "a-b c-d",
            "one",
            "long-term memory formation",
        ] {
            assert_eq!(render_tokens(&tokenize(input)), input);
        }
    }

    #[test]
    fn whitespace_runs_collapse_to_one_space() {
        let tokens = tokenize("  energy \t\n currency  ");
        assert_eq!(tokens.len(), 2);
        assert_eq!(render_tokens(&tokens).trim_end(), "energy currency");
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   ").is_empty());
        assert!(tokenize("--").is_empty());
    }

    #[test]
    fn trailing_dash_is_kept_on_last_word() {
        let tokens = tokenize("pre-");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].delimiter, Delimiter::Dash);
    }

    #[test]
    fn delimiter_serializes_as_literal() {
        let json = serde_json::to_string(&tokenize("a b")).unwrap();
        assert_eq!(
            json,
            r#"[{"word":"a","delimiter":" "},{"word":"b","delimiter":""}]"#
        );
    }
}
