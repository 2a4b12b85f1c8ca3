//! Instructions handed to the language model for one lookup.

use crate::fetch::ChatRequest;

/// Builds the generation prompt for a definition request.
///
/// Drill-downs (depth > 0 with surrounding text) explain the term inside
/// that text, steer away from terms already explored and stay anchored on
/// the first topic of the session. Top-level lookups get the short form.
pub fn build_prompt(request: &ChatRequest) -> String {
    let context = request
        .immediate_context
        .as_deref()
        .filter(|context| !context.is_empty());
    match context {
        Some(context) if request.depth > 0 => drill_down_prompt(request, context),
        _ => top_level_prompt(&request.message),
    }
}

fn drill_down_prompt(request: &ChatRequest, context: &str) -> String {
    let term = &request.message;
    let avoid = if request.used_terms.is_empty() {
        String::new()
    } else {
        format!(
            "\nAvoid these already-explored terms: {}",
            request.used_terms.join(", ")
        )
    };
    let anchor = request
        .original_topic
        .as_deref()
        .map(|topic| {
            format!(
                "\nRemember: this is all in the context of learning about \"{topic}\". Stay relevant to that topic."
            )
        })
        .unwrap_or_default();

    format!(
        "From this sentence: \"{context}\"

The user selected \"{term}\" and wants to understand it.

Requirements:
- 10 words maximum
- One sentence response - no semi colons, no new lines. Do not separate two sentences with a comma.
- Explain what \"{term}\" means in that specific sentence
- USE jargon when it is appropriate and precise terminology - give the user more terms to explore
- Keep it grounded in the practical context, not abstract{avoid}{anchor}"
    )
}

fn top_level_prompt(term: &str) -> String {
    format!("Explain in 10 words or fewer: {term}\nNo LaTeX, no math symbols.\nMAXIMUM 10 WORDS.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DefinitionRequest;

    #[test]
    fn top_level_lookup_uses_short_prompt() {
        let request = DefinitionRequest::new("mitochondria", "The mitochondria is here.", Vec::new());
        let prompt = build_prompt(&request.to_chat_request());
        assert!(prompt.starts_with("Explain in 10 words or fewer: mitochondria"));
        assert!(prompt.contains("MAXIMUM 10 WORDS."));
        assert!(!prompt.contains("From this sentence"));
    }

    #[test]
    fn drill_down_avoids_explored_terms_and_anchors_topic() {
        let request = DefinitionRequest::new(
            "ATP",
            "ATP",
            vec!["mitochondria".to_string(), "respiration".to_string()],
        );
        let prompt = build_prompt(&request.to_chat_request());
        assert!(prompt.starts_with("From this sentence: \"ATP\""));
        assert!(prompt.contains("The user selected \"ATP\""));
        assert!(prompt.contains("Avoid these already-explored terms: mitochondria, respiration"));
        assert!(prompt.contains("learning about \"mitochondria\""));
    }

    #[test]
    fn depth_without_context_falls_back_to_short_prompt() {
        let request = ChatRequest {
            message: "enzyme".to_string(),
            immediate_context: None,
            depth: 3,
            original_topic: Some("biology".to_string()),
            used_terms: vec!["biology".to_string()],
        };
        assert!(build_prompt(&request).starts_with("Explain in 10 words or fewer: enzyme"));
    }
}
