//! Candidate-code assembly: the generation request for the model and the
//! cleanup of its reply. Nothing here is an enforcement mechanism.

use crate::llm::ChatMessage;
use crate::prompts::{build_code_prompt, SYSTEM_ANALYST};

/// Messages for one code-generation call.
pub fn build_code_request(
    question: &str,
    columns: &[String],
    hint: Option<&str>,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_ANALYST),
        ChatMessage::user(build_code_prompt(question, columns, hint)),
    ]
}

/// Strip a surrounding markdown code fence, with or without a language tag.
/// Replies without fences pass through trimmed.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let after_fence = &trimmed[3..];
    // Drop the language tag line, if any ("python\n..." or just "\n...").
    let body = match after_fence.split_once('\n') {
        Some((_tag, rest)) => rest,
        None => after_fence,
    };
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_code_is_only_trimmed() {
        assert_eq!(strip_code_fences("  result = 1\n"), "result = 1");
    }

    #[test]
    fn fenced_code_with_language_tag_is_unwrapped() {
        let raw = "```python\nresult = df[\"age\"].mean()\n```";
        assert_eq!(strip_code_fences(raw), "result = df[\"age\"].mean()");
    }

    #[test]
    fn fenced_code_without_language_tag_is_unwrapped() {
        let raw = "```\nresult = 1\n```\n";
        assert_eq!(strip_code_fences(raw), "result = 1");
    }

    #[test]
    fn trailing_prose_after_the_fence_is_dropped() {
        let raw = "```python\nresult = 1\n```\nThis computes the answer.";
        assert_eq!(strip_code_fences(raw), "result = 1");
    }

    #[test]
    fn request_carries_system_contract_and_question() {
        let columns = vec!["age".to_string()];
        let messages = build_code_request("mean age?", &columns, None);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("mean age?"));
        assert!(messages[1].content.contains("Available columns: [age]"));
    }
}
