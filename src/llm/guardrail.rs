//! Refusal-stripping guardrail filter (SPEC_FULL.md §4.F).

const REFUSAL_MARKERS: &[&str] = &[
    "i cannot assist",
    "i can't assist",
    "i cannot help with",
    "as an ai language model",
    "i'm not able to provide",
    "i am not able to provide",
    "i must decline",
];

/// Strips a refusal if it is the entire response; returns `None` in that
/// case. A refusal embedded in an otherwise useful response is left alone —
/// only a response that opens with boilerplate refusal language is treated
/// as content-free.
pub fn apply_guardrail(content: Option<String>) -> Option<String> {
    let content = content?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if REFUSAL_MARKERS.iter().any(|m| lower.starts_with(m)) {
        return None;
    }
    Some(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_whole_refusal() {
        assert_eq!(
            apply_guardrail(Some("I cannot assist with that request.".to_string())),
            None
        );
    }

    #[test]
    fn keeps_ordinary_content() {
        assert_eq!(
            apply_guardrail(Some("ACTION=WAGER".to_string())),
            Some("ACTION=WAGER".to_string())
        );
    }

    #[test]
    fn empty_content_is_none() {
        assert_eq!(apply_guardrail(Some("   ".to_string())), None);
        assert_eq!(apply_guardrail(None), None);
    }
}
