//! Response-quality detectors.
//!
//! Small local models fail in recognisable ways: empty output, pure
//! `<think>` reasoning with no answer, or a switch into another script
//! mid-session. Each detector maps a raw response to an
//! [`UnusableKind`] so the executor can retry on the next ladder rung.

use crate::domain::errors::UnusableKind;

/// Minimum usable answer length after stripping thinking spans.
pub const MIN_TEXT: usize = 50;

/// Remove `<think>…</think>` spans, including an unterminated trailing
/// span.
pub fn strip_thinking(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end_rel) => {
                rest = &rest[start + end_rel + "</think>".len()..];
            }
            None => {
                // Unterminated span swallows the remainder.
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Whether the text contains a thinking span.
fn has_thinking_span(text: &str) -> bool {
    text.contains("<think>")
}

/// Run the per-response detectors.
///
/// `None` means the response is usable. Consecutive-empty tracking is
/// the executor's job; this function is stateless.
pub fn assess(response: &str, has_tool_calls: bool) -> Option<UnusableKind> {
    if has_tool_calls {
        // A tool call is a usable response regardless of text content.
        return None;
    }

    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Some(UnusableKind::Empty);
    }

    if has_thinking_span(trimmed) {
        let remainder = strip_thinking(trimmed);
        if remainder.trim().len() < MIN_TEXT {
            return Some(UnusableKind::ThinkingOnly);
        }
    }

    let visible = strip_thinking(trimmed);
    if let Some(first) = visible.trim().chars().next() {
        if !first.is_ascii() {
            return Some(UnusableKind::CorruptLang);
        }
    }

    None
}

/// Tracks empty responses across loop iterations; two in a row force
/// termination and mark the task for escalation.
#[derive(Debug, Default)]
pub struct EmptyStreak {
    count: u32,
}

impl EmptyStreak {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the detector outcome for one iteration and report whether
    /// the consecutive-empty threshold has been hit.
    pub fn observe(&mut self, outcome: Option<UnusableKind>) -> Option<UnusableKind> {
        match outcome {
            Some(UnusableKind::Empty) => {
                self.count += 1;
                if self.count >= 2 {
                    return Some(UnusableKind::ConsecutiveEmpty);
                }
                Some(UnusableKind::Empty)
            }
            other => {
                self.count = 0;
                other
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_thinking_spans() {
        let text = "<think>internal reasoning</think>The answer is 42.";
        assert_eq!(strip_thinking(text), "The answer is 42.");

        let multi = "<think>a</think>x<think>b</think>y";
        assert_eq!(strip_thinking(multi), "xy");

        let unterminated = "prefix<think>never closed";
        assert_eq!(strip_thinking(unterminated), "prefix");
    }

    #[test]
    fn test_empty_detector() {
        assert_eq!(assess("", false), Some(UnusableKind::Empty));
        assert_eq!(assess("   \n\t ", false), Some(UnusableKind::Empty));
    }

    #[test]
    fn test_tool_call_suppresses_detectors() {
        assert_eq!(assess("", true), None);
        assert_eq!(assess("<think>only thinking</think>", true), None);
    }

    #[test]
    fn test_thinking_only_detector() {
        let thinking_only = "<think>long internal monologue that goes on</think>";
        assert_eq!(assess(thinking_only, false), Some(UnusableKind::ThinkingOnly));

        let short_remainder = "<think>deliberation</think>ok";
        assert_eq!(assess(short_remainder, false), Some(UnusableKind::ThinkingOnly));

        let substantial = format!("<think>brief</think>{}", "a".repeat(MIN_TEXT + 1));
        assert_eq!(assess(&substantial, false), None);
    }

    #[test]
    fn test_short_answer_without_thinking_is_usable() {
        // MIN_TEXT applies to the thinking-only detector, not to plain
        // short answers.
        assert_eq!(assess("42", false), None);
    }

    #[test]
    fn test_corrupt_language_detector() {
        assert_eq!(assess("你好，我来帮你处理这个任务", false), Some(UnusableKind::CorruptLang));
        assert_eq!(assess("Привет, вот ответ", false), Some(UnusableKind::CorruptLang));
        let ok = "Hello, the files are processed. All 12 documents were imported successfully.";
        assert_eq!(assess(ok, false), None);
    }

    #[test]
    fn test_corrupt_language_ignores_thinking_prefix() {
        let text = format!(
            "<think>思考中</think>The visible answer is in English and long enough {}",
            "x".repeat(MIN_TEXT)
        );
        assert_eq!(assess(&text, false), None);
    }

    #[test]
    fn test_consecutive_empty_streak() {
        let mut streak = EmptyStreak::new();
        assert_eq!(streak.observe(Some(UnusableKind::Empty)), Some(UnusableKind::Empty));
        assert_eq!(
            streak.observe(Some(UnusableKind::Empty)),
            Some(UnusableKind::ConsecutiveEmpty)
        );

        // Any non-empty outcome resets the streak.
        let mut streak = EmptyStreak::new();
        streak.observe(Some(UnusableKind::Empty));
        assert_eq!(streak.observe(None), None);
        assert_eq!(streak.observe(Some(UnusableKind::Empty)), Some(UnusableKind::Empty));
    }
}
