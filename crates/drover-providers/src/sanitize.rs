use std::sync::OnceLock;

use regex::Regex;

fn think_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("static regex"))
}

/// Remove `<think>...</think>` reasoning blocks (multi-line included) from
/// model output before it is persisted or chained downstream.
pub fn strip_think_tags(output: &str) -> String {
    think_tag_pattern().replace_all(output, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_block() {
        assert_eq!(strip_think_tags("<think>hmm</think>4"), "4");
    }

    #[test]
    fn strips_multiline_and_multiple_blocks() {
        let raw = "<think>line one\nline two</think>answer<think>more</think> tail";
        assert_eq!(strip_think_tags(raw), "answer tail");
    }

    #[test]
    fn stripping_is_idempotent() {
        let raw = "<think>a</think>result\n<think>b\nc</think>";
        let once = strip_think_tags(raw);
        assert_eq!(strip_think_tags(&once), once);
    }

    #[test]
    fn untagged_output_is_trimmed_only() {
        assert_eq!(strip_think_tags("  plain answer \n"), "plain answer");
    }

    #[test]
    fn unclosed_tag_is_left_alone() {
        assert_eq!(strip_think_tags("<think>oops"), "<think>oops");
    }
}
