//! Locates `$(...)` shell-command markers inside free-form prompt text.
//!
//! Matching is non-greedy and never recurses: a nested `$(` is plain text up
//! to the first closing `)`. Nothing here executes anything.

use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;

const MARKER_PATTERN: &str = r"\$\((.*?)\)";

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(MARKER_PATTERN).expect("marker pattern is a valid regex"))
}

/// Every command found between marker pairs, left to right, duplicates kept
pub fn extract_commands(text: &str) -> Vec<String> {
    marker_regex()
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// The literal marker text `$(command)` that stands for `command` in a prompt
pub fn marker(command: &str) -> String {
    format!("$({})", command)
}

/// Remove repeated commands while keeping the order they were first seen in
pub fn distinct_commands(commands: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    commands
        .iter()
        .filter(|command| seen.insert(command.as_str()))
        .cloned()
        .collect()
}

/// Rewrite each marker occurrence in a single left-to-right pass.
///
/// `replace` receives the command text of each match; text between matches is
/// copied through untouched and replacements are never re-scanned.
pub fn replace_markers<F>(text: &str, mut replace: F) -> String
where
    F: FnMut(&str) -> String,
{
    marker_regex()
        .replace_all(text, |caps: &Captures| replace(&caps[1]))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_markers_yields_nothing() {
        assert!(extract_commands("just a question").is_empty());
        assert!(extract_commands("").is_empty());
        assert!(extract_commands("costs $5 (roughly)").is_empty());
    }

    #[test]
    fn test_extracts_in_order_with_duplicates() {
        let commands = extract_commands("a $(date) b $(uname -a) c $(date)");
        assert_eq!(commands, vec!["date", "uname -a", "date"]);
    }

    #[test]
    fn test_keeps_whitespace_and_allows_empty() {
        let commands = extract_commands("$( ls  ) and $()");
        assert_eq!(commands, vec![" ls  ", ""]);
    }

    #[test]
    fn test_nested_marker_stops_at_first_close() {
        let commands = extract_commands("$(echo $(nested))");
        assert_eq!(commands, vec!["echo $(nested"]);
    }

    #[test]
    fn test_adjacent_markers_do_not_overlap() {
        let commands = extract_commands("$(a)$(b)");
        assert_eq!(commands, vec!["a", "b"]);
    }

    #[test]
    fn test_marker_does_not_span_lines() {
        assert!(extract_commands("$(echo\nhi)").is_empty());
    }

    #[test]
    fn test_distinct_commands_preserves_first_seen_order() {
        let commands = vec![
            "pwd".to_string(),
            "date".to_string(),
            "pwd".to_string(),
            "ls".to_string(),
            "date".to_string(),
        ];
        assert_eq!(distinct_commands(&commands), vec!["pwd", "date", "ls"]);
    }

    #[test]
    fn test_replace_markers_single_pass() {
        let out = replace_markers("x $(a) y $(b) z $(a)", |cmd| format!("[{}]", cmd));
        assert_eq!(out, "x [a] y [b] z [a]");

        // Replacement output that looks like a marker is left alone.
        let out = replace_markers("$(a) $(b)", |cmd| {
            if cmd == "a" {
                "$(b)".to_string()
            } else {
                "B".to_string()
            }
        });
        assert_eq!(out, "$(b) B");
    }

    #[test]
    fn test_replace_nested_leaves_trailing_paren() {
        let out = replace_markers("$(echo $(nested))", |_| "R".to_string());
        assert_eq!(out, "R)");
    }

    #[test]
    fn test_marker_round_trips_extraction() {
        let text = format!("see {}", marker("git status"));
        assert_eq!(extract_commands(&text), vec!["git status"]);
    }
}
