// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

/// Sanitize one path segment to the grammar `[a-z_][a-z0-9_]*` (/// "Tool path grammar"): non-matching characters collapsed to `_`, a
/// leading `_` prepended if the first character is a digit, and the empty
/// segment replaced with `"default"`.
pub fn sanitize_segment(raw: &str) -> String {
    if raw.is_empty() {
        return "default".to_string();
    }

    let mut out: String = raw
        .chars()
        .map(|c| {
            let lower = c.to_ascii_lowercase();
            if lower.is_ascii_lowercase() || lower.is_ascii_digit() || lower == '_' {
                lower
            } else {
                '_'
            }
        })
        .collect();

    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }

    if out.is_empty() {
        "default".to_string()
    } else {
        out
    }
}

/// Build a dotted, source-prefixed tool path from sanitized segments
/// (spec §4.5: `path = <sanitize(sourceName)>.<sanitize(remoteName)>`).
pub fn join_segments(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| sanitize_segment(s))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_matching_characters_collapse_to_underscore() {
        assert_eq!(sanitize_segment("My Tool!"), "my_tool_");
    }

    #[test]
    fn leading_digit_gets_underscore_prefixed() {
        assert_eq!(sanitize_segment("123abc"), "_123abc");
    }

    #[test]
    fn empty_segment_becomes_default() {
        assert_eq!(sanitize_segment(""), "default");
    }

    #[test]
    fn all_metacharacters_collapse_but_segment_stays_non_empty() {
        assert_eq!(sanitize_segment("***"), "___");
    }

    #[test]
    fn join_segments_produces_a_dotted_path() {
        assert_eq!(join_segments(&["Demo Source", "Ping Tool"]), "demo_source.ping_tool");
    }
}
