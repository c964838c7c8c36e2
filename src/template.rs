//! Placeholder scanning for card templates.
//!
//! This is a plain delimiter scan, not a template engine: section tags such as
//! `{{#Back}}` or filtered fields such as `{{text:Back}}` never match a field
//! name and are skipped.

use std::collections::HashSet;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Fields referenced by `{{Name}}` placeholders in `template_text`, in order of
/// appearance, restricted to `known_fields`.
///
/// Duplicates are kept. An opening `{{` without a matching `}}` ends the scan.
pub fn extract_referenced_fields(
    template_text: &str,
    known_fields: &HashSet<String>,
) -> Vec<String> {
    let mut fields = Vec::new();
    let mut start = 0;

    while let Some(offset) = template_text[start..].find(OPEN) {
        let open = start + offset;
        let Some(close_offset) = template_text[open..].find(CLOSE) else {
            break;
        };
        let close = open + close_offset;

        let inner = &template_text[open + OPEN.len()..close];
        if known_fields.contains(inner) {
            fields.push(inner.to_string());
        }

        start = close + CLOSE.len();
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_field() {
        let fields = extract_referenced_fields("{{Back}}", &known(&["Back"]));
        assert_eq!(fields, vec!["Back"]);
    }

    #[test]
    fn test_order_and_duplicates() {
        let fields = extract_referenced_fields(
            "{{Audio}}<br>{{Front}} {{Back}} {{Audio}}",
            &known(&["Audio", "Back"]),
        );
        assert_eq!(fields, vec!["Audio", "Back", "Audio"]);
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let fields = extract_referenced_fields("{{FrontSide}}<hr>{{Notes}}", &known(&["Back"]));
        assert!(fields.is_empty());
    }

    #[test]
    fn test_section_and_filter_syntax_ignored() {
        let fields = extract_referenced_fields(
            "{{#Back}}{{text:Back}}{{/Back}}{{ Back }}",
            &known(&["Back"]),
        );
        assert!(fields.is_empty());
    }

    #[test]
    fn test_unclosed_placeholder_stops_scan() {
        let fields =
            extract_referenced_fields("{{Back}} {{Front {{Audio}}", &known(&["Back", "Audio"]));
        // "{{Front {{Audio" is one span whose inner text matches nothing.
        assert_eq!(fields, vec!["Back"]);

        let fields = extract_referenced_fields("{{Back}} {{Audio", &known(&["Back", "Audio"]));
        assert_eq!(fields, vec!["Back"]);
    }

    #[test]
    fn test_empty_and_plain_text() {
        assert!(extract_referenced_fields("", &known(&["Back"])).is_empty());
        assert!(extract_referenced_fields("no placeholders here", &known(&["Back"])).is_empty());
        assert!(extract_referenced_fields("{{}}", &known(&["Back"])).is_empty());
    }

    #[test]
    fn test_non_ascii_text_around_placeholders() {
        let fields = extract_referenced_fields("日本語 {{Back}} – ü", &known(&["Back"]));
        assert_eq!(fields, vec!["Back"]);
    }
}
