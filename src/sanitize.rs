//! Document extraction from free-form model output.
//!
//! Models wrap documents in prose, markdown fences, or both, regardless of
//! instructions. Extraction is a fixed sequence of independent textual
//! searches rather than a parse:
//!
//! 1. trim surrounding whitespace;
//! 2. keep only the body of the first fenced block, if any fence closes;
//! 3. cut everything before `<!DOCTYPE html>`, or failing that before `<html`;
//! 4. flag the result if it still does not start with `<`.
//!
//! The result is always returned, flagged or not: a best-effort document is
//! more useful in the preview than no document.
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

pub const DOCTYPE_MARKER: &str = "<!DOCTYPE html>";
pub const HTML_TAG_MARKER: &str = "<html";

pub const CONVERSATIONAL_WARNING: &str = "Generated code might contain conversational text.";

// First fence only, non-greedy, with an optional language tag.
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[\w+.-]*\s*(.*?)```").expect("fence pattern compiles")
});

/// Which structural marker anchored the document start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    Doctype,
    HtmlTag,
    None,
}

/// Extraction result handed to the execution bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sanitized {
    pub document: String,
    /// Set when the document likely still carries conversational text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Whether a fenced block was unwrapped.
    pub fenced: bool,
    pub anchor: Anchor,
}

/// Extract a document from raw model output. Pure and deterministic.
pub fn sanitize(raw: &str) -> Sanitized {
    let mut text = raw.trim();

    let fenced = match FENCE_RE.captures(text).and_then(|caps| caps.get(1)) {
        Some(body) => {
            text = body.as_str();
            true
        }
        None => false,
    };

    let (start, anchor) = match find_ignore_ascii_case(text, DOCTYPE_MARKER) {
        Some(idx) => (idx, Anchor::Doctype),
        None => match find_ignore_ascii_case(text, HTML_TAG_MARKER) {
            Some(idx) => (idx, Anchor::HtmlTag),
            None => (0, Anchor::None),
        },
    };
    let document = text[start..].trim().to_string();

    let warning = if document.starts_with('<') {
        None
    } else {
        Some(CONVERSATIONAL_WARNING.to_string())
    };

    Sanitized {
        document,
        warning,
        fenced,
        anchor,
    }
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    // ASCII lowercasing keeps byte offsets stable.
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "<!DOCTYPE html>\n<html><body><canvas></canvas></body></html>";

    #[test]
    fn test_fenced_document_is_unwrapped() {
        let raw = format!("```html\n{DOC}\n```");
        let out = sanitize(&raw);
        assert_eq!(out.document, DOC);
        assert!(out.fenced);
        assert_eq!(out.anchor, Anchor::Doctype);
        assert!(out.warning.is_none());
    }

    #[test]
    fn test_fence_with_prose_around_it() {
        let raw = format!("Here is your game:\n\n```html\n{DOC}\n```\n\nEnjoy!");
        assert_eq!(sanitize(&raw).document, DOC);
    }

    #[test]
    fn test_untagged_fence() {
        let raw = format!("```\n{DOC}\n```");
        assert_eq!(sanitize(&raw).document, DOC);
    }

    #[test]
    fn test_only_first_fence_is_used() {
        let raw = "```html\n<html>first</html>\n```\nand also\n```html\n<html>second</html>\n```";
        let out = sanitize(raw);
        assert_eq!(out.document, "<html>first</html>");
        assert_eq!(out.anchor, Anchor::HtmlTag);
    }

    #[test]
    fn test_unclosed_fence_falls_through_to_markers() {
        let raw = format!("```html\n{DOC}");
        let out = sanitize(&raw);
        assert!(!out.fenced);
        assert_eq!(out.document, DOC);
    }

    #[test]
    fn test_preamble_before_doctype_is_dropped() {
        let raw = "Sure! Here's your game:\n<!DOCTYPE html><html><body></body></html>";
        let out = sanitize(raw);
        assert_eq!(out.document, "<!DOCTYPE html><html><body></body></html>");
        assert!(out.warning.is_none());
    }

    #[test]
    fn test_doctype_preferred_over_earlier_html_tag() {
        let raw = "I used an <html> root.\n<!DOCTYPE html><html></html>";
        assert_eq!(sanitize(raw).document, "<!DOCTYPE html><html></html>");
    }

    #[test]
    fn test_bare_html_tag_fallback() {
        let raw = "Okay.\n<html lang=\"en\"><head></head><body></body></html>";
        let out = sanitize(raw);
        assert_eq!(
            out.document,
            "<html lang=\"en\"><head></head><body></body></html>"
        );
        assert_eq!(out.anchor, Anchor::HtmlTag);
    }

    #[test]
    fn test_lowercase_doctype_is_recognized() {
        let raw = "text <!doctype html><html></html>";
        let out = sanitize(raw);
        assert_eq!(out.document, "<!doctype html><html></html>");
        assert_eq!(out.anchor, Anchor::Doctype);
    }

    #[test]
    fn test_unsalvageable_text_is_returned_with_warning() {
        let out = sanitize("  I cannot do that.\n");
        assert_eq!(out.document, "I cannot do that.");
        assert_eq!(out.anchor, Anchor::None);
        assert_eq!(out.warning.as_deref(), Some(CONVERSATIONAL_WARNING));
    }

    #[test]
    fn test_empty_response_warns() {
        let out = sanitize("");
        assert_eq!(out.document, "");
        assert!(out.warning.is_some());
    }

    #[test]
    fn test_fragment_without_markers_but_starting_with_tag() {
        let out = sanitize("<div>hi</div>");
        assert_eq!(out.document, "<div>hi</div>");
        assert!(out.warning.is_none());
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let raw = format!("Sure!\n```html\n{DOC}\n```");
        let once = sanitize(&raw);
        let twice = sanitize(&once.document);
        assert_eq!(once.document, twice.document);
    }

    #[test]
    fn test_non_ascii_preamble_keeps_offsets() {
        let raw = "好的，这是游戏：\n<!DOCTYPE html><html></html>";
        assert_eq!(sanitize(raw).document, "<!DOCTYPE html><html></html>");
    }
}
