#![forbid(unsafe_code)]

//! Fenced-code highlighting via `syntect` classed HTML.
//!
//! The generator only ever sees the literal fence text and emits class-based
//! spans, so highlighted output carries no unescaped user content.

use std::sync::LazyLock;

use syntect::html::{ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;

static SYNTAXES: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);

/// Highlight `code` for the given language hint.
///
/// Returns `None` when the language is unrecognized or highlighting fails;
/// the caller falls back to a plain escaped block.
#[must_use]
pub fn highlight(code: &str, language: Option<&str>) -> Option<String> {
    let token = language?.trim();
    if token.is_empty() {
        return None;
    }

    let syntax = SYNTAXES.find_syntax_by_token(token)?;
    let mut generator =
        ClassedHTMLGenerator::new_with_class_style(syntax, &SYNTAXES, ClassStyle::Spaced);
    for line in LinesWithEndings::from(code) {
        if generator
            .parse_html_for_line_which_includes_newline(line)
            .is_err()
        {
            return None;
        }
    }

    Some(generator.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlights_known_language() {
        let html = highlight("let x = 1;\n", Some("rs"));
        assert!(html.is_some());
        let html = html.unwrap_or_default();
        assert!(html.contains("<span"));
        assert!(html.contains("let"));
    }

    #[test]
    fn unknown_language_falls_back() {
        assert!(highlight("whatever\n", Some("no-such-language-xyz")).is_none());
        assert!(highlight("whatever\n", None).is_none());
        assert!(highlight("whatever\n", Some("  ")).is_none());
    }

    #[test]
    fn output_escapes_markup_in_code() {
        let html = highlight("<script>alert(1)</script>\n", Some("html"));
        let html = html.unwrap_or_default();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;") || html.contains("&lt;"));
    }
}
