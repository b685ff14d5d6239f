#![forbid(unsafe_code)]

//! `$…$` / `$$…$$` typesetting via `pulldown-latex` → MathML.

use pulldown_latex::config::{DisplayMode, RenderConfig};
use pulldown_latex::mathml::push_mathml;
use pulldown_latex::{Parser, Storage};

/// Result of typesetting one math expression.
pub enum MathOutcome {
    /// MathML markup ready for splicing.
    Mathml(String),
    /// The expression did not typeset; the document render continues and the
    /// caller shows the escaped literal source with this message.
    Error(String),
}

/// Typeset one expression (without its `$` delimiters).
#[must_use]
pub fn typeset(expression: &str, display: bool) -> MathOutcome {
    let storage = Storage::new();
    let parser = Parser::new(expression, &storage);
    let config = RenderConfig {
        display_mode: if display {
            DisplayMode::Block
        } else {
            DisplayMode::Inline
        },
        ..RenderConfig::default()
    };

    let events: Vec<_> = parser.collect();
    let errors: Vec<String> = events
        .iter()
        .filter_map(|event| event.as_ref().err().map(ToString::to_string))
        .collect();
    if !errors.is_empty() {
        return MathOutcome::Error(errors.join("; "));
    }

    let mut mathml = String::new();
    match push_mathml(&mut mathml, events.into_iter(), config) {
        Ok(()) => MathOutcome::Mathml(mathml),
        Err(err) => MathOutcome::Error(err.to_string()),
    }
}

/// The error message for an expression, or `None` when it typesets cleanly.
#[must_use]
pub fn typeset_error(expression: &str, display: bool) -> Option<String> {
    match typeset(expression, display) {
        MathOutcome::Mathml(_) => None,
        MathOutcome::Error(message) => Some(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_expression_produces_mathml() {
        let MathOutcome::Mathml(mathml) = typeset("x^2 + 1", false) else {
            unreachable!("expected mathml");
        };
        assert!(mathml.contains("<math"));
    }

    #[test]
    fn display_mode_is_block() {
        let MathOutcome::Mathml(mathml) = typeset("\\sum_{i=0}^n i", true) else {
            unreachable!("expected mathml");
        };
        assert!(mathml.contains("display=\"block\"") || mathml.contains("<math"));
    }

    #[test]
    fn broken_expression_reports_error() {
        assert!(typeset_error("\\frac{1}", false).is_some());
        assert!(typeset_error("x + 1", false).is_none());
    }
}
