#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

use crate::ast::Span;

/// Keys accepted inside an `analysis { }` block.
pub const ANALYSIS_KEYS: &[&str] = &[
    "clustering",
    "cluster_size",
    "relational_width",
    "path_sensitivity",
    "max_rounds",
    "widen_after",
    "workers",
    "domain",
];

#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("Syntax error: {message}")]
    #[diagnostic(code(lockmeet::parse::syntax))]
    Syntax {
        message: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Integer literal out of range: {literal}")]
    #[diagnostic(code(lockmeet::parse::int_range))]
    IntegerOutOfRange {
        literal: String,
        #[label("does not fit in i64")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Unknown analysis key '{field}'")]
    #[diagnostic(
        code(lockmeet::parse::invalid_field),
        help("valid keys are: clustering, cluster_size, relational_width, path_sensitivity, max_rounds, widen_after, workers, domain")
    )]
    InvalidField {
        field: String,
        #[label("unknown key")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },
}

impl ParseError {
    pub fn syntax(message: impl Into<String>, span: Span, source: &str, filename: &str) -> Self {
        ParseError::Syntax {
            message: message.into(),
            span: to_source_span(span),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }

    /// Attach source text and filename to variants built from raw offsets.
    pub fn with_source_context(self, source: &str, filename: &str) -> Self {
        let src = miette::NamedSource::new(filename, source.to_owned());
        match self {
            ParseError::Syntax { message, span, .. } => ParseError::Syntax { message, span, src },
            ParseError::IntegerOutOfRange { literal, span, .. } => {
                ParseError::IntegerOutOfRange { literal, span, src }
            }
            ParseError::InvalidField { field, span, .. } => {
                ParseError::InvalidField { field, span, src }
            }
        }
    }
}

pub(crate) fn to_source_span(span: Span) -> miette::SourceSpan {
    (span.start, span.end.saturating_sub(span.start)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_message_includes_text() {
        let err = ParseError::syntax("expected ';'", Span::new(3, 4), "abc;", "t.lmt");
        assert_eq!(err.to_string(), "Syntax error: expected ';'");
    }

    #[test]
    fn with_source_context_keeps_variant() {
        let err = ParseError::InvalidField {
            field: "depth".into(),
            span: to_source_span(Span::new(0, 5)),
            src: miette::NamedSource::new("", String::new()),
        }
        .with_source_context("depth: 3;", "x.lmt");
        assert!(matches!(err, ParseError::InvalidField { ref field, .. } if field == "depth"));
    }

    #[test]
    fn analysis_keys_are_unique() {
        let mut keys = ANALYSIS_KEYS.to_vec();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), ANALYSIS_KEYS.len());
    }
}
