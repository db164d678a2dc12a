//! The diagnostic model shared by every pass.
//!
//! All recoverable failures in the frontend are a single structured error
//! kind, [`CompileError`], carrying a message and an optional source span.
//! Pass code converts it into a [`Diagnostic`] for the caller-provided
//! [`DiagnosticSink`]; compilation aborts on the first error while warnings
//! accumulate.

use std::fmt;

use serde::Serialize;

use crate::span::Span;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A single diagnostic: severity, message, optional location and hint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Option<Span>) -> Self {
        Self { severity: Severity::Error, message: message.into(), span, hint: None }
    }

    pub fn warning(message: impl Into<String>, span: Option<Span>) -> Self {
        Self { severity: Severity::Warning, message: message.into(), span, hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// The single structured recoverable-error kind of the frontend.
///
/// Categories (load/parse, resolution, annotation, type, compile-time,
/// analysis) are message conventions, not distinct types. Internal pass
/// invariant violations use [`CompileError::internal`] and carry an
/// "internal error" prefix; those are compiler bugs, not user errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompileError {
    pub message: String,
    pub span: Option<Span>,
    pub hint: Option<String>,
}

impl CompileError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self { message: message.into(), span: Some(span), hint: None }
    }

    /// An error with no usable source location (e.g. a missing entry file).
    pub fn unlocated(message: impl Into<String>) -> Self {
        Self { message: message.into(), span: None, hint: None }
    }

    /// A pass-invariant violation. These abort compilation like any other
    /// error but identify themselves as frontend bugs.
    pub fn internal(message: impl Into<String>, span: Option<Span>) -> Self {
        Self { message: format!("internal error: {}", message.into()), span, hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_internal(&self) -> bool {
        self.message.starts_with("internal error:")
    }

    pub fn into_diagnostic(self) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            message: self.message,
            span: self.span,
            hint: self.hint,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CompileError {}

/// Receives diagnostics from the pipeline.
///
/// The driver installs a rendering sink (which needs the source map to
/// show snippets); tests use [`VecSink`] to inspect what was reported.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic, sources: &crate::source::SourceMap);
}

/// A sink that simply collects diagnostics in order.
#[derive(Debug, Default)]
pub struct VecSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Warning)
    }
}

impl DiagnosticSink for VecSink {
    fn report(&mut self, diagnostic: Diagnostic, _sources: &crate::source::SourceMap) {
        self.diagnostics.push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{FileId, Span};

    #[test]
    fn internal_errors_are_prefixed() {
        let err = CompileError::internal("missing binding", None);
        assert!(err.is_internal());
        assert!(err.to_string().starts_with("internal error:"));
    }

    #[test]
    fn sink_separates_severities() {
        let mut sink = VecSink::new();
        let sources = crate::source::SourceMap::new();
        sink.report(Diagnostic::warning("w", None), &sources);
        sink.report(Diagnostic::error("e", Some(Span::new(FileId(0), 0, 1))), &sources);
        assert_eq!(sink.errors().count(), 1);
        assert_eq!(sink.warnings().count(), 1);
    }

    #[test]
    fn hint_round_trip() {
        let d = Diagnostic::error("bad", None).with_hint("try a cast");
        assert_eq!(d.hint.as_deref(), Some("try a cast"));
    }
}
