//! Ariadne-based rendering of frontend diagnostics.

use ariadne::{Color, Config, Label, Report, ReportKind, Source};
use vexel_common::diag::{Diagnostic, DiagnosticSink, Severity};
use vexel_common::source::SourceMap;

/// A sink that renders each diagnostic to stderr as it arrives and keeps
/// counts for the exit status.
#[derive(Default)]
pub struct RenderSink {
    pub errors: usize,
    pub warnings: usize,
    /// Disable colors (tests, dumb terminals).
    pub plain: bool,
}

impl RenderSink {
    pub fn new(plain: bool) -> Self {
        Self { plain, ..Self::default() }
    }
}

impl DiagnosticSink for RenderSink {
    fn report(&mut self, diagnostic: Diagnostic, sources: &SourceMap) {
        match diagnostic.severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Note => {}
        }
        eprint!("{}", render(&diagnostic, sources, self.plain));
    }
}

/// Render one diagnostic to a string.
pub fn render(diagnostic: &Diagnostic, sources: &SourceMap, plain: bool) -> String {
    let Some(span) = diagnostic.span else {
        let mut out = format!("{}: {}\n", diagnostic.severity, diagnostic.message);
        if let Some(hint) = &diagnostic.hint {
            out.push_str(&format!("  help: {hint}\n"));
        }
        return out;
    };

    let file = sources.get(span.file);
    let source = file.text.as_str();
    let location = sources.locate(span);

    // Clamp to a non-empty in-bounds range for ariadne.
    let len = source.len();
    let start = (span.start as usize).min(len);
    let end = (span.end as usize).min(len).max(start);
    let range = if start == end { start..(end + 1).min(len.max(1)) } else { start..end };

    let kind = match diagnostic.severity {
        Severity::Error => ReportKind::Error,
        Severity::Warning => ReportKind::Warning,
        Severity::Note => ReportKind::Advice,
    };
    let config = Config::default().with_color(!plain);

    let mut builder = Report::build(kind, range.clone())
        .with_message(&diagnostic.message)
        .with_config(config)
        .with_label(
            Label::new(range)
                .with_message(&diagnostic.message)
                .with_color(Color::Red),
        );
    if let Some(hint) = &diagnostic.hint {
        builder.set_help(hint);
    }

    let mut buf = Vec::new();
    builder
        .finish()
        .write(Source::from(source), &mut buf)
        .expect("failed to write diagnostic");
    format!(
        "{location}\n{}",
        String::from_utf8(buf).expect("diagnostic output should be valid UTF-8")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vexel_common::span::Span;

    #[test]
    fn renders_unlocated_plainly() {
        let sources = SourceMap::new();
        let out = render(&Diagnostic::error("cannot open `x.vx`", None), &sources, true);
        assert!(out.contains("error: cannot open `x.vx`"));
    }

    #[test]
    fn renders_span_with_snippet() {
        let mut sources = SourceMap::new();
        let file = sources.add("t.vx".into(), "&f() { 1 + \"x\" }".into());
        let diag = Diagnostic::error("type mismatch", Some(Span::new(file, 7, 14)));
        let out = render(&diag, &sources, true);
        assert!(out.contains("type mismatch"));
        assert!(out.contains("t.vx"));
    }
}
