use crate::span::Span;

/// A front-end diagnostic (error or warning) for malformed textual HIR.
///
/// The lowering core itself never produces diagnostics; it signals failure
/// through the metrics collector. Diagnostics belong to the reader and the
/// CLI surface around it.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Error, message.into(), span)
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Warning, message.into(), span)
    }

    fn new(severity: Severity, message: String, span: Span) -> Self {
        Self {
            severity,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let (kind, color) = match self.severity {
            Severity::Error => (ReportKind::Error, Color::Red),
            Severity::Warning => (ReportKind::Warning, Color::Yellow),
        };

        let mut report = Report::build(kind, filename, self.span.start as usize)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.start as usize..self.span.end as usize))
                    .with_message(&self.message)
                    .with_color(color),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        report
            .finish()
            .eprint((filename, Source::from(source)))
            .unwrap();
    }
}

/// Render diagnostics to stderr in source order. The reader's scan errors
/// and the builder's shape errors arrive as separate batches, so they are
/// sorted by position first.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    let mut ordered: Vec<&Diagnostic> = diagnostics.iter().collect();
    ordered.sort_by_key(|d| (d.span.start, d.span.end));
    for diag in ordered {
        diag.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let span = Span::new(0, 10, 15);
        let d = Diagnostic::error("unknown statement head `whlie`", span);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "unknown statement head `whlie`");
        assert_eq!(d.span.start, 10);
        assert_eq!(d.span.end, 15);
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_with_note_and_help() {
        let d = Diagnostic::error("unclosed form", Span::dummy())
            .with_note("opened here")
            .with_help("add a closing `)`")
            .with_note("while reading `fn main`");
        assert_eq!(d.notes.len(), 2);
        assert_eq!(d.notes[0], "opened here");
        assert_eq!(d.help.as_deref(), Some("add a closing `)`"));
    }

    #[test]
    fn test_render_does_not_panic() {
        let source = "(module\n  (fn main ()\n    (return (awit x))))\n";
        let d = Diagnostic::error("unknown expression head `awit`", Span::new(0, 33, 37))
            .with_help("did you mean `await`?");
        // Render to stderr, just verify it does not panic
        d.render("main.hir", source);
    }

    #[test]
    fn test_render_diagnostics_multiple() {
        let source = "(module (fn f () (expr x)) (fn g () (expr y)))\n";
        let diagnostics = vec![
            Diagnostic::warning("unused function `g`", Span::new(0, 27, 44)),
            Diagnostic::warning("unused function `f`", Span::new(0, 8, 25)),
        ];
        // Out-of-order input renders without panicking.
        render_diagnostics(&diagnostics, "main.hir", source);
    }
}
