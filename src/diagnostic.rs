//! Diagnostic types for error reporting.
//!
//! Diagnostics are accumulated across the whole pipeline and never
//! discarded; an error-severity diagnostic recorded by any stage stops the
//! compile from progressing past that stage.

use crate::source::{SourceMap, Span};
use serde::Serialize;
use std::fmt;

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// Classification of a diagnostic, mirroring the compile failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Code {
    /// Type mismatch, bad operand, invalid assignment.
    Type,
    /// Construct rejected under the configured target rules.
    UnsupportedConstruct,
    /// Built-in overload resolution matched more than one candidate.
    AmbiguousOverload,
    /// Two resources share a (set, binding) pair.
    BindingCollision,
    /// Undeclared identifier, redefinition, bad call.
    Resolve,
    /// Stage interface or entry point problem.
    Stage,
    /// Preprocessor directive problem.
    Preprocess,
    /// Syntax error (from the parser).
    Syntax,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Code::Type => "type",
            Code::UnsupportedConstruct => "unsupported",
            Code::AmbiguousOverload => "ambiguous-overload",
            Code::BindingCollision => "binding-collision",
            Code::Resolve => "resolve",
            Code::Stage => "stage",
            Code::Preprocess => "preprocess",
            Code::Syntax => "syntax",
        };
        write!(f, "{}", s)
    }
}

/// A single diagnostic message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
    pub code: Option<Code>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            span: None,
            code: None,
            notes: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            span: None,
            code: None,
            notes: Vec::new(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_code(mut self, code: Code) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Render the diagnostic with source context.
    pub fn render(&self, source_map: &SourceMap) -> String {
        let mut output = String::new();

        let severity_str = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };

        if let Some(code) = self.code {
            output.push_str(&format!("{}[{}]: {}\n", severity_str, code, self.message));
        } else {
            output.push_str(&format!("{}: {}\n", severity_str, self.message));
        }

        if let Some(span) = self.span {
            if let Some(source) = source_map.get(span.source) {
                let (line, col) = source.line_col(span.start);
                output.push_str(&format!("  --> {}:{}:{}\n", source.name(), line, col));
                output.push_str(&source.snippet(line, 1));
                output.push('\n');
            }
        }

        for note in &self.notes {
            output.push_str(&format!("  = note: {}\n", note));
        }

        output
    }
}

/// A collection of diagnostics, accumulated in emission order.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::error(message).with_span(span));
    }

    pub fn error_with_code(&mut self, code: Code, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::error(message).with_span(span).with_code(code));
    }

    pub fn warning(&mut self, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::warning(message).with_span(span));
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// True if any diagnostic carries the given code.
    pub fn has_code(&self, code: Code) -> bool {
        self.diagnostics.iter().any(|d| d.code == Some(code))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// Render all diagnostics.
    pub fn render(&self, source_map: &SourceMap) -> String {
        self.diagnostics
            .iter()
            .map(|d| d.render(source_map))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diag in &self.diagnostics {
            writeln!(
                f,
                "{}: {}",
                match diag.severity {
                    Severity::Error => "error",
                    Severity::Warning => "warning",
                    Severity::Note => "note",
                },
                diag.message
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceId, SourceMap};

    #[test]
    fn test_has_errors() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_errors());

        diags.push(Diagnostic::warning("unused uniform"));
        assert!(!diags.has_errors());

        diags.push(Diagnostic::error("type mismatch").with_code(Code::Type));
        assert!(diags.has_errors());
        assert_eq!(diags.error_count(), 1);
        assert!(diags.has_code(Code::Type));
        assert!(!diags.has_code(Code::BindingCollision));
    }

    #[test]
    fn test_render_with_span() {
        let mut map = SourceMap::new();
        let id = map.add_inline("void main() {\n    x = 1;\n}\n");
        assert_eq!(id, SourceId(0));

        let mut diags = Diagnostics::new();
        diags.error_with_code(Code::Resolve, Span::new(id, 18, 19), "undeclared identifier `x`");

        let rendered = diags.render(&map);
        assert!(rendered.contains("error[resolve]"));
        assert!(rendered.contains(":2:5"));
    }
}
