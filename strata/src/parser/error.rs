use std::fmt;
use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label, Severity};

/// A compilation failure with a pointer into the template source.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    /// Resolved identity of the template, `None` for anonymous sources.
    pub identity: Option<String>,
    /// Byte span in the template source.
    pub span: Range<usize>,
    /// 1-based line of the span start.
    pub line: usize,
    pub file_id: usize,
    pub notes: Vec<String>,
    /// Generated host code, attached when the failure happened after emission.
    pub intermediate: Option<String>,
}

impl CompileError {
    pub fn error(message: impl Into<String>, span: Range<usize>, line: usize) -> Self {
        CompileError {
            message: message.into(),
            identity: None,
            span,
            line,
            file_id: 0,
            notes: Vec::new(),
            intermediate: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_identity(mut self, identity: Option<&str>) -> Self {
        self.identity = identity.map(str::to_string);
        self
    }

    pub fn with_file_id(mut self, file_id: usize) -> Self {
        self.file_id = file_id;
        self
    }

    pub fn with_intermediate(mut self, code: impl Into<String>) -> Self {
        self.intermediate = Some(code.into());
        self
    }

    /// Convert to a codespan-reporting Diagnostic for display.
    pub fn to_diagnostic(&self) -> Diagnostic<usize> {
        let mut notes = self.notes.clone();
        if let Some(code) = &self.intermediate {
            notes.push(format!("generated code:\n{}", code));
        }
        Diagnostic::new(Severity::Error)
            .with_message(&self.message)
            .with_labels(vec![Label::primary(self.file_id, self.span.clone())])
            .with_notes(notes)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.message,
            self.identity.as_deref().unwrap_or("<anonymous>"),
            self.line
        )
    }
}

impl std::error::Error for CompileError {}
