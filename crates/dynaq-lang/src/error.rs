//! Error types for parsing, compilation and evaluation.

use crate::span::{annotate, offset_to_line_col, Span, EXCERPT_CONTEXT_LINES};
use thiserror::Error;

/// Render the shared diagnostic layout: headline, location and excerpt.
fn render(headline: &str, span: Span, source: &str, hint: Option<&str>) -> String {
    let (line, col) = offset_to_line_col(source, span.start);
    let mut result = format!("{}\n  --> line {}:{}\n", headline, line, col);
    result.push_str(&annotate(source, span, EXCERPT_CONTEXT_LINES));
    if let Some(hint) = hint {
        result.push_str(&format!("   = hint: {}\n", hint));
    }
    result
}

/// Error during lexing/parsing.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl ParseError {
    /// Create a new parse error.
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            hint: None,
        }
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        render(
            &format!("error: {}", self.message),
            self.span,
            source,
            self.hint.as_deref(),
        )
    }
}

/// Kinds of compilation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Assignment or loop variable uses a reserved name.
    ReservedName,
    /// A constant expression failed to evaluate.
    ConstantEvaluation,
}

/// Error during compilation (AST to executable template).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CompileError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Error kind for programmatic handling.
    pub kind: CompileErrorKind,
}

impl CompileError {
    /// Create a new compile error.
    pub fn new(message: impl Into<String>, span: Span, kind: CompileErrorKind) -> Self {
        Self {
            message: message.into(),
            span,
            kind,
        }
    }

    /// Create a reserved name error.
    pub fn reserved_name(name: &str, span: Span) -> Self {
        Self::new(
            format!("'{}' is reserved and cannot be assigned", name),
            span,
            CompileErrorKind::ReservedName,
        )
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        render(
            &format!("error[{:?}]: {}", self.kind, self.message),
            self.span,
            source,
            None,
        )
    }
}

/// Kinds of evaluation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// Operand types do not support the operation.
    TypeMismatch,
    /// Division or remainder by zero.
    DivisionByZero,
    /// Call to a name that is not bound to a function.
    UnknownFunction,
    /// A bound function rejected its arguments.
    FunctionFailed,
    /// A name was bound twice into the same environment.
    NameConflict,
    /// A value was iterated that is not a list or map.
    NotIterable,
}

/// Error during template or expression evaluation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvalError {
    /// The error message.
    pub message: String,
    /// Source span of the failing expression.
    pub span: Span,
    /// Error kind for programmatic handling.
    pub kind: EvalErrorKind,
}

impl EvalError {
    /// Create a new evaluation error.
    pub fn new(message: impl Into<String>, span: Span, kind: EvalErrorKind) -> Self {
        Self {
            message: message.into(),
            span,
            kind,
        }
    }

    /// Create a name conflict error (no source location).
    pub fn name_conflict(name: &str) -> Self {
        Self::new(
            format!("name '{}' is already bound", name),
            Span::default(),
            EvalErrorKind::NameConflict,
        )
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        render(
            &format!("error[{:?}]: {}", self.kind, self.message),
            self.span,
            source,
            None,
        )
    }
}

/// A combined error type for the public API.
#[derive(Debug, Clone, Error)]
pub enum LangError {
    /// Parse error.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    /// Compile error.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    /// Evaluation error.
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),
}

impl LangError {
    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        match self {
            LangError::Parse(e) => e.format_with_source(source),
            LangError::Compile(e) => e.format_with_source(source),
            LangError::Eval(e) => e.format_with_source(source),
        }
    }

    /// Get the span of the error.
    pub fn span(&self) -> Span {
        match self {
            LangError::Parse(e) => e.span,
            LangError::Compile(e) => e.span,
            LangError::Eval(e) => e.span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting() {
        let source = "SELECT *\nWHERE status = ${ status = 1 }";
        let err = ParseError::new("expected '}' but found '='", Span::new(34, 35))
            .with_hint("use '==' for equality comparison");

        let formatted = err.format_with_source(source);
        assert!(formatted.contains("line 2:26"));
        assert!(formatted.contains("expected '}' but found '='"));
        assert!(formatted.contains("hint: use '==' for equality"));
        assert!(formatted.contains(">   2 | WHERE status"));
    }

    #[test]
    fn test_lang_error_span() {
        let err: LangError = EvalError::new("boom", Span::new(3, 4), EvalErrorKind::TypeMismatch).into();
        assert_eq!(err.span(), Span::new(3, 4));
        assert!(err.to_string().starts_with("evaluation error"));
    }
}
