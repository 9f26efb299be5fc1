//! Source location tracking and line-annotated excerpts for diagnostics.

/// A span representing a byte range in the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Start byte offset.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

impl Span {
    /// Create a new span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Create a span covering two spans.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Get the length of the span.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if the span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span {
            start: range.start,
            end: range.end,
        }
    }
}

/// A value with an associated source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    /// The value.
    pub value: T,
    /// The source span.
    pub span: Span,
}

impl<T> Spanned<T> {
    /// Create a new spanned value.
    pub fn new(value: T, span: Span) -> Self {
        Self { value, span }
    }
}

/// Convert byte offset to 1-based line/column.
pub fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;

    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }

        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

/// Number of surrounding lines shown around an offending line range.
pub const EXCERPT_CONTEXT_LINES: usize = 2;

/// Render the lines touched by `span`, plus `context` lines on either side,
/// with line numbers. Offending lines are marked with `>` and a single-line
/// span is underlined.
///
/// ```text
///    1 | SELECT *
/// >  2 | WHERE id = ${ P(id }
///      |             ^^^^^^^^
///    3 | ORDER BY id
/// ```
pub fn annotate(source: &str, span: Span, context: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return String::new();
    }

    let (start_line, start_col) = offset_to_line_col(source, span.start);
    let (end_line, _) = offset_to_line_col(source, span.end.max(span.start));
    let start_line = start_line.min(lines.len());
    let end_line = end_line.clamp(start_line, lines.len());

    let first = start_line.saturating_sub(context).max(1);
    let last = (end_line + context).min(lines.len());
    let width = last.to_string().len().max(3);

    let mut out = String::new();
    for number in first..=last {
        let text = lines[number - 1];
        let marker = if (start_line..=end_line).contains(&number) {
            '>'
        } else {
            ' '
        };
        out.push_str(&format!("{} {:>width$} | {}\n", marker, number, text, width = width));

        if number == start_line && start_line == end_line {
            let underline = span.len().max(1).min(text.len().saturating_sub(start_col - 1).max(1));
            out.push_str(&format!(
                "  {:>width$} | {}{}\n",
                "",
                " ".repeat(start_col - 1),
                "^".repeat(underline),
                width = width
            ));
        }
    }
    out
}
