//! dynaq script template language
//!
//! Query scripts are plain backend text (SQL, a search DSL, ...) interleaved
//! with template tags. This crate parses, compiles and renders them.
//!
//! # Template Syntax
//!
//! ```text
//! SELECT * FROM orders
//! WHERE customer_id = ${ P(customer_id) }
//! {% if statuses %}
//!   AND status IN (${ P(statuses) })
//! {% endif %}
//! {% for column in columns %}${ column }{% if !loop.last %}, {% endif %}{% endfor %}
//! {% set limit = 50 %}   {# template-managed pagination #}
//! LIMIT ${ limit }
//! ```
//!
//! - `${ expr }` interpolates a value
//! - `{% if %}`, `{% elif %}`, `{% else %}`, `{% endif %}` for conditionals
//! - `{% for x in expr %}` ... `{% endfor %}` with `loop.index`, `loop.first`, `loop.last`
//! - `{% set name = expr %}` assigns; top-level assignments are the template's declared names
//! - `{# ... #}` comments
//!
//! # Usage
//!
//! ```rust
//! use dynaq_lang::{compile_template, Environment};
//!
//! let template = compile_template("SELECT * FROM t WHERE id = ${ id }").unwrap();
//! let mut env = Environment::new();
//! env.bind_value("id", 7).unwrap();
//! assert_eq!(template.render(&env).unwrap().text, "SELECT * FROM t WHERE id = 7");
//! ```

pub mod ast;
pub mod compiler;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod span;

// Re-export main types
pub use ast::{BinaryOp, Expr, ExprKind, Literal, Node, Template, UnaryOp};
pub use compiler::{CompiledExpression, CompiledTemplate};
pub use dynaq_types::Value;
pub use error::{
    CompileError, CompileErrorKind, EvalError, EvalErrorKind, LangError, ParseError,
};
pub use eval::{Binding, Environment, Rendered, TemplateFunction};
pub use span::{annotate, Span, Spanned};

/// Parse a template source into an AST.
pub fn parse(source: &str) -> Result<Template, ParseError> {
    parser::parse(source)
}

/// Compile a parsed template. `source` is kept for diagnostics.
pub fn compile(template: Template, source: &str) -> Result<CompiledTemplate, CompileError> {
    compiler::compile(template, source)
}

/// Parse and compile a template source in one step.
///
/// # Example
///
/// ```rust
/// use dynaq_lang::compile_template;
///
/// let template = compile_template("{% set limit = 10 %}LIMIT ${ limit }").unwrap();
/// assert!(template.defines("limit"));
/// ```
pub fn compile_template(source: &str) -> Result<CompiledTemplate, LangError> {
    let template = parse(source)?;
    Ok(compile(template, source)?)
}

/// Parse and compile a standalone expression.
pub fn compile_expression(source: &str) -> Result<CompiledExpression, LangError> {
    let expr = parser::parse_expression(source)?;
    Ok(compiler::compile_expression(expr, source)?)
}

/// Tokenize a tag body (for debugging/testing).
pub fn tokenize(source: &str) -> Vec<lexer::SpannedToken> {
    lexer::tokenize(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_query_script() {
        let source = "SELECT * FROM orders\nWHERE 1 = 1\n{% if status %}AND status = '${ status }'{% endif %}";
        let template = compile_template(source).unwrap();

        let mut env = Environment::new();
        env.bind_value("status", "open").unwrap();
        let rendered = template.render(&env).unwrap();
        assert!(rendered.text.ends_with("AND status = 'open'"));

        let rendered = template.render(&Environment::new()).unwrap();
        assert!(rendered.text.ends_with("WHERE 1 = 1\n"));
    }

    #[test]
    fn test_error_with_source_context() {
        let source = "SELECT *\nFROM t\nWHERE id = ${ id = 1 }";
        let err = compile_template(source).unwrap_err();
        let formatted = err.format_with_source(source);
        assert!(formatted.contains("line 3"));
        assert!(formatted.contains(">   3 | WHERE id"));
    }

    #[test]
    fn test_unclosed_block_reports_opening_line() {
        let source = "SELECT *\n{% for x in xs %}\n${ x }";
        let err = compile_template(source).unwrap_err();
        assert!(matches!(err, LangError::Parse(_)));
        assert!(err.format_with_source(source).contains("line 2:1"));
    }

    #[test]
    fn test_expression_entry_point() {
        let expr = compile_expression("len(items) > 0").unwrap();
        let mut env = Environment::new();
        env.bind_value("items", vec![1]).unwrap();
        assert_eq!(expr.evaluate(&env).unwrap(), Value::Bool(true));
    }
}
