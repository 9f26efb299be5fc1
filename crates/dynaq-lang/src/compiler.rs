//! Compiler from the template AST to an executable form.
//!
//! Compilation is the expensive, cacheable step: adjacent text is merged,
//! constant subexpressions are folded and the names a template declares and
//! reads are recorded. Rendering a [`CompiledTemplate`] is a cheap walk over
//! the result.

use std::collections::BTreeSet;
use std::sync::Arc;

use dynaq_types::Value;

use crate::ast::*;
use crate::error::{CompileError, CompileErrorKind, EvalError};
use crate::eval::{self, Environment, Evaluator, Rendered, LOOP_VARIABLE};
use crate::span::Span;

/// A compiled template node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CompiledNode {
    Text(String),
    Output(CompiledExpr),
    If {
        branches: Vec<(CompiledExpr, Vec<CompiledNode>)>,
        otherwise: Option<Vec<CompiledNode>>,
    },
    For {
        variable: String,
        iterable: CompiledExpr,
        body: Vec<CompiledNode>,
    },
    Set {
        name: String,
        value: CompiledExpr,
    },
}

/// A compiled expression with its source span.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompiledExpr {
    pub(crate) kind: CompiledExprKind,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CompiledExprKind {
    Const(Value),
    List(Vec<CompiledExpr>),
    Var(String),
    Attr(Box<CompiledExpr>, String),
    Index(Box<CompiledExpr>, Box<CompiledExpr>),
    Call { name: String, args: Vec<CompiledExpr> },
    Unary(UnaryOp, Box<CompiledExpr>),
    Binary(BinaryOp, Box<CompiledExpr>, Box<CompiledExpr>),
}

impl CompiledExpr {
    fn constant(&self) -> Option<&Value> {
        match &self.kind {
            CompiledExprKind::Const(v) => Some(v),
            _ => None,
        }
    }
}

/// A template ready to render.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    source: Arc<str>,
    nodes: Vec<CompiledNode>,
    declared: BTreeSet<String>,
    referenced: BTreeSet<String>,
    functions: BTreeSet<String>,
}

impl CompiledTemplate {
    /// Original template source, kept for diagnostics.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names assigned by `set` tags outside of loops.
    pub fn declared(&self) -> &BTreeSet<String> {
        &self.declared
    }

    /// Free variable names read by the template.
    pub fn referenced(&self) -> &BTreeSet<String> {
        &self.referenced
    }

    /// Names of functions called by the template.
    pub fn functions(&self) -> &BTreeSet<String> {
        &self.functions
    }

    /// Check whether the template declares `name` itself.
    pub fn defines(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    /// Render against an environment.
    pub fn render(&self, env: &Environment<'_>) -> Result<Rendered, EvalError> {
        Evaluator::new(env).render(&self.nodes)
    }
}

/// A standalone compiled expression (fetch predicates).
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: Arc<str>,
    expr: CompiledExpr,
    referenced: BTreeSet<String>,
}

impl CompiledExpression {
    /// Original expression source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Free variable names read by the expression.
    pub fn referenced(&self) -> &BTreeSet<String> {
        &self.referenced
    }

    /// Evaluate against an environment.
    pub fn evaluate(&self, env: &Environment<'_>) -> Result<Value, EvalError> {
        Evaluator::new(env).eval(&self.expr)
    }
}

/// Compiler state for one template.
#[derive(Default)]
struct Compiler {
    declared: BTreeSet<String>,
    referenced: BTreeSet<String>,
    functions: BTreeSet<String>,
    /// Loop variables currently in scope.
    locals: Vec<String>,
}

impl Compiler {
    fn compile_nodes(&mut self, nodes: Vec<Node>) -> Result<Vec<CompiledNode>, CompileError> {
        let mut out: Vec<CompiledNode> = Vec::with_capacity(nodes.len());

        for node in nodes {
            let compiled = match node {
                Node::Text(text) => CompiledNode::Text(text.value),
                Node::Output(expr) => match self.compile_expr(expr)? {
                    CompiledExpr {
                        kind: CompiledExprKind::Const(value),
                        ..
                    } => CompiledNode::Text(value.to_string()),
                    expr => CompiledNode::Output(expr),
                },
                Node::If(block) => {
                    let mut branches = Vec::with_capacity(block.branches.len());
                    for branch in block.branches {
                        let condition = self.compile_expr(branch.condition)?;
                        let body = self.compile_nodes(branch.body)?;
                        branches.push((condition, body));
                    }
                    let otherwise = match block.otherwise {
                        Some(nodes) => Some(self.compile_nodes(nodes)?),
                        None => None,
                    };
                    CompiledNode::If {
                        branches,
                        otherwise,
                    }
                }
                Node::For(block) => {
                    let variable = block.variable;
                    if variable.value == LOOP_VARIABLE {
                        return Err(CompileError::reserved_name(&variable.value, variable.span));
                    }
                    let iterable = self.compile_expr(block.iterable)?;
                    self.locals.push(variable.value.clone());
                    let body = self.compile_nodes(block.body);
                    self.locals.pop();
                    CompiledNode::For {
                        variable: variable.value,
                        iterable,
                        body: body?,
                    }
                }
                Node::Set(tag) => {
                    if tag.name.value == LOOP_VARIABLE {
                        return Err(CompileError::reserved_name(&tag.name.value, tag.name.span));
                    }
                    let value = self.compile_expr(tag.value)?;
                    if self.locals.is_empty() {
                        self.declared.insert(tag.name.value.clone());
                    }
                    CompiledNode::Set {
                        name: tag.name.value,
                        value,
                    }
                }
            };

            // merge adjacent text, including text produced by folded outputs
            if let CompiledNode::Text(text) = &compiled {
                if text.is_empty() {
                    continue;
                }
                if let Some(CompiledNode::Text(previous)) = out.last_mut() {
                    previous.push_str(text);
                    continue;
                }
            }
            out.push(compiled);
        }

        Ok(out)
    }

    fn compile_expr(&mut self, expr: Expr) -> Result<CompiledExpr, CompileError> {
        let span = expr.span;
        let kind = match expr.kind {
            ExprKind::Literal(lit) => CompiledExprKind::Const(literal_value(lit)),
            ExprKind::List(items) => {
                let items = items
                    .into_iter()
                    .map(|item| self.compile_expr(item))
                    .collect::<Result<Vec<_>, _>>()?;
                if items.iter().all(|item| item.constant().is_some()) {
                    CompiledExprKind::Const(Value::List(
                        items.into_iter().filter_map(into_constant).collect(),
                    ))
                } else {
                    CompiledExprKind::List(items)
                }
            }
            ExprKind::Var(name) => {
                if name != LOOP_VARIABLE && !self.locals.contains(&name) {
                    self.referenced.insert(name.clone());
                }
                CompiledExprKind::Var(name)
            }
            ExprKind::Attr(target, name) => {
                let target = self.compile_expr(*target)?;
                match target.constant() {
                    Some(value) => {
                        CompiledExprKind::Const(fold(eval::attribute(value, &name, span))?)
                    }
                    None => CompiledExprKind::Attr(Box::new(target), name),
                }
            }
            ExprKind::Index(target, index) => {
                let target = self.compile_expr(*target)?;
                let index = self.compile_expr(*index)?;
                match (target.constant(), index.constant()) {
                    (Some(t), Some(i)) => CompiledExprKind::Const(fold(eval::index_value(t, i, span))?),
                    _ => CompiledExprKind::Index(Box::new(target), Box::new(index)),
                }
            }
            ExprKind::Call { name, args } => {
                self.functions.insert(name.value.clone());
                let args = args
                    .into_iter()
                    .map(|arg| self.compile_expr(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                CompiledExprKind::Call {
                    name: name.value,
                    args,
                }
            }
            ExprKind::Unary(op, operand) => {
                let operand = self.compile_expr(*operand)?;
                match operand.constant() {
                    Some(value) => {
                        CompiledExprKind::Const(fold(eval::apply_unary(op, value.clone(), span))?)
                    }
                    None => CompiledExprKind::Unary(op, Box::new(operand)),
                }
            }
            ExprKind::Binary(op, left, right) => {
                let left = self.compile_expr(*left)?;
                let right = self.compile_expr(*right)?;
                match (left.constant(), right.constant()) {
                    (Some(l), Some(r)) => CompiledExprKind::Const(fold(eval::apply_binary(
                        op,
                        l.clone(),
                        r.clone(),
                        span,
                    ))?),
                    _ => CompiledExprKind::Binary(op, Box::new(left), Box::new(right)),
                }
            }
        };
        Ok(CompiledExpr { kind, span })
    }
}

fn literal_value(lit: Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(b),
        Literal::Int(i) => Value::Int(i),
        Literal::Float(f) => Value::Float(f),
        Literal::String(s) => Value::String(s),
    }
}

fn into_constant(expr: CompiledExpr) -> Option<Value> {
    match expr.kind {
        CompiledExprKind::Const(v) => Some(v),
        _ => None,
    }
}

fn fold(result: Result<Value, EvalError>) -> Result<Value, CompileError> {
    result.map_err(|e| {
        CompileError::new(
            format!("constant expression fails: {}", e.message),
            e.span,
            CompileErrorKind::ConstantEvaluation,
        )
    })
}

/// Compile a parsed template. `source` is retained for diagnostics.
pub fn compile(template: Template, source: &str) -> Result<CompiledTemplate, CompileError> {
    let mut compiler = Compiler::default();
    let nodes = compiler.compile_nodes(template.nodes)?;
    Ok(CompiledTemplate {
        source: Arc::from(source),
        nodes,
        declared: compiler.declared,
        referenced: compiler.referenced,
        functions: compiler.functions,
    })
}

/// Compile a parsed standalone expression.
pub fn compile_expression(expr: Expr, source: &str) -> Result<CompiledExpression, CompileError> {
    let mut compiler = Compiler::default();
    let expr = compiler.compile_expr(expr)?;
    Ok(CompiledExpression {
        source: Arc::from(source),
        expr,
        referenced: compiler.referenced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn compile_src(source: &str) -> Result<CompiledTemplate, CompileError> {
        compile(parse(source).unwrap(), source)
    }

    #[test]
    fn test_text_is_merged() {
        let template = compile_src("a{# c #}b${ 'c' }d").unwrap();
        assert_eq!(template.nodes, vec![CompiledNode::Text("abcd".to_string())]);
    }

    #[test]
    fn test_constant_folding() {
        let template = compile_src("${ P(1 + 2 * 3) }").unwrap();
        match &template.nodes[0] {
            CompiledNode::Output(CompiledExpr {
                kind: CompiledExprKind::Call { args, .. },
                ..
            }) => assert_eq!(args[0].kind, CompiledExprKind::Const(Value::Int(7))),
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_constant_failure_is_compile_error() {
        let err = compile_src("SELECT ${ 1 / 0 }").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::ConstantEvaluation);
        assert_eq!(err.span, Span::new(10, 15));
    }

    #[test]
    fn test_declared_and_referenced() {
        let template = compile_src(
            "{% set limit = 10 %}{% for s in statuses %}{% set x = s %}${ P(s) }{% endfor %}${ name }",
        )
        .unwrap();
        assert!(template.defines("limit"));
        assert!(!template.defines("x"));
        assert_eq!(
            template.referenced().iter().cloned().collect::<Vec<_>>(),
            vec!["name".to_string(), "statuses".to_string()]
        );
        assert!(template.functions().contains("P"));
    }

    #[test]
    fn test_reserved_loop_name() {
        let err = compile_src("{% set loop = 1 %}").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::ReservedName);
        let err = compile_src("{% for loop in xs %}{% endfor %}").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::ReservedName);
    }

    #[test]
    fn test_compiled_expression() {
        let source = "status == 'active' && total > 10";
        let expr = compile_expression(crate::parser::parse_expression(source).unwrap(), source)
            .unwrap();
        let mut env = Environment::new();
        env.bind_value("status", "active").unwrap();
        env.bind_value("total", 11).unwrap();
        assert_eq!(expr.evaluate(&env).unwrap(), Value::Bool(true));
        assert_eq!(expr.referenced().len(), 2);
    }
}
