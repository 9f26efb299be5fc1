//! Abstract Syntax Tree types for the template language.

use crate::span::{Span, Spanned};

/// A parsed template: literal text interleaved with tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// Top-level nodes in source order.
    pub nodes: Vec<Node>,
    /// The full span of the template.
    pub span: Span,
}

/// A node of the template body.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text copied to the output.
    Text(Spanned<String>),
    /// `${ expr }` interpolation.
    Output(Expr),
    /// `{% if %}` block with optional `elif`/`else` branches.
    If(IfBlock),
    /// `{% for %}` loop.
    For(ForBlock),
    /// `{% set name = expr %}` assignment.
    Set(SetTag),
}

impl Node {
    /// Get the span of this node.
    pub fn span(&self) -> Span {
        match self {
            Node::Text(t) => t.span,
            Node::Output(e) => e.span,
            Node::If(b) => b.span,
            Node::For(b) => b.span,
            Node::Set(s) => s.span,
        }
    }
}

/// A conditional block.
#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    /// `if` and `elif` branches in order.
    pub branches: Vec<Branch>,
    /// `else` body, if any.
    pub otherwise: Option<Vec<Node>>,
    /// Span from `{% if` to the closing `%}` of `endif`.
    pub span: Span,
}

/// A guarded branch of an [`IfBlock`].
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// Guard condition.
    pub condition: Expr,
    /// Body rendered when the guard is truthy.
    pub body: Vec<Node>,
}

/// A loop over a list (or the values of a map).
#[derive(Debug, Clone, PartialEq)]
pub struct ForBlock {
    /// Loop variable name.
    pub variable: Spanned<String>,
    /// Iterated expression.
    pub iterable: Expr,
    /// Loop body.
    pub body: Vec<Node>,
    /// Span from `{% for` to the closing `%}` of `endfor`.
    pub span: Span,
}

/// An assignment tag.
#[derive(Debug, Clone, PartialEq)]
pub struct SetTag {
    /// Assigned name.
    pub name: Spanned<String>,
    /// Assigned value.
    pub value: Expr,
    /// Span of the whole tag.
    pub span: Span,
}

/// An expression with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    /// Create a new expression.
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Expression kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A literal value.
    Literal(Literal),
    /// A list literal `[a, b]`.
    List(Vec<Expr>),
    /// A variable reference.
    Var(String),
    /// Attribute access `target.name`.
    Attr(Box<Expr>, String),
    /// Index access `target[index]`.
    Index(Box<Expr>, Box<Expr>),
    /// Function call `name(args...)`.
    Call {
        name: Spanned<String>,
        args: Vec<Expr>,
    },
    /// Unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation (`!`, `not`).
    Not,
    /// Arithmetic negation.
    Neg,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    /// `a ?? b`: `a` unless it is null.
    Coalesce,
}

impl BinaryOp {
    /// Source symbol of the operator.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Coalesce => "??",
        }
    }
}
