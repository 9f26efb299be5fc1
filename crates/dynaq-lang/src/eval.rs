//! Evaluation of compiled templates against a binding environment.
//!
//! The [`Environment`] holds everything a caller binds into a render: plain
//! values (criteria, context, limit/offset) and host functions such as the
//! parameter extractor. Binding the same name twice is an error so that the
//! namespaces layered by a caller can never silently shadow each other.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use dynaq_types::{Row, Value};

use crate::ast::{BinaryOp, UnaryOp};
use crate::compiler::{CompiledExpr, CompiledExprKind, CompiledNode};
use crate::error::{EvalError, EvalErrorKind};
use crate::span::Span;

/// Name of the implicit loop metadata variable inside `{% for %}`.
pub const LOOP_VARIABLE: &str = "loop";

/// A host function callable from templates.
pub trait TemplateFunction {
    /// Invoke the function with evaluated arguments.
    fn call(&self, args: Vec<Value>) -> Result<Value, String>;
}

impl<F> TemplateFunction for F
where
    F: Fn(Vec<Value>) -> Result<Value, String>,
{
    fn call(&self, args: Vec<Value>) -> Result<Value, String> {
        self(args)
    }
}

/// A name bound into an [`Environment`].
pub enum Binding<'a> {
    Value(Value),
    Function(&'a dyn TemplateFunction),
}

impl std::fmt::Debug for Binding<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Binding::Function(_) => f.write_str("Function"),
        }
    }
}

/// Names visible to a template render or expression evaluation.
#[derive(Debug, Default)]
pub struct Environment<'a> {
    bindings: HashMap<String, Binding<'a>>,
}

impl<'a> Environment<'a> {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an environment with every field of `row` bound as a value.
    pub fn from_row(row: &Row) -> Self {
        let mut env = Self::new();
        for (name, value) in row {
            env.insert(name.clone(), value.clone());
        }
        env
    }

    /// Bind a value, failing if the name is already bound.
    pub fn bind_value(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), EvalError> {
        self.bind(name.into(), Binding::Value(value.into()))
    }

    /// Bind a host function, failing if the name is already bound.
    pub fn bind_function(
        &mut self,
        name: impl Into<String>,
        function: &'a dyn TemplateFunction,
    ) -> Result<(), EvalError> {
        self.bind(name.into(), Binding::Function(function))
    }

    fn bind(&mut self, name: String, binding: Binding<'a>) -> Result<(), EvalError> {
        if self.bindings.contains_key(&name) {
            return Err(EvalError::name_conflict(&name));
        }
        self.bindings.insert(name, binding);
        Ok(())
    }

    /// Bind a value, replacing any previous binding.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bindings
            .insert(name.into(), Binding::Value(value.into()));
    }

    /// Check whether a name is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Get a binding by name.
    pub fn get(&self, name: &str) -> Option<&Binding<'a>> {
        self.bindings.get(name)
    }

    /// Get a bound value by name (functions are not values).
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.bindings.get(name) {
            Some(Binding::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Number of bound names.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Output of a template render.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rendered {
    /// Rendered text.
    pub text: String,
    /// Values assigned by `set` tags outside of loops, after rendering.
    pub assigned: BTreeMap<String, Value>,
}

/// Tree-walking interpreter over compiled nodes.
pub(crate) struct Evaluator<'e, 'a> {
    env: &'e Environment<'a>,
    scopes: Vec<HashMap<String, Value>>,
}

impl<'e, 'a> Evaluator<'e, 'a> {
    pub(crate) fn new(env: &'e Environment<'a>) -> Self {
        Self {
            env,
            scopes: vec![HashMap::new()],
        }
    }

    pub(crate) fn render(mut self, nodes: &[CompiledNode]) -> Result<Rendered, EvalError> {
        let mut text = String::new();
        self.render_nodes(nodes, &mut text)?;
        let assigned = self
            .scopes
            .into_iter()
            .next()
            .map(|root| root.into_iter().collect())
            .unwrap_or_default();
        Ok(Rendered { text, assigned })
    }

    fn render_nodes(&mut self, nodes: &[CompiledNode], out: &mut String) -> Result<(), EvalError> {
        for node in nodes {
            match node {
                CompiledNode::Text(text) => out.push_str(text),
                CompiledNode::Output(expr) => {
                    let value = self.eval(expr)?;
                    out.push_str(&value.to_string());
                }
                CompiledNode::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = None;
                    for (condition, body) in branches {
                        if self.eval(condition)?.is_truthy() {
                            taken = Some(body);
                            break;
                        }
                    }
                    if let Some(body) = taken.or(otherwise.as_ref()) {
                        self.render_nodes(body, out)?;
                    }
                }
                CompiledNode::For {
                    variable,
                    iterable,
                    body,
                } => {
                    let items = match self.eval(iterable)? {
                        Value::Null => Vec::new(),
                        Value::List(items) => items,
                        Value::Map(map) => map.into_values().collect(),
                        other => {
                            return Err(EvalError::new(
                                format!("cannot iterate over {}", other.kind()),
                                iterable.span,
                                EvalErrorKind::NotIterable,
                            ))
                        }
                    };
                    let count = items.len();
                    for (index, item) in items.into_iter().enumerate() {
                        let mut meta = Row::new();
                        meta.insert("index".to_string(), Value::from(index));
                        meta.insert("first".to_string(), Value::Bool(index == 0));
                        meta.insert("last".to_string(), Value::Bool(index + 1 == count));

                        let mut scope = HashMap::new();
                        scope.insert(variable.clone(), item);
                        scope.insert(LOOP_VARIABLE.to_string(), Value::Map(meta));
                        self.scopes.push(scope);
                        let result = self.render_nodes(body, out);
                        self.scopes.pop();
                        result?;
                    }
                }
                CompiledNode::Set { name, value } => {
                    let value = self.eval(value)?;
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.insert(name.clone(), value);
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn eval(&self, expr: &CompiledExpr) -> Result<Value, EvalError> {
        match &expr.kind {
            CompiledExprKind::Const(value) => Ok(value.clone()),
            CompiledExprKind::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            CompiledExprKind::Var(name) => Ok(self.lookup(name)),
            CompiledExprKind::Attr(target, name) => {
                let target = self.eval(target)?;
                attribute(&target, name, expr.span)
            }
            CompiledExprKind::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(&target, &index, expr.span)
            }
            CompiledExprKind::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, args, expr.span)
            }
            CompiledExprKind::Unary(op, operand) => {
                let value = self.eval(operand)?;
                apply_unary(*op, value, expr.span)
            }
            CompiledExprKind::Binary(op, left, right) => {
                let left = self.eval(left)?;
                match op {
                    BinaryOp::And if !left.is_truthy() => Ok(Value::Bool(false)),
                    BinaryOp::Or if left.is_truthy() => Ok(Value::Bool(true)),
                    BinaryOp::Coalesce if !left.is_null() => Ok(left),
                    _ => {
                        let right = self.eval(right)?;
                        apply_binary(*op, left, right, expr.span)
                    }
                }
            }
        }
    }

    fn lookup(&self, name: &str) -> Value {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return value.clone();
            }
        }
        self.env.value(name).cloned().unwrap_or(Value::Null)
    }

    fn call(&self, name: &str, args: Vec<Value>, span: Span) -> Result<Value, EvalError> {
        let failed = |message: String| {
            EvalError::new(
                format!("{}(): {}", name, message),
                span,
                EvalErrorKind::FunctionFailed,
            )
        };

        match self.env.get(name) {
            Some(Binding::Function(function)) => function.call(args).map_err(failed),
            Some(Binding::Value(value)) => Err(EvalError::new(
                format!("'{}' is a {} value, not a function", name, value.kind()),
                span,
                EvalErrorKind::UnknownFunction,
            )),
            None => match builtin(name, &args) {
                Some(result) => result.map_err(failed),
                None => Err(EvalError::new(
                    format!("unknown function '{}'", name),
                    span,
                    EvalErrorKind::UnknownFunction,
                )),
            },
        }
    }
}

/// Built-in functions available when the environment does not bind the name.
fn builtin(name: &str, args: &[Value]) -> Option<Result<Value, String>> {
    let result = match name {
        "len" => match args {
            [Value::Null] => Ok(Value::Int(0)),
            [Value::String(s)] => Ok(Value::from(s.chars().count())),
            [Value::List(items)] => Ok(Value::from(items.len())),
            [Value::Map(map)] => Ok(Value::from(map.len())),
            [Value::Bytes(bytes)] => Ok(Value::from(bytes.len())),
            [other] => Err(format!("not defined for {}", other.kind())),
            _ => Err("expects exactly one argument".to_string()),
        },
        "join" => {
            let separator = match args.get(1) {
                None => ",".to_string(),
                Some(sep) => sep.to_string(),
            };
            match args.first() {
                Some(Value::Null) if args.len() <= 2 => Ok(Value::String(String::new())),
                Some(Value::List(items)) if args.len() <= 2 => Ok(Value::String(
                    items
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(&separator),
                )),
                _ => Err("expects a list and an optional separator".to_string()),
            }
        }
        "lower" => match args {
            [v] => Ok(Value::String(v.to_string().to_lowercase())),
            _ => Err("expects exactly one argument".to_string()),
        },
        "upper" => match args {
            [v] => Ok(Value::String(v.to_string().to_uppercase())),
            _ => Err("expects exactly one argument".to_string()),
        },
        _ => return None,
    };
    Some(result)
}

fn type_mismatch(message: String, span: Span) -> EvalError {
    EvalError::new(message, span, EvalErrorKind::TypeMismatch)
}

/// Attribute access. Missing keys and null targets yield null.
pub(crate) fn attribute(target: &Value, name: &str, span: Span) -> Result<Value, EvalError> {
    match target {
        Value::Null => Ok(Value::Null),
        Value::Map(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        other => Err(type_mismatch(
            format!("cannot read attribute '{}' of {}", name, other.kind()),
            span,
        )),
    }
}

/// Index access. Out of range positions and missing keys yield null.
pub(crate) fn index_value(target: &Value, index: &Value, span: Span) -> Result<Value, EvalError> {
    match (target, index) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::List(items), Value::Int(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null)),
        (Value::Map(map), Value::String(key)) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        (target, index) => Err(type_mismatch(
            format!("cannot index {} with {}", target.kind(), index.kind()),
            span,
        )),
    }
}

/// Apply a unary operator.
pub(crate) fn apply_unary(op: UnaryOp, value: Value, span: Span) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Neg, Value::Null) => Ok(Value::Null),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| type_mismatch("integer overflow".to_string(), span)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, other) => Err(type_mismatch(
            format!("cannot negate {}", other.kind()),
            span,
        )),
    }
}

/// Apply a binary operator to evaluated operands.
pub(crate) fn apply_binary(
    op: BinaryOp,
    left: Value,
    right: Value,
    span: Span,
) -> Result<Value, EvalError> {
    match op {
        BinaryOp::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
        BinaryOp::Coalesce => Ok(if left.is_null() { right } else { left }),
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Bool(false));
            }
            let ordering = compare(&left, &right).ok_or_else(|| {
                type_mismatch(
                    format!(
                        "cannot compare {} {} {}",
                        left.kind(),
                        op.symbol(),
                        right.kind()
                    ),
                    span,
                )
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::Add => match (left, right) {
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (a, b) => arithmetic(op, a, b, span),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, left, right, span)
        }
    }
}

fn arithmetic(op: BinaryOp, left: Value, right: Value, span: Span) -> Result<Value, EvalError> {
    let division_by_zero =
        || EvalError::new("division by zero", span, EvalErrorKind::DivisionByZero);

    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
                return Err(division_by_zero());
            }
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result
                .map(Value::Int)
                .ok_or_else(|| type_mismatch("integer overflow".to_string(), span))
        }
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => {
                if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0.0 {
                    return Err(division_by_zero());
                }
                Ok(Value::Float(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    _ => a % b,
                }))
            }
            _ => Err(type_mismatch(
                format!(
                    "cannot apply '{}' to {} and {}",
                    op.symbol(),
                    left.kind(),
                    right.kind()
                ),
                span,
            )),
        },
    }
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (a, b) if is_number(a) && is_number(b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        _ => None,
    }
}
