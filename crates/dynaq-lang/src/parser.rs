//! Recursive descent parser for templates and expressions.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{Lexer, SpannedToken, Token};
use crate::span::{Span, Spanned};

/// Kinds of tag openers recognised in template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opener {
    /// `${`
    Output,
    /// `{%`
    Tag,
    /// `{#`
    Comment,
}

/// A block-closing tag (`elif`, `else`, `endif`, `endfor`) handed back to the
/// block parser that is waiting for it.
struct TagHead<'source> {
    keyword: Token,
    span: Span,
    parser: ExprParser<'source>,
}

/// Parser for template sources.
pub struct Parser<'source> {
    source: &'source str,
    pos: usize,
}

impl<'source> Parser<'source> {
    /// Create a new parser for the given source.
    pub fn new(source: &'source str) -> Self {
        Self { source, pos: 0 }
    }

    /// Parse a complete template.
    pub fn parse_template(&mut self) -> Result<Template, ParseError> {
        let (nodes, terminator) = self.parse_body(&[])?;
        if let Some(head) = terminator {
            // parse_body only returns requested terminators
            return Err(unexpected_tag(&head));
        }
        Ok(Template {
            nodes,
            span: Span::new(0, self.source.len()),
        })
    }

    /// Parse nodes until end of input or one of `terminators`.
    fn parse_body(
        &mut self,
        terminators: &[Token],
    ) -> Result<(Vec<Node>, Option<TagHead<'source>>), ParseError> {
        let mut nodes = Vec::new();

        loop {
            let Some((start, opener)) = self.next_opener() else {
                self.push_text(&mut nodes, self.source.len());
                return Ok((nodes, None));
            };
            self.push_text(&mut nodes, start);

            match opener {
                Opener::Comment => {
                    let close = self.source[start + 2..].find("#}").ok_or_else(|| {
                        ParseError::new("unterminated comment", Span::new(start, start + 2))
                            .with_hint("close the comment with '#}'")
                    })?;
                    self.pos = start + 2 + close + 2;
                }
                Opener::Output => {
                    let mut parser = ExprParser::new(self.source, start);
                    let expr = parser.parse_expr()?;
                    let close = parser.expect(Token::RBrace)?;
                    self.pos = close.span.end;
                    nodes.push(Node::Output(expr));
                }
                Opener::Tag => {
                    let mut parser = ExprParser::new(self.source, start);
                    let head = parser.next_token()?;
                    let head_span = Span::new(start, head.span.end);
                    match head.token {
                        Token::If => nodes.push(self.parse_if(parser, start)?),
                        Token::For => nodes.push(self.parse_for(parser, start)?),
                        Token::Set => nodes.push(self.parse_set(parser, start)?),
                        Token::Elif | Token::Else | Token::EndIf | Token::EndFor => {
                            let tag = TagHead {
                                keyword: head.token,
                                span: head_span,
                                parser,
                            };
                            if terminators.contains(&tag.keyword) {
                                return Ok((nodes, Some(tag)));
                            }
                            return Err(unexpected_tag(&tag));
                        }
                        other => {
                            return Err(ParseError::new(
                                format!("unknown tag {}", other.describe()),
                                head_span,
                            )
                            .with_hint("tags are if, elif, else, endif, for, endfor and set"))
                        }
                    }
                }
            }
        }
    }

    /// Parse `{% if %} ... {% endif %}` after the `if` keyword.
    fn parse_if(
        &mut self,
        mut parser: ExprParser<'source>,
        start: usize,
    ) -> Result<Node, ParseError> {
        let open = Span::new(start, start + 2);
        let mut condition = parser.parse_expr()?;
        self.pos = parser.expect(Token::TagClose)?.span.end;

        let mut branches = Vec::new();
        loop {
            let (body, terminator) =
                self.parse_body(&[Token::Elif, Token::Else, Token::EndIf])?;
            let mut head = terminator.ok_or_else(|| unclosed(open, "if", "endif"))?;
            branches.push(Branch { condition, body });

            match head.keyword {
                Token::Elif => {
                    condition = head.parser.parse_expr()?;
                    self.pos = head.parser.expect(Token::TagClose)?.span.end;
                }
                Token::Else => {
                    self.pos = head.parser.expect(Token::TagClose)?.span.end;
                    let (otherwise, terminator) =
                        self.parse_body(&[Token::Elif, Token::Else, Token::EndIf])?;
                    let mut end = terminator.ok_or_else(|| unclosed(open, "if", "endif"))?;
                    if end.keyword != Token::EndIf {
                        return Err(ParseError::new(
                            format!("{} after 'else'", end.keyword.describe()),
                            end.span,
                        )
                        .with_hint("'else' must be the last branch of an if block"));
                    }
                    let close = end.parser.expect(Token::TagClose)?;
                    self.pos = close.span.end;
                    return Ok(Node::If(IfBlock {
                        branches,
                        otherwise: Some(otherwise),
                        span: Span::new(start, close.span.end),
                    }));
                }
                _ => {
                    let close = head.parser.expect(Token::TagClose)?;
                    self.pos = close.span.end;
                    return Ok(Node::If(IfBlock {
                        branches,
                        otherwise: None,
                        span: Span::new(start, close.span.end),
                    }));
                }
            }
        }
    }

    /// Parse `{% for x in expr %} ... {% endfor %}` after the `for` keyword.
    fn parse_for(
        &mut self,
        mut parser: ExprParser<'source>,
        start: usize,
    ) -> Result<Node, ParseError> {
        let open = Span::new(start, start + 2);
        let variable = parser.expect_ident()?;
        parser.expect(Token::In)?;
        let iterable = parser.parse_expr()?;
        self.pos = parser.expect(Token::TagClose)?.span.end;

        let (body, terminator) = self.parse_body(&[Token::EndFor])?;
        let mut end = terminator.ok_or_else(|| unclosed(open, "for", "endfor"))?;
        let close = end.parser.expect(Token::TagClose)?;
        self.pos = close.span.end;

        Ok(Node::For(ForBlock {
            variable,
            iterable,
            body,
            span: Span::new(start, close.span.end),
        }))
    }

    /// Parse `{% set name = expr %}` after the `set` keyword.
    fn parse_set(
        &mut self,
        mut parser: ExprParser<'source>,
        start: usize,
    ) -> Result<Node, ParseError> {
        let name = parser.expect_ident()?;
        parser.expect(Token::Assign)?;
        let value = parser.parse_expr()?;
        let close = parser.expect(Token::TagClose)?;
        self.pos = close.span.end;

        Ok(Node::Set(SetTag {
            name,
            value,
            span: Span::new(start, close.span.end),
        }))
    }

    /// Find the next tag opener at or after the current position.
    fn next_opener(&self) -> Option<(usize, Opener)> {
        let bytes = self.source.as_bytes();
        let mut i = self.pos;
        while i + 1 < bytes.len() {
            let opener = match (bytes[i], bytes[i + 1]) {
                (b'$', b'{') => Some(Opener::Output),
                (b'{', b'%') => Some(Opener::Tag),
                (b'{', b'#') => Some(Opener::Comment),
                _ => None,
            };
            if let Some(opener) = opener {
                return Some((i, opener));
            }
            i += 1;
        }
        None
    }

    /// Push literal text between the current position and `end`.
    fn push_text(&mut self, nodes: &mut Vec<Node>, end: usize) {
        if end > self.pos {
            nodes.push(Node::Text(Spanned::new(
                self.source[self.pos..end].to_string(),
                Span::new(self.pos, end),
            )));
        }
        self.pos = end;
    }
}

fn unexpected_tag(head: &TagHead<'_>) -> ParseError {
    ParseError::new(
        format!("unexpected {} without an open block", head.keyword.describe()),
        head.span,
    )
}

fn unclosed(open: Span, block: &str, closer: &str) -> ParseError {
    ParseError::new(format!("unclosed '{}' block", block), open)
        .with_hint(format!("add '{{% {} %}}'", closer))
}

/// Expression parser over the tokens of a single tag.
pub struct ExprParser<'source> {
    lexer: Lexer<'source>,
    open: Span,
}

impl<'source> ExprParser<'source> {
    /// Create an expression parser for a tag opening at `start` (the tag
    /// opener itself is skipped).
    fn new(source: &'source str, start: usize) -> Self {
        Self {
            lexer: Lexer::at(source, start + 2),
            open: Span::new(start, start + 2),
        }
    }

    /// Parse an expression (lowest precedence: `??`).
    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_or()?;
        while self.eat(&Token::Coalesce)? {
            let right = self.parse_or()?;
            left = binary(BinaryOp::Coalesce, left, right);
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or)? || self.eat(&Token::OrWord)? {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        while self.eat(&Token::And)? || self.eat(&Token::AndWord)? {
            let right = self.parse_comparison()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_additive()?;
        let op = match self.peek_token()? {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.next_token()?;
        let right = self.parse_additive()?;
        Ok(binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_token()? {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.next_token()?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_token()? {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.next_token()?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_token()? {
            Some(Token::Bang) | Some(Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        let tok = self.next_token()?;
        let operand = self.parse_unary()?;
        let span = tok.span.merge(operand.span);
        Ok(Expr::new(ExprKind::Unary(op, Box::new(operand)), span))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_token()? {
                Some(Token::Dot) => {
                    self.next_token()?;
                    let name = self.expect_ident()?;
                    let span = expr.span.merge(name.span);
                    expr = Expr::new(ExprKind::Attr(Box::new(expr), name.value), span);
                }
                Some(Token::LBracket) => {
                    self.next_token()?;
                    let index = self.parse_expr()?;
                    let close = self.expect(Token::RBracket)?;
                    let span = expr.span.merge(close.span);
                    expr = Expr::new(ExprKind::Index(Box::new(expr), Box::new(index)), span);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.next_token()?;
        let span = tok.span;
        let literal =
            |lit: Literal| -> Result<Expr, ParseError> { Ok(Expr::new(ExprKind::Literal(lit), span)) };

        match &tok.token {
            Token::Null => literal(Literal::Null),
            Token::True => literal(Literal::Bool(true)),
            Token::False => literal(Literal::Bool(false)),
            Token::Int(i) => literal(Literal::Int(*i)),
            Token::Float(f) => literal(Literal::Float(*f)),
            Token::String(s) | Token::StringSingle(s) => literal(Literal::String(s.clone())),
            Token::Ident(name) => {
                if self.peek_token()? == Some(&Token::LParen) {
                    self.next_token()?;
                    let args = self.parse_list(Token::RParen)?;
                    let close = self.expect(Token::RParen)?;
                    Ok(Expr::new(
                        ExprKind::Call {
                            name: Spanned::new(name.clone(), tok.span),
                            args,
                        },
                        tok.span.merge(close.span),
                    ))
                } else {
                    Ok(Expr::new(ExprKind::Var(name.clone()), tok.span))
                }
            }
            Token::LParen => {
                let inner = self.parse_expr()?;
                let close = self.expect(Token::RParen)?;
                Ok(Expr::new(inner.kind, tok.span.merge(close.span)))
            }
            Token::LBracket => {
                let items = self.parse_list(Token::RBracket)?;
                let close = self.expect(Token::RBracket)?;
                Ok(Expr::new(ExprKind::List(items), tok.span.merge(close.span)))
            }
            other => Err(ParseError::new(
                format!("expected expression, found {}", other.describe()),
                tok.span,
            )),
        }
    }

    /// Parse comma separated expressions up to (not including) `close`.
    fn parse_list(&mut self, close: Token) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        if self.peek_token()? == Some(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if !self.eat(&Token::Comma)? {
                return Ok(items);
            }
        }
    }

    fn eat(&mut self, expected: &Token) -> Result<bool, ParseError> {
        if self.peek_token()? == Some(expected) {
            self.next_token()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn peek_token(&mut self) -> Result<Option<&Token>, ParseError> {
        Ok(self.lexer.peek()?.map(|t| &t.token))
    }

    fn expect_ident(&mut self) -> Result<Spanned<String>, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Ident(name) => Ok(Spanned::new(name, tok.span)),
            other => Err(ParseError::new(
                format!("expected identifier, found {}", other.describe()),
                tok.span,
            )),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<SpannedToken, ParseError> {
        let tok = self.next_token()?;
        if std::mem::discriminant(&tok.token) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError::new(
                format!(
                    "expected {}, found {}",
                    expected.describe(),
                    tok.token.describe()
                ),
                tok.span,
            ))
        }
    }

    fn next_token(&mut self) -> Result<SpannedToken, ParseError> {
        self.lexer.next_token()?.ok_or_else(|| {
            ParseError::new("unterminated tag at end of input", self.open)
        })
    }

    /// Fail unless every token has been consumed.
    fn expect_end(&mut self) -> Result<(), ParseError> {
        match self.lexer.next_token()? {
            None => Ok(()),
            Some(tok) => Err(ParseError::new(
                format!("unexpected {} after expression", tok.token.describe()),
                tok.span,
            )),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span.merge(right.span);
    Expr::new(ExprKind::Binary(op, Box::new(left), Box::new(right)), span)
}

/// Parse a template source into an AST.
pub fn parse(source: &str) -> Result<Template, ParseError> {
    let mut parser = Parser::new(source);
    parser.parse_template()
}

/// Parse a standalone expression (fetch predicates, hint expressions).
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let mut parser = ExprParser {
        lexer: Lexer::new(source),
        open: Span::new(0, source.len()),
    };
    let expr = parser.parse_expr()?;
    parser.expect_end()?;
    Ok(expr)
}
