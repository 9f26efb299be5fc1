//! Lexer for template tags and expressions using logos.
//!
//! Only the inside of `${ ... }` and `{% ... %}` is tokenized; literal text
//! between tags is sliced directly by the parser. A [`Lexer`] therefore starts
//! at an arbitrary byte offset of the template and reports absolute spans.

use crate::error::ParseError;
use crate::span::Span;
use logos::Logos;

/// Token types for template tags and expressions.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // Tag keywords
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("endif")]
    EndIf,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("endfor")]
    EndFor,
    #[token("set")]
    Set,

    // Literals
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    // Word operators
    #[token("and")]
    AndWord,
    #[token("or")]
    OrWord,
    #[token("not")]
    Not,

    // Identifier
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // String literal (double-quoted)
    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape_string(&s[1..s.len() - 1])
    })]
    String(String),

    // String literal (single-quoted)
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| {
        let s = lex.slice();
        unescape_string(&s[1..s.len() - 1])
    })]
    StringSingle(String),

    // Integer literal
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    // Float literal
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    // Comparison operators
    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    // Logical operators
    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("!")]
    Bang,
    #[token("??")]
    Coalesce,

    // Arithmetic
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    // Punctuation
    #[token("=")]
    Assign,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // Tag terminators
    #[token("}")]
    RBrace,
    #[token("%}")]
    TagClose,
}

impl Token {
    /// Human readable description used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::String(s) | Token::StringSingle(s) => format!("string \"{}\"", s),
            Token::Int(i) => format!("integer {}", i),
            Token::Float(f) => format!("float {}", f),
            Token::RBrace => "'}'".to_string(),
            Token::TagClose => "'%}'".to_string(),
            Token::If => "'if'".to_string(),
            Token::Elif => "'elif'".to_string(),
            Token::Else => "'else'".to_string(),
            Token::EndIf => "'endif'".to_string(),
            Token::For => "'for'".to_string(),
            Token::In => "'in'".to_string(),
            Token::EndFor => "'endfor'".to_string(),
            Token::Set => "'set'".to_string(),
            other => format!("{:?}", other),
        }
    }
}

/// Unescape a string literal, handling common escape sequences.
fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// A token with its span in the template source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer that produces spanned tokens from an offset of the template.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    base: usize,
    peeked: Option<Option<SpannedToken>>,
}

impl<'source> Lexer<'source> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'source str) -> Self {
        Self::at(source, 0)
    }

    /// Create a lexer that starts at `offset` bytes into `source`.
    pub fn at(source: &'source str, offset: usize) -> Self {
        Self {
            inner: Token::lexer(&source[offset..]),
            base: offset,
            peeked: None,
        }
    }

    /// Peek at the next token without consuming it.
    pub fn peek(&mut self) -> Result<Option<&SpannedToken>, ParseError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.next_inner()?);
        }
        Ok(self.peeked.as_ref().and_then(|o| o.as_ref()))
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Result<Option<SpannedToken>, ParseError> {
        match self.peeked.take() {
            Some(peeked) => Ok(peeked),
            None => self.next_inner(),
        }
    }

    fn next_inner(&mut self) -> Result<Option<SpannedToken>, ParseError> {
        match self.inner.next() {
            Some(Ok(token)) => Ok(Some(SpannedToken {
                token,
                span: self.span(),
            })),
            Some(Err(())) => Err(ParseError::new(
                format!("unexpected character sequence '{}'", self.inner.slice()),
                self.span(),
            )),
            None => Ok(None),
        }
    }

    /// Absolute span of the most recently lexed token.
    pub fn span(&self) -> Span {
        let range = self.inner.span();
        Span::new(self.base + range.start, self.base + range.end)
    }
}

/// Tokenize an expression source, stopping at the first lexing error.
pub fn tokenize(source: &str) -> Vec<SpannedToken> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    while let Ok(Some(token)) = lexer.next_token() {
        tokens.push(token);
    }
    tokens
}
