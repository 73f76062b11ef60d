//! Boolean routing expressions.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or      := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | compare
//! compare := primary (("==" | "!=" | ">" | "<" | ">=" | "<=" | "contains") primary)?
//! primary := number | string | true | false | null | path | "(" or ")"
//! ```
//!
//! Paths are dotted lookups (`lead.score`, `items.0.name`) into a read-only
//! [`Value`] scope. Nothing is ever executed.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;
use tracing::warn;

use weft_core::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("parse error at offset {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("unknown path '{0}'")]
    MissingPath(String),

    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: CompareOp,
        left: &'static str,
        right: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Contains => "contains",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

/// A parsed routing expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.len(),
        };
        let expr = parser.parse_or()?;
        if let Some((tok, at)) = parser.peek_with_pos() {
            return Err(ConditionError::Parse {
                pos: at,
                message: format!("unexpected {}", tok.describe()),
            });
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Evaluate strictly: missing paths and invalid comparisons are errors.
    pub fn eval(&self, scope: &Value) -> Result<bool, ConditionError> {
        eval(&self.expr, scope).map(|v| truthy(&v))
    }

    /// Evaluate failing closed: any error yields `false`.
    pub fn check(&self, scope: &Value) -> bool {
        match self.eval(scope) {
            Ok(result) => result,
            Err(e) => {
                warn!(expression = %self.source, error = %e, "Condition failed closed");
                false
            }
        }
    }
}

/// Parse and evaluate `expr` against `scope`, failing closed.
pub fn evaluate(expr: &str, scope: &Value) -> bool {
    match Condition::parse(expr) {
        Ok(condition) => condition.check(scope),
        Err(e) => {
            warn!(expression = %expr, error = %e, "Condition failed to parse");
            false
        }
    }
}

fn eval(expr: &Expr, scope: &Value) -> Result<Value, ConditionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(path) => scope
            .lookup(path)
            .cloned()
            .ok_or_else(|| ConditionError::MissingPath(path.clone())),
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
        Expr::And(lhs, rhs) => {
            if !truthy(&eval(lhs, scope)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(rhs, scope)?)))
        }
        Expr::Or(lhs, rhs) => {
            if truthy(&eval(lhs, scope)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(rhs, scope)?)))
        }
        Expr::Compare(op, lhs, rhs) => {
            let left = eval(lhs, scope)?;
            let right = eval(rhs, scope)?;
            compare(*op, &left, &right).map(Value::Bool)
        }
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ConditionError> {
    let mismatch = || ConditionError::TypeMismatch {
        op,
        left: left.type_name(),
        right: right.type_name(),
    };
    match op {
        CompareOp::Eq => Ok(left == right),
        CompareOp::Ne => Ok(left != right),
        CompareOp::Contains => match (left, right) {
            (Value::String(hay), Value::String(needle)) => Ok(hay.contains(needle.as_str())),
            (Value::Array(items), needle) => Ok(items.contains(needle)),
            (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
            _ => Err(mismatch()),
        },
        _ => {
            let ordering = match (left, right) {
                (Value::Number(_), Value::Number(_)) => left.cmp_number(right).ok_or_else(mismatch)?,
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => return Err(mismatch()),
            };
            Ok(match op {
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Ge => ordering != Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
    }
}

/// Null, false, zero and empty values are falsy.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => value.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Op(CompareOp),
    Number(serde_json::Number),
    Str(String),
    True,
    False,
    Null,
    Path(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::LParen => "'('".into(),
            Self::RParen => "')'".into(),
            Self::Not => "'!'".into(),
            Self::And => "'&&'".into(),
            Self::Or => "'||'".into(),
            Self::Op(op) => format!("'{}'", op),
            Self::Number(n) => format!("number {}", n),
            Self::Str(s) => format!("string \"{}\"", s),
            Self::True => "'true'".into(),
            Self::False => "'false'".into(),
            Self::Null => "'null'".into(),
            Self::Path(p) => format!("'{}'", p),
        }
    }
}

/// Integer literals stay exact; anything else must parse as a finite float.
fn parse_number(literal: &str) -> Option<serde_json::Number> {
    if let Ok(i) = literal.parse::<i64>() {
        return Some(i.into());
    }
    if let Ok(u) = literal.parse::<u64>() {
        return Some(u.into());
    }
    literal
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, ConditionError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let err = |pos: usize, message: String| ConditionError::Parse { pos, message };
    let at = |i: usize| chars.get(i).map(|(_, c)| *c);

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let two = (c, at(i + 1));
        let (token, width) = match two {
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('=', Some('=')) => (Token::Op(CompareOp::Eq), 2),
            ('!', Some('=')) => (Token::Op(CompareOp::Ne), 2),
            ('>', Some('=')) => (Token::Op(CompareOp::Ge), 2),
            ('<', Some('=')) => (Token::Op(CompareOp::Le), 2),
            ('>', _) => (Token::Op(CompareOp::Gt), 1),
            ('<', _) => (Token::Op(CompareOp::Lt), 1),
            ('!', _) => (Token::Not, 1),
            ('"', _) | ('\'', _) => {
                let quote = c;
                let mut text = String::new();
                let mut j = i + 1;
                loop {
                    match at(j) {
                        None => return Err(err(pos, "unterminated string".into())),
                        Some('\\') => {
                            match at(j + 1) {
                                Some(escaped) => text.push(escaped),
                                None => return Err(err(pos, "unterminated string".into())),
                            }
                            j += 2;
                        }
                        Some(ch) if ch == quote => break,
                        Some(ch) => {
                            text.push(ch);
                            j += 1;
                        }
                    }
                }
                tokens.push((Token::Str(text), pos));
                i = j + 1;
                continue;
            }
            _ if c.is_ascii_digit()
                || (c == '-' && at(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let mut j = i + 1;
                while at(j).is_some_and(|n| n.is_ascii_digit() || n == '.') {
                    j += 1;
                }
                let end = chars.get(j).map_or(src.len(), |(p, _)| *p);
                let literal = &src[pos..end];
                let n = parse_number(literal)
                    .ok_or_else(|| err(pos, format!("invalid number '{}'", literal)))?;
                tokens.push((Token::Number(n), pos));
                i = j;
                continue;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while at(j).is_some_and(|n| n.is_alphanumeric() || n == '_' || n == '.' || n == '-') {
                    j += 1;
                }
                let end = chars.get(j).map_or(src.len(), |(p, _)| *p);
                let word = &src[pos..end];
                if word.ends_with('.') || word.contains("..") {
                    return Err(err(pos, format!("invalid path '{}'", word)));
                }
                let token = match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "contains" => Token::Op(CompareOp::Contains),
                    _ => Token::Path(word.to_string()),
                };
                tokens.push((token, pos));
                i = j;
                continue;
            }
            _ => return Err(err(pos, format!("unexpected character '{}'", c))),
        };
        tokens.push((token, pos));
        i += width;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_with_pos(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, p)| (t, *p))
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.parse_primary()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.parse_primary()?;
            return Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let (token, pos) = self.next().ok_or(ConditionError::Parse {
            pos: self.end,
            message: "unexpected end of expression".into(),
        })?;
        match token {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Path(p) => Ok(Expr::Path(p)),
            Token::LParen => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some((Token::RParen, _)) => Ok(inner),
                    Some((other, at)) => Err(ConditionError::Parse {
                        pos: at,
                        message: format!("expected ')', found {}", other.describe()),
                    }),
                    None => Err(ConditionError::Parse {
                        pos: self.end,
                        message: "missing ')'".into(),
                    }),
                }
            }
            other => Err(ConditionError::Parse {
                pos,
                message: format!("unexpected {}", other.describe()),
            }),
        }
    }
}
