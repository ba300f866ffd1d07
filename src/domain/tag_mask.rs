//! Boolean tag-mask expressions
//!
//! A mask restricts which identities a storage tier serves. Syntax:
//!
//! | Token | Meaning |
//! |-------|---------|
//! | `a` | tag `a` is present |
//! | `&` / `&&` | both sides hold |
//! | `\|` / `\|\|` | either side holds |
//! | `^` | negation, binds tighter than `&` |
//! | `( )` | grouping |
//!
//! Precedence from loosest to tightest is `|`, `&`, `^`.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TagMaskError {
    #[error("Empty tag mask")]
    Empty,

    #[error("Unexpected character '{0}' in tag mask '{1}'")]
    UnexpectedChar(char, String),

    #[error("Unexpected end of tag mask '{0}'")]
    UnexpectedEnd(String),

    #[error("Unexpected token '{0}' in tag mask '{1}'")]
    UnexpectedToken(String, String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Tag(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Tag(t) => f.write_str(t),
            Token::And => f.write_str("&"),
            Token::Or => f.write_str("|"),
            Token::Not => f.write_str("^"),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Tag(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, tags: &HashSet<&str>) -> bool {
        match self {
            Expr::Tag(t) => tags.contains(t.as_str()),
            Expr::Not(e) => !e.eval(tags),
            Expr::And(a, b) => a.eval(tags) && b.eval(tags),
            Expr::Or(a, b) => a.eval(tags) || b.eval(tags),
        }
    }
}

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn tokenize(source: &str) -> Result<Vec<Token>, TagMaskError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '&' | '|' => {
                // `&&` and `||` are accepted as aliases
                if i + 1 < chars.len() && chars[i + 1] == c {
                    i += 1;
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 1;
            }
            '^' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            c if is_tag_char(c) => {
                let start = i;
                while i < chars.len() && is_tag_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Tag(chars[start..i].iter().collect()));
            }
            other => return Err(TagMaskError::UnexpectedChar(other, source.to_string())),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or_expr(&mut self) -> Result<Expr, TagMaskError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, TagMaskError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, TagMaskError> {
        match self.next() {
            Some(Token::Not) => Ok(Expr::Not(Box::new(self.unary()?))),
            Some(Token::Open) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    Some(other) => Err(TagMaskError::UnexpectedToken(
                        other.to_string(),
                        self.source.to_string(),
                    )),
                    None => Err(TagMaskError::UnexpectedEnd(self.source.to_string())),
                }
            }
            Some(Token::Tag(tag)) => Ok(Expr::Tag(tag)),
            Some(other) => Err(TagMaskError::UnexpectedToken(
                other.to_string(),
                self.source.to_string(),
            )),
            None => Err(TagMaskError::UnexpectedEnd(self.source.to_string())),
        }
    }
}

/// A parsed tag mask
#[derive(Debug, Clone, PartialEq)]
pub struct TagMask {
    source: String,
    expr: Expr,
}

impl TagMask {
    /// Parses a mask expression
    pub fn parse(source: &str) -> Result<Self, TagMaskError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(TagMaskError::Empty);
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            source,
        };
        let expr = parser.or_expr()?;

        if let Some(extra) = parser.peek() {
            return Err(TagMaskError::UnexpectedToken(
                extra.to_string(),
                source.to_string(),
            ));
        }

        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Returns the original expression text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluates the mask against a collection of tags
    pub fn matches<I>(&self, tags: I) -> bool
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let owned: Vec<I::Item> = tags.into_iter().collect();
        let set: HashSet<&str> = owned.iter().map(|t| t.as_ref()).collect();
        self.expr.eval(&set)
    }
}

impl fmt::Display for TagMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parses and evaluates a mask in one go; an unparseable mask never matches
pub fn match_tags<I>(mask: &str, tags: I) -> bool
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    match TagMask::parse(mask) {
        Ok(mask) => mask.matches(tags),
        Err(_) => false,
    }
}
