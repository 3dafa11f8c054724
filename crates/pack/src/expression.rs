//! Segment enabled-expression evaluator
//!
//! A small recursive-descent parser for the boolean expressions that gate
//! whether a segment participates in a frame. Supported syntax:
//!
//! ```text
//! or       := and ( "||" and )*
//! and      := equality ( "&&" equality )*
//! equality := unary ( ( "==" | "!=" ) unary )*
//! unary    := "!" unary | primary
//! primary  := "(" or ")" | quoted-string | token
//! ```
//!
//! Tokens are `true`/`false`, numbers, or variable names. Unknown variables
//! evaluate to `false`.

use std::collections::HashMap;
use std::fmt;

/// A dynamically typed value flowing through an expression
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ExprValue {
    /// Truthiness used by `!`, `&&`, `||` and the final result
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Number(value) => *value != 0.0,
            Self::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return false;
                }
                match text.to_ascii_lowercase().as_str() {
                    "true" | "on" | "yes" => true,
                    "false" | "off" | "no" => false,
                    _ => text.parse::<f64>().map(|n| n != 0.0).unwrap_or(true),
                }
            }
        }
    }

    /// Coerces text that looks like a boolean or number into that type
    fn normalized(&self) -> ExprValue {
        match self {
            Self::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Self::Text(String::new());
                }
                match text.to_ascii_lowercase().as_str() {
                    "true" => Self::Bool(true),
                    "false" => Self::Bool(false),
                    _ => text.parse::<f64>().map(Self::Number).unwrap_or_else(|_| Self::Text(text.to_string())),
                }
            }
            other => other.clone(),
        }
    }

    fn loose_eq(&self, other: &ExprValue) -> bool {
        match (self.normalized(), other.normalized()) {
            (Self::Number(a), Self::Number(b)) => a == b,
            (a, b) => a.to_string().eq_ignore_ascii_case(&b.to_string()),
        }
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<bool> for ExprValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ExprValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for ExprValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for ExprValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Variable bindings for expression evaluation
///
/// Lookups try the exact name, then its lowercase and uppercase forms.
#[derive(Debug, Clone, Default)]
pub struct ExprVariables {
    values: HashMap<String, ExprValue>,
}

impl ExprVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` as-is without aliasing, keeping any earlier binding
    pub fn insert(&mut self, name: &str, value: ExprValue) {
        self.values.entry(name.to_string()).or_insert(value);
    }

    /// Binds `name` plus its case and separator variants
    ///
    /// For `Shadow.Quality` this registers `Shadow.Quality`, `shadow.quality`,
    /// `SHADOW.QUALITY`, `Shadow_Quality`, `shadow_quality` and `SHADOW_QUALITY`.
    /// Earlier bindings are never overwritten.
    pub fn insert_aliased(&mut self, name: &str, value: ExprValue) {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return;
        }
        let underscored = trimmed.replace(['.', '-'], "_");
        for alias in [
            trimmed.to_string(),
            trimmed.to_lowercase(),
            trimmed.to_uppercase(),
            underscored.to_lowercase(),
            underscored.to_uppercase(),
            underscored,
        ] {
            self.values.entry(alias).or_insert_with(|| value.clone());
        }
    }

    fn resolve(&self, token: &str) -> Option<&ExprValue> {
        self.values
            .get(token)
            .or_else(|| self.values.get(&token.to_lowercase()))
            .or_else(|| self.values.get(&token.to_uppercase()))
    }
}

/// Error raised for malformed expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionError {
    /// Human-readable description of the problem
    pub message: &'static str,
    /// Byte offset where parsing stopped
    pub position: usize,
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for ExpressionError {}

/// Evaluates `source` against `variables`
pub fn evaluate(source: &str, variables: &ExprVariables) -> Result<bool, ExpressionError> {
    let mut parser = Parser {
        source,
        variables,
        index: 0,
        depth: 0,
    };
    let value = parser.parse_or()?;
    parser.skip_whitespace();
    if parser.index != source.len() {
        return Err(parser.error("Unexpected token"));
    }
    Ok(value.as_bool())
}

/// Checks the syntax of `source` without any variable bindings
pub fn check_syntax(source: &str) -> Result<(), ExpressionError> {
    evaluate(source, &ExprVariables::new()).map(|_| ())
}

/// Deepest `!` / parenthesis nesting accepted
pub const MAX_NESTING: usize = 64;

struct Parser<'a> {
    source: &'a str,
    variables: &'a ExprVariables,
    index: usize,
    /// Current `!` / parenthesis nesting
    depth: usize,
}

impl<'a> Parser<'a> {
    fn parse_or(&mut self) -> Result<ExprValue, ExpressionError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_whitespace();
            if !self.eat("||") {
                return Ok(left);
            }
            let right = self.parse_and()?;
            left = ExprValue::Bool(left.as_bool() || right.as_bool());
        }
    }

    fn parse_and(&mut self) -> Result<ExprValue, ExpressionError> {
        let mut left = self.parse_equality()?;
        loop {
            self.skip_whitespace();
            if !self.eat("&&") {
                return Ok(left);
            }
            let right = self.parse_equality()?;
            left = ExprValue::Bool(left.as_bool() && right.as_bool());
        }
    }

    fn parse_equality(&mut self) -> Result<ExprValue, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            if self.eat("==") {
                let right = self.parse_unary()?;
                left = ExprValue::Bool(left.loose_eq(&right));
            } else if self.eat("!=") {
                let right = self.parse_unary()?;
                left = ExprValue::Bool(!left.loose_eq(&right));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_unary(&mut self) -> Result<ExprValue, ExpressionError> {
        self.skip_whitespace();
        if self.eat("!") {
            self.enter()?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(ExprValue::Bool(!operand.as_bool()));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ExprValue, ExpressionError> {
        self.skip_whitespace();
        if self.eat("(") {
            self.enter()?;
            let nested = self.parse_or()?;
            self.skip_whitespace();
            if !self.eat(")") {
                return Err(self.error("Expected ')'"));
            }
            self.depth -= 1;
            return Ok(nested);
        }
        if matches!(self.peek(), Some('"') | Some('\'')) {
            return self.parse_quoted().map(ExprValue::Text);
        }
        let token = self.parse_token().ok_or_else(|| self.error("Expected value"))?;
        match token.to_ascii_lowercase().as_str() {
            "true" => return Ok(ExprValue::Bool(true)),
            "false" => return Ok(ExprValue::Bool(false)),
            _ => {}
        }
        if let Ok(number) = token.parse::<f64>() {
            return Ok(ExprValue::Number(number));
        }
        Ok(self.variables.resolve(token).cloned().unwrap_or(ExprValue::Bool(false)))
    }

    fn parse_quoted(&mut self) -> Result<String, ExpressionError> {
        let Some(quote) = self.peek() else {
            return Err(self.error("Expected string"));
        };
        self.index += quote.len_utf8();
        let mut text = String::new();
        let mut chars = self.source[self.index..].chars();
        while let Some(c) = chars.next() {
            self.index += c.len_utf8();
            if c == quote {
                return Ok(text);
            }
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    self.index += escaped.len_utf8();
                    text.push(escaped);
                    continue;
                }
            }
            text.push(c);
        }
        Err(self.error("Unterminated string literal"))
    }

    fn parse_token(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        let source = self.source;
        let start = self.index;
        let rest = &source[start..];
        let len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '!' | '&' | '|' | '=' | '\'' | '"'))
            .unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        self.index += len;
        Some(&source[start..start + len])
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.source[self.index..];
        self.index += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.source[self.index..].starts_with(token) {
            self.index += token.len();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.index..].chars().next()
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("Expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn error(&self, message: &'static str) -> ExpressionError {
        ExpressionError {
            message,
            position: self.index.min(self.source.len()),
        }
    }
}
