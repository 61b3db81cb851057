// src/requirement/marker.rs

//! Environment markers (`; python_version < "3.8" and extra == "tests"`)
//!
//! Markers gate declared requirements on the target interpreter and on the
//! extras the requirer asked for.

use super::normalize_name;
use crate::version::{Specifier, Version};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Interpreter facts markers are evaluated against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerEnvironment {
    pub python_version: String,
    pub python_full_version: String,
    pub sys_platform: String,
    pub platform_system: String,
    pub platform_machine: String,
    pub os_name: String,
    pub implementation_name: String,
}

impl Default for MarkerEnvironment {
    fn default() -> Self {
        Self {
            python_version: "3.12".to_string(),
            python_full_version: "3.12.0".to_string(),
            sys_platform: "linux".to_string(),
            platform_system: "Linux".to_string(),
            platform_machine: "x86_64".to_string(),
            os_name: "posix".to_string(),
            implementation_name: "cpython".to_string(),
        }
    }
}

impl MarkerEnvironment {
    fn lookup(&self, variable: &str) -> Option<&str> {
        Some(match variable {
            "python_version" => &self.python_version,
            "python_full_version" | "implementation_version" => &self.python_full_version,
            "sys_platform" => &self.sys_platform,
            "platform_system" => &self.platform_system,
            "platform_machine" => &self.platform_machine,
            "os_name" => &self.os_name,
            "implementation_name" | "platform_python_implementation" => {
                &self.implementation_name
            }
            _ => return None,
        })
    }
}

/// One side of a marker comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Variable(String),
    Literal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOp {
    Compare(&'static str),
    In,
    NotIn,
}

/// A parsed marker expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Compare {
        left: Value,
        op: MarkerOp,
        right: Value,
    },
    And(Box<Marker>, Box<Marker>),
    Or(Box<Marker>, Box<Marker>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| format!("unterminated string in marker '{}'", input))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '=' | '!' | '<' | '>' | '~' => {
                let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
                let op = ["===", "==", "!=", "<=", ">=", "~=", "<", ">"]
                    .into_iter()
                    .find(|op| rest.starts_with(op))
                    .ok_or_else(|| format!("invalid operator in marker '{}'", input))?;
                tokens.push(Token::Op(op));
                i += op.len();
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected '{}' in marker '{}'", other, input)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn expr(&mut self) -> Result<Marker, String> {
        let mut left = self.and_expr()?;
        while self.keyword("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Marker::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Marker, String> {
        let mut left = self.atom()?;
        while self.keyword("and") {
            self.pos += 1;
            let right = self.atom()?;
            left = Marker::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn atom(&mut self) -> Result<Marker, String> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.expr()?;
            if self.next() != Some(Token::RParen) {
                return Err("expected ')'".to_string());
            }
            return Ok(inner);
        }

        let left = self.value()?;
        let op = match self.next() {
            Some(Token::Op(op)) => MarkerOp::Compare(op),
            Some(Token::Ident(w)) if w == "in" => MarkerOp::In,
            Some(Token::Ident(w)) if w == "not" => match self.next() {
                Some(Token::Ident(w)) if w == "in" => MarkerOp::NotIn,
                _ => return Err("expected 'in' after 'not'".to_string()),
            },
            other => return Err(format!("expected marker operator, found {:?}", other)),
        };
        let right = self.value()?;
        Ok(Marker::Compare { left, op, right })
    }

    fn value(&mut self) -> Result<Value, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::Literal(s)),
            Some(Token::Ident(name)) => Ok(Value::Variable(name)),
            other => Err(format!("expected marker value, found {:?}", other)),
        }
    }
}

impl Marker {
    /// Parse the text after `;` in a requirement line
    pub fn parse(input: &str) -> Result<Self, String> {
        let mut parser = Parser {
            tokens: tokenize(input)?,
            pos: 0,
        };
        let marker = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(format!("trailing tokens in marker '{}'", input));
        }
        Ok(marker)
    }

    /// Evaluate against an interpreter, for the extras the requirer asked for
    ///
    /// A marker with no `extra` clause is evaluated once; one mentioning
    /// `extra` is true if it holds for any requested extra.
    pub fn evaluate(&self, env: &MarkerEnvironment, extras: &[String]) -> bool {
        self.eval(env, None) || extras.iter().any(|extra| self.eval(env, Some(extra)))
    }

    fn eval(&self, env: &MarkerEnvironment, extra: Option<&str>) -> bool {
        match self {
            Marker::And(a, b) => a.eval(env, extra) && b.eval(env, extra),
            Marker::Or(a, b) => a.eval(env, extra) || b.eval(env, extra),
            Marker::Compare { left, op, right } => {
                let is_extra = matches!(left, Value::Variable(v) if v == "extra")
                    || matches!(right, Value::Variable(v) if v == "extra");
                let resolve = |value: &Value| -> Option<String> {
                    match value {
                        Value::Literal(s) => Some(s.clone()),
                        Value::Variable(v) if v == "extra" => extra.map(str::to_string),
                        Value::Variable(v) => env.lookup(v).map(str::to_string),
                    }
                };
                let (Some(mut l), Some(mut r)) = (resolve(left), resolve(right)) else {
                    return false;
                };
                if is_extra {
                    l = normalize_name(&l);
                    r = normalize_name(&r);
                }
                compare(&l, *op, &r)
            }
        }
    }
}

fn compare(left: &str, op: MarkerOp, right: &str) -> bool {
    match op {
        MarkerOp::In => right.contains(left),
        MarkerOp::NotIn => !right.contains(left),
        MarkerOp::Compare(op) => {
            // version comparison when the right side is a version
            if let (Ok(spec), Ok(version)) = (
                Specifier::parse(&format!("{}{}", op, right)),
                Version::parse(left),
            ) {
                return spec.contains(&version);
            }
            match op {
                "==" | "===" => left == right,
                "!=" => left != right,
                "<" => left < right,
                "<=" => left <= right,
                ">" => left > right,
                ">=" => left >= right,
                _ => false,
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Variable(v) => write!(f, "{}", v),
            Value::Literal(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::Compare { left, op, right } => {
                let op = match op {
                    MarkerOp::Compare(op) => *op,
                    MarkerOp::In => "in",
                    MarkerOp::NotIn => "not in",
                };
                write!(f, "{} {} {}", left, op, right)
            }
            Marker::And(a, b) => write!(f, "({} and {})", a, b),
            Marker::Or(a, b) => write!(f, "({} or {})", a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> MarkerEnvironment {
        MarkerEnvironment {
            python_version: "3.11".into(),
            python_full_version: "3.11.4".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_marker_python_version() {
        let m = Marker::parse("python_version < \"3.8\"").unwrap();
        assert!(!m.evaluate(&env(), &[]));
        let m = Marker::parse("python_version >= '3.10'").unwrap();
        assert!(m.evaluate(&env(), &[]));
    }

    #[test]
    fn test_marker_extra_requires_request() {
        let m = Marker::parse("extra == 'Test_Utils'").unwrap();
        assert!(!m.evaluate(&env(), &[]));
        assert!(m.evaluate(&env(), &["test-utils".to_string()]));
    }

    #[test]
    fn test_marker_and_or_parens() {
        let m = Marker::parse(
            "(sys_platform == 'win32' or os_name == 'posix') and python_version > '3'",
        )
        .unwrap();
        assert!(m.evaluate(&env(), &[]));
    }

    #[test]
    fn test_marker_not_in() {
        let m = Marker::parse("platform_machine not in 'arm64 aarch64'").unwrap();
        assert!(m.evaluate(&env(), &[]));
    }

    #[test]
    fn test_marker_parse_errors() {
        assert!(Marker::parse("python_version <").is_err());
        assert!(Marker::parse("python_version == '3").is_err());
        assert!(Marker::parse("(os_name == 'posix'").is_err());
    }
}
