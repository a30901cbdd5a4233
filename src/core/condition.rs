//! Recipe condition expressions
//!
//! Every conditional element of a recipe carries a `when` expression such as
//! `with-x && !cocoa` or `head || dep:gnutls`. Expressions are parsed once at
//! load time and evaluated against the facts of a single build.
//!
//! Grammar:
//!
//! ```text
//! expr  := or
//! or    := and ( "||" and )*
//! and   := unary ( "&&" unary )*
//! unary := "!" unary | "(" expr ")" | atom
//! atom  := "head" | "release" | "always" | "dep:" NAME | NAME
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RecipeError;

/// Facts a condition is evaluated against
pub trait Facts {
    /// Whether the named option is selected
    fn option_selected(&self, name: &str) -> bool;

    /// Whether the build uses head sources
    fn is_head(&self) -> bool;

    /// Whether the named optional dependency is selected and present
    fn has_dependency(&self, name: &str) -> bool;
}

/// Parsed condition expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum Condition {
    /// Always true
    #[default]
    Always,
    /// Head build
    Head,
    /// Release build
    Release,
    /// Option is selected
    Option(String),
    /// Optional dependency is selected and present
    Dependency(String),
    /// Negation
    Not(Box<Condition>),
    /// Conjunction
    All(Vec<Condition>),
    /// Disjunction
    Any(Vec<Condition>),
}

impl Condition {
    /// Parse an expression; an empty string means [`Condition::Always`]
    pub fn parse(expr: &str) -> Result<Self, RecipeError> {
        let tokens = tokenize(expr)?;
        if tokens.is_empty() {
            return Ok(Self::Always);
        }

        let mut parser = Parser {
            expr,
            tokens,
            pos: 0,
        };
        let condition = parser.parse_or()?;
        if let Some(token) = parser.tokens.get(parser.pos) {
            return Err(invalid(expr, &format!("unexpected '{token}'")));
        }
        Ok(condition)
    }

    /// Evaluate against the given facts
    pub fn eval(&self, facts: &impl Facts) -> bool {
        match self {
            Self::Always => true,
            Self::Head => facts.is_head(),
            Self::Release => !facts.is_head(),
            Self::Option(name) => facts.option_selected(name),
            Self::Dependency(name) => facts.has_dependency(name),
            Self::Not(inner) => !inner.eval(facts),
            Self::All(items) => items.iter().all(|c| c.eval(facts)),
            Self::Any(items) => items.iter().any(|c| c.eval(facts)),
        }
    }

    /// Option names mentioned anywhere in the expression
    pub fn options(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect(&mut out, false);
        out
    }

    /// Dependency names mentioned through `dep:` atoms
    pub fn dependencies(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect(&mut out, true);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a str>, deps: bool) {
        match self {
            Self::Option(name) if !deps => out.push(name),
            Self::Dependency(name) if deps => out.push(name),
            Self::Not(inner) => inner.collect(out, deps),
            Self::All(items) | Self::Any(items) => {
                for item in items {
                    item.collect(out, deps);
                }
            }
            _ => {}
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Any(_) => 1,
            Self::All(_) => 2,
            _ => 3,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("always"),
            Self::Head => f.write_str("head"),
            Self::Release => f.write_str("release"),
            Self::Option(name) => f.write_str(name),
            Self::Dependency(name) => write!(f, "dep:{name}"),
            Self::Not(inner) => {
                f.write_str("!")?;
                inner.fmt_child(f, 3)
            }
            Self::All(items) | Self::Any(items) => {
                let (sep, min) = if matches!(self, Self::All(_)) {
                    (" && ", 3)
                } else {
                    (" || ", 2)
                };
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    item.fmt_child(f, min)?;
                }
                Ok(())
            }
        }
    }
}

impl TryFrom<String> for Condition {
    type Error = RecipeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Condition> for String {
    fn from(value: Condition) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Not,
    Open,
    Close,
    Word(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str("&&"),
            Self::Or => f.write_str("||"),
            Self::Not => f.write_str("!"),
            Self::Open => f.write_str("("),
            Self::Close => f.write_str(")"),
            Self::Word(w) => f.write_str(w),
        }
    }
}

fn invalid(expr: &str, reason: &str) -> RecipeError {
    RecipeError::InvalidCondition {
        expr: expr.to_string(),
        reason: reason.to_string(),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | ':')
}

fn tokenize(expr: &str) -> Result<Vec<Token>, RecipeError> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '&' | '|' => {
                chars.next();
                if chars.next_if(|&(_, next)| next == c).is_none() {
                    return Err(invalid(expr, &format!("expected '{c}{c}'")));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            c if is_word_char(c) => {
                let mut end = start;
                while let Some(&(i, w)) = chars.peek() {
                    if !is_word_char(w) {
                        break;
                    }
                    end = i + w.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Word(expr[start..end].to_string()));
            }
            other => return Err(invalid(expr, &format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    expr: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_or(&mut self) -> Result<Condition, RecipeError> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Condition::Any(items)
        })
    }

    fn parse_and(&mut self) -> Result<Condition, RecipeError> {
        let mut items = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Condition::All(items)
        })
    }

    fn parse_unary(&mut self) -> Result<Condition, RecipeError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| invalid(self.expr, "unexpected end of expression"))?;
        self.pos += 1;

        match token {
            Token::Not => Ok(Condition::Not(Box::new(self.parse_unary()?))),
            Token::Open => {
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::Close) {
                    return Err(invalid(self.expr, "missing ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Token::Word(word) => self.atom(&word),
            other => Err(invalid(self.expr, &format!("unexpected '{other}'"))),
        }
    }

    fn atom(&self, word: &str) -> Result<Condition, RecipeError> {
        match word {
            "head" => return Ok(Condition::Head),
            "release" => return Ok(Condition::Release),
            "always" => return Ok(Condition::Always),
            _ => {}
        }

        if let Some(dep) = word.strip_prefix("dep:") {
            if dep.is_empty() || dep.contains(':') {
                return Err(invalid(self.expr, &format!("bad dependency atom '{word}'")));
            }
            return Ok(Condition::Dependency(dep.to_string()));
        }

        if !is_option_name(word) {
            return Err(invalid(self.expr, &format!("bad option name '{word}'")));
        }
        Ok(Condition::Option(word.to_string()))
    }
}

/// Whether `name` is a valid option identifier
pub fn is_option_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.' | '+'))
}
