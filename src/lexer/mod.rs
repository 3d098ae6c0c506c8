//! Rule-driven lexer.
//!
//! A dialect is nothing more than an ordered [`RuleList`]: the engine asks the
//! rule for a token at the current offset, appends it and advances by the
//! token's length. The first position nothing matches produces a single
//! [`ERROR`] token and lexing stops there.
//!
//! ```
//! use pipesql::lexer::{lex, RegexRule, RuleList, StringRule, TokenType};
//!
//! static SPACE: TokenType = TokenType::new("Space", "Whitespace");
//! static TEST: TokenType = TokenType::new("Test", "The TEST keyword");
//!
//! let rules = RuleList::new(vec![
//!     Box::new(RegexRule::new(r"\s+", &SPACE).unwrap()),
//!     Box::new(StringRule::new("TEST", &TEST).unwrap()),
//! ]);
//! let tokens = lex("   TEST", &rules);
//! assert_eq!(tokens[1].position, 3);
//! ```

pub mod dialect;
pub mod keywords;

use std::fmt;

use regex::Regex;

/// A token tag. Tags are compared by identity, so declare them as `static`s.
#[derive(Debug)]
pub struct TokenType {
    pub name: &'static str,
    pub description: &'static str,
}

impl TokenType {
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Reserved tag for input that no rule could lex.
pub static ERROR: TokenType = TokenType::new(
    "Token.Error",
    "The input at this position did not match any rule",
);

/// One lexed fragment of the input.
#[derive(Debug, Clone)]
pub struct Token {
    pub raw_value: String,
    pub kind: &'static TokenType,
    /// Byte offset into the original input. Synthesized tokens use 0.
    pub position: usize,
}

impl Token {
    pub fn new(position: usize, raw_value: impl Into<String>, kind: &'static TokenType) -> Self {
        Self {
            raw_value: raw_value.into(),
            kind,
            position,
        }
    }

    /// True when this token carries exactly the given tag.
    pub fn is(&self, kind: &TokenType) -> bool {
        std::ptr::eq(self.kind, kind)
    }

    /// Upper-cased value with inner whitespace runs collapsed, so that
    /// `order   by` and `ORDER BY` compare equal.
    pub fn normalized(&self) -> String {
        self.raw_value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase()
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
            && self.raw_value == other.raw_value
            && std::ptr::eq(self.kind, other.kind)
    }
}

/// A matcher anchored at `position`.
pub trait Rule: Send + Sync {
    /// Try to produce a token starting exactly at `position`.
    fn try_match(&self, input: &str, position: usize) -> Option<Token>;

    fn name(&self) -> &'static str;
}

/// Ordered alternation: the first child that matches wins.
pub struct RuleList {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleList {
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Rule for RuleList {
    fn try_match(&self, input: &str, position: usize) -> Option<Token> {
        self.rules
            .iter()
            .find_map(|rule| rule.try_match(input, position))
    }

    fn name(&self) -> &'static str {
        "RuleList"
    }
}

/// Case-insensitive fixed string.
pub struct StringRule {
    regex: Regex,
    kind: &'static TokenType,
}

impl StringRule {
    pub fn new(literal: &str, kind: &'static TokenType) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?i:{})", regex::escape(literal)))?;
        Ok(Self { regex, kind })
    }
}

impl Rule for StringRule {
    fn try_match(&self, input: &str, position: usize) -> Option<Token> {
        let m = self.regex.find(&input[position..])?;
        Some(Token::new(position, m.as_str(), self.kind))
    }

    fn name(&self) -> &'static str {
        "StringRule"
    }
}

/// Case-insensitive regular expression anchored at the current position.
pub struct RegexRule {
    regex: Regex,
    kind: &'static TokenType,
}

impl RegexRule {
    pub fn new(pattern: &str, kind: &'static TokenType) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?is:{pattern})"))?;
        Ok(Self { regex, kind })
    }
}

impl Rule for RegexRule {
    fn try_match(&self, input: &str, position: usize) -> Option<Token> {
        let m = self.regex.find(&input[position..])?;
        Some(Token::new(position, m.as_str(), self.kind))
    }

    fn name(&self) -> &'static str {
        "RegexRule"
    }
}

const EXCERPT_CHARS: usize = 16;

/// Lex `input` with `rule`.
///
/// Stops at the first position where `rule` fails, returns an empty match,
/// or returns text that is not actually present in the input; in each case
/// a trailing [`ERROR`] token describes the problem.
pub fn lex(input: &str, rule: &dyn Rule) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut position = 0;

    while position < input.len() {
        let rest = &input[position..];
        match rule.try_match(input, position) {
            Some(token) if token.raw_value.is_empty() => {
                tokens.push(error_token(input, position, "rule returned an empty match"));
                break;
            }
            Some(token) if !rest.starts_with(token.raw_value.as_str()) => {
                tokens.push(error_token(input, position, "rule returned text not present in input"));
                break;
            }
            Some(token) => {
                position += token.raw_value.len();
                tokens.push(token);
            }
            None => {
                tokens.push(error_token(input, position, "rule did not match"));
                break;
            }
        }
    }

    tokens
}

fn error_token(input: &str, position: usize, reason: &str) -> Token {
    let excerpt: String = input[position..].chars().take(EXCERPT_CHARS).collect();
    Token::new(
        position,
        format!("Lexing error at position {position}: {reason}, input: {excerpt:?}"),
        &ERROR,
    )
}
