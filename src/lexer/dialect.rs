//! The sqlparse-derived SQL dialect.
//!
//! The `regex` crate has no lookaround, so the lookahead/lookbehind rules
//! below emulate it: lookahead by matching the token and the assertion
//! together and keeping only the first capture group, lookbehind by testing
//! the already-consumed prefix before delegating to an inner rule.

use regex::Regex;

use super::keywords::{self, KeywordTable};
use super::{ERROR, RegexRule, Rule, RuleList, Token, TokenType};
use crate::error::PipeResult;

pub static SINGLE_HINT: TokenType = TokenType::new("Comment.Single.Hint", "Single-line optimizer hint");
pub static MULTILINE_HINT: TokenType = TokenType::new("Comment.Multiline.Hint", "Multi-line optimizer hint");
pub static SINGLE_COMMENT: TokenType = TokenType::new("Comment.Single", "Single-line comment");
pub static MULTILINE_COMMENT: TokenType = TokenType::new("Comment.Multiline", "Multi-line comment");
pub static NEWLINE: TokenType = TokenType::new("Text.Whitespace.Newline", "Line break");
pub static WHITESPACE: TokenType = TokenType::new("Text.Whitespace", "Whitespace");
pub static ASSIGNMENT: TokenType = TokenType::new("Assignment", "Assignment operator");
pub static PUNCTUATION: TokenType = TokenType::new("Punctuation", "Punctuation");
pub static WILDCARD: TokenType = TokenType::new("Wildcard", "Star");
pub static NAME: TokenType = TokenType::new("Name", "Identifier");
pub static BUILTIN: TokenType = TokenType::new("Name.Builtin", "Builtin type name");
pub static LITERAL: TokenType = TokenType::new("Literal", "Dollar-quoted literal");
pub static PLACEHOLDER: TokenType = TokenType::new("Name.Placeholder", "Bind parameter");
pub static COMMAND: TokenType = TokenType::new("Command", "Backslash command");
pub static KEYWORD: TokenType = TokenType::new("Keyword", "Keyword");
pub static ORDER_KEYWORD: TokenType = TokenType::new("Keyword.Order", "Sort direction keyword (ASC, DESC, NULLS FIRST)");
pub static TZ_CAST: TokenType = TokenType::new("Keyword.TZCast", "Time zone cast (AT TIME ZONE '...')");
pub static DML: TokenType = TokenType::new("Keyword.DML", "Data manipulation keyword");
pub static DDL: TokenType = TokenType::new("Keyword.DDL", "Data definition keyword");
pub static DCL: TokenType = TokenType::new("Keyword.DCL", "Data control keyword");
pub static CTE: TokenType = TokenType::new("Keyword.CTE", "Common table expression keyword");
pub static HEXADECIMAL: TokenType = TokenType::new("Number.Hexadecimal", "Hexadecimal number");
pub static FLOAT: TokenType = TokenType::new("Number.Float", "Floating point number");
pub static INTEGER: TokenType = TokenType::new("Number.Integer", "Integer number");
pub static SINGLE_STRING: TokenType = TokenType::new("String.Single", "Single-quoted string");
pub static SYMBOL_STRING: TokenType = TokenType::new("String.Symbol", "Double-quoted identifier");
pub static OPERATOR: TokenType = TokenType::new("Operator", "Operator");
pub static COMPARISON: TokenType = TokenType::new("Operator.Comparison", "Comparison operator");
pub static PIPE: TokenType = TokenType::new("Operator.Pipe", "Pipe operator |>");

/// Matches `regex` only when the following text also matches `lookahead`.
pub struct PositiveLookaheadRule {
    regex: Regex,
    kind: &'static TokenType,
}

impl PositiveLookaheadRule {
    pub fn new(regex: &str, lookahead: &str, kind: &'static TokenType) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?is:({regex})(?:{lookahead}))"))?;
        Ok(Self { regex, kind })
    }
}

impl Rule for PositiveLookaheadRule {
    fn try_match(&self, input: &str, position: usize) -> Option<Token> {
        let caps = self.regex.captures(&input[position..])?;
        let m = caps.get(1)?;
        Some(Token::new(position, m.as_str(), self.kind))
    }

    fn name(&self) -> &'static str {
        "PositiveLookaheadRule"
    }
}

/// Matches `regex` only when the next character is not one of `excluded`
/// (a character-class body such as `_A-Z`), or at end of input.
pub struct NegativeLookaheadRule {
    regex: Regex,
    kind: &'static TokenType,
}

impl NegativeLookaheadRule {
    pub fn new(regex: &str, excluded: &str, kind: &'static TokenType) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?is:({regex})(?:[^{excluded}]|$))"))?;
        Ok(Self { regex, kind })
    }
}

impl Rule for NegativeLookaheadRule {
    fn try_match(&self, input: &str, position: usize) -> Option<Token> {
        let caps = self.regex.captures(&input[position..])?;
        let m = caps.get(1)?;
        Some(Token::new(position, m.as_str(), self.kind))
    }

    fn name(&self) -> &'static str {
        "NegativeLookaheadRule"
    }
}

/// Delegates to `inner` only when the consumed prefix ends with a match of
/// the lookbehind pattern.
pub struct PositiveLookbehindRule<R> {
    lookbehind: Regex,
    inner: R,
}

impl<R: Rule> PositiveLookbehindRule<R> {
    pub fn new(lookbehind: &str, inner: R) -> Result<Self, regex::Error> {
        let lookbehind = Regex::new(&format!("(?is:{lookbehind})$"))?;
        Ok(Self { lookbehind, inner })
    }
}

impl<R: Rule> Rule for PositiveLookbehindRule<R> {
    fn try_match(&self, input: &str, position: usize) -> Option<Token> {
        match self.lookbehind.find(&input[..position]) {
            Some(m) if !m.as_str().is_empty() => self.inner.try_match(input, position),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        "PositiveLookbehindRule"
    }
}

/// Delegates to `inner` only when the consumed prefix does not end with a
/// match of the lookbehind pattern.
pub struct NegativeLookbehindRule<R> {
    lookbehind: Regex,
    inner: R,
}

impl<R: Rule> NegativeLookbehindRule<R> {
    pub fn new(lookbehind: &str, inner: R) -> Result<Self, regex::Error> {
        let lookbehind = Regex::new(&format!("(?is:{lookbehind})$"))?;
        Ok(Self { lookbehind, inner })
    }
}

impl<R: Rule> Rule for NegativeLookbehindRule<R> {
    fn try_match(&self, input: &str, position: usize) -> Option<Token> {
        match self.lookbehind.find(&input[..position]) {
            Some(m) if !m.as_str().is_empty() => None,
            _ => self.inner.try_match(input, position),
        }
    }

    fn name(&self) -> &'static str {
        "NegativeLookbehindRule"
    }
}

/// `$tag$ ... $tag$` quoting. The opening marker is matched by regex; the
/// literal ends at the first occurrence of the identical closing marker.
pub struct DollarQuoteRule {
    marker: Regex,
    kind: &'static TokenType,
}

impl DollarQuoteRule {
    pub fn new(marker: &str, kind: &'static TokenType) -> Result<Self, regex::Error> {
        let marker = Regex::new(&format!("^(?is:{marker})"))?;
        Ok(Self { marker, kind })
    }
}

impl Rule for DollarQuoteRule {
    fn try_match(&self, input: &str, position: usize) -> Option<Token> {
        let rest = &input[position..];
        let marker = self.marker.find(rest)?.as_str();
        let body = &rest[marker.len()..];
        let end = marker.len() + body.find(marker)? + marker.len();
        Some(Token::new(position, &rest[..end], self.kind))
    }

    fn name(&self) -> &'static str {
        "DollarQuoteRule"
    }
}

/// Matches an identifier-shaped word and retags it from the keyword table,
/// falling back to `default` for words that are not keywords.
pub struct KeywordRule {
    regex: Regex,
    default: &'static TokenType,
    keywords: KeywordTable,
}

impl KeywordRule {
    pub fn new(
        pattern: &str,
        default: &'static TokenType,
        keywords: KeywordTable,
    ) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?is:{pattern})"))?;
        Ok(Self {
            regex,
            default,
            keywords,
        })
    }
}

impl Rule for KeywordRule {
    fn try_match(&self, input: &str, position: usize) -> Option<Token> {
        let m = self.regex.find(&input[position..])?;
        let word = m.as_str();
        let kind = self
            .keywords
            .get(word.to_uppercase().as_str())
            .copied()
            .unwrap_or(self.default);
        Some(Token::new(position, word, kind))
    }

    fn name(&self) -> &'static str {
        "KeywordRule"
    }
}

/// The full sqlparse-derived rule list with the default keyword table.
pub fn sqlparse() -> PipeResult<RuleList> {
    sqlparse_with_keywords(keywords::all_keywords())
}

/// The sqlparse-derived rule list with a caller-provided keyword table.
pub fn sqlparse_with_keywords(keywords: KeywordTable) -> PipeResult<RuleList> {
    let rules: Vec<Box<dyn Rule>> = vec![
        Box::new(RegexRule::new(r"(--|# )\+.*?(\r\n|\r|\n|$)", &SINGLE_HINT)?),
        Box::new(RegexRule::new(r"/\*\+[\s\S]*?\*/", &MULTILINE_HINT)?),
        Box::new(RegexRule::new(r"(--|# ).*?(\r\n|\r|\n|$)", &SINGLE_COMMENT)?),
        Box::new(RegexRule::new(r"/\*[\s\S]*?\*/", &MULTILINE_COMMENT)?),
        Box::new(RegexRule::new(r"(\r\n|\r|\n)", &NEWLINE)?),
        Box::new(RegexRule::new(r"\s+?", &WHITESPACE)?),
        Box::new(RegexRule::new(r":=", &ASSIGNMENT)?),
        Box::new(RegexRule::new(r"::", &PUNCTUATION)?),
        Box::new(RegexRule::new(r"\*", &WILDCARD)?),
        Box::new(RegexRule::new(r"`(``|[^`])*`", &NAME)?),
        Box::new(RegexRule::new(r"´(´´|[^´])*´", &NAME)?),
        Box::new(NegativeLookbehindRule::new(
            r#"[\pL\d_"$]"#,
            DollarQuoteRule::new(r"(\$(?:[_A-ZÀ-Ü][\pL\d_]*)?\$)", &LITERAL)?,
        )?),
        Box::new(RegexRule::new(r"\?", &PLACEHOLDER)?),
        Box::new(RegexRule::new(r"%(\([\pL\d_]+\))?s", &PLACEHOLDER)?),
        Box::new(NegativeLookbehindRule::new(
            r"[\pL\d_]",
            RegexRule::new(r"[$:?][\pL\d_]+", &PLACEHOLDER)?,
        )?),
        Box::new(RegexRule::new(r"\\[\pL\d_]+", &COMMAND)?),
        Box::new(RegexRule::new(r"(CASE|IN|VALUES|USING|FROM|AS)\b", &KEYWORD)?),
        Box::new(RegexRule::new(r"(@|##|#)[A-ZÀ-Ü][\pL\d_]+", &NAME)?),
        // Names before a dot, names after a dot and function names.
        Box::new(PositiveLookaheadRule::new(r"[A-ZÀ-Ü][\pL\d_]*", r"\s*\.", &NAME)?),
        Box::new(PositiveLookbehindRule::new(
            r"\.",
            RegexRule::new(r"[A-ZÀ-Ü][\pL\d_]*", &NAME)?,
        )?),
        Box::new(PositiveLookaheadRule::new(r"[A-ZÀ-Ü][\pL\d_]*", r"\(", &NAME)?),
        Box::new(RegexRule::new(r"-?0x[\dA-F]+", &HEXADECIMAL)?),
        Box::new(RegexRule::new(r"-?\d+(\.\d+)?E-?\d+", &FLOAT)?),
        Box::new(NegativeLookaheadRule::new(r"-?(\d+(\.\d*)|\.\d+)", "_A-ZÀ-Ü", &FLOAT)?),
        Box::new(NegativeLookaheadRule::new(r"-?\d+", "_A-ZÀ-Ü", &INTEGER)?),
        Box::new(RegexRule::new(r"'(''|\\'|[^'])*'", &SINGLE_STRING)?),
        Box::new(RegexRule::new(r#""(""|\\"|[^"])*""#, &SYMBOL_STRING)?),
        Box::new(RegexRule::new(r#"(""|".*?[^\\]")"#, &SYMBOL_STRING)?),
        Box::new(NegativeLookbehindRule::new(
            r"[\pL\d_\])]",
            RegexRule::new(r"(\[[^\]\[]+\])", &NAME)?,
        )?),
        // Multi-word keywords.
        Box::new(RegexRule::new(
            r"((LEFT\s+|RIGHT\s+|FULL\s+)?(INNER\s+|OUTER\s+|STRAIGHT\s+)?|(CROSS\s+|NATURAL\s+)?)?JOIN\b",
            &KEYWORD,
        )?),
        Box::new(RegexRule::new(r"END(\s+IF|\s+LOOP|\s+WHILE)?\b", &KEYWORD)?),
        Box::new(RegexRule::new(r"NOT\s+NULL\b", &KEYWORD)?),
        Box::new(RegexRule::new(r"(ASC|DESC)(\s+NULLS\s+(FIRST|LAST))?\b", &ORDER_KEYWORD)?),
        Box::new(RegexRule::new(r"(ASC|DESC)\b", &ORDER_KEYWORD)?),
        Box::new(RegexRule::new(r"NULLS\s+(FIRST|LAST)\b", &ORDER_KEYWORD)?),
        Box::new(RegexRule::new(r"UNION\s+ALL\b", &KEYWORD)?),
        Box::new(RegexRule::new(r"CREATE(\s+OR\s+REPLACE)?\b", &DDL)?),
        Box::new(RegexRule::new(r"DOUBLE\s+PRECISION\b", &BUILTIN)?),
        Box::new(RegexRule::new(r"GROUP\s+BY\b", &KEYWORD)?),
        Box::new(RegexRule::new(r"ORDER\s+BY\b", &KEYWORD)?),
        Box::new(RegexRule::new(r"PRIMARY\s+KEY\b", &KEYWORD)?),
        Box::new(RegexRule::new(r"HANDLER\s+FOR\b", &KEYWORD)?),
        Box::new(RegexRule::new(r"GO(\s\d+)\b", &KEYWORD)?),
        Box::new(RegexRule::new(r"(LATERAL\s+VIEW\s+)(EXPLODE|INLINE|PARSE_URL_TUPLE|POSEXPLODE|STACK)\b", &KEYWORD)?),
        Box::new(RegexRule::new(r"(AT|WITH')\s+TIME\s+ZONE\s+'[^']+'", &TZ_CAST)?),
        Box::new(RegexRule::new(r"(NOT\s+)?(LIKE|ILIKE|RLIKE)\b", &COMPARISON)?),
        Box::new(RegexRule::new(r"(NOT\s+)?(REGEXP)\b", &COMPARISON)?),
        Box::new(KeywordRule::new(r"[\pL\d_][$#\pL\d_]*", &NAME, keywords)?),
        Box::new(RegexRule::new(r"[;:()\[\],.]", &PUNCTUATION)?),
        // `|>>` is a shift, not a pipe.
        Box::new(NegativeLookaheadRule::new(r"\|>", ">", &PIPE)?),
        Box::new(RegexRule::new(r"(->>?|#>>?|@>|<@|\?\|?|\?&|-|#-)", &OPERATOR)?),
        Box::new(RegexRule::new(r"[<>=~!]+", &COMPARISON)?),
        Box::new(RegexRule::new(r"[+/@#%^&|^-]+", &OPERATOR)?),
        Box::new(RegexRule::new(r".", &ERROR)?),
    ];

    Ok(RuleList::new(rules))
}
