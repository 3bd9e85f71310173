//! Safe literal parser and date post-processor.
//!
//! The grammar accepts only literal productions:
//!
//! ```text
//! value  := map | seq | string | number | "true" | "false" | "null"
//! map    := "{" ( string ":" value ( "," string ":" value )* ","? )? "}"
//! seq    := "[" ( value ( "," value )* ","? )? "]"
//! ```
//!
//! Names, calls and operators are rejected outright; nothing is evaluated.

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::literal::{Document, Literal};
use super::normalizer::normalize;
use crate::error::{DbError, DbResult};

/// Keys whose string values are promoted to date-times when ISO-shaped.
pub const COMPARISON_OPERATORS: &[&str] = &["$gte", "$lt", "$lte", "$gt", "$ne", "$eq"];

const MAX_NESTING: usize = 128;

static ISO_DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$")
        .expect("ISO date-time pattern is valid")
});

/// Normalize, parse and date-process one shell argument.
pub fn parse_argument(raw: &str) -> DbResult<Literal> {
    let normalized = normalize(raw);
    let value = parse_literal(&normalized)?;
    Ok(promote_dates(value))
}

/// Parse strict literal text into a value tree.
pub fn parse_literal(input: &str) -> DbResult<Literal> {
    let mut parser = LiteralParser::new(input);
    parser.skip_whitespace();
    let value = parser.parse_value(0)?;
    parser.skip_whitespace();
    if let Some(ch) = parser.current_char {
        return Err(parser.error(format!("unexpected trailing character '{}'", ch)));
    }
    Ok(value)
}

struct LiteralParser {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
}

impl LiteralParser {
    fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Self {
            input: chars,
            position: 0,
            current_char,
        }
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: String) -> DbError {
        DbError::ArgumentParseError(format!("{} at position {}", message, self.position))
    }

    fn expect(&mut self, expected: char) -> DbResult<()> {
        match self.current_char {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn parse_value(&mut self, depth: usize) -> DbResult<Literal> {
        if depth > MAX_NESTING {
            return Err(self.error(format!("nesting deeper than {} levels", MAX_NESTING)));
        }
        match self.current_char {
            Some('{') => self.parse_map(depth),
            Some('[') => self.parse_seq(depth),
            Some('"') => self.parse_string().map(Literal::String),
            Some(ch) if ch == '-' || ch == '+' || ch == '.' || ch.is_ascii_digit() => {
                self.parse_number()
            }
            Some(ch) if ch.is_alphabetic() || ch == '_' || ch == '$' => self.parse_keyword(),
            Some(ch) => Err(self.error(format!("unexpected character '{}'", ch))),
            None => Err(self.error("unexpected end of input".to_string())),
        }
    }

    fn parse_map(&mut self, depth: usize) -> DbResult<Literal> {
        self.expect('{')?;
        let mut doc = Document::new();
        loop {
            self.skip_whitespace();
            if self.current_char == Some('}') {
                self.advance();
                return Ok(Literal::Map(doc));
            }
            if self.current_char != Some('"') {
                return Err(self.error("expected a quoted map key".to_string()));
            }
            let key = self.parse_string()?;
            self.skip_whitespace();
            self.expect(':')?;
            self.skip_whitespace();
            let value = self.parse_value(depth + 1)?;
            doc.insert(key, value);
            self.skip_whitespace();
            match self.current_char {
                Some(',') => self.advance(),
                Some('}') => {}
                Some(ch) => return Err(self.error(format!("expected ',' or '}}', found '{}'", ch))),
                None => return Err(self.error("unterminated map".to_string())),
            }
        }
    }

    fn parse_seq(&mut self, depth: usize) -> DbResult<Literal> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.current_char == Some(']') {
                self.advance();
                return Ok(Literal::Array(items));
            }
            items.push(self.parse_value(depth + 1)?);
            self.skip_whitespace();
            match self.current_char {
                Some(',') => self.advance(),
                Some(']') => {}
                Some(ch) => return Err(self.error(format!("expected ',' or ']', found '{}'", ch))),
                None => return Err(self.error("unterminated sequence".to_string())),
            }
        }
    }

    fn parse_string(&mut self) -> DbResult<String> {
        self.expect('"')?;
        let mut string = String::new();

        while let Some(ch) = self.current_char {
            match ch {
                '"' => {
                    self.advance();
                    return Ok(string);
                }
                '\\' => {
                    self.advance();
                    let escaped = self
                        .current_char
                        .ok_or_else(|| self.error("unterminated escape".to_string()))?;
                    match escaped {
                        'n' => string.push('\n'),
                        't' => string.push('\t'),
                        'r' => string.push('\r'),
                        'b' => string.push('\u{8}'),
                        'f' => string.push('\u{c}'),
                        'u' => {
                            string.push(self.read_unicode_escape()?);
                            continue;
                        }
                        other => string.push(other),
                    }
                    self.advance();
                }
                _ => {
                    string.push(ch);
                    self.advance();
                }
            }
        }
        Err(self.error("unterminated string literal".to_string()))
    }

    /// Reads the four hex digits after `\u`; leaves the cursor after them.
    fn read_unicode_escape(&mut self) -> DbResult<char> {
        let mut code = 0u32;
        for _ in 0..4 {
            self.advance();
            let digit = self
                .current_char
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid \\u escape".to_string()))?;
            code = code * 16 + digit;
        }
        self.advance();
        char::from_u32(code).ok_or_else(|| self.error(format!("invalid code point {:#x}", code)))
    }

    fn parse_number(&mut self) -> DbResult<Literal> {
        let mut num_str = String::new();
        let mut is_float = false;

        if let Some(sign @ ('-' | '+')) = self.current_char {
            if sign == '-' {
                num_str.push(sign);
            }
            self.advance();
        }
        while let Some(ch) = self.current_char {
            match ch {
                '0'..='9' => num_str.push(ch),
                '.' | 'e' | 'E' => {
                    is_float = true;
                    num_str.push(ch);
                }
                '-' | '+' if matches!(num_str.chars().last(), Some('e' | 'E')) => num_str.push(ch),
                _ => break,
            }
            self.advance();
        }

        if !is_float {
            if let Ok(n) = num_str.parse::<i64>() {
                return Ok(Literal::Int(n));
            }
        }
        num_str
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Literal::Float)
            .ok_or_else(|| self.error(format!("invalid number '{}'", num_str)))
    }

    fn parse_keyword(&mut self) -> DbResult<Literal> {
        let start = self.position;
        let mut word = String::new();
        while let Some(ch) = self.current_char {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        match word.as_str() {
            "true" => Ok(Literal::Bool(true)),
            "false" => Ok(Literal::Bool(false)),
            "null" => Ok(Literal::Null),
            _ => Err(DbError::ArgumentParseError(format!(
                "names and expressions are not allowed: found '{}' at position {}",
                word, start
            ))),
        }
    }
}

/// Replace ISO-8601 strings under comparison-operator keys with date-times.
///
/// Strings that match the shape but are not real instants stay strings.
pub fn promote_dates(value: Literal) -> Literal {
    match value {
        Literal::Map(doc) => Literal::Map(
            doc.into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        Literal::String(s) if COMPARISON_OPERATORS.contains(&key.as_str()) => {
                            match parse_iso_datetime(&s) {
                                Some(dt) => Literal::DateTime(dt),
                                None => Literal::String(s),
                            }
                        }
                        other => promote_dates(other),
                    };
                    (key, value)
                })
                .collect(),
        ),
        Literal::Array(items) => Literal::Array(items.into_iter().map(promote_dates).collect()),
        other => other,
    }
}

/// Strict ISO-8601 date-time parse. A trailing `Z` is UTC; a missing
/// offset is taken as UTC.
pub fn parse_iso_datetime(s: &str) -> Option<DateTime<Utc>> {
    if !ISO_DATETIME.is_match(s) {
        return None;
    }
    let has_offset = s.ends_with('Z') || s[19..].contains(['+', '-']);
    if has_offset {
        let normalized = match s.strip_suffix('Z') {
            Some(head) => format!("{}+00:00", head),
            None => s.to_string(),
        };
        DateTime::parse_from_rfc3339(&normalized)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    } else {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
