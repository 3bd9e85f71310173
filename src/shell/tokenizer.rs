//! Bracket tokenizer and argument splitter.
//!
//! Both walk raw shell text character by character, tracking string
//! literals so that brackets and commas inside quotes are inert.

use crate::error::{DbError, DbResult};

/// Tracks whether the scanner is inside a quoted string.
///
/// Both `"` and `'` open a string; a backslash escapes exactly one
/// following character so `\"` never toggles string mode.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct QuoteTracker {
    quote: Option<char>,
    escaped: bool,
}

impl QuoteTracker {
    /// Feed one character. Returns true when the character belongs to a
    /// string literal, delimiters included.
    pub(crate) fn feed(&mut self, ch: char) -> bool {
        match self.quote {
            Some(q) => {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == q {
                    self.quote = None;
                }
                true
            }
            None => {
                if ch == '"' || ch == '\'' {
                    self.quote = Some(ch);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub(crate) fn in_string(&self) -> bool {
        self.quote.is_some()
    }
}

fn closer_for(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '{' => Some('}'),
        '[' => Some(']'),
        _ => None,
    }
}

/// Extract the text between an opening bracket and its matching closer.
///
/// `text` must start with `(`, `{` or `[`. Returns `(inside, rest)` where
/// `rest` is everything after the matching close bracket.
pub fn extract_balanced(text: &str) -> DbResult<(&str, &str)> {
    let open = text
        .chars()
        .next()
        .ok_or_else(|| DbError::SyntaxError("expected an opening bracket, found end of input".to_string()))?;
    if closer_for(open).is_none() {
        return Err(DbError::SyntaxError(format!(
            "expected an opening bracket, found '{}'",
            open
        )));
    }

    let mut stack: Vec<char> = Vec::new();
    let mut quotes = QuoteTracker::default();

    for (idx, ch) in text.char_indices() {
        if quotes.feed(ch) {
            continue;
        }
        if let Some(close) = closer_for(ch) {
            stack.push(close);
            continue;
        }
        if matches!(ch, ')' | '}' | ']') {
            match stack.pop() {
                Some(expected) if expected == ch => {
                    if stack.is_empty() {
                        let inside = &text[open.len_utf8()..idx];
                        let rest = &text[idx + ch.len_utf8()..];
                        return Ok((inside, rest));
                    }
                }
                expected => {
                    return Err(DbError::SyntaxError(format!(
                        "mismatched brackets: expected '{}' but found '{}' at offset {}",
                        expected.unwrap_or(open),
                        ch,
                        idx
                    )));
                }
            }
        }
    }

    if quotes.in_string() {
        return Err(DbError::SyntaxError(
            "unbalanced brackets: unterminated string literal".to_string(),
        ));
    }
    Err(DbError::SyntaxError("unbalanced brackets".to_string()))
}

/// Split an argument list on its top-level commas.
///
/// Each argument is trimmed. Empty trailing fragments are dropped; an
/// empty argument in the middle of the list is rejected.
pub fn split_arguments(args: &str) -> DbResult<Vec<&str>> {
    let mut parts = Vec::new();
    let mut quotes = QuoteTracker::default();
    let mut depth: usize = 0;
    let mut start = 0;

    for (idx, ch) in args.char_indices() {
        if quotes.feed(ch) {
            continue;
        }
        match ch {
            '(' | '{' | '[' => depth += 1,
            ')' | '}' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(args[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(args[start..].trim());

    while parts.last().is_some_and(|p| p.is_empty()) {
        parts.pop();
    }
    if let Some(pos) = parts.iter().position(|p| p.is_empty()) {
        return Err(DbError::ArgumentParseError(format!(
            "argument {} is empty",
            pos + 1
        )));
    }
    Ok(parts)
}
