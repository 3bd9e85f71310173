//! Shell-syntax normalizer.
//!
//! Rewrites shell-literal spellings into the strict literal form accepted by
//! [`crate::shell::parser`]. Every pass copies string literals verbatim, so a
//! key-like or date-like token inside a string value is never rewritten.
//!
//! Passes, in order:
//! 1. `True`/`False`/`None`/`undefined` become `true`/`false`/`null`
//! 2. `new Date("<iso>")` and `ISODate("<iso>")` become `"<iso>"`
//! 3. bare map keys (`status:`, `$match:`) become quoted keys
//! 4. single-quoted strings become double-quoted strings

use once_cell::sync::Lazy;
use regex::Regex;

use super::tokenizer::QuoteTracker;

const SHELL_SPELLINGS: &[(&str, &str)] = &[
    ("True", "true"),
    ("False", "false"),
    ("None", "null"),
    ("undefined", "null"),
];

static DATE_CONSTRUCTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:new\s+Date|ISODate)\s*\(\s*("(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')\s*\)"#,
    )
    .expect("date constructor pattern is valid")
});

/// Normalize one shell argument into strict literal text.
pub fn normalize(text: &str) -> String {
    let text = substitute_spellings(text);
    let text = rewrite_date_constructors(&text);
    let text = quote_bare_keys(&text);
    requote_single_quoted(&text)
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}

fn read_ident(text: &str, start: usize) -> &str {
    let end = text[start..]
        .char_indices()
        .find(|(_, c)| !is_ident_char(*c))
        .map(|(i, _)| start + i)
        .unwrap_or(text.len());
    &text[start..end]
}

fn followed_by_colon(text: &str, from: usize) -> bool {
    text[from..].trim_start().starts_with(':')
}

fn substitute_spellings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quotes = QuoteTracker::default();
    let mut prev: Option<char> = None;
    let mut i = 0;

    while let Some(ch) = text[i..].chars().next() {
        if !quotes.in_string() && is_ident_start(ch) && !prev.is_some_and(is_ident_char) {
            let word = read_ident(text, i);
            let end = i + word.len();
            match SHELL_SPELLINGS.iter().find(|(from, _)| *from == word) {
                // a key named `None` stays a key
                Some((_, to)) if !followed_by_colon(text, end) => out.push_str(to),
                _ => out.push_str(word),
            }
            prev = word.chars().last();
            i = end;
            continue;
        }
        quotes.feed(ch);
        out.push(ch);
        prev = Some(ch);
        i += ch.len_utf8();
    }
    out
}

fn rewrite_date_constructors(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quotes = QuoteTracker::default();
    let mut prev: Option<char> = None;
    let mut i = 0;

    while let Some(ch) = text[i..].chars().next() {
        if !quotes.in_string() && is_ident_start(ch) && !prev.is_some_and(is_ident_char) {
            if let Some(caps) = DATE_CONSTRUCTOR.captures(&text[i..]) {
                if let (Some(whole), Some(arg)) = (caps.get(0), caps.get(1)) {
                    out.push_str(arg.as_str());
                    prev = Some(')');
                    i += whole.end();
                    continue;
                }
            }
        }
        quotes.feed(ch);
        out.push(ch);
        prev = Some(ch);
        i += ch.len_utf8();
    }
    out
}

fn quote_bare_keys(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut quotes = QuoteTracker::default();
    // last non-whitespace character seen outside string literals
    let mut last_significant: Option<char> = None;
    let mut i = 0;

    while let Some(ch) = text[i..].chars().next() {
        if !quotes.in_string()
            && is_ident_start(ch)
            && matches!(last_significant, Some('{') | Some(','))
        {
            let word = read_ident(text, i);
            let end = i + word.len();
            if followed_by_colon(text, end) {
                out.push('"');
                out.push_str(word);
                out.push('"');
            } else {
                out.push_str(word);
            }
            last_significant = word.chars().last();
            i = end;
            continue;
        }
        let in_string = quotes.feed(ch);
        out.push(ch);
        if in_string {
            last_significant = Some('"');
        } else if !ch.is_whitespace() {
            last_significant = Some(ch);
        }
        i += ch.len_utf8();
    }
    out
}

fn requote_single_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        match quote {
            None => {
                if ch == '\'' {
                    out.push('"');
                    quote = Some('\'');
                } else {
                    if ch == '"' {
                        quote = Some('"');
                    }
                    out.push(ch);
                }
            }
            Some('"') => {
                out.push(ch);
                if ch == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else if ch == '"' {
                    quote = None;
                }
            }
            Some(_) => match ch {
                '\\' => match chars.next() {
                    Some('\'') => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => out.push('\\'),
                },
                '\'' => {
                    out.push('"');
                    quote = None;
                }
                '"' => out.push_str("\\\""),
                _ => out.push(ch),
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotes_bare_keys() {
        assert_eq!(normalize(r#"{status: "open"}"#), r#"{"status": "open"}"#);
        assert_eq!(
            normalize("{$match: {total: {$gte: 10}}, a_b$: 1}"),
            r#"{"$match": {"total": {"$gte": 10}}, "a_b$": 1}"#
        );
    }

    #[test]
    fn test_keeps_quoted_keys() {
        assert_eq!(normalize(r#"{"a": 1, b: 2}"#), r#"{"a": 1, "b": 2}"#);
    }

    #[test]
    fn test_does_not_rewrite_inside_strings() {
        assert_eq!(
            normalize(r#"{note: "{x: 1, y: True}"}"#),
            r#"{"note": "{x: 1, y: True}"}"#
        );
        assert_eq!(
            normalize(r#"{note: "new Date(\"2024-01-01\")"}"#),
            r#"{"note": "new Date(\"2024-01-01\")"}"#
        );
    }

    #[test]
    fn test_shell_spellings() {
        assert_eq!(
            normalize("{a: True, b: False, c: None, d: undefined, e: true}"),
            r#"{"a": true, "b": false, "c": null, "d": null, "e": true}"#
        );
        // a key spelled like a keyword is still a key
        assert_eq!(normalize("{None: 1}"), r#"{"None": 1}"#);
        // identifiers that merely contain a spelling are untouched
        assert_eq!(normalize("{Trueish: 1}"), r#"{"Trueish": 1}"#);
    }

    #[test]
    fn test_date_constructors() {
        assert_eq!(
            normalize(r#"{$gte: new Date("2024-01-01T00:00:00Z")}"#),
            r#"{"$gte": "2024-01-01T00:00:00Z"}"#
        );
        assert_eq!(
            normalize("{at: ISODate('2024-02-03T04:05:06Z')}"),
            r#"{"at": "2024-02-03T04:05:06Z"}"#
        );
        assert_eq!(
            normalize(r#"[new   Date ( "2024-01-01" ) ]"#),
            r#"["2024-01-01" ]"#
        );
    }

    #[test]
    fn test_single_quotes() {
        assert_eq!(normalize(r"{a: 'it\'s'}"), r#"{"a": "it's"}"#);
        assert_eq!(normalize(r#"{a: 'say "hi"'}"#), r#"{"a": "say \"hi\""}"#);
        assert_eq!(normalize(r#"{a: "it's"}"#), r#"{"a": "it's"}"#);
    }
}
