//! Query plan builder and read-only security gate.
//!
//! Turns `db.<collection>.<method>(args)[.chain(args)]*` into a
//! [`QueryPlan`]. A plan only exists if every call passed the allow-lists.

use once_cell::sync::Lazy;
use regex::Regex;

use super::literal::Literal;
use super::parser::parse_argument;
use super::tokenizer::{extract_balanced, split_arguments};
use crate::error::{DbError, DbResult};

pub const ALLOWED_FIRST_METHODS: &[&str] = &["find", "aggregate"];

pub const ALLOWED_CHAIN_METHODS: &[&str] = &[
    "sort",
    "skip",
    "limit",
    "hint",
    "maxTimeMS",
    "collation",
    "batchSize",
    "comment",
    "allowDiskUse",
];

pub const DISALLOWED_METHODS: &[&str] = &[
    "insert",
    "insertOne",
    "insertMany",
    "update",
    "updateOne",
    "updateMany",
    "remove",
    "delete",
    "deleteOne",
    "deleteMany",
    "replace",
    "replaceOne",
    "drop",
    "dropIndex",
    "dropIndexes",
    "bulkWrite",
    "findAndModify",
    "findOneAndUpdate",
    "findOneAndReplace",
    "findOneAndDelete",
];

/// Operator keys that write or run server-side code.
pub const DISALLOWED_OPERATORS: &[&str] = &["$out", "$merge", "$where", "$function", "$accumulator"];

static DISALLOWED_TOKEN: Lazy<Regex> = Lazy::new(|| {
    let verbs = DISALLOWED_METHODS.join("|");
    Regex::new(&format!(r"(?i)\.\s*({})\b", verbs)).expect("disallowed method pattern is valid")
});

static LEADING_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^db\.(\w+)\.(\w+)\s*\(").expect("leading call pattern is valid")
});

static CHAINED_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.\s*(\w+)\s*\(").expect("chained call pattern is valid"));

/// One method call with its parsed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub method: String,
    pub args: Vec<Literal>,
}

impl ParsedCall {
    pub fn arg(&self, index: usize) -> Option<&Literal> {
        self.args.get(index)
    }
}

/// A validated query: a collection, a leading `find`/`aggregate` call and
/// zero or more allow-listed chain calls.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    collection: String,
    calls: Vec<ParsedCall>,
}

impl QueryPlan {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn calls(&self) -> &[ParsedCall] {
        &self.calls
    }

    /// The leading `find` or `aggregate` call.
    pub fn first(&self) -> &ParsedCall {
        &self.calls[0]
    }

    pub fn chain(&self) -> &[ParsedCall] {
        &self.calls[1..]
    }
}

/// Parse and gate a raw shell query.
pub fn build_plan(raw: &str) -> DbResult<QueryPlan> {
    let query = raw.trim().trim_end_matches(';').trim_end();
    if query.is_empty() {
        return Err(DbError::SyntaxError("query cannot be empty".to_string()));
    }

    if let Some(caps) = DISALLOWED_TOKEN.captures(query) {
        let verb = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        return Err(DbError::SecurityViolation(format!(
            "only read operations are allowed; '{}' is not permitted",
            verb
        )));
    }

    let caps = LEADING_CALL.captures(query).ok_or_else(|| {
        DbError::SyntaxError(
            "invalid query syntax; start with db.<collection>.find(...) or db.<collection>.aggregate(...)"
                .to_string(),
        )
    })?;
    let (Some(whole), Some(collection), Some(method)) = (caps.get(0), caps.get(1), caps.get(2))
    else {
        return Err(DbError::SyntaxError("invalid query syntax".to_string()));
    };

    let mut method = method.as_str();
    if !ALLOWED_FIRST_METHODS.contains(&method) {
        return Err(DbError::SecurityViolation(format!(
            "only 'find' and 'aggregate' read operations are allowed; found '{}'",
            method
        )));
    }

    let collection = collection.as_str().to_string();
    let mut calls = Vec::new();
    // positioned at the opening parenthesis of the current call
    let mut rest = &query[whole.end() - 1..];

    loop {
        let (inside, remainder) = extract_balanced(rest)?;
        calls.push(parse_call(method, inside)?);

        let remainder = remainder.trim_start();
        if remainder.is_empty() {
            break;
        }

        let caps = CHAINED_CALL.captures(remainder).ok_or_else(|| {
            DbError::SyntaxError(format!(
                "unexpected text after {}(): '{}'",
                method,
                truncate(remainder, 32)
            ))
        })?;
        let (Some(whole), Some(next)) = (caps.get(0), caps.get(1)) else {
            return Err(DbError::SyntaxError("invalid chained call".to_string()));
        };

        method = next.as_str();
        if !ALLOWED_CHAIN_METHODS.contains(&method) {
            return Err(DbError::SecurityViolation(format!(
                "chained method '{}' is not allowed; only read cursor modifiers can be used",
                method
            )));
        }
        rest = &remainder[whole.end() - 1..];
    }

    Ok(QueryPlan { collection, calls })
}

fn parse_call(method: &str, args: &str) -> DbResult<ParsedCall> {
    let mut parsed = Vec::new();
    for arg in split_arguments(args)? {
        let value = parse_argument(arg).map_err(|e| match e {
            DbError::ArgumentParseError(msg) => DbError::ArgumentParseError(format!(
                "failed to parse arguments for {}(): {}",
                method, msg
            )),
            other => other,
        })?;
        if let Some(op) = find_disallowed_operator(&value) {
            return Err(DbError::SecurityViolation(format!(
                "operator '{}' is not permitted in read-only queries",
                op
            )));
        }
        parsed.push(value);
    }
    Ok(ParsedCall {
        method: method.to_string(),
        args: parsed,
    })
}

fn find_disallowed_operator(value: &Literal) -> Option<&'static str> {
    match value {
        Literal::Map(doc) => doc.iter().find_map(|(key, inner)| {
            DISALLOWED_OPERATORS
                .iter()
                .find(|op| **op == key.as_str())
                .copied()
                .or_else(|| find_disallowed_operator(inner))
        }),
        Literal::Array(items) => items.iter().find_map(find_disallowed_operator),
        _ => None,
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_find_with_chain() {
        let plan = build_plan(r#"db.orders.find({status:"open"}).limit(2);"#).unwrap();
        assert_eq!(plan.collection(), "orders");
        assert_eq!(plan.calls().len(), 2);
        assert_eq!(plan.first().method, "find");
        assert_eq!(
            plan.first().arg(0).and_then(|a| a.as_document()).and_then(|d| d.get("status")),
            Some(&Literal::from("open"))
        );
        assert_eq!(plan.chain()[0].method, "limit");
        assert_eq!(plan.chain()[0].args, vec![Literal::Int(2)]);
    }

    #[test]
    fn test_whitespace_between_calls() {
        let plan = build_plan("  db.users.find ( {} , {name: 1} )\n  .sort({age: -1})\n  .skip(5)  ").unwrap();
        let methods: Vec<&str> = plan.calls().iter().map(|c| c.method.as_str()).collect();
        assert_eq!(methods, vec!["find", "sort", "skip"]);
        assert_eq!(plan.first().args.len(), 2);
    }

    #[test]
    fn test_empty_arguments() {
        let plan = build_plan("db.orders.find()").unwrap();
        assert!(plan.first().args.is_empty());
    }

    #[test]
    fn test_aggregate_date() {
        let plan = build_plan(
            r#"db.orders.aggregate([{$match:{total:{$gte: new Date("2024-01-01T00:00:00Z")}}}])"#,
        )
        .unwrap();
        let stage = &plan.first().args[0].as_array().unwrap()[0];
        assert_eq!(
            stage.as_document().unwrap().get_path("$match.total.$gte"),
            Some(&Literal::DateTime(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
        );
    }

    #[test]
    fn test_rejects_write_methods() {
        for query in [
            "db.orders.update({},{})",
            "db.orders.deleteMany({})",
            "db.orders.find({}).DROP()",
            "db.orders.find({note: \".insertOne\"})",
            "db.orders . bulkWrite([])",
        ] {
            assert!(
                matches!(build_plan(query), Err(DbError::SecurityViolation(_))),
                "{} should be rejected",
                query
            );
        }
    }

    #[test]
    fn test_field_names_containing_verbs_are_fine() {
        let plan = build_plan("db.orders.find({update_time: {$gt: 1}, dropped: false})").unwrap();
        assert_eq!(plan.first().args.len(), 1);
    }

    #[test]
    fn test_rejects_non_read_first_method() {
        let err = build_plan("db.orders.count({})").unwrap_err();
        assert!(matches!(err, DbError::SecurityViolation(_)));
        let err = build_plan("db.orders.mapReduce({})").unwrap_err();
        assert!(matches!(err, DbError::SecurityViolation(_)));
    }

    #[test]
    fn test_rejects_unknown_chain_method() {
        let err = build_plan("db.orders.find({}).forEach(printjson)").unwrap_err();
        assert!(matches!(err, DbError::SecurityViolation(_)));
        assert!(err.to_string().contains("forEach"));
    }

    #[test]
    fn test_rejects_writing_stages() {
        let err = build_plan(r#"db.orders.aggregate([{$match: {}}, {$out: "copy"}])"#).unwrap_err();
        assert!(matches!(err, DbError::SecurityViolation(_)));
        let err = build_plan(r#"db.orders.find({$where: "this.a > 1"})"#).unwrap_err();
        assert!(matches!(err, DbError::SecurityViolation(_)));
    }

    #[test]
    fn test_syntax_errors() {
        for query in [
            "",
            ";",
            "orders.find({})",
            "db.orders",
            "db.orders.find({a:1)",
            "db.orders.find({}) garbage",
            "db.orders.find({}).limit",
        ] {
            assert!(
                matches!(build_plan(query), Err(DbError::SyntaxError(_))),
                "{:?} should be a syntax error",
                query
            );
        }
    }

    #[test]
    fn test_argument_errors() {
        let err = build_plan("db.orders.find({a: someVariable})").unwrap_err();
        assert!(matches!(err, DbError::ArgumentParseError(_)));
        assert!(err.to_string().contains("find()"));
    }
}
