//! Filter document evaluation for the in-memory store.

use regex::RegexBuilder;
use std::cmp::Ordering;

use crate::error::{DbError, DbResult};
use crate::shell::{Document, Literal};

/// Comparison settings derived from the cursor's collation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterContext {
    pub case_insensitive: bool,
}

impl FilterContext {
    pub fn compare(&self, a: &Literal, b: &Literal) -> Ordering {
        match (a, b) {
            (Literal::String(x), Literal::String(y)) if self.case_insensitive => {
                x.to_lowercase().cmp(&y.to_lowercase())
            }
            _ => a.canonical_cmp(b),
        }
    }

    pub fn equals(&self, a: &Literal, b: &Literal) -> bool {
        self.compare(a, b) == Ordering::Equal
    }
}

/// Returns true when `doc` satisfies every clause of `filter`.
pub fn matches_filter(doc: &Document, filter: &Document, ctx: FilterContext) -> DbResult<bool> {
    for (key, condition) in filter.iter() {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches_filter(doc, clause, ctx)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches_filter(doc, clause, ctx)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(key, condition)? {
                    if matches_filter(doc, clause, ctx)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(DbError::ExecutionError(format!(
                    "unsupported top-level query operator '{}'",
                    op
                )))
            }
            path => {
                let candidates = resolve_path(doc, path);
                matches_condition(&candidates, condition, ctx)?
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(op: &str, value: &'a Literal) -> DbResult<Vec<&'a Document>> {
    let items = value
        .as_array()
        .ok_or_else(|| DbError::ExecutionError(format!("{} expects an array", op)))?;
    items
        .iter()
        .map(|item| {
            item.as_document()
                .ok_or_else(|| DbError::ExecutionError(format!("{} entries must be maps", op)))
        })
        .collect()
}

/// Collect every value reachable at a dotted path, descending into arrays
/// of sub-documents.
pub(crate) fn resolve_path<'a>(doc: &'a Document, path: &str) -> Vec<&'a Literal> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(first) = doc.get(parts[0]) {
        collect(first, &parts[1..], &mut out);
    }
    out
}

fn collect<'a>(value: &'a Literal, parts: &[&str], out: &mut Vec<&'a Literal>) {
    let Some((head, tail)) = parts.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Literal::Map(doc) => {
            if let Some(next) = doc.get(head) {
                collect(next, tail, out);
            }
        }
        Literal::Array(items) => {
            if let Ok(idx) = head.parse::<usize>() {
                if let Some(next) = items.get(idx) {
                    collect(next, tail, out);
                }
            } else {
                for item in items.iter().filter(|i| matches!(i, Literal::Map(_))) {
                    collect(item, parts, out);
                }
            }
        }
        _ => {}
    }
}

fn is_operator_map(condition: &Literal) -> bool {
    condition
        .as_document()
        .and_then(|doc| doc.keys().next())
        .is_some_and(|k| k.starts_with('$'))
}

fn matches_condition(candidates: &[&Literal], condition: &Literal, ctx: FilterContext) -> DbResult<bool> {
    let ops = match condition.as_document() {
        Some(doc) if is_operator_map(condition) => doc,
        _ => return Ok(equals_any(candidates, condition, ctx)),
    };
    let options = ops.get("$options").and_then(|o| o.as_str()).unwrap_or("");

    for (op, operand) in ops.iter() {
        let ok = match op.as_str() {
            "$eq" => equals_any(candidates, operand, ctx),
            "$ne" => !equals_any(candidates, operand, ctx),
            "$gt" => compares_any(candidates, operand, ctx, |o| o == Ordering::Greater),
            "$gte" => compares_any(candidates, operand, ctx, |o| o != Ordering::Less),
            "$lt" => compares_any(candidates, operand, ctx, |o| o == Ordering::Less),
            "$lte" => compares_any(candidates, operand, ctx, |o| o != Ordering::Greater),
            "$in" => in_list(candidates, operand, ctx)?,
            "$nin" => !in_list(candidates, operand, ctx)?,
            "$exists" => candidates.is_empty() != operand.is_truthy(),
            "$size" => {
                let size = operand.as_i64().ok_or_else(|| {
                    DbError::ExecutionError("$size expects an integer".to_string())
                })?;
                candidates
                    .iter()
                    .any(|c| c.as_array().is_some_and(|a| a.len() as i64 == size))
            }
            "$regex" => regex_matches(candidates, operand, options)?,
            "$options" => true,
            "$not" => !matches_condition(candidates, operand, ctx)?,
            other => {
                return Err(DbError::ExecutionError(format!(
                    "unsupported query operator '{}'",
                    other
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Candidates plus, for array candidates, their elements.
fn flattened<'a, 'b>(candidates: &'b [&'a Literal]) -> impl Iterator<Item = &'a Literal> + 'b {
    candidates.iter().flat_map(|c: &&'a Literal| {
        let c: &'a Literal = *c;
        let elements: &'a [Literal] = c.as_array().unwrap_or(&[]);
        std::iter::once(c).chain(elements.iter())
    })
}

fn equals_any(candidates: &[&Literal], operand: &Literal, ctx: FilterContext) -> bool {
    if candidates.is_empty() {
        // missing fields match null
        return matches!(operand, Literal::Null);
    }
    flattened(candidates).any(|c| ctx.equals(c, operand))
}

fn compares_any(
    candidates: &[&Literal],
    operand: &Literal,
    ctx: FilterContext,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    flattened(candidates)
        .filter(|c| c.same_class(operand))
        .any(|c| accept(ctx.compare(c, operand)))
}

fn in_list(candidates: &[&Literal], operand: &Literal, ctx: FilterContext) -> DbResult<bool> {
    let options = operand
        .as_array()
        .ok_or_else(|| DbError::ExecutionError("$in/$nin expects an array".to_string()))?;
    Ok(options.iter().any(|o| equals_any(candidates, o, ctx)))
}

fn regex_matches(candidates: &[&Literal], operand: &Literal, options: &str) -> DbResult<bool> {
    let pattern = operand
        .as_str()
        .ok_or_else(|| DbError::ExecutionError("$regex expects a string".to_string()))?;
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| DbError::ExecutionError(format!("invalid $regex: {}", e)))?;
    Ok(flattened(candidates).any(|c| c.as_str().is_some_and(|s| regex.is_match(s))))
}
