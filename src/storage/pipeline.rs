//! Projection, sorting and aggregation stages for the in-memory store.

use std::cmp::Ordering;

use super::filter::{matches_filter, resolve_path, FilterContext};
use super::SortDirection;
use crate::error::{DbError, DbResult};
use crate::shell::{Document, Literal, INTERNAL_ID};

static NULL: Literal = Literal::Null;

/// Run an aggregation pipeline over a snapshot of documents.
pub fn run_pipeline(
    mut docs: Vec<Document>,
    pipeline: &[Literal],
    ctx: FilterContext,
) -> DbResult<Vec<Document>> {
    for (idx, stage) in pipeline.iter().enumerate() {
        let stage_doc = stage.as_document().ok_or_else(|| {
            DbError::ExecutionError(format!("pipeline stage {} must be a map", idx))
        })?;
        let mut entries = stage_doc.iter();
        let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(DbError::ExecutionError(format!(
                "pipeline stage {} must have exactly one field",
                idx
            )));
        };

        docs = match name.as_str() {
            "$match" => {
                let filter = expect_map(name, spec)?;
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches_filter(&doc, filter, ctx)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$project" => {
                let projection = expect_map(name, spec)?;
                docs.iter()
                    .map(|doc| apply_projection(doc, projection))
                    .collect::<DbResult<Vec<_>>>()?
            }
            "$addFields" | "$set" => {
                let fields = expect_map(name, spec)?;
                docs.into_iter()
                    .map(|mut doc| {
                        for (path, expr) in fields.iter() {
                            let value = evaluate(&doc, expr);
                            set_path(&mut doc, path, value);
                        }
                        doc
                    })
                    .collect()
            }
            "$sort" => {
                let spec = sort_spec(expect_map(name, spec)?)?;
                sort_documents(&mut docs, &spec, ctx);
                docs
            }
            "$skip" => {
                let n = expect_count(name, spec)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = expect_count(name, spec)?;
                if n == 0 {
                    return Err(DbError::ExecutionError(
                        "$limit must be positive".to_string(),
                    ));
                }
                docs.truncate(n);
                docs
            }
            "$count" => {
                let field = spec.as_str().filter(|s| !s.is_empty() && !s.starts_with('$'));
                let field = field.ok_or_else(|| {
                    DbError::ExecutionError("$count expects a non-empty field name".to_string())
                })?;
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut out = Document::new();
                    out.insert(field, Literal::Int(docs.len() as i64));
                    vec![out]
                }
            }
            "$unwind" => unwind(docs, spec)?,
            "$group" => group(docs, expect_map(name, spec)?, ctx)?,
            other => {
                return Err(DbError::ExecutionError(format!(
                    "unsupported aggregation stage '{}'",
                    other
                )))
            }
        };
    }
    Ok(docs)
}

fn expect_map<'a>(stage: &str, spec: &'a Literal) -> DbResult<&'a Document> {
    spec.as_document()
        .ok_or_else(|| DbError::ExecutionError(format!("{} expects a map", stage)))
}

fn expect_count(stage: &str, spec: &Literal) -> DbResult<usize> {
    spec.as_i64()
        .filter(|n| *n >= 0)
        .map(|n| n as usize)
        .ok_or_else(|| DbError::ExecutionError(format!("{} expects a non-negative integer", stage)))
}

/// Parse a `{field: 1 | -1}` map into an ordered sort specification.
pub fn sort_spec(spec: &Document) -> DbResult<Vec<(String, SortDirection)>> {
    spec.iter()
        .map(|(field, dir)| match dir.as_i64() {
            Some(1) => Ok((field.clone(), SortDirection::Ascending)),
            Some(-1) => Ok((field.clone(), SortDirection::Descending)),
            _ => Err(DbError::ExecutionError(format!(
                "sort direction for '{}' must be 1 or -1, got {}",
                field, dir
            ))),
        })
        .collect()
}

pub fn sort_documents(docs: &mut [Document], spec: &[(String, SortDirection)], ctx: FilterContext) {
    if spec.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (path, direction) in spec {
            let left = resolve_path(a, path).first().copied().unwrap_or(&NULL);
            let right = resolve_path(b, path).first().copied().unwrap_or(&NULL);
            let ord = ctx.compare(left, right);
            let ord = match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Evaluate a projection-style expression: `"$path"` reads a field, a map
/// is evaluated field by field, anything else is a constant.
fn evaluate(doc: &Document, expr: &Literal) -> Literal {
    match expr {
        Literal::String(s) if s.starts_with('$') && s.len() > 1 => resolve_path(doc, &s[1..])
            .first()
            .map(|v| (*v).clone())
            .unwrap_or(Literal::Null),
        Literal::Map(fields) => Literal::Map(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), evaluate(doc, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn set_path(doc: &mut Document, path: &str, value: Literal) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, tail)) => {
            if !matches!(doc.get(head), Some(Literal::Map(_))) {
                doc.insert(head, Literal::Map(Document::new()));
            }
            if let Some(Literal::Map(inner)) = doc.get_mut(head) {
                set_path(inner, tail, value);
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, tail)) => {
            if let Some(Literal::Map(inner)) = doc.get_mut(head) {
                remove_path(inner, tail);
            }
        }
    }
}

enum ProjectionMode {
    Include,
    Exclude,
}

/// Apply an inclusion or exclusion projection. `_id` is kept unless the
/// projection excludes it explicitly.
pub fn apply_projection(doc: &Document, projection: &Document) -> DbResult<Document> {
    if projection.is_empty() {
        return Ok(doc.clone());
    }

    let mut mode: Option<ProjectionMode> = None;
    for (field, spec) in projection.iter().filter(|(f, _)| f.as_str() != INTERNAL_ID) {
        let field_mode = match spec {
            Literal::Int(_) | Literal::Float(_) | Literal::Bool(_) if !spec.is_truthy() => {
                ProjectionMode::Exclude
            }
            _ => ProjectionMode::Include,
        };
        match (&mode, &field_mode) {
            (None, _) => mode = Some(field_mode),
            (Some(ProjectionMode::Include), ProjectionMode::Exclude)
            | (Some(ProjectionMode::Exclude), ProjectionMode::Include) => {
                return Err(DbError::ExecutionError(format!(
                    "cannot mix inclusion and exclusion in projection (field '{}')",
                    field
                )));
            }
            _ => {}
        }
    }
    let keep_id = projection.get(INTERNAL_ID).map_or(true, |v| v.is_truthy());

    match mode {
        Some(ProjectionMode::Include) => {
            let mut out = Document::new();
            if keep_id {
                if let Some(id) = doc.get(INTERNAL_ID) {
                    out.insert(INTERNAL_ID, id.clone());
                }
            }
            for (path, spec) in projection.iter().filter(|(f, _)| f.as_str() != INTERNAL_ID) {
                let value = match spec {
                    Literal::Int(_) | Literal::Float(_) | Literal::Bool(_) => {
                        match resolve_path(doc, path).first() {
                            Some(v) => (*v).clone(),
                            None => continue,
                        }
                    }
                    expr => evaluate(doc, expr),
                };
                set_path(&mut out, path, value);
            }
            Ok(out)
        }
        None if keep_id => {
            let mut out = Document::new();
            if let Some(id) = doc.get(INTERNAL_ID) {
                out.insert(INTERNAL_ID, id.clone());
            }
            Ok(out)
        }
        Some(ProjectionMode::Exclude) | None => {
            let mut out = doc.clone();
            for (path, _) in projection.iter().filter(|(f, _)| f.as_str() != INTERNAL_ID) {
                remove_path(&mut out, path);
            }
            if !keep_id {
                out.remove(INTERNAL_ID);
            }
            Ok(out)
        }
    }
}

fn unwind(docs: Vec<Document>, spec: &Literal) -> DbResult<Vec<Document>> {
    let (path, preserve) = match spec {
        Literal::String(s) => (s.as_str(), false),
        Literal::Map(opts) => (
            opts.get("path").and_then(|p| p.as_str()).unwrap_or(""),
            opts.get("preserveNullAndEmptyArrays")
                .is_some_and(|v| v.is_truthy()),
        ),
        _ => ("", false),
    };
    let path = path
        .strip_prefix('$')
        .filter(|p| !p.is_empty())
        .ok_or_else(|| DbError::ExecutionError("$unwind expects a '$field' path".to_string()))?;

    let mut out = Vec::new();
    for doc in docs {
        let value = resolve_path(&doc, path).first().map(|v| (*v).clone());
        match value {
            Some(Literal::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = doc.clone();
                    set_path(&mut copy, path, item);
                    out.push(copy);
                }
            }
            Some(Literal::Array(_)) | Some(Literal::Null) | None => {
                if preserve {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

enum Accumulator {
    Sum(Literal),
    Avg { total: f64, count: u64 },
    Min(Option<Literal>),
    Max(Option<Literal>),
    First(Option<Literal>),
    Last(Literal),
    Push(Vec<Literal>),
}

impl Accumulator {
    fn new(op: &str) -> DbResult<Self> {
        Ok(match op {
            "$sum" | "$count" => Accumulator::Sum(Literal::Int(0)),
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Literal::Null),
            "$push" => Accumulator::Push(Vec::new()),
            other => {
                return Err(DbError::ExecutionError(format!(
                    "unsupported accumulator '{}'",
                    other
                )))
            }
        })
    }

    fn add(&mut self, value: Literal, ctx: FilterContext) {
        match self {
            Accumulator::Sum(total) => {
                *total = match (&*total, &value) {
                    (Literal::Int(a), Literal::Int(b)) => a
                        .checked_add(*b)
                        .map(Literal::Int)
                        .unwrap_or(Literal::Float(*a as f64 + *b as f64)),
                    (t, v) => match v.as_f64() {
                        Some(x) => Literal::Float(t.as_f64().unwrap_or(0.0) + x),
                        None => t.clone(),
                    },
                };
            }
            Accumulator::Avg { total, count } => {
                if let Some(x) = value.as_f64() {
                    *total += x;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => {
                if !matches!(value, Literal::Null)
                    && current
                        .as_ref()
                        .map_or(true, |c| ctx.compare(&value, c) == Ordering::Less)
                {
                    *current = Some(value);
                }
            }
            Accumulator::Max(current) => {
                if !matches!(value, Literal::Null)
                    && current
                        .as_ref()
                        .map_or(true, |c| ctx.compare(&value, c) == Ordering::Greater)
                {
                    *current = Some(value);
                }
            }
            Accumulator::First(current) => {
                if current.is_none() {
                    *current = Some(value);
                }
            }
            Accumulator::Last(current) => *current = value,
            Accumulator::Push(items) => items.push(value),
        }
    }

    fn finish(self) -> Literal {
        match self {
            Accumulator::Sum(total) => total,
            Accumulator::Avg { total, count } => {
                if count == 0 {
                    Literal::Null
                } else {
                    Literal::Float(total / count as f64)
                }
            }
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) => {
                v.unwrap_or(Literal::Null)
            }
            Accumulator::Last(v) => v,
            Accumulator::Push(items) => Literal::Array(items),
        }
    }
}

fn group(docs: Vec<Document>, spec: &Document, ctx: FilterContext) -> DbResult<Vec<Document>> {
    let key_expr = spec.get(INTERNAL_ID).ok_or_else(|| {
        DbError::ExecutionError("$group requires an '_id' expression".to_string())
    })?;

    let mut fields: Vec<(&str, &str, &Literal)> = Vec::new();
    for (name, acc) in spec.iter().filter(|(k, _)| k.as_str() != INTERNAL_ID) {
        let acc_doc = acc.as_document().filter(|d| d.len() == 1).ok_or_else(|| {
            DbError::ExecutionError(format!("$group field '{}' must be a single accumulator", name))
        })?;
        if let Some((op, expr)) = acc_doc.iter().next() {
            Accumulator::new(op)?;
            fields.push((name.as_str(), op.as_str(), expr));
        }
    }

    // groups keep first-seen order
    let mut groups: Vec<(Literal, Vec<Accumulator>)> = Vec::new();
    for doc in &docs {
        let key = evaluate(doc, key_expr);
        let idx = match groups.iter().position(|(k, _)| ctx.equals(k, &key)) {
            Some(idx) => idx,
            None => {
                let accs = fields
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<DbResult<Vec<_>>>()?;
                groups.push((key, accs));
                groups.len() - 1
            }
        };
        for ((_, op, expr), acc) in fields.iter().zip(groups[idx].1.iter_mut()) {
            let value = if *op == "$count" {
                Literal::Int(1)
            } else {
                evaluate(doc, expr)
            };
            acc.add(value, ctx);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accs)| {
            let mut out = Document::new();
            out.insert(INTERNAL_ID, key);
            for ((name, _, _), acc) in fields.iter().zip(accs) {
                out.insert(*name, acc.finish());
            }
            out
        })
        .collect())
}
