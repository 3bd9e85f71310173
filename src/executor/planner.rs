//! Execution planner.
//!
//! Compiles a [`QueryPlan`] into an [`ExecutionPlan`] and wraps it in a
//! [`DeferredCursor`]. Nothing here touches the store; the cursor is only
//! materialised when the run is streamed.

use std::sync::Arc;

use crate::error::{DbError, DbResult};
use crate::shell::{Document, Literal, ParsedCall, QueryPlan, INTERNAL_ID};
use crate::storage::{
    sort_spec, Collation, CursorOptions, DocumentCursor, DocumentStore, FindOptions, SortDirection,
};

/// Where the cursor's documents come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorSource {
    Find { filter: Document, projection: Document },
    Aggregate { pipeline: Vec<Literal> },
}

/// A chain call resolved to a concrete cursor setting.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorModifier {
    Sort(Vec<(String, SortDirection)>),
    Skip(u64),
    /// Zero means no limit.
    Limit(u64),
    Hint(Literal),
    MaxTime(u64),
    Collation(Collation),
    BatchSize(u32),
    Comment(Literal),
}

impl CursorModifier {
    fn from_call(call: &ParsedCall) -> DbResult<Self> {
        let method = call.method.as_str();
        if method == "allowDiskUse" {
            return Err(unsupported(method));
        }
        let arg = single_arg(call)?;
        Ok(match method {
            "sort" => {
                let spec = arg.as_document().ok_or_else(|| bad_arg(method, "a map"))?;
                CursorModifier::Sort(sort_spec(spec)?)
            }
            "skip" => CursorModifier::Skip(non_negative(method, arg)?),
            "limit" => {
                let n = arg.as_i64().ok_or_else(|| bad_arg(method, "an integer"))?;
                CursorModifier::Limit(n.unsigned_abs())
            }
            "hint" => match arg {
                Literal::Map(_) | Literal::String(_) => CursorModifier::Hint(arg.clone()),
                _ => return Err(bad_arg(method, "an index name or key map")),
            },
            "maxTimeMS" => CursorModifier::MaxTime(non_negative(method, arg)?),
            "collation" => {
                let doc = arg.as_document().ok_or_else(|| bad_arg(method, "a map"))?;
                let locale = doc
                    .get("locale")
                    .and_then(|l| l.as_str())
                    .ok_or_else(|| bad_arg(method, "a map with a string 'locale'"))?;
                CursorModifier::Collation(Collation {
                    locale: locale.to_string(),
                    strength: doc.get("strength").and_then(|s| s.as_i64()),
                })
            }
            "batchSize" => {
                let n = non_negative(method, arg)?;
                CursorModifier::BatchSize(u32::try_from(n).map_err(|_| bad_arg(method, "a 32-bit size"))?)
            }
            "comment" => CursorModifier::Comment(arg.clone()),
            other => return Err(unsupported(other)),
        })
    }

    fn applies_to_aggregate(&self) -> bool {
        !matches!(
            self,
            CursorModifier::Sort(_) | CursorModifier::Skip(_) | CursorModifier::Limit(_)
        )
    }

    fn apply_to_cursor(&self, options: &mut CursorOptions) {
        match self {
            CursorModifier::Hint(h) => options.hint = Some(h.clone()),
            CursorModifier::MaxTime(ms) => options.max_time_ms = Some(*ms),
            CursorModifier::Collation(c) => options.collation = Some(c.clone()),
            CursorModifier::BatchSize(n) => options.batch_size = Some(*n),
            CursorModifier::Comment(c) => options.comment = Some(c.clone()),
            CursorModifier::Sort(_) | CursorModifier::Skip(_) | CursorModifier::Limit(_) => {}
        }
    }

    fn apply_to_find(&self, options: &mut FindOptions) {
        match self {
            CursorModifier::Sort(spec) => options.sort = spec.clone(),
            CursorModifier::Skip(n) => options.skip = *n,
            CursorModifier::Limit(n) => options.limit = Some(*n),
            other => other.apply_to_cursor(&mut options.cursor),
        }
    }
}

fn unsupported(method: &str) -> DbError {
    DbError::ExecutionError(format!("unsupported chained method: {}", method))
}

fn bad_arg(method: &str, expected: &str) -> DbError {
    DbError::ExecutionError(format!("{}() expects {}", method, expected))
}

fn single_arg(call: &ParsedCall) -> DbResult<&Literal> {
    match call.args.as_slice() {
        [arg] => Ok(arg),
        args => Err(DbError::ExecutionError(format!(
            "{}() takes exactly one argument, got {}",
            call.method,
            args.len()
        ))),
    }
}

fn non_negative(method: &str, arg: &Literal) -> DbResult<u64> {
    arg.as_i64()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| bad_arg(method, "a non-negative integer"))
}

/// Compiled, store-independent description of a run's cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    collection: String,
    source: CursorSource,
    modifiers: Vec<CursorModifier>,
    strip_internal_id: bool,
}

impl ExecutionPlan {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn source(&self) -> &CursorSource {
        &self.source
    }

    pub fn modifiers(&self) -> &[CursorModifier] {
        &self.modifiers
    }

    /// Whether streamed documents have the internal id removed. False only
    /// when the caller's own projection asked for `_id` explicitly.
    pub fn strips_internal_id(&self) -> bool {
        self.strip_internal_id
    }

    pub fn find_options(&self) -> FindOptions {
        let mut options = FindOptions::default();
        for modifier in &self.modifiers {
            modifier.apply_to_find(&mut options);
        }
        options
    }

    pub fn cursor_options(&self) -> CursorOptions {
        let mut options = CursorOptions::default();
        for modifier in &self.modifiers {
            modifier.apply_to_cursor(&mut options);
        }
        options
    }
}

/// Compile a validated query plan. Performs no store I/O.
pub fn plan_execution(plan: &QueryPlan) -> DbResult<ExecutionPlan> {
    let first = plan.first();
    let (source, strip_internal_id) = match first.method.as_str() {
        "find" => plan_find(first)?,
        "aggregate" => plan_aggregate(first)?,
        other => {
            return Err(DbError::ExecutionError(format!(
                "unsupported method: {}",
                other
            )))
        }
    };

    let mut modifiers = Vec::with_capacity(plan.chain().len());
    for call in plan.chain() {
        let modifier = CursorModifier::from_call(call)?;
        if matches!(source, CursorSource::Aggregate { .. }) && !modifier.applies_to_aggregate() {
            return Err(DbError::ExecutionError(format!(
                "unsupported chained method for aggregate: {}",
                call.method
            )));
        }
        modifiers.push(modifier);
    }

    Ok(ExecutionPlan {
        collection: plan.collection().to_string(),
        source,
        modifiers,
        strip_internal_id,
    })
}

fn plan_find(call: &ParsedCall) -> DbResult<(CursorSource, bool)> {
    if call.args.len() > 2 {
        return Err(DbError::ExecutionError(format!(
            "find() takes at most two arguments, got {}",
            call.args.len()
        )));
    }
    let filter = match call.arg(0) {
        None => Document::new(),
        Some(Literal::Map(doc)) => doc.clone(),
        Some(_) => return Err(bad_arg("find", "a filter map")),
    };
    let mut projection = match call.arg(1) {
        None => Document::new(),
        Some(Literal::Map(doc)) => doc.clone(),
        Some(_) => return Err(bad_arg("find", "a projection map")),
    };

    let explicit_id = projection.get(INTERNAL_ID).is_some_and(|v| v.is_truthy());
    if !projection.contains_key(INTERNAL_ID) {
        projection.insert(INTERNAL_ID, Literal::Int(0));
    }
    Ok((CursorSource::Find { filter, projection }, !explicit_id))
}

fn plan_aggregate(call: &ParsedCall) -> DbResult<(CursorSource, bool)> {
    if call.args.len() > 1 {
        return Err(DbError::ExecutionError(format!(
            "aggregate() takes a single pipeline argument, got {}",
            call.args.len()
        )));
    }
    let mut pipeline = match call.arg(0) {
        None => Vec::new(),
        Some(Literal::Array(stages)) => stages.clone(),
        Some(_) => return Err(bad_arg("aggregate", "a pipeline array")),
    };

    let mut explicit_id = false;
    let mut has_project = false;
    let mut all_maps = true;
    for stage in &pipeline {
        match stage.as_document() {
            Some(doc) => {
                if let Some(project) = doc.get("$project") {
                    has_project = true;
                    explicit_id |= project
                        .as_document()
                        .and_then(|p| p.get(INTERNAL_ID))
                        .is_some_and(|v| v.is_truthy());
                }
            }
            None => all_maps = false,
        }
    }

    if all_maps && !has_project {
        let mut exclude = Document::new();
        exclude.insert(INTERNAL_ID, Literal::Int(0));
        let mut stage = Document::new();
        stage.insert("$project", Literal::Map(exclude));
        pipeline.push(Literal::Map(stage));
    }
    Ok((CursorSource::Aggregate { pipeline }, !explicit_id))
}

/// A run's cursor in its not-yet-materialised state.
pub struct DeferredCursor {
    store: Arc<dyn DocumentStore>,
    plan: ExecutionPlan,
}

impl DeferredCursor {
    pub fn new(store: Arc<dyn DocumentStore>, plan: ExecutionPlan) -> Self {
        Self { store, plan }
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Open the live cursor against the store.
    pub async fn materialize(self) -> DbResult<Box<dyn DocumentCursor>> {
        let collection = self.plan.collection();
        match self.plan.source() {
            CursorSource::Find { filter, projection } => {
                let options = self.plan.find_options();
                self.store.find(collection, filter, projection, &options).await
            }
            CursorSource::Aggregate { pipeline } => {
                let options = self.plan.cursor_options();
                self.store.aggregate(collection, pipeline, &options).await
            }
        }
    }
}

impl std::fmt::Debug for DeferredCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCursor")
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}
