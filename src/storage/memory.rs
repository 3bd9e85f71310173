//! In-process reference document store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::filter::{matches_filter, FilterContext};
use super::pipeline::{apply_projection, run_pipeline, sort_documents};
use super::{CursorOptions, DocumentCursor, DocumentStore, FindOptions, ReleaseHandle};
use crate::error::{DbError, DbResult};
use crate::shell::{Document, Literal, INTERNAL_ID};

/// Default number of documents handed out per batch.
pub const DEFAULT_BATCH_SIZE: usize = 101;

/// Collections of documents held in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, Vec<Document>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document, assigning an `_id` when it has none.
    pub fn insert(&self, collection: &str, doc: Document) -> Literal {
        let doc = if doc.contains_key(INTERNAL_ID) {
            doc
        } else {
            let id = Uuid::new_v7(uuid::Timestamp::now(uuid::NoContext))
                .simple()
                .to_string();
            let mut with_id = Document::new();
            with_id.insert(INTERNAL_ID, Literal::String(id));
            with_id.extend(doc);
            with_id
        };
        let id = doc.get(INTERNAL_ID).cloned().unwrap_or(Literal::Null);
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        id
    }

    /// Insert a JSON object; `{"$date": ...}` values become date-times.
    pub fn insert_json(&self, collection: &str, value: serde_json::Value) -> DbResult<Literal> {
        match Literal::from(value) {
            Literal::Map(doc) => Ok(self.insert(collection, doc)),
            other => Err(DbError::ExecutionError(format!(
                "documents must be maps, got {}",
                other.type_name()
            ))),
        }
    }

    /// Build a store from a JSON object of `{collection: [documents]}`.
    pub fn from_seed(seed: serde_json::Value) -> DbResult<Self> {
        let serde_json::Value::Object(collections) = seed else {
            return Err(DbError::ExecutionError(
                "seed must be an object of collection arrays".to_string(),
            ));
        };
        let store = Self::new();
        for (name, docs) in collections {
            let serde_json::Value::Array(docs) = docs else {
                return Err(DbError::ExecutionError(format!(
                    "seed collection '{}' must be an array",
                    name
                )));
            };
            for doc in docs {
                store.insert_json(&name, doc)?;
            }
            tracing::debug!("Seeded collection '{}' with {} documents", name, store.count(&name));
        }
        Ok(store)
    }

    /// Load a seed file written as a JSON object of collection arrays.
    pub fn load_seed(path: &Path) -> DbResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let seed: serde_json::Value = serde_json::from_str(&content)?;
        Self::from_seed(seed)
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

fn log_cursor_options(collection: &str, options: &CursorOptions) {
    if let Some(hint) = &options.hint {
        tracing::debug!("Memory store has no indexes; ignoring hint {} on '{}'", hint, collection);
    }
    if let Some(comment) = &options.comment {
        tracing::debug!("Query comment on '{}': {}", collection, comment);
    }
}

fn filter_context(options: &CursorOptions) -> FilterContext {
    FilterContext {
        case_insensitive: options
            .collation
            .as_ref()
            .is_some_and(|c| c.case_insensitive()),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        projection: &Document,
        options: &FindOptions,
    ) -> DbResult<Box<dyn DocumentCursor>> {
        log_cursor_options(collection, &options.cursor);
        let ctx = filter_context(&options.cursor);

        let mut matched = Vec::new();
        for doc in self.snapshot(collection) {
            if matches_filter(&doc, filter, ctx)? {
                matched.push(doc);
            }
        }
        sort_documents(&mut matched, &options.sort, ctx);

        let limit = options.limit.filter(|n| *n > 0).unwrap_or(u64::MAX);
        let results = matched
            .iter()
            .skip(options.skip as usize)
            .take(limit.min(usize::MAX as u64) as usize)
            .map(|doc| apply_projection(doc, projection))
            .collect::<DbResult<Vec<_>>>()?;

        Ok(Box::new(MemoryCursor::new(results, &options.cursor)))
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Literal],
        options: &CursorOptions,
    ) -> DbResult<Box<dyn DocumentCursor>> {
        log_cursor_options(collection, options);
        let results = run_pipeline(self.snapshot(collection), pipeline, filter_context(options))?;
        Ok(Box::new(MemoryCursor::new(results, options)))
    }
}

/// Cursor over a materialised result set, handed out in batches.
pub struct MemoryCursor {
    pending: VecDeque<Document>,
    batch: VecDeque<Document>,
    batch_size: usize,
    deadline: Option<Instant>,
    release: ReleaseHandle,
    closed: bool,
}

impl MemoryCursor {
    pub fn new(results: Vec<Document>, options: &CursorOptions) -> Self {
        let batch_size = options
            .batch_size
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let deadline = options
            .max_time_ms
            .filter(|ms| *ms > 0)
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        Self {
            pending: results.into(),
            batch: VecDeque::new(),
            batch_size,
            deadline,
            release: ReleaseHandle::new(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl DocumentCursor for MemoryCursor {
    async fn next_document(&mut self) -> DbResult<Option<Document>> {
        if self.closed || self.release.is_released() {
            return Ok(None);
        }
        if self.deadline.is_some_and(|d| Instant::now() > d) {
            return Err(DbError::ExecutionError(
                "operation exceeded time limit".to_string(),
            ));
        }
        if self.batch.is_empty() {
            if self.pending.is_empty() {
                return Ok(None);
            }
            let n = self.batch_size.min(self.pending.len());
            self.batch.extend(self.pending.drain(..n));
            // one scheduling point per batch, like a getMore round trip
            tokio::task::yield_now().await;
        }
        Ok(self.batch.pop_front())
    }

    async fn close(&mut self) -> DbResult<()> {
        self.closed = true;
        self.pending.clear();
        self.batch.clear();
        Ok(())
    }

    fn release_handle(&self) -> ReleaseHandle {
        self.release.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SortDirection;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::from_seed(json!({
            "orders": [
                {"n": 1, "status": "open"},
                {"n": 2, "status": "closed"},
                {"n": 3, "status": "open"},
                {"n": 4, "status": "open"}
            ]
        }))
        .unwrap()
    }

    fn map(value: serde_json::Value) -> Document {
        Literal::from(value).as_document().cloned().unwrap()
    }

    async fn drain(mut cursor: Box<dyn DocumentCursor>) -> Vec<Document> {
        let mut out = Vec::new();
        while let Some(doc) = cursor.next_document().await.unwrap() {
            out.push(doc);
        }
        out
    }

    #[test]
    fn test_insert_assigns_id_first() {
        let store = MemoryStore::new();
        let id = store.insert("c", map(json!({"a": 1})));
        assert!(matches!(id, Literal::String(_)));
        let docs = store.snapshot("c");
        assert_eq!(docs[0].keys().next().map(String::as_str), Some(INTERNAL_ID));
    }

    #[test]
    fn test_seed_rejects_bad_shape() {
        assert!(MemoryStore::from_seed(json!([1, 2])).is_err());
        assert!(MemoryStore::from_seed(json!({"c": {"a": 1}})).is_err());
        assert!(MemoryStore::from_seed(json!({"c": [1]})).is_err());
    }

    #[tokio::test]
    async fn test_find_with_options() {
        let store = store();
        let options = FindOptions {
            sort: vec![("n".to_string(), SortDirection::Descending)],
            skip: 1,
            limit: Some(1),
            ..Default::default()
        };
        let cursor = store
            .find("orders", &map(json!({"status": "open"})), &map(json!({"_id": 0})), &options)
            .await
            .unwrap();
        let docs = drain(cursor).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get("n"), Some(&Literal::Int(3)));
        assert!(!docs[0].contains_key(INTERNAL_ID));
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let cursor = store()
            .find("nope", &Document::new(), &Document::new(), &FindOptions::default())
            .await
            .unwrap();
        assert!(drain(cursor).await.is_empty());
    }

    #[tokio::test]
    async fn test_release_stops_cursor() {
        let docs = store().snapshot("orders");
        let mut cursor = MemoryCursor::new(
            docs,
            &CursorOptions {
                batch_size: Some(1),
                ..Default::default()
            },
        );
        assert!(cursor.next_document().await.unwrap().is_some());
        cursor.release_handle().release();
        assert!(cursor.next_document().await.unwrap().is_none());
        cursor.close().await.unwrap();
        assert!(cursor.is_closed());
    }

    #[tokio::test]
    async fn test_max_time_exceeded() {
        let mut cursor = MemoryCursor::new(
            store().snapshot("orders"),
            &CursorOptions {
                max_time_ms: Some(1),
                ..Default::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = cursor.next_document().await.unwrap_err();
        assert!(err.to_string().contains("time limit"));
    }

    #[tokio::test]
    async fn test_aggregate() {
        let pipeline = Literal::from(json!([{"$match": {"status": "open"}}, {"$count": "open"}]));
        let cursor = store()
            .aggregate("orders", pipeline.as_array().unwrap(), &CursorOptions::default())
            .await
            .unwrap();
        let docs = drain(cursor).await;
        assert_eq!(docs[0].get("open"), Some(&Literal::Int(3)));
    }
}
