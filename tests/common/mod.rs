//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use shellql::error::DbResult;
use shellql::storage::{CursorOptions, FindOptions, ReleaseHandle};
use shellql::{Document, DocumentCursor, DocumentStore, Literal, MemoryStore, QueryService, RunRegistry, RunStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Five open and three closed orders, plus a couple of customers.
pub fn seeded_store() -> MemoryStore {
    MemoryStore::from_seed(json!({
        "orders": [
            {"sku": "A1", "status": "open", "total": 120, "placed": {"$date": "2024-02-01T10:00:00Z"}},
            {"sku": "B2", "status": "open", "total": 40, "placed": {"$date": "2023-12-24T08:30:00Z"}},
            {"sku": "C3", "status": "closed", "total": 75, "placed": {"$date": "2024-01-15T12:00:00Z"}},
            {"sku": "D4", "status": "open", "total": 310, "placed": {"$date": "2024-03-09T16:45:00Z"}},
            {"sku": "E5", "status": "closed", "total": 15, "placed": {"$date": "2023-11-02T09:00:00Z"}},
            {"sku": "F6", "status": "open", "total": 55, "placed": {"$date": "2024-01-01T00:00:00Z"}},
            {"sku": "G7", "status": "closed", "total": 90, "placed": {"$date": "2024-04-20T18:00:00Z"}},
            {"sku": "H8", "status": "open", "total": 8, "placed": {"$date": "2023-10-10T10:10:00Z"}}
        ],
        "customers": [
            {"name": "Ada", "city": "London", "tags": ["vip", "early"]},
            {"name": "grace", "city": "Arlington", "tags": []}
        ]
    }))
    .expect("seed is valid")
}

pub fn service_with(store: impl DocumentStore + 'static) -> QueryService {
    QueryService::new(Arc::new(store), RunRegistry::default())
}

pub fn seeded_service() -> QueryService {
    service_with(seeded_store())
}

/// Drain a run stream into its full response body.
pub async fn collect_body(stream: RunStream) -> String {
    stream.map(|frame| frame.to_string()).collect().await
}

/// Start a query, stream it to completion and parse the body.
pub async fn run_query(service: &QueryService, query: &str) -> Value {
    let run_id = service.start_query(query).expect("query should be accepted");
    let stream = service.open_stream(&run_id).expect("run should open");
    let body = collect_body(stream).await;
    let value: Value = serde_json::from_str(&body).expect("body is valid JSON");
    assert_eq!(value["run_id"], json!(run_id));
    value
}

/// Store whose cursors yield numbered documents forever, pausing before each.
#[derive(Clone, Default)]
pub struct SlowStore {
    pub pulled: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

pub struct SlowCursor {
    next: i64,
    pulled: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    release: ReleaseHandle,
}

#[async_trait]
impl DocumentCursor for SlowCursor {
    async fn next_document(&mut self) -> DbResult<Option<Document>> {
        if self.release.is_released() {
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.pulled.fetch_add(1, Ordering::SeqCst);
        self.next += 1;
        let mut doc = Document::new();
        doc.insert("_id", Literal::Int(self.next));
        doc.insert("n", Literal::Int(self.next));
        Ok(Some(doc))
    }

    async fn close(&mut self) -> DbResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_handle(&self) -> ReleaseHandle {
        self.release.clone()
    }
}

impl SlowStore {
    fn cursor(&self) -> Box<dyn DocumentCursor> {
        Box::new(SlowCursor {
            next: 0,
            pulled: self.pulled.clone(),
            closed: self.closed.clone(),
            release: ReleaseHandle::new(),
        })
    }
}

#[async_trait]
impl DocumentStore for SlowStore {
    async fn find(
        &self,
        _collection: &str,
        _filter: &Document,
        _projection: &Document,
        _options: &FindOptions,
    ) -> DbResult<Box<dyn DocumentCursor>> {
        Ok(self.cursor())
    }

    async fn aggregate(
        &self,
        _collection: &str,
        _pipeline: &[Literal],
        _options: &CursorOptions,
    ) -> DbResult<Box<dyn DocumentCursor>> {
        Ok(self.cursor())
    }
}
