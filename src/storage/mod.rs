//! Document store seam.
//!
//! The execution core talks to storage only through [`DocumentStore`] and
//! [`DocumentCursor`]. [`MemoryStore`] is the in-process implementation used
//! by the binary and the tests.

mod filter;
mod memory;
mod pipeline;

pub use filter::{matches_filter, FilterContext};
pub use memory::{MemoryCursor, MemoryStore};
pub use pipeline::{apply_projection, run_pipeline, sort_spec};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::DbResult;
use crate::shell::{Document, Literal};

/// Sort direction for one key of a sort specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Collation settings understood by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Collation {
    pub locale: String,
    /// ICU comparison strength; 1 and 2 ignore case.
    pub strength: Option<i64>,
}

impl Collation {
    pub fn case_insensitive(&self) -> bool {
        matches!(self.strength, Some(1) | Some(2))
    }
}

/// Cursor options shared by `find` and `aggregate`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorOptions {
    pub hint: Option<Literal>,
    pub max_time_ms: Option<u64>,
    pub collation: Option<Collation>,
    pub batch_size: Option<u32>,
    pub comment: Option<Literal>,
}

/// Options applied to a `find` cursor before its first fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Vec<(String, SortDirection)>,
    pub skip: u64,
    /// `None` (or zero) means unlimited.
    pub limit: Option<u64>,
    pub cursor: CursorOptions,
}

/// Lets a holder other than the cursor's owner ask it to release its
/// resources. After release the cursor yields no more documents.
#[derive(Debug, Clone, Default)]
pub struct ReleaseHandle {
    released: Arc<AtomicBool>,
}

impl ReleaseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// A live, forward-only cursor over documents.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Fetch the next document, or `None` when exhausted or released.
    async fn next_document(&mut self) -> DbResult<Option<Document>>;

    /// Close the cursor and free its resources.
    async fn close(&mut self) -> DbResult<()>;

    /// Handle the run registry keeps to request release during cancellation.
    fn release_handle(&self) -> ReleaseHandle;
}

/// Read-only document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        projection: &Document,
        options: &FindOptions,
    ) -> DbResult<Box<dyn DocumentCursor>>;

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Literal],
        options: &CursorOptions,
    ) -> DbResult<Box<dyn DocumentCursor>>;
}
