//! Streaming engine.
//!
//! Drives a run's cursor and frames its documents as one incrementally
//! emitted JSON object: `{"run_id": "<id>","data": [` then documents joined
//! by `,` then `]}`. The closing frame is emitted on every terminal path so
//! the body is always well-formed, even when truncated.

use futures::Stream;
use std::fmt;
use std::pin::Pin;

use super::planner::DeferredCursor;
use super::registry::{CancelFlag, RunRegistry};
use crate::error::DbError;
use crate::shell::INTERNAL_ID;
use crate::storage::DocumentCursor;

/// One wire fragment of a run's response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Open { run_id: String },
    /// A serialised document.
    Document(String),
    Separator,
    Close,
}

impl fmt::Display for StreamFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFrame::Open { run_id } => write!(f, "{{\"run_id\": \"{}\",\"data\": [", run_id),
            StreamFrame::Document(json) => f.write_str(json),
            StreamFrame::Separator => f.write_str(","),
            StreamFrame::Close => f.write_str("]}"),
        }
    }
}

impl From<StreamFrame> for axum::body::Bytes {
    fn from(frame: StreamFrame) -> Self {
        match frame {
            StreamFrame::Document(json) => axum::body::Bytes::from(json),
            other => axum::body::Bytes::from(other.to_string()),
        }
    }
}

pub type RunStream = Pin<Box<dyn Stream<Item = StreamFrame> + Send>>;

/// How a stream reached its closed state.
#[derive(Debug)]
enum StreamOutcome {
    Exhausted,
    Cancelled,
    Failed(DbError),
}

/// Owns a run's cleanup: the live cursor and the registry entry.
///
/// Created before the stream is first polled, so dropping the stream at any
/// point (even unpolled) removes the entry and releases the cursor.
struct RunGuard {
    registry: RunRegistry,
    run_id: String,
    cursor: Option<Box<dyn DocumentCursor>>,
    done: bool,
}

impl RunGuard {
    fn new(registry: RunRegistry, run_id: String) -> Self {
        Self {
            registry,
            run_id,
            cursor: None,
            done: false,
        }
    }

    async fn close_cursor(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close().await {
                tracing::warn!("Query run '{}': failed to close cursor: {}", self.run_id, e);
            }
        }
    }

    fn finish(&mut self) {
        if !self.done {
            self.registry.remove(&self.run_id);
            self.done = true;
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        tracing::debug!("Query run '{}': stream dropped before completion", self.run_id);

        if let Some(mut cursor) = self.cursor.take() {
            cursor.release_handle().release();
            let run_id = self.run_id.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if let Err(e) = cursor.close().await {
                            tracing::warn!("Query run '{}': failed to close cursor: {}", run_id, e);
                        }
                    });
                }
                Err(_) => {
                    tracing::warn!("Query run '{}': no runtime to close cursor on", run_id);
                }
            }
        }
        self.finish();
    }
}

/// Build the stream for an opened run. Nothing runs until it is polled.
pub fn run_stream(
    registry: RunRegistry,
    run_id: String,
    deferred: DeferredCursor,
    cancel: CancelFlag,
) -> RunStream {
    let strip_internal_id = deferred.plan().strips_internal_id();
    let mut guard = RunGuard::new(registry.clone(), run_id.clone());

    Box::pin(async_stream::stream! {
        yield StreamFrame::Open { run_id: run_id.clone() };

        let mut emitted = 0usize;

        let outcome = match deferred.materialize().await {
            Err(e) => StreamOutcome::Failed(e),
            Ok(live) => {
                let handle = live.release_handle();
                if !registry.attach_cursor(&run_id, handle.clone()) {
                    // cancelled between open and materialise
                    handle.release();
                }
                let live = guard.cursor.insert(live);

                loop {
                    if cancel.is_requested() {
                        break StreamOutcome::Cancelled;
                    }
                    match live.next_document().await {
                        Ok(Some(mut doc)) => {
                            if strip_internal_id {
                                doc.remove(INTERNAL_ID);
                            }
                            match serde_json::to_string(&doc) {
                                Ok(json) => {
                                    if emitted > 0 {
                                        yield StreamFrame::Separator;
                                    }
                                    yield StreamFrame::Document(json);
                                    emitted += 1;
                                }
                                Err(e) => break StreamOutcome::Failed(e.into()),
                            }
                        }
                        Ok(None) if cancel.is_requested() => break StreamOutcome::Cancelled,
                        Ok(None) => break StreamOutcome::Exhausted,
                        Err(e) => break StreamOutcome::Failed(e),
                    }
                }
            }
        };

        guard.close_cursor().await;
        guard.finish();

        match &outcome {
            StreamOutcome::Exhausted => {
                tracing::info!("Query run '{}': completed with {} documents", run_id, emitted)
            }
            StreamOutcome::Cancelled => {
                tracing::info!("Query run '{}': cancelled after {} documents", run_id, emitted)
            }
            StreamOutcome::Failed(e) => tracing::error!(
                "Query run '{}': stream failed after {} documents: {}",
                run_id,
                emitted,
                e
            ),
        }

        yield StreamFrame::Close;
    })
}
