use serde::Serialize;
use std::sync::Arc;

use super::planner::{plan_execution, DeferredCursor};
use super::registry::{CancelOutcome, RunRegistry};
use super::stream::{run_stream, RunStream};
use crate::error::{DbError, DbResult};
use crate::shell::build_plan;
use crate::storage::DocumentStore;

/// Sentinel returned to callers that open an unknown or finished run.
pub const INVALID_RUN_MESSAGE: &str = "invalid-or-expired-run-id";

/// Default cap on raw query length, in bytes.
pub const DEFAULT_MAX_QUERY_LEN: usize = 64 * 1024;

/// Reply to a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelResponse {
    pub message: &'static str,
    pub run_id: String,
}

impl CancelResponse {
    fn new(outcome: CancelOutcome, run_id: &str) -> Self {
        let message = match outcome {
            CancelOutcome::Requested => "cancellation-requested",
            CancelOutcome::AlreadyCompleted => "already-completed",
        };
        Self {
            message,
            run_id: run_id.to_string(),
        }
    }
}

/// Entry point used by the HTTP layer and the CLI.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn DocumentStore>,
    registry: RunRegistry,
    max_query_len: usize,
}

impl QueryService {
    pub fn new(store: Arc<dyn DocumentStore>, registry: RunRegistry) -> Self {
        Self {
            store,
            registry,
            max_query_len: DEFAULT_MAX_QUERY_LEN,
        }
    }

    pub fn with_max_query_len(mut self, max_query_len: usize) -> Self {
        self.max_query_len = max_query_len;
        self
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Parse, gate and compile a query, registering it as a pending run.
    /// No store I/O happens here.
    pub fn prepare(&self, raw: &str) -> DbResult<String> {
        if raw.len() > self.max_query_len {
            return Err(DbError::SyntaxError(format!(
                "query exceeds maximum length of {} bytes",
                self.max_query_len
            )));
        }
        let plan = build_plan(raw)?;
        let execution = plan_execution(&plan)?;
        let run_id = self
            .registry
            .register(DeferredCursor::new(self.store.clone(), execution));
        tracing::info!(
            "Query run '{}': registered {}.{}",
            run_id,
            plan.collection(),
            plan.first().method
        );
        Ok(run_id)
    }

    /// Like [`prepare`](Self::prepare), but failures are logged and
    /// reported as `None`.
    pub fn start_query(&self, raw: &str) -> Option<String> {
        match self.prepare(raw) {
            Ok(run_id) => Some(run_id),
            Err(e) => {
                tracing::warn!("Query rejected ({}): {}", e.kind(), e);
                None
            }
        }
    }

    /// Claim a pending run and return its stream. Each run opens once.
    pub fn open_stream(&self, run_id: &str) -> DbResult<RunStream> {
        let (deferred, cancel) = self.registry.open(run_id)?;
        tracing::debug!("Query run '{}': opened", run_id);
        Ok(run_stream(
            self.registry.clone(),
            run_id.to_string(),
            deferred,
            cancel,
        ))
    }

    pub fn cancel(&self, run_id: &str) -> CancelResponse {
        let outcome = self.registry.cancel(run_id);
        tracing::info!("Query run '{}': cancel -> {:?}", run_id, outcome);
        CancelResponse::new(outcome, run_id)
    }
}
