use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::planner::DeferredCursor;
use crate::error::{DbError, DbResult};
use crate::storage::ReleaseHandle;

/// Default lifetime of a run that was registered but never streamed.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(300);

/// Cancellation signal shared between a run's registry entry and its stream.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    requested: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

enum RunState {
    Pending(DeferredCursor),
    Opened { cursor: Option<ReleaseHandle> },
}

struct RunEntry {
    state: RunState,
    cancel: CancelFlag,
    created_at: Instant,
}

/// Lifecycle phase of a registered run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Pending,
    Opened,
}

/// Point-in-time view of a registry entry.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub run_id: String,
    pub phase: RunPhase,
    pub cancel_requested: bool,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run was live; its flag is set and its entry removed.
    Requested,
    /// No such run, or it already finished.
    AlreadyCompleted,
}

/// Tracks live query runs by id.
///
/// Every mutation takes the same lock, so a cancel can never interleave
/// with an open or a removal of the same run.
#[derive(Clone)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<String, RunEntry>>>,
    pending_ttl: Duration,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_TTL)
    }
}

impl RunRegistry {
    /// Create a registry; runs left pending longer than `pending_ttl` are swept.
    pub fn new(pending_ttl: Duration) -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            pending_ttl,
        }
    }

    /// Register a prepared cursor and return its fresh run id.
    pub fn register(&self, cursor: DeferredCursor) -> String {
        let run_id = Uuid::new_v4().to_string();
        let entry = RunEntry {
            state: RunState::Pending(cursor),
            cancel: CancelFlag::new(),
            created_at: Instant::now(),
        };

        let mut runs = self.runs.lock();
        self.cleanup_expired(&mut runs);
        runs.insert(run_id.clone(), entry);
        run_id
    }

    pub fn lookup(&self, run_id: &str) -> Option<RunInfo> {
        let runs = self.runs.lock();
        runs.get(run_id).map(|entry| RunInfo {
            run_id: run_id.to_string(),
            phase: match entry.state {
                RunState::Pending(_) => RunPhase::Pending,
                RunState::Opened { .. } => RunPhase::Opened,
            },
            cancel_requested: entry.cancel.is_requested(),
        })
    }

    /// Take the deferred cursor of a pending run, moving it to the opened
    /// phase. A run can be opened once.
    pub fn open(&self, run_id: &str) -> DbResult<(DeferredCursor, CancelFlag)> {
        let mut runs = self.runs.lock();
        let entry = runs
            .get_mut(run_id)
            .ok_or_else(|| DbError::UnknownRun(run_id.to_string()))?;

        match std::mem::replace(&mut entry.state, RunState::Opened { cursor: None }) {
            RunState::Pending(cursor) => Ok((cursor, entry.cancel.clone())),
            opened @ RunState::Opened { .. } => {
                entry.state = opened;
                Err(DbError::UnknownRun(run_id.to_string()))
            }
        }
    }

    /// Record the live cursor of an opened run so cancel can release it.
    ///
    /// Returns false when the run is gone, in which case the caller should
    /// release the cursor itself.
    pub fn attach_cursor(&self, run_id: &str, handle: ReleaseHandle) -> bool {
        let mut runs = self.runs.lock();
        match runs.get_mut(run_id) {
            Some(RunEntry {
                state: RunState::Opened { cursor },
                ..
            }) => {
                *cursor = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Cancel a run: set its flag, release its cursor and drop the entry.
    pub fn cancel(&self, run_id: &str) -> CancelOutcome {
        let mut runs = self.runs.lock();
        let Some(entry) = runs.remove(run_id) else {
            return CancelOutcome::AlreadyCompleted;
        };

        entry.cancel.request();
        if let RunState::Opened {
            cursor: Some(handle),
        } = &entry.state
        {
            handle.release();
        }
        CancelOutcome::Requested
    }

    /// Remove a run. Removing an absent id is a no-op.
    pub fn remove(&self, run_id: &str) -> bool {
        self.runs.lock().remove(run_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop runs that were never streamed within the TTL.
    fn cleanup_expired(&self, runs: &mut HashMap<String, RunEntry>) {
        let ttl = self.pending_ttl;
        let before = runs.len();
        runs.retain(|_, entry| {
            !(matches!(entry.state, RunState::Pending(_)) && entry.created_at.elapsed() > ttl)
        });
        let swept = before - runs.len();
        if swept > 0 {
            tracing::debug!("Run registry: swept {} expired pending runs", swept);
        }
    }
}
