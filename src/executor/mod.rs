//! Query execution: planning, run bookkeeping and result streaming.

pub mod planner;
pub mod registry;
pub mod service;
pub mod stream;

pub use planner::{plan_execution, CursorModifier, CursorSource, DeferredCursor, ExecutionPlan};
pub use registry::{CancelFlag, CancelOutcome, RunInfo, RunPhase, RunRegistry, DEFAULT_PENDING_TTL};
pub use service::{CancelResponse, QueryService, DEFAULT_MAX_QUERY_LEN, INVALID_RUN_MESSAGE};
pub use stream::{run_stream, RunStream, StreamFrame};
