pub mod config;
pub mod error;
pub mod executor;
pub mod server;
pub mod shell;
pub mod storage;

pub use config::ServerConfig;
pub use error::{DbError, DbResult};
pub use executor::{CancelResponse, QueryService, RunRegistry, RunStream, StreamFrame};
pub use server::create_router;
pub use shell::{build_plan, Document, Literal, QueryPlan};
pub use storage::{DocumentCursor, DocumentStore, MemoryStore};
