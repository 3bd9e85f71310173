use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Syntax error: {0}")]
    SyntaxError(String),

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Argument parse error: {0}")]
    ArgumentParseError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Run '{0}' not found")]
    UnknownRun(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Short variant name, used in response bodies and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            DbError::SyntaxError(_) => "SyntaxError",
            DbError::SecurityViolation(_) => "SecurityViolation",
            DbError::ArgumentParseError(_) => "ArgumentParseError",
            DbError::ExecutionError(_) => "ExecutionError",
            DbError::UnknownRun(_) => "UnknownRun",
            DbError::IoError(_) => "IoError",
            DbError::JsonError(_) => "JsonError",
        }
    }
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = match &self {
            DbError::SyntaxError(_) | DbError::ArgumentParseError(_) => StatusCode::BAD_REQUEST,
            DbError::SecurityViolation(_) => StatusCode::FORBIDDEN,
            DbError::UnknownRun(_) => StatusCode::NOT_FOUND,
            DbError::ExecutionError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            // Default to 500
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
            "type": self.kind(),
        });

        (status, Json(body)).into_response()
    }
}
