use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::*;
use crate::executor::QueryService;

pub fn create_router(service: QueryService) -> Router {
    let state = AppState {
        service,
        startup_time: std::time::Instant::now(),
    };

    Router::new()
        .route("/_api/health", get(health_check_handler))
        .route("/_api/query", post(start_query))
        .route("/_api/query/{run_id}", delete(cancel_query))
        .route("/_api/query/{run_id}/stream", get(stream_query))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RunRegistry;
    use crate::storage::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router() -> Router {
        let service = QueryService::new(Arc::new(MemoryStore::new()), RunRegistry::default());
        create_router(service)
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::get("/_api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_stream_is_not_found() {
        let response = router()
            .oneshot(
                Request::get("/_api/query/nope/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
