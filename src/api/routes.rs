use axum::{
    routing::{get, put},
    Router,
};

use crate::api::{handlers, instance_handlers, operation_handlers};
use crate::daemon::AppState;
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check::<S>))
        // Instances
        .route(
            "/1.0/instances/:name",
            get(instance_handlers::get_instance::<S>).put(instance_handlers::put_instance::<S>),
        )
        .route(
            "/1.0/containers/:name",
            put(instance_handlers::put_container::<S>),
        )
        .route(
            "/1.0/virtual-machines/:name",
            put(instance_handlers::put_virtual_machine::<S>),
        )
        // Operations
        .route("/1.0/operations", get(operation_handlers::list_operations::<S>))
        .route(
            "/1.0/operations/:id",
            get(operation_handlers::get_operation::<S>)
                .delete(operation_handlers::cancel_operation::<S>),
        )
        .route(
            "/1.0/operations/:id/wait",
            get(operation_handlers::wait_operation::<S>),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::Daemon;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_mutations_wait_for_readiness() {
        let daemon = Arc::new(Daemon::new(
            Arc::new(MemoryStore::new()),
            "member1",
            Duration::from_secs(1),
        ));
        let app = create_router().with_state(daemon.clone());

        let health = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let request = Request::builder()
            .method(Method::PUT)
            .uri("/1.0/instances/web%2Fsnap0")
            .body(Body::from("{}"))
            .unwrap();
        let pending = tokio::spawn(app.oneshot(request));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        daemon.readiness.mark_ready();
        let response = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
