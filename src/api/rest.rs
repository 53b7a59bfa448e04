//! Router and server startup.

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::{serve, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handlers;
use crate::api::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::dashboard))
        .route("/events", get(handlers::events))
        .route("/board", get(handlers::board))
        .route("/health", get(handlers::health))
        .route("/enqueue/standard", post(handlers::enqueue_standard))
        .route("/enqueue/fifo", post(handlers::enqueue_fifo))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the HTTP surface until `shutdown` resolves.
pub async fn start_server<F>(state: AppState, bind_addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(target: "queueboard::http", addr = %listener.local_addr()?, "HTTP server listening");

    serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{Engine, EngineConfig};
    use crate::core::publisher::Producer;
    use crate::provider::{MemoryProvider, QueueProvider, QueueSet};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> AppState {
        let provider: Arc<dyn QueueProvider> = Arc::new(MemoryProvider::default());
        let queues = QueueSet::new("standard", "orders.fifo");
        let (engine, _task) = Engine::spawn(
            EngineConfig {
                policy: Default::default(),
                queues: queues.clone(),
                seed: Some(3),
            },
            Arc::clone(&provider),
        );
        AppState {
            engine,
            producer: Producer::new(provider, queues),
        }
    }

    async fn post_json(router: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_owned()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn enqueue_fifo_reports_group() {
        let router = create_router(state());
        let (status, body) = post_json(
            router,
            "/enqueue/fifo",
            r#"{"count": 12, "groupId": "group-B", "failureRate": 10}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["count"], 12);
        assert_eq!(body["groupId"], "group-B");
        assert_eq!(body["batches"], 2);
    }

    #[tokio::test]
    async fn defaults_apply_to_missing_fields() {
        let (status, body) = post_json(create_router(state()), "/enqueue/standard", "{}").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert!(body.get("groupId").is_none());
    }

    #[tokio::test]
    async fn validation_errors_are_400() {
        let (status, body) = post_json(
            create_router(state()),
            "/enqueue/standard",
            r#"{"count": 0, "failureRate": 10}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("count"));
    }

    #[tokio::test]
    async fn loose_numbers_are_accepted() {
        let (status, body) = post_json(
            create_router(state()),
            "/enqueue/standard",
            r#"{"count": "5", "failureRate": 12.5}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 5);
    }

    #[tokio::test]
    async fn negative_failure_rate_is_400() {
        let (status, body) = post_json(
            create_router(state()),
            "/enqueue/standard",
            r#"{"count": 5, "failureRate": -10}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("failure rate"));
    }

    #[tokio::test]
    async fn oversized_count_is_400() {
        let (status, body) = post_json(
            create_router(state()),
            "/enqueue/fifo",
            r#"{"count": 1e12, "groupId": "group-A"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("must not exceed"));
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_errors() {
        for body in [r#"{"count": [1]}"#, r#"{"groupId": 7}"#, "not json"] {
            let (status, payload) = post_json(create_router(state()), "/enqueue/fifo", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
            assert!(payload["error"].is_string(), "body {body}");
        }
    }

    #[tokio::test]
    async fn board_and_health() {
        let router = create_router(state());
        let response = router
            .clone()
            .oneshot(Request::get("/board").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let board: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(board["fifo"]["dlq"].is_array());

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
