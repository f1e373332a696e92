use crate::config::AppState;
use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sceneflow_core::WorkflowError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

/// Start the API server, stopping when `shutdown` resolves
pub async fn serve(
    addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route(
            "/api/workflow",
            get(handlers::get_workflow).put(handlers::replace_workflow),
        )
        .route("/api/workflow/execute", post(handlers::execute_workflow))
        .route(
            "/api/jobs",
            get(handlers::list_jobs).post(handlers::submit_workflow_job),
        )
        .route("/api/jobs/images", post(handlers::submit_image_job))
        .route("/api/jobs/{job_id}", get(handlers::get_job))
        .route("/blobs/{*key}", get(handlers::get_blob))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().include_headers(true))
                        .on_response(DefaultOnResponse::new().include_headers(true)),
                )
                .layer(CorsLayer::permissive()),
        )
        .with_state(Arc::new(state))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "sceneflow",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Request-level failures with a dedicated status code
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Workflow execution exceeded {0} seconds")]
    Timeout(u64),
}

/// Custom error type for API handlers
pub struct ApiError(anyhow::Error);

impl ApiError {
    fn status(&self) -> StatusCode {
        if let Some(e) = self.0.downcast_ref::<RequestError>() {
            return match e {
                RequestError::NotFound(_) => StatusCode::NOT_FOUND,
                RequestError::BadRequest(_) => StatusCode::BAD_REQUEST,
                RequestError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            };
        }
        if self.0.downcast_ref::<WorkflowError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_msg = self.0.to_string();
        let details = self.0.chain().skip(1).map(|e| e.to_string()).collect::<Vec<_>>().join(": ");

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %error_msg, "Request failed");
        }

        let response = if details.is_empty() {
            ErrorResponse::new(error_msg)
        } else {
            ErrorResponse::with_details(error_msg, details)
        };

        (status, Json(response)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app(dir: &TempDir) -> (Router, AppState) {
        let config = ServerConfig::load(&dir.path().join("none.toml"), dir.path().to_path_buf())
            .unwrap();
        let state = AppState::new(config).await.unwrap();
        (create_router(state.clone()), state)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(RequestError::NotFound("Job x".into())), StatusCode::NOT_FOUND),
            (ApiError::from(RequestError::Timeout(5)), StatusCode::GATEWAY_TIMEOUT),
            (
                ApiError::from(WorkflowError::Validation("bad".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(WorkflowError::Structural("cycle".into())),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::from(anyhow::anyhow!("disk on fire")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(error.status(), expected);
        }
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;
        let (status, body) = send(
            app,
            Request::builder().uri("/api/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
    }

    #[tokio::test]
    async fn test_get_and_replace_workflow() {
        let dir = TempDir::new().unwrap();
        let (app, state) = app(&dir).await;

        let (status, body) = send(
            app.clone(),
            Request::builder().uri("/api/workflow").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["nodes"].as_array().unwrap().len() > 1);

        let replacement = json!({
            "nodes": [
                {"id": "in", "type": "input"},
                {"id": "out", "type": "output"}
            ],
            "edges": [{"source": "in", "target": "out", "mapping": {"text": "echo"}}]
        });
        let (status, _) = send(app.clone(), json_request("PUT", "/api/workflow", replacement)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.config.definition_path().exists());

        let (status, body) = send(
            app,
            json_request("POST", "/api/workflow/execute", json!({"inputs": {"text": "hi"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"]["echo"], json!("hi"));
    }

    #[tokio::test]
    async fn test_cyclic_workflow_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;

        let cyclic = json!({
            "nodes": [{"id": "a", "type": "output"}, {"id": "b", "type": "output"}],
            "edges": [{"source": "a", "target": "b"}, {"source": "b", "target": "a"}]
        });
        let (status, body) = send(app, json_request("PUT", "/api/workflow", cyclic)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("cycle"));
    }

    #[tokio::test]
    async fn test_missing_input_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;

        let (status, body) = send(
            app,
            json_request("POST", "/api/workflow/execute", json!({"inputs": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Missing required input"));
    }

    #[tokio::test]
    async fn test_job_lookup() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;

        let (status, _) = send(
            app.clone(),
            Request::builder()
                .uri("/api/jobs/6f1c2a0e-8a4b-4c55-9a8e-3f0b1d2c4e5f")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            app,
            Request::builder().uri("/api/jobs/not-a-uuid").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_image_batch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;

        let (status, _) = send(
            app,
            json_request("POST", "/api/jobs/images", json!({"prompts": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_serves_stored_blob() {
        let dir = TempDir::new().unwrap();
        let (app, state) = app(&dir).await;

        let stored = state
            .blob_store
            .put(bytes_of(b"\x89PNG fake"), "png")
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/blobs/{}", stored.key))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/png");
    }

    fn bytes_of(data: &'static [u8]) -> axum::body::Bytes {
        axum::body::Bytes::from_static(data)
    }
}
