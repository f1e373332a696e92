use super::{ApiResult, RequestError};
use crate::config::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use sceneflow_core::{
    jobs::JobRecord,
    node::ImageGeneratorConfig,
    workflow::WorkflowRun,
    JobId, Values, WorkflowGraph,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Get the active workflow definition
pub async fn get_workflow(State(state): State<Arc<AppState>>) -> ApiResult<Json<WorkflowGraph>> {
    let graph = state.engine.definition().await;
    Ok(Json(graph.as_ref().clone()))
}

/// Replace the active workflow definition and persist it
pub async fn replace_workflow(
    State(state): State<Arc<AppState>>,
    Json(graph): Json<WorkflowGraph>,
) -> ApiResult<Json<WorkflowGraph>> {
    state.engine.replace(graph).await?;
    state.engine.save(&state.config.definition_path()).await?;

    let graph = state.engine.definition().await;
    Ok(Json(graph.as_ref().clone()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub inputs: Values,
}

/// Run the active workflow synchronously
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteRequest>,
) -> ApiResult<Json<WorkflowRun>> {
    let timeout = state.config.execution_timeout();
    let cancel = CancellationToken::new();

    let run = tokio::time::timeout(
        timeout,
        state
            .engine
            .execute_detailed(req.inputs, None, cancel.clone()),
    )
    .await;

    match run {
        Ok(run) => {
            let run = run?;
            tracing::info!(
                run_id = %run.run_id,
                failed_nodes = run.failed_nodes(),
                elapsed_ms = run.elapsed_ms,
                "Workflow executed"
            );
            Ok(Json(run))
        }
        Err(_) => {
            cancel.cancel();
            tracing::warn!(timeout_secs = timeout.as_secs(), "Workflow execution timed out");
            Err(RequestError::Timeout(timeout.as_secs()).into())
        }
    }
}

/// Queue a background run of the active workflow
pub async fn submit_workflow_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteRequest>,
) -> ApiResult<(StatusCode, Json<JobRecord>)> {
    let job = state.jobs.submit_workflow(req.inputs)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageBatchRequest {
    pub prompts: Vec<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub extras: Values,
}

/// Queue a batch of image generations
pub async fn submit_image_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImageBatchRequest>,
) -> ApiResult<(StatusCode, Json<JobRecord>)> {
    let sizing = ImageGeneratorConfig {
        width: req.width,
        height: req.height,
        aspect_ratio: req.aspect_ratio,
        ..Default::default()
    }
    .sizing();

    let job = state
        .jobs
        .submit_image_batch(req.prompts, sizing, req.extras)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobRecord>,
}

/// List all jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> ApiResult<Json<ListJobsResponse>> {
    let jobs = state.jobs.list()?;
    Ok(Json(ListJobsResponse { jobs }))
}

/// Get a specific job
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    let id: JobId = job_id
        .parse()
        .map_err(|_| RequestError::BadRequest(format!("Invalid job ID {}", job_id)))?;

    let job = state
        .jobs
        .get(&id)?
        .ok_or_else(|| RequestError::NotFound(format!("Job {}", id)))?;

    Ok(Json(job))
}

/// Serve a persisted result
pub async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if key.split('/').any(|part| part == ".." || part.is_empty()) {
        return Err(RequestError::BadRequest(format!("Invalid blob key {}", key)).into());
    }

    let data = state
        .blob_store
        .get(&key)
        .await?
        .ok_or_else(|| RequestError::NotFound(format!("Blob {}", key)))?;

    let content_type = mime_guess::from_path(&key).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, content_type.to_string())], data))
}
