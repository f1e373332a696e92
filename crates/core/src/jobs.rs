//! Asynchronous job registry.
//!
//! Long-running work (a workflow run, an image batch) is accepted immediately,
//! recorded as a job, and progresses in a background task. Callers poll the
//! job record for status, progress and results.

use crate::error::WorkflowError;
use crate::node::ProgressFn;
use crate::task::{BatchStatus, TaskBatch, TaskRunner};
use crate::types::{JobId, Sizing, Values};
use crate::workflow::WorkflowEngine;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    /// Finished with some failed items
    Partial,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Workflow,
    ImageBatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Fraction complete in `0.0..=1.0`
    pub progress: f64,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(kind: JobKind, params: Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind,
            status: JobStatus::Queued,
            progress: 0.0,
            params,
            results: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.progress = 1.0;
        self.completed_at = Some(Utc::now());
    }
}

/// Storage for job records. Updates are atomic per record.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: JobRecord) -> Result<()>;

    fn get(&self, id: &JobId) -> Result<Option<JobRecord>>;

    /// Apply `apply` to the record under the store's lock and return the result
    fn update(&self, id: &JobId, apply: &mut dyn FnMut(&mut JobRecord)) -> Result<JobRecord>;

    /// All records, newest first
    fn list(&self) -> Result<Vec<JobRecord>>;
}

/// Process-local job store
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load records from a checkpoint written by [`InMemoryJobStore::checkpoint`].
    /// Jobs that were still in flight are marked failed.
    pub async fn restore(path: &Path) -> Result<Self> {
        let doc = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read job checkpoint {}", path.display()))?;
        let records: Vec<JobRecord> = serde_json::from_str(&doc)
            .with_context(|| format!("Failed to parse job checkpoint {}", path.display()))?;

        let mut jobs = HashMap::with_capacity(records.len());
        for mut job in records {
            if !job.status.is_terminal() {
                job.error = Some("Interrupted by restart".to_string());
                job.finish(JobStatus::Failed);
            }
            jobs.insert(job.id, job);
        }

        info!(jobs = jobs.len(), path = %path.display(), "Restored job checkpoint");
        Ok(Self {
            jobs: RwLock::new(jobs),
        })
    }

    /// Write a snapshot of every record to `path`
    pub async fn checkpoint(&self, path: &Path) -> Result<usize> {
        let records = self.list()?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let doc = serde_json::to_vec_pretty(&records)?;
        tokio::fs::write(path, doc)
            .await
            .with_context(|| format!("Failed to write job checkpoint {}", path.display()))?;
        Ok(records.len())
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: JobRecord) -> Result<()> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| anyhow!("Job store lock poisoned"))?;
        jobs.insert(job.id, job);
        Ok(())
    }

    fn get(&self, id: &JobId) -> Result<Option<JobRecord>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| anyhow!("Job store lock poisoned"))?;
        Ok(jobs.get(id).cloned())
    }

    fn update(&self, id: &JobId, apply: &mut dyn FnMut(&mut JobRecord)) -> Result<JobRecord> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| anyhow!("Job store lock poisoned"))?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| anyhow!("Job {} not found", id))?;
        apply(job);
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    fn list(&self) -> Result<Vec<JobRecord>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| anyhow!("Job store lock poisoned"))?;
        let mut records: Vec<JobRecord> = jobs.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

/// Accepts jobs and drives them in background tasks
pub struct JobManager {
    store: Arc<dyn JobStore>,
    engine: Arc<WorkflowEngine>,
    images: Arc<TaskRunner>,
    shutdown: CancellationToken,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<WorkflowEngine>,
        images: Arc<TaskRunner>,
    ) -> Self {
        Self {
            store,
            engine,
            images,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Cancel every job still in flight
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn get(&self, id: &JobId) -> Result<Option<JobRecord>> {
        self.store.get(id)
    }

    pub fn list(&self) -> Result<Vec<JobRecord>> {
        self.store.list()
    }

    /// Run the active workflow in the background
    pub fn submit_workflow(&self, inputs: Values) -> Result<JobRecord> {
        let job = JobRecord::new(JobKind::Workflow, Value::Object(inputs.clone()));
        let id = job.id;
        self.store.insert(job.clone())?;
        info!(job_id = %id, "Workflow job queued");

        let store = self.store.clone();
        let engine = self.engine.clone();
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            mark_running(store.as_ref(), &id);

            let progress_store = store.clone();
            let progress: ProgressFn = Arc::new(move |fraction: f64| {
                let result = progress_store.update(&id, &mut |job| {
                    job.progress = job.progress.max(fraction.clamp(0.0, 1.0));
                });
                if let Err(e) = result {
                    warn!(job_id = %id, error = %e, "Failed to record job progress");
                }
            });

            let outcome = engine.execute_detailed(inputs, Some(progress), cancel).await;
            let mut outcome = Some(outcome);
            let result = store.update(&id, &mut |job| match outcome.take() {
                Some(Ok(run)) => {
                    let status = if run.failed_nodes() > 0 || has_failed_items(&run.output) {
                        JobStatus::Partial
                    } else {
                        JobStatus::Completed
                    };
                    job.results = Some(Value::Object(run.output));
                    job.finish(status);
                }
                Some(Err(e)) => {
                    job.error = Some(e.to_string());
                    job.finish(JobStatus::Failed);
                }
                None => {}
            });

            match result {
                Ok(job) if job.status == JobStatus::Failed => {
                    error!(job_id = %id, error = job.error.as_deref().unwrap_or(""), "Workflow job failed");
                }
                Ok(job) => info!(job_id = %id, status = ?job.status, "Workflow job finished"),
                Err(e) => error!(job_id = %id, error = %e, "Failed to record workflow result"),
            }
        });

        Ok(job)
    }

    /// Generate one image per prompt in the background
    pub fn submit_image_batch(
        &self,
        prompts: Vec<String>,
        sizing: Sizing,
        extras: Values,
    ) -> Result<JobRecord> {
        if prompts.is_empty() {
            return Err(WorkflowError::Validation("At least one prompt is required".into()).into());
        }

        let params = json!({
            "prompts": prompts,
            "width": sizing.width,
            "height": sizing.height,
        });
        let job = JobRecord::new(JobKind::ImageBatch, params);
        let id = job.id;
        self.store.insert(job.clone())?;
        info!(job_id = %id, prompts = prompts.len(), "Image batch job queued");

        let store = self.store.clone();
        let images = self.images.clone();
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            mark_running(store.as_ref(), &id);

            let mut batch = TaskBatch::submit(
                images.provider().clone(),
                images.persister().clone(),
                images.policy().clone(),
                prompts,
                sizing,
                &extras,
            )
            .await;
            record_batch(store.as_ref(), &id, &batch);

            let status = batch
                .run_observed(&cancel, |batch| record_batch(store.as_ref(), &id, batch))
                .await;

            let job_status = match status {
                BatchStatus::Done => JobStatus::Completed,
                BatchStatus::Partial => JobStatus::Partial,
                BatchStatus::Failed | BatchStatus::Running => JobStatus::Failed,
            };
            let results = batch_results(&batch);
            let result = store.update(&id, &mut |job| {
                job.results = Some(results.clone());
                if job_status == JobStatus::Failed {
                    job.error = Some("No image in the batch completed".to_string());
                }
                job.finish(job_status);
            });

            match result {
                Ok(_) => info!(job_id = %id, status = ?job_status, "Image batch job finished"),
                Err(e) => error!(job_id = %id, error = %e, "Failed to record batch result"),
            }
        });

        Ok(job)
    }
}

fn mark_running(store: &dyn JobStore, id: &JobId) {
    if let Err(e) = store.update(id, &mut |job| job.status = JobStatus::Running) {
        warn!(job_id = %id, error = %e, "Failed to mark job running");
    }
}

fn batch_results(batch: &TaskBatch) -> Value {
    serde_json::to_value(batch.entries()).unwrap_or(Value::Null)
}

fn record_batch(store: &dyn JobStore, id: &JobId, batch: &TaskBatch) {
    let progress = batch.progress();
    let results = batch_results(batch);
    let result = store.update(id, &mut |job| {
        job.progress = job.progress.max(progress);
        job.results = Some(results.clone());
    });
    if let Err(e) = result {
        warn!(job_id = %id, error = %e, "Failed to record batch progress");
    }
}

/// True when the output carries a `results` list with a failed item
fn has_failed_items(output: &Values) -> bool {
    output
        .get("results")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .any(|item| item.get("success") == Some(&Value::Bool(false)))
        })
        .unwrap_or(false)
}
