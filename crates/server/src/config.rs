use anyhow::{Context, Result};
use sceneflow_core::jobs::{InMemoryJobStore, JobManager};
use sceneflow_core::node::NodeServices;
use sceneflow_core::providers::{HttpImageProvider, OpenAiTextGenerator, ProviderEndpoint};
use sceneflow_core::storage::{BlobStore, FilesystemBlobStore, ObjectStoreBlobStore};
use sceneflow_core::task::{BlobResultPersister, PollPolicy, TaskRunner};
use sceneflow_core::workflow::WorkflowEngine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_blob_dir")]
    pub blob_dir: String,

    /// Prefix of the URLs handed out for persisted results
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Store blobs in this S3 bucket instead of `blob_dir`
    #[serde(default)]
    pub s3_bucket: Option<String>,
}

fn default_blob_dir() -> String {
    "blobs".to_string()
}

fn default_public_base_url() -> String {
    "/blobs".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
            public_base_url: default_public_base_url(),
            s3_bucket: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_definition_file")]
    pub definition_file: String,

    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,
}

fn default_definition_file() -> String {
    "workflow.json".to_string()
}

fn default_execution_timeout() -> u64 {
    300
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            definition_file: default_definition_file(),
            execution_timeout_secs: default_execution_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default)]
    pub model: Option<String>,
}

impl ProviderConfig {
    pub fn endpoint(&self) -> Result<ProviderEndpoint> {
        let base_url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid provider URL {}", self.base_url))?;
        let mut endpoint = ProviderEndpoint::new(base_url);

        if let Some(var) = &self.api_key_env {
            match std::env::var(var) {
                Ok(key) if !key.is_empty() => endpoint = endpoint.with_api_key(key),
                _ => tracing::warn!("{} is not set, calling {} without credentials", var, self.base_url),
            }
        }
        if let Some(model) = &self.model {
            endpoint = endpoint.with_model(model);
        }

        Ok(endpoint)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_text_provider")]
    pub text: ProviderConfig,

    #[serde(default = "default_image_provider")]
    pub image: ProviderConfig,
}

fn default_text_provider() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://api.openai.com/v1".to_string(),
        api_key_env: Some("OPENAI_API_KEY".to_string()),
        model: Some("gpt-4o-mini".to_string()),
    }
}

fn default_image_provider() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://api.replicate.com/v1".to_string(),
        api_key_env: Some("REPLICATE_API_TOKEN".to_string()),
        model: None,
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            text: default_text_provider(),
            image: default_image_provider(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: f64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_interval")]
    pub max_interval_secs: f64,

    /// Wall-clock bound on a single task
    #[serde(default)]
    pub deadline_secs: Option<f64>,
}

fn default_interval() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    60
}

fn default_backoff() -> f64 {
    1.0
}

fn default_max_interval() -> f64 {
    30.0
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_attempts: default_max_attempts(),
            backoff_multiplier: default_backoff(),
            max_interval_secs: default_max_interval(),
            deadline_secs: None,
        }
    }
}

impl PollingConfig {
    pub fn policy(&self) -> PollPolicy {
        let policy = PollPolicy::fixed(secs(self.interval_secs), self.max_attempts)
            .with_backoff(self.backoff_multiplier, secs(self.max_interval_secs));
        match self.deadline_secs {
            Some(deadline) => policy.with_deadline(secs(deadline)),
            None => policy,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Job records are written here on shutdown and restored on start
    #[serde(default)]
    pub checkpoint_file: Option<String>,
}

impl ServerConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        // Create data directory if it doesn't exist
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self::default()
        };

        config.data_dir = data_dir;

        Ok(config)
    }

    pub fn blob_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.blob_dir)
    }

    pub fn definition_path(&self) -> PathBuf {
        self.data_dir.join(&self.workflow.definition_file)
    }

    pub fn checkpoint_path(&self) -> Option<PathBuf> {
        self.jobs
            .checkpoint_file
            .as_ref()
            .map(|file| self.data_dir.join(file))
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow.execution_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            storage: StorageConfig::default(),
            workflow: WorkflowConfig::default(),
            providers: ProvidersConfig::default(),
            polling: PollingConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub blob_store: Arc<dyn BlobStore>,
    pub engine: Arc<WorkflowEngine>,
    pub job_store: Arc<InMemoryJobStore>,
    pub jobs: Arc<JobManager>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let blob_store: Arc<dyn BlobStore> = match &config.storage.s3_bucket {
            Some(bucket) => {
                let s3 = object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .context("Failed to configure S3 blob store")?;
                tracing::info!("Storing blobs in S3 bucket {}", bucket);
                Arc::new(ObjectStoreBlobStore::new(Box::new(s3), "blobs"))
            }
            None => Arc::new(
                FilesystemBlobStore::new(config.blob_path())
                    .context("Failed to create blob store")?,
            ),
        };

        let text = OpenAiTextGenerator::new(config.providers.text.endpoint()?)
            .context("Failed to create text provider")?;
        let image = HttpImageProvider::new(config.providers.image.endpoint()?)
            .context("Failed to create image provider")?;

        let persister = BlobResultPersister::new(
            reqwest::Client::new(),
            blob_store.clone(),
            config.storage.public_base_url.clone(),
        );
        let images = Arc::new(TaskRunner::new(
            Arc::new(image),
            Arc::new(persister),
            config.polling.policy(),
        ));

        let services = Arc::new(NodeServices {
            text: Arc::new(text),
            images: images.clone(),
        });
        let engine = Arc::new(WorkflowEngine::load(&config.definition_path(), services).await?);

        let job_store = match config.checkpoint_path() {
            Some(path) if path.exists() => Arc::new(InMemoryJobStore::restore(&path).await?),
            _ => Arc::new(InMemoryJobStore::new()),
        };
        let jobs = Arc::new(JobManager::new(job_store.clone(), engine.clone(), images));

        Ok(Self {
            config: Arc::new(config),
            blob_store,
            engine,
            job_store,
            jobs,
        })
    }
}
