use super::ProviderEndpoint;
use crate::error::ProviderError;
use crate::task::{TaskHandle, TaskPoll, TaskProvider, TaskStatus};
use crate::types::{Sizing, Values};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Prediction-style image generation API.
///
/// `POST {base}/predictions` with `{"input": {...}}` returns an id and a poll
/// URL; `GET` on that URL reports `starting | processing | succeeded | failed
/// | canceled` and, once finished, an `output` URL (or list of URLs).
pub struct HttpImageProvider {
    client: reqwest::Client,
    endpoint: ProviderEndpoint,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    progress: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

impl HttpImageProvider {
    pub fn new(endpoint: ProviderEndpoint) -> Result<Self, ProviderError> {
        let client = endpoint.client()?;
        Ok(Self { client, endpoint })
    }

    async fn read(&self, response: reqwest::Response) -> Result<Prediction, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_response(status.as_u16(), &body));
        }
        Ok(response.json().await?)
    }
}

fn map_status(status: &str) -> TaskStatus {
    match status {
        "starting" | "queued" | "pending" => TaskStatus::Pending,
        "succeeded" | "completed" => TaskStatus::Completed,
        "failed" | "canceled" | "cancelled" | "error" => TaskStatus::Failed,
        _ => TaskStatus::Processing,
    }
}

fn first_output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().find_map(first_output_url),
        Value::Object(map) => map.get("url").and_then(first_output_url),
        _ => None,
    }
}

fn error_text(error: &Value) -> Option<String> {
    match error {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => other
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| Some(other.to_string())),
    }
}

#[async_trait::async_trait]
impl TaskProvider for HttpImageProvider {
    fn name(&self) -> &str {
        "http-image"
    }

    async fn submit(
        &self,
        prompt: &str,
        sizing: Sizing,
        extras: &Values,
    ) -> Result<TaskHandle, ProviderError> {
        let mut input = extras.clone();
        input.insert("prompt".into(), json!(prompt));
        input.insert("width".into(), json!(sizing.width));
        input.insert("height".into(), json!(sizing.height));

        let mut body = json!({ "input": input });
        if let Some(model) = self.endpoint.model.as_deref() {
            body["model"] = json!(model);
        }

        let url = self.endpoint.url("predictions")?;
        debug!(url = %url, "Submitting image task");

        let response = self.client.post(url).json(&body).send().await?;
        let prediction = self.read(response).await?;

        if let Some(message) = prediction.error.as_ref().and_then(error_text) {
            return Err(ProviderError::Submission(message));
        }

        let id = prediction
            .id
            .ok_or_else(|| ProviderError::InvalidResponse("Prediction has no id".into()))?;
        let poll_target = match prediction.urls.and_then(|u| u.get) {
            Some(get) => get,
            None => self.endpoint.url(&format!("predictions/{}", id))?.to_string(),
        };

        Ok(TaskHandle { id, poll_target })
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<TaskPoll, ProviderError> {
        let response = self.client.get(&handle.poll_target).send().await?;
        let prediction = self.read(response).await?;

        let status = prediction
            .status
            .as_deref()
            .map(map_status)
            .unwrap_or(TaskStatus::Processing);

        let result_locator = prediction.output.as_ref().and_then(first_output_url);
        let error = prediction.error.as_ref().and_then(error_text);

        Ok(TaskPoll {
            status,
            progress: prediction.progress,
            result_locator: if status == TaskStatus::Completed {
                result_locator
            } else {
                None
            },
            error: if status == TaskStatus::Failed {
                error.or_else(|| Some("Prediction failed".to_string()))
            } else {
                None
            },
        })
    }
}
