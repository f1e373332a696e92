//! HTTP adapters for generation providers.

pub mod image;
pub mod text;

pub use image::HttpImageProvider;
pub use text::{GenerationOptions, OpenAiTextGenerator, TextGenerator};

use crate::error::ProviderError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::time::Duration;
use url::Url;

/// Connection settings shared by the HTTP adapters
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub base_url: Url,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout: Duration,
}

impl ProviderEndpoint {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            api_key: None,
            model: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Build an HTTP client carrying bearer auth for this endpoint
    pub fn client(&self) -> Result<reqwest::Client, ProviderError> {
        let mut headers = HeaderMap::new();
        if let Some(ref api_key) = self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|_| {
                    ProviderError::Submission("Invalid API key format".to_string())
                })?,
            );
        }

        Ok(reqwest::Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .build()?)
    }

    /// Append path segments to the base URL
    pub fn url(&self, path: &str) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ProviderError::Submission(format!("Base URL {} cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}
