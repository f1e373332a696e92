use crate::error::ProviderError;
use crate::storage::BlobStore;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use tracing::{debug, warn};

/// Copies a finished task's result somewhere durable, returning the new locator.
///
/// Provider result URLs are often short-lived; persisting them keeps results
/// servable after the provider expires them.
#[async_trait::async_trait]
pub trait ResultPersister: Send + Sync {
    async fn persist(&self, locator: &str) -> Result<String, ProviderError>;

    /// Persist `remote`, falling back to it when persisting fails. Returns the
    /// locator to serve and whether it is the persisted copy.
    async fn persist_or_remote(&self, task_id: &str, remote: &str) -> (String, bool) {
        match self.persist(remote).await {
            Ok(local) => (local, true),
            Err(e) => {
                warn!(
                    task_id,
                    remote_url = %remote,
                    error = %e,
                    "Failed to persist result, serving remote URL"
                );
                (remote.to_string(), false)
            }
        }
    }
}

/// Returns locators unchanged
#[derive(Debug, Clone, Default)]
pub struct PassthroughPersister;

#[async_trait::async_trait]
impl ResultPersister for PassthroughPersister {
    async fn persist(&self, locator: &str) -> Result<String, ProviderError> {
        Ok(locator.to_string())
    }
}

/// Downloads results over HTTP into a [`BlobStore`]
pub struct BlobResultPersister {
    client: reqwest::Client,
    store: Arc<dyn BlobStore>,
    public_base_url: String,
}

impl BlobResultPersister {
    /// `public_base_url` is the prefix under which stored blobs are served
    pub fn new(
        client: reqwest::Client,
        store: Arc<dyn BlobStore>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            public_base_url: public_base_url.into(),
        }
    }

    async fn download(&self, url: &str) -> Result<(Bytes, Option<String>), ProviderError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_response(status.as_u16(), &body));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::Persist(format!("Empty result body from {}", url)));
        }

        Ok((bytes, content_type))
    }
}

#[async_trait::async_trait]
impl ResultPersister for BlobResultPersister {
    async fn persist(&self, locator: &str) -> Result<String, ProviderError> {
        let (bytes, content_type) = self.download(locator).await?;
        let extension = file_extension(content_type.as_deref(), locator);

        let stored = self
            .store
            .put(bytes, extension)
            .await
            .map_err(|e| ProviderError::Persist(format!("{:#}", e)))?;

        debug!(key = %stored.key, size = stored.size, "Persisted task result");

        Ok(format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            stored.key
        ))
    }
}

/// Pick a file extension from the content type, falling back to the URL path
fn file_extension(content_type: Option<&str>, locator: &str) -> &'static str {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match mime.as_deref() {
        Some("image/png") => return "png",
        Some("image/jpeg") | Some("image/jpg") => return "jpg",
        Some("image/webp") => return "webp",
        Some("image/gif") => return "gif",
        _ => {}
    }

    let path = locator.split(['?', '#']).next().unwrap_or(locator);
    let extension = path
        .rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "png",
        Some("jpg") | Some("jpeg") => "jpg",
        Some("webp") => "webp",
        Some("gif") => "gif",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FilesystemBlobStore;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension(Some("image/png"), "https://x/y"), "png");
        assert_eq!(file_extension(Some("image/jpeg; charset=binary"), "https://x/y"), "jpg");
        assert_eq!(file_extension(None, "https://x/out.WEBP?sig=abc"), "webp");
        assert_eq!(file_extension(Some("application/octet-stream"), "https://x/y"), "bin");
    }

    #[tokio::test]
    async fn test_downloads_into_blob_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/out/1.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(b"png-bytes".to_vec()),
            )
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemBlobStore::new(temp_dir.path().to_path_buf()).unwrap());
        let persister =
            BlobResultPersister::new(reqwest::Client::new(), store.clone(), "/media/");

        let local = persister
            .persist(&format!("{}/out/1.png", server.uri()))
            .await
            .unwrap();

        assert!(local.starts_with("/media/"));
        assert!(local.ends_with(".png"));
        let key = local.trim_start_matches("/media/");
        assert_eq!(
            store.get(key).await.unwrap().unwrap(),
            Bytes::from_static(b"png-bytes")
        );
    }

    #[tokio::test]
    async fn test_expired_url_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("expired"))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemBlobStore::new(temp_dir.path().to_path_buf()).unwrap());
        let persister = BlobResultPersister::new(reqwest::Client::new(), store, "/media");

        let err = persister
            .persist(&format!("{}/gone.png", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_persist_or_remote() {
        let (url, persisted) = PassthroughPersister
            .persist_or_remote("task-1", "https://provider.example/a.png")
            .await;
        assert_eq!(url, "https://provider.example/a.png");
        assert!(persisted);

        let (url, persisted) = crate::testing::FailingPersister
            .persist_or_remote("task-1", "https://provider.example/a.png")
            .await;
        assert_eq!(url, "https://provider.example/a.png");
        assert!(!persisted);
    }
}
