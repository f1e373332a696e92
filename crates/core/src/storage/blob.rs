use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// A blob written to storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// SHA-256 of the content, hex encoded
    pub hash: String,
    /// Storage key, e.g. `ab/abcdef....png`
    pub key: String,
    pub size: usize,
}

/// Content-addressed storage for generated results
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob under its content hash with the given file extension
    async fn put(&self, data: Bytes, extension: &str) -> Result<StoredBlob>;

    /// Retrieve a blob by key
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Check if a blob exists
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Storage key for content: blobs are fanned out by the first two hash chars
/// (like Git), e.g. `ab/abcdef123....png`
pub fn blob_key(data: &[u8], extension: &str) -> (String, String) {
    let hash = hex::encode(Sha256::digest(data));
    let extension = extension.trim_start_matches('.');
    let key = if extension.is_empty() {
        format!("{}/{}", &hash[..2], hash)
    } else {
        format!("{}/{}.{}", &hash[..2], hash, extension)
    };
    (hash, key)
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
        return Err(anyhow!("Invalid blob key: {}", key));
    }
    Ok(())
}

/// Filesystem-based blob store (for local development and single-node deployments)
#[derive(Clone)]
pub struct FilesystemBlobStore {
    base_path: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path).context("Failed to create blob store directory")?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }
}

#[async_trait::async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, data: Bytes, extension: &str) -> Result<StoredBlob> {
        let (hash, key) = blob_key(&data, extension);
        let path = self.blob_path(&key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create blob directory")?;
        }

        // Content-addressed: an existing file already holds these bytes
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let mut file = tokio::fs::File::create(&path)
                .await
                .context("Failed to create blob file")?;
            file.write_all(&data).await.context("Failed to write blob")?;
            file.sync_all().await.context("Failed to sync blob")?;
        }

        Ok(StoredBlob {
            hash,
            key,
            size: data.len(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.blob_path(key)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let data = tokio::fs::read(&path).await.context("Failed to read blob")?;
        Ok(Some(Bytes::from(data)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.blob_path(key)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }
}

/// Object store-based blob store (S3, MinIO, etc.)
pub struct ObjectStoreBlobStore {
    store: Box<dyn object_store::ObjectStore>,
    prefix: String,
}

impl ObjectStoreBlobStore {
    pub fn new(store: Box<dyn object_store::ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn object_path(&self, key: &str) -> Result<object_store::path::Path> {
        validate_key(key)?;
        let prefix = self.prefix.trim_matches('/');
        let full = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", prefix, key)
        };
        Ok(object_store::path::Path::from(full))
    }
}

#[async_trait::async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn put(&self, data: Bytes, extension: &str) -> Result<StoredBlob> {
        let (hash, key) = blob_key(&data, extension);
        let path = self.object_path(&key)?;
        let size = data.len();

        if self.store.head(&path).await.is_err() {
            self.store
                .put(&path, data.into())
                .await
                .context("Failed to put blob to object store")?;
        }

        Ok(StoredBlob { hash, key, size })
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.object_path(key)?;

        match self.store.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await.context("Failed to read blob bytes")?;
                Ok(Some(bytes))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e).context("Failed to get blob from object store"),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e).context("Failed to check blob existence"),
        }
    }
}
