use crate::models::BlobMetadata;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

const PAYLOAD_SUFFIX: &str = ".blob";
const METADATA_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub key: String,
    pub payload: Bytes,
    pub metadata: BlobMetadata,
}

/// Key-value store for uploaded files. Writing an existing key overwrites it.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn set(&self, key: &str, payload: Bytes, metadata: BlobMetadata) -> Result<()>;

    async fn get_with_metadata(&self, key: &str) -> Result<Option<StoredBlob>>;

    async fn get_metadata(&self, key: &str) -> Result<Option<BlobMetadata>>;

    /// All keys, in key order.
    async fn list(&self) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn set(&self, key: &str, payload: Bytes, metadata: BlobMetadata) -> Result<()> {
        let mut blobs = self.blobs.write().await;
        blobs.insert(
            key.to_string(),
            StoredBlob {
                key: key.to_string(),
                payload,
                metadata,
            },
        );
        Ok(())
    }

    async fn get_with_metadata(&self, key: &str) -> Result<Option<StoredBlob>> {
        let blobs = self.blobs.read().await;
        Ok(blobs.get(key).cloned())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<BlobMetadata>> {
        let blobs = self.blobs.read().await;
        Ok(blobs.get(key).map(|blob| blob.metadata.clone()))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let blobs = self.blobs.read().await;
        Ok(blobs.keys().cloned().collect())
    }
}

/// Keeps each blob as two files in one directory: `<key>.blob` with the
/// payload and `<key>.meta.json` with its metadata. The metadata file is
/// written last, so a key only shows up in `list` once it is complete.
pub struct DiskBlobStore {
    root: PathBuf,
}

impl DiskBlobStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create blob directory {}", root.display()))?;
        Ok(Self { root })
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", key, PAYLOAD_SUFFIX))
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", key, METADATA_SUFFIX))
    }

    async fn read_metadata(&self, key: &str) -> Result<Option<BlobMetadata>> {
        let data = match fs::read(self.metadata_path(key)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to read blob metadata"),
        };
        let metadata = serde_json::from_slice(&data).context("Failed to parse blob metadata")?;
        Ok(Some(metadata))
    }
}

/// Keys come straight from query strings, so anything that could leave the
/// blob directory is treated as absent.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && !key.contains(['/', '\\', '\0'])
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn set(&self, key: &str, payload: Bytes, metadata: BlobMetadata) -> Result<()> {
        if !is_safe_key(key) {
            bail!("Invalid blob key '{}'", key);
        }
        fs::write(self.payload_path(key), &payload)
            .await
            .context("Failed to write blob payload")?;
        let json = serde_json::to_vec_pretty(&metadata).context("Failed to serialize blob metadata")?;
        fs::write(self.metadata_path(key), json)
            .await
            .context("Failed to write blob metadata")?;
        debug!(key, size = payload.len(), "stored blob on disk");
        Ok(())
    }

    async fn get_with_metadata(&self, key: &str) -> Result<Option<StoredBlob>> {
        if !is_safe_key(key) {
            return Ok(None);
        }
        let Some(metadata) = self.read_metadata(key).await? else {
            return Ok(None);
        };
        let payload = match fs::read(self.payload_path(key)).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to read blob payload"),
        };
        Ok(Some(StoredBlob {
            key: key.to_string(),
            payload: Bytes::from(payload),
            metadata,
        }))
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<BlobMetadata>> {
        if !is_safe_key(key) {
            return Ok(None);
        }
        self.read_metadata(key).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .context("Failed to read blob directory")?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("Failed to read blob directory")? {
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(METADATA_SUFFIX)) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
