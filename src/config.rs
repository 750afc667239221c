use crate::storage::{BlobStore, DiskBlobStore, MemoryBlobStore};
use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Blobs live in a directory on disk.
    Disk,
    /// Blobs live in process memory and vanish on restart.
    Memory,
}

#[derive(Debug, Parser)]
#[command(name = "server")]
#[command(about = "Blob upload, listing and download service for the document index", long_about = None)]
pub struct ServerConfig {
    #[arg(long, env = "DOCINDEX_BIND", default_value = "0.0.0.0:3000", help = "Address to listen on")]
    pub bind: SocketAddr,

    #[arg(long, env = "DOCINDEX_STORAGE", value_enum, default_value_t = StorageBackend::Disk)]
    pub storage: StorageBackend,

    #[arg(long, env = "DOCINDEX_STORAGE_DIR", default_value = "uploaded-files", help = "Directory for the disk backend")]
    pub storage_dir: PathBuf,
}

impl ServerConfig {
    pub async fn blob_store(&self) -> Result<Arc<dyn BlobStore>> {
        match self.storage {
            StorageBackend::Disk => {
                info!(dir = %self.storage_dir.display(), "using disk blob store");
                Ok(Arc::new(DiskBlobStore::new(&self.storage_dir).await?))
            }
            StorageBackend::Memory => {
                info!("using in-memory blob store");
                Ok(Arc::new(MemoryBlobStore::new()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_port_3000_with_disk_storage() {
        let config = ServerConfig::try_parse_from(["server"]).unwrap();
        assert_eq!(config.bind.port(), 3000);
        assert_eq!(config.storage, StorageBackend::Disk);
        assert_eq!(config.storage_dir, PathBuf::from("uploaded-files"));
    }

    #[test]
    fn flags_override_defaults() {
        let config = ServerConfig::try_parse_from([
            "server",
            "--bind",
            "127.0.0.1:8080",
            "--storage",
            "memory",
        ])
        .unwrap();
        assert_eq!(config.bind.to_string(), "127.0.0.1:8080");
        assert_eq!(config.storage, StorageBackend::Memory);
    }
}
