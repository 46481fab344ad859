//! Storage gateway for captured and composite images
//!
//! The capture pipeline only ever talks to [`StorageGateway`]: it hands over
//! encoded bytes, gets back an opaque [`ImageId`], and later resolves that id
//! to bytes again. [`LocalStorage`] persists to a directory on disk and
//! [`MemoryStorage`] keeps everything in process for tests.

use crate::{Config, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extension of every stored image; the pipeline only produces PNG.
pub const IMAGE_EXTENSION: &str = "png";

/// Opaque, URL-safe identifier of a stored image, e.g. `3f2b...c9.png`.
///
/// Deserialization goes through [`ImageId::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(String);

impl ImageId {
    /// Fresh collision-free identifier.
    pub fn generate() -> Self {
        Self(format!("{}.{}", uuid::Uuid::new_v4(), IMAGE_EXTENSION))
    }

    /// Wraps an identifier handed back by a client, rejecting anything that
    /// could escape the storage root.
    pub fn parse(value: &str) -> Result<Self, StorageError> {
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !value.starts_with('.');

        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(StorageError::NotFound(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.0).extension().and_then(|ext| ext.to_str())
    }
}

impl TryFrom<String> for ImageId {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable byte storage addressed by generated identifiers.
///
/// Every `save` targets a new identifier, so concurrent writers never
/// contend and implementations need no write-path locking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn save(&self, data: Vec<u8>) -> Result<ImageId, StorageError>;

    async fn resolve(&self, id: &ImageId) -> Result<Vec<u8>, StorageError>;
}

/// Stores images as files directly under a root directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Creates the root directory if needed.
    pub async fn new(config: &Config) -> Result<Self, StorageError> {
        Self::with_root(config.storage_root.clone()).await
    }

    pub async fn with_root(base_path: PathBuf) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Filesystem location of a stored image.
    pub fn path_of(&self, id: &ImageId) -> PathBuf {
        self.base_path.join(id.as_str())
    }
}

#[async_trait]
impl StorageGateway for LocalStorage {
    async fn save(&self, data: Vec<u8>) -> Result<ImageId, StorageError> {
        let id = ImageId::generate();
        let path = self.path_of(&id);

        tokio::fs::write(&path, &data).await?;
        debug!("Stored {} bytes at {}", data.len(), path.display());

        Ok(id)
    }

    async fn resolve(&self, id: &ImageId) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(self.path_of(id)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process storage without any disk I/O.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    images: DashMap<ImageId, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[async_trait]
impl StorageGateway for MemoryStorage {
    async fn save(&self, data: Vec<u8>) -> Result<ImageId, StorageError> {
        let id = ImageId::generate();
        self.images.insert(id.clone(), data);
        Ok(id)
    }

    async fn resolve(&self, id: &ImageId) -> Result<Vec<u8>, StorageError> {
        self.images
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }
}
