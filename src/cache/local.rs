// src/cache/local.rs

//! Filesystem-backed object cache
//!
//! Objects are stored at `<root>/<key>` with a `<key>.meta.json` sidecar.
//! Uploads are written to a hidden temp file next to the object and renamed
//! into place, so readers never observe a partial object.

use super::ObjectCache;
use crate::error::{Error, Result};
use crate::hash;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Sidecar record stored with each object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub md5: String,
    pub uploaded_at: DateTime<Utc>,
}

pub struct LocalObjectCache {
    root: PathBuf,
}

impl LocalObjectCache {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the object stored under `key`
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::CacheFailure(format!("Invalid cache key '{key}'")));
        }
        Ok(self.root.join(relative))
    }

    fn metadata_path(object: &Path) -> PathBuf {
        let mut name = object.file_name().unwrap_or_default().to_os_string();
        name.push(".meta.json");
        object.with_file_name(name)
    }

    /// Read the sidecar record of `key`
    pub async fn metadata(&self, key: &str) -> Result<ObjectMetadata> {
        let path = Self::metadata_path(&self.object_path(key)?);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::CacheFailure(format!("Failed to read {}: {e}", path.display())))?;
        serde_json::from_slice(&data)
            .map_err(|e| Error::CacheFailure(format!("Invalid metadata for '{key}': {e}")))
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(path.file_name().unwrap_or_default());
    temp_name.push(".partial");
    let temp_path = path.with_file_name(temp_name);

    tokio::fs::write(&temp_path, data).await.map_err(|e| {
        Error::CacheFailure(format!("Failed to write {}: {e}", temp_path.display()))
    })?;
    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        Error::CacheFailure(format!("Failed to rename into {}: {e}", path.display()))
    })
}

#[async_trait]
impl ObjectCache for LocalObjectCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::CacheFailure(format!("Failed to check {}: {e}", path.display())))
    }

    async fn upload(&self, path: &Path, key: &str, content_type: &str) -> Result<()> {
        let object = self.object_path(key)?;
        if let Some(parent) = object.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::CacheFailure(format!("Failed to create cache directory: {e}"))
            })?;
        }

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| Error::CacheFailure(format!("Failed to read {}: {e}", path.display())))?;

        let metadata = ObjectMetadata {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size: data.len() as u64,
            md5: hash::md5(&data),
            uploaded_at: Utc::now(),
        };
        let sidecar = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| Error::CacheFailure(format!("Failed to encode metadata: {e}")))?;

        write_atomic(&object, &data).await?;
        write_atomic(&Self::metadata_path(&object), &sidecar).await?;

        debug!("Stored {} ({} bytes) in {}", key, metadata.size, self.root.display());
        Ok(())
    }

    async fn retrieval_url(&self, key: &str, ttl: Duration) -> Result<String> {
        let object = self.object_path(key)?;
        if !self.exists(key).await? {
            return Err(Error::CacheFailure(format!("No cached object for '{key}'")));
        }

        let absolute = std::path::absolute(&object)
            .map_err(|e| Error::CacheFailure(format!("Failed to resolve {}: {e}", object.display())))?;
        let mut url = Url::from_file_path(&absolute)
            .map_err(|_| Error::CacheFailure(format!("Cannot express {} as a URL", absolute.display())))?;

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::CacheFailure(format!("Invalid URL lifetime: {e}")))?;
        let expires = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::CacheFailure(format!("URL lifetime {ttl} is out of range")))?;
        url.query_pairs_mut()
            .append_pair("expires", &expires.timestamp().to_string());

        Ok(url.into())
    }

    fn name(&self) -> &str {
        "local"
    }
}
