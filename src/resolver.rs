// src/resolver.rs

//! Single-entry resolution
//!
//! Resolving an id looks the entry up, rejects unsupported categories, and
//! checks the object cache. A cached package skips straight to retrieval-URL
//! issuance, so a cached derived entry is served even if its base has since
//! left the catalog. Otherwise the source is planned, the package is produced
//! in a fresh staging directory, verified and uploaded, and the staging
//! directory is removed whatever the outcome.
//!
//! Failures never escape [`Resolver::resolve`]; they become failed
//! [`DownloadResult`]s.

use crate::cache::{cache_key, ObjectCache, DEFAULT_URL_TTL, PACKAGE_CONTENT_TYPE};
use crate::catalog::{Catalog, CatalogEntry};
use crate::error::{Error, ErrorKind, Result};
use crate::source::{SourcePlan, Sources};
use crate::verify;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Outcome of resolving one catalog id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadResult {
    pub id: String,
    /// Output filename, or the id when the entry could not be found
    pub output_filename: String,
    pub success: bool,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl DownloadResult {
    fn succeeded(entry: &CatalogEntry, cached: bool, key: String, url: String) -> Self {
        Self {
            id: entry.id.clone(),
            output_filename: entry.output_filename.clone(),
            success: true,
            cached,
            cache_key: Some(key),
            retrieval_url: Some(url),
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(id: &str, output_filename: &str, error: &Error) -> Self {
        Self {
            id: id.to_string(),
            output_filename: output_filename.to_string(),
            success: false,
            cached: false,
            cache_key: None,
            retrieval_url: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.error_kind.as_deref()
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.error_kind.as_deref() == Some(kind.as_ref())
    }
}

/// Resolves catalog ids to cached, verified packages
pub struct Resolver {
    catalog: Arc<Catalog>,
    sources: Arc<Sources>,
    cache: Arc<dyn ObjectCache>,
    staging_root: PathBuf,
    url_ttl: Duration,
}

impl Resolver {
    pub fn new(
        catalog: Arc<Catalog>,
        sources: Arc<Sources>,
        cache: Arc<dyn ObjectCache>,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            sources,
            cache,
            staging_root: staging_root.into(),
            url_ttl: DEFAULT_URL_TTL,
        }
    }

    pub fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Resolve one id; never fails, failures are reported in the result
    pub async fn resolve(&self, id: &str) -> DownloadResult {
        match self.try_resolve(id).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Error downloading {}: {}", id, e);
                let output = self
                    .catalog
                    .get(id)
                    .map(|entry| entry.output_filename.as_str())
                    .unwrap_or(id);
                DownloadResult::failed(id, output, &e)
            }
        }
    }

    async fn try_resolve(&self, id: &str) -> Result<DownloadResult> {
        let entry = self.catalog.lookup_by_id(id)?;
        info!("Resolving {} ({})", id, entry.output_filename);

        SourcePlan::category_of(entry)?;
        let key = cache_key(&entry.output_filename);

        let cached = self.cache.exists(&key).await?;
        if cached {
            info!("{} already in {} cache", entry.output_filename, self.cache.name());
        } else {
            // Planning touches only the catalog; no source is contacted yet
            let plan = SourcePlan::for_entry(entry, &self.catalog)?;
            self.produce_and_store(entry, &plan, &key).await?;
            info!("Uploaded {} to {} cache", entry.output_filename, self.cache.name());
        }

        let url = self.cache.retrieval_url(&key, self.url_ttl).await?;
        Ok(DownloadResult::succeeded(entry, cached, key, url))
    }

    async fn produce_and_store(&self, entry: &CatalogEntry, plan: &SourcePlan, key: &str) -> Result<()> {
        // Removed on drop, including every early return below
        let staging = self.staging_dir(&entry.output_filename)?;
        let output = staging.path().join(&entry.output_filename);

        debug!("Producing {} as {}", entry.id, plan.category());
        self.sources.produce(plan, staging.path(), &output).await?;

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(Error::IoError(format!(
                "File was not created after download: {}",
                entry.output_filename
            )));
        }

        if entry.is_unverifiable() {
            warn!(
                "{} has no expected digest; accepting repository content unverified",
                entry.output_filename
            );
        } else {
            verify::verify_file(&output, &entry.digests).await?;
        }

        self.cache.upload(&output, key, PACKAGE_CONTENT_TYPE).await?;

        cleanup(staging);
        Ok(())
    }

    fn staging_dir(&self, output_filename: &str) -> Result<TempDir> {
        std::fs::create_dir_all(&self.staging_root).map_err(|e| {
            Error::io(
                format!("Failed to create staging root {}", self.staging_root.display()),
                e,
            )
        })?;
        let stem = Path::new(output_filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        tempfile::Builder::new()
            .prefix(&format!("{stem}-"))
            .tempdir_in(&self.staging_root)
            .map_err(|e| Error::io("Failed to create staging directory", e))
    }
}

fn cleanup(staging: TempDir) {
    let path = staging.path().to_path_buf();
    if let Err(e) = staging.close() {
        warn!("Failed to clean up staging directory {}: {}", path.display(), e);
    }
}
