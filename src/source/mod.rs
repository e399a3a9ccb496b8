// src/source/mod.rs

//! Source strategies
//!
//! Every catalog category maps to one [`SourcePlan`] variant. Plans are
//! computed from the catalog alone, so malformed entries, unknown categories
//! and missing bases are rejected before any network or file I/O. A
//! [`Sources`] value then produces the package for a plan at the requested
//! path.
//!
//! Derived plans fetch their base through the distribution client into the
//! same staging directory, verify it, and hand it to the build engine.

pub mod http;

use crate::build::{
    firmware, validate_slot, validate_version, BuildRequest, FirmwarePatch, FirmwareRequest,
    PatchBuilder,
};
use crate::catalog::{parse_number, Catalog, CatalogEntry, Category};
use crate::error::{Error, Result};
use crate::package::TitleCodec;
use crate::patchmap::PatchMap;
use crate::verify::{self, ExpectedDigests};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub use http::{HttpMirrorClient, HttpRepositoryClient};

/// Firmware distribution network
#[async_trait]
pub trait DistributionClient: Send + Sync {
    /// Fetch the package for a 16-digit title id; `None` means latest
    async fn fetch_package(&self, title_id: &str, version: Option<u16>) -> Result<Vec<u8>>;

    /// Human-readable name for logging
    fn name(&self) -> &str;
}

/// Community application repository
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Fetch the packaged archive published under `slug`
    async fn fetch_archive(&self, slug: &str) -> Result<Vec<u8>>;

    fn name(&self) -> &str;
}

/// Direct-category base a derived entry is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseSource {
    pub output_filename: String,
    pub title_id: String,
    pub version: Option<u16>,
    pub digests: ExpectedDigests,
}

/// How to obtain one catalog entry's package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePlan {
    Direct {
        title_id: String,
        version: Option<u16>,
    },
    Repository {
        slug: String,
    },
    DerivedBuild {
        base: BaseSource,
        request: BuildRequest,
    },
    DerivedPatch {
        base: BaseSource,
        request: FirmwareRequest,
    },
}

impl SourcePlan {
    /// Strategy category of `entry`, or `UnsupportedCategory`
    pub fn category_of(entry: &CatalogEntry) -> Result<Category> {
        entry.category.ok_or_else(|| {
            Error::UnsupportedCategory(
                entry
                    .category_label
                    .clone()
                    .unwrap_or_else(|| format!("none (entry '{}')", entry.id)),
            )
        })
    }

    /// Plan the production of `entry`
    pub fn for_entry(entry: &CatalogEntry, catalog: &Catalog) -> Result<Self> {
        match Self::category_of(entry)? {
            Category::Direct => {
                let (title_id, version) = direct_target(entry)?;
                Ok(Self::Direct { title_id, version })
            }
            Category::Repository => {
                let slug = entry
                    .source_code1
                    .clone()
                    .ok_or_else(|| malformed(entry, "repository entry has no source code"))?;
                Ok(Self::Repository { slug })
            }
            Category::DerivedBuild => {
                let base = base_source(entry, catalog)?;
                let slot = entry
                    .variant_slot
                    .as_deref()
                    .ok_or_else(|| malformed(entry, "derived build has no variant slot"))?;
                let version = entry
                    .variant_version
                    .as_deref()
                    .ok_or_else(|| malformed(entry, "derived build has no variant version"))?;
                let request = BuildRequest {
                    variant: entry.variant_name(),
                    slot: identity_number("slot", slot)?,
                    version: identity_number("version", version)?,
                };
                validate_slot(request.slot)?;
                validate_version(request.version)?;
                Ok(Self::DerivedBuild { base, request })
            }
            Category::DerivedPatch => {
                let base = base_source(entry, catalog)?;
                let slot = match (&entry.variant_slot, &entry.source_code2_new) {
                    (Some(slot), _) => Some(identity_number("slot", slot)?),
                    (None, Some(code2)) => Some(identity_number("slot", &format!("0x{code2}"))? & 0xff),
                    (None, None) => None,
                };
                let version = entry
                    .variant_version
                    .as_deref()
                    .map(|v| identity_number("version", v))
                    .transpose()?;
                slot.map(validate_slot).transpose()?;
                version.map(validate_version).transpose()?;
                let patches = FirmwarePatch::parse_list(entry.patches.as_deref())
                    .map_err(|e| malformed(entry, &e.to_string()))?;
                Ok(Self::DerivedPatch {
                    base,
                    request: FirmwareRequest {
                        patches,
                        slot,
                        version,
                    },
                })
            }
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Self::Direct { .. } => Category::Direct,
            Self::Repository { .. } => Category::Repository,
            Self::DerivedBuild { .. } => Category::DerivedBuild,
            Self::DerivedPatch { .. } => Category::DerivedPatch,
        }
    }
}

fn malformed(entry: &CatalogEntry, reason: &str) -> Error {
    Error::MalformedEntry {
        id: entry.id.clone(),
        reason: reason.to_string(),
    }
}

fn direct_target(entry: &CatalogEntry) -> Result<(String, Option<u16>)> {
    let title_id = entry
        .title_id()
        .ok_or_else(|| malformed(entry, "direct entry needs both source codes"))?;
    let version = match entry.version.as_deref() {
        Some(v) => Some(
            parse_number(v)
                .and_then(|n| u16::try_from(n).ok())
                .ok_or_else(|| malformed(entry, &format!("invalid version '{v}'")))?,
        ),
        None => None,
    };
    Ok((title_id, version))
}

fn identity_number(what: &str, value: &str) -> Result<u64> {
    parse_number(value).ok_or_else(|| Error::InvalidSlotOrVersion(format!("{what} '{value}' is not a number")))
}

/// Resolve and check the base of a derived entry
fn base_source(entry: &CatalogEntry, catalog: &Catalog) -> Result<BaseSource> {
    let filename = entry
        .base_output_filename
        .as_deref()
        .ok_or_else(|| malformed(entry, "derived entry has no base filename"))?;
    let base = catalog
        .lookup_by_filename(filename)
        .map_err(|_| Error::BaseNotFound(filename.to_string()))?;

    if base.category != Some(Category::Direct) {
        return Err(malformed(
            entry,
            &format!("base '{}' is not a direct entry", base.id),
        ));
    }

    let digests = if entry.base_digests.is_empty() {
        base.digests.clone()
    } else {
        entry.base_digests.clone()
    };
    if digests.is_empty() {
        return Err(Error::MissingDigest(base.output_filename.clone()));
    }

    let (title_id, version) = direct_target(base)?;
    Ok(BaseSource {
        output_filename: base.output_filename.clone(),
        title_id,
        version,
        digests,
    })
}

/// Everything the strategies need to produce packages
pub struct Sources {
    distribution: Arc<dyn DistributionClient>,
    repository: Arc<dyn RepositoryClient>,
    patch_map: Arc<PatchMap>,
    modules_dir: PathBuf,
    codec: Option<Arc<dyn TitleCodec>>,
}

impl Sources {
    pub fn new(
        distribution: Arc<dyn DistributionClient>,
        repository: Arc<dyn RepositoryClient>,
        patch_map: Arc<PatchMap>,
        modules_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            distribution,
            repository,
            patch_map,
            modules_dir: modules_dir.into(),
            codec: None,
        }
    }

    /// Title codec used by derived builds and patches
    pub fn with_codec(mut self, codec: Arc<dyn TitleCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn patch_map(&self) -> &PatchMap {
        &self.patch_map
    }

    /// Produce the package for `plan` at `output`
    ///
    /// `staging` is the per-invocation directory that holds `output`; derived
    /// plans place their base package there as well.
    pub async fn produce(&self, plan: &SourcePlan, staging: &Path, output: &Path) -> Result<()> {
        match plan {
            SourcePlan::Direct { title_id, version } => {
                let data = self.distribution.fetch_package(title_id, *version).await?;
                write_package(output, &data).await
            }
            SourcePlan::Repository { slug } => {
                debug!("Fetching '{}' from {}", slug, self.repository.name());
                let data = self.repository.fetch_archive(slug).await?;
                write_package(output, &data).await
            }
            SourcePlan::DerivedBuild { base, request } => {
                let codec = self.codec(output)?;
                let base_path = self.fetch_base(base, staging).await?;
                let builder = PatchBuilder::new(&self.patch_map, &self.modules_dir);
                builder.build_file(codec.as_ref(), &base_path, output, request)?;
                Ok(())
            }
            SourcePlan::DerivedPatch { base, request } => {
                let codec = self.codec(output)?;
                let base_path = self.fetch_base(base, staging).await?;
                firmware::patch_file(codec.as_ref(), &base_path, output, request)?;
                Ok(())
            }
        }
    }

    fn codec(&self, output: &Path) -> Result<Arc<dyn TitleCodec>> {
        self.codec.clone().ok_or_else(|| {
            Error::CodecUnavailable(
                output
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )
        })
    }

    async fn fetch_base(&self, base: &BaseSource, staging: &Path) -> Result<PathBuf> {
        info!(
            "Fetching base {} ({} v{}) from {}",
            base.output_filename,
            base.title_id,
            base.version.map(|v| v.to_string()).unwrap_or_else(|| "latest".into()),
            self.distribution.name()
        );
        let data = self
            .distribution
            .fetch_package(&base.title_id, base.version)
            .await?;
        let path = staging.join(format!("base-{}", base.output_filename));
        write_package(&path, &data).await?;
        verify::verify_bytes(&data, &base.digests, &path.display().to_string())?;
        Ok(path)
    }
}

async fn write_package(path: &Path, data: &[u8]) -> Result<()> {
    tokio::fs::write(path, data)
        .await
        .map_err(|e| Error::io(format!("Failed to write {}", path.display()), e))
}
