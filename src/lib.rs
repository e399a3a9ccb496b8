// src/lib.rs

//! wadsmith
//!
//! Resolves catalog entries to verified Wii title packages. An entry is
//! either fetched directly from the firmware distribution network, fetched
//! from the community application repository, or derived from a base title
//! by a patch-map-driven build or a firmware signature patch. Finished
//! packages are stored in an object cache and handed out through
//! time-limited retrieval URLs.
//!
//! # Architecture
//!
//! - `catalog`: read-only entry table loaded once
//! - `source`: one strategy per catalog category, planned before any source I/O
//! - `build`: the patch build engine on top of the `package` collaborator seam
//! - `resolver`: lookup, cache check, production, verification, upload
//! - `batch`: fixed windows of concurrent resolutions with isolated failures

pub mod batch;
pub mod build;
pub mod cache;
pub mod catalog;
pub mod config;
mod error;
pub mod hash;
pub mod package;
pub mod patchmap;
pub mod progress;
pub mod resolver;
pub mod source;
pub mod verify;

pub use batch::{BatchOrchestrator, DownloadSummary};
pub use build::{BuildReport, BuildRequest, PatchBuilder};
pub use cache::{cache_key, LocalObjectCache, ObjectCache};
pub use catalog::{Catalog, CatalogEntry, Category};
pub use error::{Error, ErrorKind, PatchMismatch, Result};
pub use hash::{Hash, HashAlgorithm};
pub use package::{TitleCodec, TitlePackage};
pub use patchmap::PatchMap;
pub use progress::{
    CallbackProgress, CliProgress, LogProgress, ProgressEvent, ProgressTracker, SilentProgress,
};
pub use resolver::{DownloadResult, Resolver};
pub use source::{SourcePlan, Sources};
pub use verify::ExpectedDigests;
