// src/cache/mod.rs

//! Object cache boundary
//!
//! Built and downloaded packages are stored under a stable key derived from
//! their output filename and handed out through time-limited retrieval
//! URLs. The cache is expected to make existence checks and uploads atomic
//! per key; racing uploads of the same key may both succeed.

mod local;

pub use local::LocalObjectCache;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Prefix of every package key
pub const KEY_PREFIX: &str = "wads";

/// Content type packages are uploaded with
pub const PACKAGE_CONTENT_TYPE: &str = "application/octet-stream";

/// Default lifetime of a retrieval URL (24 hours)
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(86_400);

/// Storage for finished packages
#[async_trait]
pub trait ObjectCache: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Store the file at `path` under `key`
    async fn upload(&self, path: &Path, key: &str, content_type: &str) -> Result<()>;

    /// Issue a URL that retrieves `key` until `ttl` elapses
    async fn retrieval_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Human-readable name for logging
    fn name(&self) -> &str;
}

/// Cache key for a package output filename
pub fn cache_key(output_filename: &str) -> String {
    format!("{KEY_PREFIX}/{output_filename}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("IOS56-64-v5661.wad"), "wads/IOS56-64-v5661.wad");
    }
}
