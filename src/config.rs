// src/config.rs

//! TOML configuration
//!
//! ```toml
//! [paths]
//! catalog = "database.json"
//! patch_map = "ciosmaps.xml"
//! modules_dir = "modules"
//! staging_dir = "temp-downloads"
//!
//! [batch]
//! max_concurrent = 3
//!
//! [cache]
//! root = "/var/cache/wadsmith"
//! url_ttl = "24h"
//!
//! [sources]
//! mirror_url = "https://mirror.example.org/titles/"
//! repository_url = "https://hbb1.oscwii.org/api/contents/"
//! timeout = "30s"
//! max_retries = 3
//! ```
//!
//! Every key is optional. The `TEMP_DIRECTORY` environment variable takes
//! precedence over `paths.staging_dir`.

use crate::batch::DEFAULT_MAX_CONCURRENT;
use crate::source::http::{DEFAULT_REPOSITORY_URL, MAX_RETRIES};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "wadsmith.toml";

/// Environment variable overriding the staging directory
pub const STAGING_ENV: &str = "TEMP_DIRECTORY";

/// Longest accepted retrieval URL lifetime (one year)
pub const MAX_URL_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub sources: SourcesSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    #[serde(default = "default_catalog")]
    pub catalog: PathBuf,
    #[serde(default = "default_patch_map")]
    pub patch_map: PathBuf,
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            catalog: default_catalog(),
            patch_map: default_patch_map(),
            modules_dir: default_modules_dir(),
            staging_dir: None,
        }
    }
}

fn default_catalog() -> PathBuf {
    PathBuf::from("database.json")
}

fn default_patch_map() -> PathBuf {
    PathBuf::from("ciosmaps.xml")
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSection {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
    /// Retrieval URL lifetime, e.g. `"24h"`
    #[serde(default = "default_url_ttl")]
    pub url_ttl: String,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            url_ttl: default_url_ttl(),
        }
    }
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("wadsmith"))
        .unwrap_or_else(|| PathBuf::from(".wadsmith-cache"))
}

fn default_url_ttl() -> String {
    "24h".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourcesSection {
    /// Mirror serving prebuilt title packages
    #[serde(default)]
    pub mirror_url: Option<String>,
    #[serde(default = "default_repository_url")]
    pub repository_url: String,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SourcesSection {
    fn default() -> Self {
        Self {
            mirror_url: None,
            repository_url: default_repository_url(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_repository_url() -> String {
    DEFAULT_REPOSITORY_URL.to_string()
}

fn default_timeout() -> String {
    "30s".to_string()
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

impl Config {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default file if present, else defaults
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.max_concurrent == 0 {
            anyhow::bail!("batch.max_concurrent must be at least 1");
        }

        let ttl = parse_duration(&self.cache.url_ttl)
            .with_context(|| format!("Invalid cache.url_ttl: {}", self.cache.url_ttl))?;
        if ttl.is_zero() {
            anyhow::bail!("cache.url_ttl must be greater than zero");
        }
        if ttl > MAX_URL_TTL {
            anyhow::bail!("cache.url_ttl must not exceed 365d");
        }

        parse_duration(&self.sources.timeout)
            .with_context(|| format!("Invalid sources.timeout: {}", self.sources.timeout))?;

        Ok(())
    }

    pub fn url_ttl(&self) -> Result<Duration> {
        parse_duration(&self.cache.url_ttl)
    }

    pub fn timeout(&self) -> Result<Duration> {
        parse_duration(&self.sources.timeout)
    }

    /// Staging directory, honoring `TEMP_DIRECTORY`
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir_with(std::env::var(STAGING_ENV).ok())
    }

    fn staging_dir_with(&self, env: Option<String>) -> PathBuf {
        env.filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.paths.staging_dir.clone())
            .unwrap_or_else(|| PathBuf::from("temp-downloads"))
    }
}

/// Parse a human-readable duration string (e.g., "15m", "1h", "30s")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('d') {
        (n, 24 * 60 * 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 60 * 60)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else {
        // Assume seconds
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration number: {}", num_str))?;

    let secs = num
        .checked_mul(multiplier)
        .with_context(|| format!("Duration too large: {}", s))?;
    Ok(Duration::from_secs(secs))
}
