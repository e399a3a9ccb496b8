// src/commands.rs
//! Command handlers for the wadsmith CLI

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use wadsmith::config::Config;
use wadsmith::progress::{CliProgress, LogProgress, ProgressTracker, SilentProgress};
use wadsmith::source::{DistributionClient, HttpMirrorClient, HttpRepositoryClient, SourcePlan, Sources};
use wadsmith::{
    verify, BatchOrchestrator, Catalog, DownloadSummary, Error, LocalObjectCache, PatchMap, Resolver,
};

/// Settings shared by every command
pub struct AppContext {
    pub config: Config,
    pub catalog_path: PathBuf,
}

impl AppContext {
    pub fn new(config: Config, catalog: Option<PathBuf>) -> Self {
        let catalog_path = catalog.unwrap_or_else(|| config.paths.catalog.clone());
        Self { config, catalog_path }
    }

    fn load_catalog(&self) -> Result<Catalog> {
        Catalog::load(&self.catalog_path)
            .with_context(|| format!("Failed to load catalog {}", self.catalog_path.display()))
    }

    fn load_patch_map(&self) -> Result<PatchMap> {
        let path = &self.config.paths.patch_map;
        if !path.exists() {
            warn!("Patch map {} not found; derived builds will fail", path.display());
            return Ok(PatchMap::default());
        }
        PatchMap::load(path).with_context(|| format!("Failed to load patch map {}", path.display()))
    }
}

pub fn cmd_lookup(ctx: &AppContext, id: &str, by_filename: bool) -> Result<()> {
    let catalog = ctx.load_catalog()?;
    let entry = if by_filename {
        catalog.lookup_by_filename(id)?
    } else {
        catalog.lookup_by_id(id)?
    };

    println!("{}", serde_json::to_string_pretty(entry)?);
    match SourcePlan::for_entry(entry, &catalog) {
        Ok(plan) => println!("Strategy: {}", plan.category()),
        Err(e) => println!("Strategy: unavailable ({e})"),
    }
    Ok(())
}

pub async fn cmd_verify(ctx: &AppContext, file: &Path, id: &str) -> Result<()> {
    let catalog = ctx.load_catalog()?;
    let entry = catalog.lookup_by_id(id)?;
    verify::verify_file(file, &entry.digests).await?;
    println!("{}: OK ({})", file.display(), entry.output_filename);
    Ok(())
}

pub fn cmd_maps(ctx: &AppContext, variant: Option<&str>) -> Result<()> {
    let map = ctx.load_patch_map()?;
    match variant {
        None => {
            for variant in &map.variants {
                println!("{} ({} bases)", variant.name, variant.nodes.len());
            }
        }
        Some(name) => {
            let variant = map
                .variant(name)
                .ok_or_else(|| Error::NotFound(format!("patch map variant '{name}'")))?;
            for node in &variant.nodes {
                println!(
                    "IOS{} v{}: {} patches, {} modules",
                    node.base_identity,
                    node.base_version,
                    node.content_patches.len(),
                    node.module_insertions.len()
                );
            }
        }
    }
    Ok(())
}

/// Stand-in distribution client when no mirror is configured
struct UnconfiguredMirror;

#[async_trait]
impl DistributionClient for UnconfiguredMirror {
    async fn fetch_package(&self, title_id: &str, _version: Option<u16>) -> wadsmith::Result<Vec<u8>> {
        Err(Error::SourceUnavailable(format!(
            "no distribution mirror configured (sources.mirror_url) for title {title_id}"
        )))
    }

    fn name(&self) -> &str {
        "unconfigured"
    }
}

/// Returns whether every id succeeded
pub async fn cmd_fetch(
    ctx: &AppContext,
    ids: &[String],
    max_concurrent: Option<usize>,
    retry: u32,
    json: bool,
) -> Result<bool> {
    let config = &ctx.config;
    let catalog = Arc::new(ctx.load_catalog()?);
    let patch_map = Arc::new(ctx.load_patch_map()?);
    let timeout = config.timeout()?;

    let distribution: Arc<dyn DistributionClient> = match &config.sources.mirror_url {
        Some(url) => Arc::new(HttpMirrorClient::with_options(url, timeout, config.sources.max_retries)?),
        None => Arc::new(UnconfiguredMirror),
    };
    let repository = Arc::new(HttpRepositoryClient::with_options(
        &config.sources.repository_url,
        timeout,
        config.sources.max_retries,
    )?);
    let sources = Arc::new(Sources::new(
        distribution,
        repository,
        patch_map,
        &config.paths.modules_dir,
    ));
    let cache = Arc::new(LocalObjectCache::new(&config.cache.root));

    let resolver = Resolver::new(catalog, sources, cache, config.staging_dir())
        .with_url_ttl(config.url_ttl()?);
    let orchestrator = BatchOrchestrator::new(
        Arc::new(resolver),
        max_concurrent.unwrap_or(config.batch.max_concurrent),
    );

    let progress: Box<dyn ProgressTracker> = if json {
        Box::new(SilentProgress::new())
    } else if std::io::stderr().is_terminal() {
        Box::new(CliProgress::new("fetch"))
    } else {
        Box::new(LogProgress::new("fetch"))
    };

    let mut summary = orchestrator.resolve_all(ids, progress.as_ref()).await;
    for attempt in 1..=retry {
        if summary.all_succeeded() {
            break;
        }
        info!("Retry {}/{}", attempt, retry);
        summary = orchestrator.retry_failed(summary, progress.as_ref()).await;
    }

    print_summary(&summary, json)?;
    Ok(summary.all_succeeded())
}

fn print_summary(summary: &DownloadSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    for result in &summary.results {
        match (&result.retrieval_url, &result.error) {
            (Some(url), _) => {
                let origin = if result.cached { "cached" } else { "downloaded" };
                println!("{} [{}] {}", result.output_filename, origin, url);
            }
            (None, Some(error)) => println!("{} [failed] {}", result.id, error),
            (None, None) => println!("{} [failed]", result.id),
        }
    }
    println!("{}", summary.summary_line());
    Ok(())
}
