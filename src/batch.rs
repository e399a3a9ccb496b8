// src/batch.rs

//! Batch resolution with bounded concurrency
//!
//! Ids are split into windows of `max_concurrent`. The ids of one window
//! resolve concurrently; the next window starts only after every result of
//! the previous one is in. A failing id never affects its siblings.

use crate::progress::ProgressTracker;
use crate::resolver::{DownloadResult, Resolver};
use futures::future::join_all;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;
use tracing::{info, warn};

/// Window size when none is configured
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Results of a batch, in request order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub total_requested: usize,
    pub results: Vec<DownloadResult>,
}

impl DownloadSummary {
    /// Successes that were produced by this batch
    pub fn downloaded_count(&self) -> usize {
        self.results.iter().filter(|r| r.success && !r.cached).count()
    }

    /// Successes served from the cache
    pub fn cached_count(&self) -> usize {
        self.results.iter().filter(|r| r.success && r.cached).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DownloadResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// Ids to hand back to [`BatchOrchestrator::resolve_all`] for a retry
    pub fn failed_ids(&self) -> Vec<String> {
        self.failures().map(|r| r.id.clone()).collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count() == 0
    }

    /// One-line summary used in logs and progress output
    pub fn summary_line(&self) -> String {
        format!(
            "{} downloaded, {} cached, {} failed",
            self.downloaded_count(),
            self.cached_count(),
            self.failed_count()
        )
    }

    fn log(&self) {
        info!("Download summary: {}", self.summary_line());
        if self.failed_count() > 0 {
            warn!("Failed downloads: {}", self.failed_ids().join(", "));
        }
    }
}

impl Serialize for DownloadSummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DownloadSummary", 6)?;
        state.serialize_field("total_requested", &self.total_requested)?;
        state.serialize_field("downloaded", &self.downloaded_count())?;
        state.serialize_field("cached", &self.cached_count())?;
        state.serialize_field("failed", &self.failed_count())?;
        state.serialize_field("failed_ids", &self.failed_ids())?;
        state.serialize_field("results", &self.results)?;
        state.end()
    }
}

/// Runs the resolver over many ids in fixed windows
pub struct BatchOrchestrator {
    resolver: Arc<Resolver>,
    max_concurrent: usize,
}

impl BatchOrchestrator {
    /// A `max_concurrent` of zero is treated as one
    pub fn new(resolver: Arc<Resolver>, max_concurrent: usize) -> Self {
        Self {
            resolver,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Resolve every id, returning results in request order
    pub async fn resolve_all(&self, ids: &[String], progress: &dyn ProgressTracker) -> DownloadSummary {
        info!("Starting download of {} files...", ids.len());
        progress.set_length(ids.len() as u64);

        let summary = DownloadSummary {
            total_requested: ids.len(),
            results: self.run_windows(ids, progress).await,
        };
        summary.log();
        progress.finish_with_message(&summary.summary_line());
        summary
    }

    /// Re-resolve only the failed ids of `summary` and merge the new results
    ///
    /// A tracker finished by [`resolve_all`](Self::resolve_all) is left as it
    /// is; its length and position are never reset.
    pub async fn retry_failed(
        &self,
        mut summary: DownloadSummary,
        progress: &dyn ProgressTracker,
    ) -> DownloadSummary {
        let failed = summary.failed_ids();
        if failed.is_empty() {
            return summary;
        }
        info!("Retrying {} failed downloads", failed.len());

        let mut retried = self.run_windows(&failed, progress).await.into_iter();
        for slot in summary.results.iter_mut().filter(|r| !r.success) {
            if let Some(result) = retried.next() {
                *slot = result;
            }
        }
        summary.log();
        summary
    }

    /// Resolve `ids` window by window; only a live tracker is updated
    async fn run_windows(&self, ids: &[String], progress: &dyn ProgressTracker) -> Vec<DownloadResult> {
        let live = !progress.is_finished();
        let windows = ids.len().div_ceil(self.max_concurrent);
        let mut results = Vec::with_capacity(ids.len());
        for (index, window) in ids.chunks(self.max_concurrent).enumerate() {
            if live {
                progress.set_message(&format!("window {}/{}", index + 1, windows));
            }
            let resolved = join_all(window.iter().map(|id| async move {
                let result = self.resolver.resolve(id).await;
                if live {
                    progress.increment(1);
                }
                result
            }))
            .await;
            results.extend(resolved);
        }
        results
    }
}
