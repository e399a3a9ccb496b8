// tests/common/mod.rs

//! Shared fakes and fixtures for the resolution tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wadsmith::hash;
use wadsmith::package::memory::{MemoryCodec, MemoryTitle};
use wadsmith::source::{DistributionClient, RepositoryClient, Sources};
use wadsmith::{Catalog, CatalogEntry, Category, Error, ExpectedDigests, ObjectCache, PatchMap, Resolver, Result};

pub const IOS56: u64 = 0x0000_0001_0000_0038;
pub const IOS56_TITLE: &str = "0000000100000038";

pub const D2X_MAP: &str = r#"<ciosmaps version="1">
  <cios name="d2x-v11">
    <base ios="56" version="5661">
      <content id="0x3">
        <patch offset="0x10" originalbytes="0xAA,0xBB" newbytes="0xCC,0xDD"/>
      </content>
    </base>
  </cios>
</ciosmaps>"#;

/// Start or end of one fetch, in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    Started(String),
    Finished(String),
}

/// Distribution network serving fixed packages by title id
#[derive(Default)]
pub struct FakeDistribution {
    packages: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<FetchEvent>>,
}

impl FakeDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, title_id: &str, data: impl Into<Vec<u8>>) -> Self {
        self.packages.insert(title_id.to_string(), data.into());
        self
    }

    /// Requests for `title_id` fail with `SourceUnavailable`
    pub fn failing(mut self, title_id: &str) -> Self {
        self.failing.insert(title_id.to_string());
        self
    }

    /// Every fetch stays in flight for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most fetches ever in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<FetchEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl DistributionClient for FakeDistribution {
    async fn fetch_package(&self, title_id: &str, _version: Option<u16>) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(FetchEvent::Started(title_id.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.events
            .lock()
            .unwrap()
            .push(FetchEvent::Finished(title_id.to_string()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(title_id) {
            return Err(Error::SourceUnavailable(format!("title {title_id}: 503")));
        }
        self.packages
            .get(title_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("title {title_id}")))
    }

    fn name(&self) -> &str {
        "fake-distribution"
    }
}

/// Repository serving fixed archives by slug
#[derive(Default)]
pub struct FakeRepository {
    archives: HashMap<String, Vec<u8>>,
}

impl FakeRepository {
    pub fn with_archive(mut self, slug: &str, data: impl Into<Vec<u8>>) -> Self {
        self.archives.insert(slug.to_string(), data.into());
        self
    }
}

#[async_trait]
impl RepositoryClient for FakeRepository {
    async fn fetch_archive(&self, slug: &str) -> Result<Vec<u8>> {
        self.archives
            .get(slug)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("repository package '{slug}'")))
    }

    fn name(&self) -> &str {
        "fake-repository"
    }
}

/// In-memory object cache counting uploads
#[derive(Default)]
pub struct MemoryCache {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
}

impl MemoryCache {
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Store an object as if an earlier run had uploaded it
    pub fn insert(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(key.to_string(), data.into());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl ObjectCache for MemoryCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn upload(&self, path: &Path, key: &str, _content_type: &str) -> Result<()> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| Error::CacheFailure(format!("{}: {e}", path.display())))?;
        self.objects.lock().unwrap().insert(key.to_string(), data);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn retrieval_url(&self, key: &str, ttl: Duration) -> Result<String> {
        Ok(format!("memory://{key}?ttl={}", ttl.as_secs()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// IOS56 v5661 base title with content 3 carrying `AA BB` at 0x10
pub fn base_title() -> MemoryTitle {
    let mut content = vec![0u8; 0x20];
    content[0x10] = 0xaa;
    content[0x11] = 0xbb;
    MemoryTitle::new(IOS56, 5661)
        .with_content(0, vec![1, 2, 3, 4])
        .with_content(3, content)
}

pub fn base_bytes() -> Vec<u8> {
    base_title().to_bytes().unwrap()
}

/// Direct entry for the base title, digest taken from `base_bytes`
pub fn base_entry() -> CatalogEntry {
    CatalogEntry::new("IOS56-64-v5661", "IOS56-64-v5661", Some(Category::Direct))
        .with_source_codes("00000001", "00000038")
        .with_version(5661)
        .with_digests(Some(hash::md5(&base_bytes())), None)
}

/// Derived build of `d2x-v11` into `slot`/`version` on top of the base entry
pub fn derived_entry(id: &str, slot: u32, version: u32, digest: Option<String>) -> CatalogEntry {
    CatalogEntry::new(id, &format!("cIOS{slot}[56]-d2x-v11"), Some(Category::DerivedBuild))
        .with_base("IOS56-64-v5661", ExpectedDigests::default())
        .with_variant(slot, version)
        .with_digests(digest, None)
}

/// Direct entry served by `FakeDistribution` under `title_id`
pub fn direct_entry(id: &str, code2: &str, data: &[u8]) -> CatalogEntry {
    CatalogEntry::new(id, id, Some(Category::Direct))
        .with_source_codes("00000001", code2)
        .with_digests(Some(hash::md5(data)), None)
}

/// Everything one resolution test needs, kept alive together
pub struct Harness {
    pub distribution: Arc<FakeDistribution>,
    pub cache: Arc<MemoryCache>,
    pub resolver: Arc<Resolver>,
    pub staging: TempDir,
    pub modules: TempDir,
}

impl Harness {
    pub fn new(entries: Vec<CatalogEntry>, distribution: FakeDistribution) -> Self {
        Self::build(entries, distribution, FakeRepository::default(), true)
    }

    pub fn build(
        entries: Vec<CatalogEntry>,
        distribution: FakeDistribution,
        repository: FakeRepository,
        with_codec: bool,
    ) -> Self {
        let distribution = Arc::new(distribution);
        let cache = Arc::new(MemoryCache::default());
        let staging = tempfile::tempdir().unwrap();
        let modules = tempfile::tempdir().unwrap();

        let patch_map = Arc::new(PatchMap::parse(D2X_MAP).unwrap());
        let mut sources = Sources::new(
            distribution.clone(),
            Arc::new(repository),
            patch_map,
            modules.path(),
        );
        if with_codec {
            sources = sources.with_codec(Arc::new(MemoryCodec));
        }

        let resolver = Resolver::new(
            Arc::new(Catalog::from_entries(entries)),
            Arc::new(sources),
            cache.clone(),
            staging.path(),
        );

        Self {
            distribution,
            cache,
            resolver: Arc::new(resolver),
            staging,
            modules,
        }
    }

    /// Leftover entries in the staging root
    pub fn staging_leftovers(&self) -> usize {
        std::fs::read_dir(self.staging.path()).unwrap().count()
    }
}
