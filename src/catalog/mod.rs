// src/catalog/mod.rs

//! Catalog of downloadable and buildable title packages
//!
//! The catalog document has the shape produced by the database converter:
//!
//! ```json
//! { "meta": { "DBversion": "...", "source": "..." },
//!   "entries": { "<id>": { "wadname": "...", "code1": "...", ... } } }
//! ```
//!
//! Entries keep document order. When two entries share an output filename
//! the first one wins filename lookups and the collision is recorded.

mod entry;

pub use entry::{normalize_filename, parse_number, Category, CatalogEntry, PACKAGE_SUFFIX};

use crate::error::{Error, Result};
use entry::RawEntry;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Catalog document metadata
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogMeta {
    #[serde(default, alias = "DBversion")]
    pub version: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub converted: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    meta: CatalogMeta,
    entries: serde_json::Map<String, serde_json::Value>,
}

/// Read-only lookup table of catalog entries
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    meta: CatalogMeta,
    entries: Vec<CatalogEntry>,
    by_id: HashMap<String, usize>,
    by_filename: HashMap<String, usize>,
    duplicates: Vec<(String, Vec<String>)>,
}

impl Catalog {
    /// Load a catalog document from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("Failed to read catalog {}", path.display()), e))?;
        let catalog = Self::from_json_str(&text)?;
        debug!("Loaded {} catalog entries from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Parse a catalog document
    pub fn from_json_str(text: &str) -> Result<Self> {
        let document: CatalogDocument = serde_json::from_str(text)
            .map_err(|e| Error::ParseError(format!("Invalid catalog document: {e}")))?;

        let mut entries = Vec::with_capacity(document.entries.len());
        for (id, value) in document.entries {
            let raw: RawEntry = serde_json::from_value(value).map_err(|e| Error::MalformedEntry {
                id: id.clone(),
                reason: e.to_string(),
            })?;
            entries.push(CatalogEntry::from_raw(&id, raw));
        }

        let mut catalog = Self::from_entries(entries);
        catalog.meta = document.meta;
        Ok(catalog)
    }

    /// Build a catalog from already constructed entries
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        let mut by_id = HashMap::with_capacity(entries.len());
        let mut by_filename: HashMap<String, usize> = HashMap::with_capacity(entries.len());
        let mut collisions: Vec<(String, Vec<String>)> = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            by_id.entry(entry.id.clone()).or_insert(index);

            match by_filename.get(&entry.output_filename) {
                Some(&first) => {
                    warn!(
                        "Output filename {} is shared by '{}' and '{}'; using '{}'",
                        entry.output_filename, entries[first].id, entry.id, entries[first].id
                    );
                    match collisions.iter_mut().find(|(name, _)| *name == entry.output_filename) {
                        Some((_, ids)) => ids.push(entry.id.clone()),
                        None => collisions.push((
                            entry.output_filename.clone(),
                            vec![entries[first].id.clone(), entry.id.clone()],
                        )),
                    }
                }
                None => {
                    by_filename.insert(entry.output_filename.clone(), index);
                }
            }
        }

        Self {
            meta: CatalogMeta::default(),
            entries,
            by_id,
            by_filename,
            duplicates: collisions,
        }
    }

    pub fn meta(&self) -> &CatalogMeta {
        &self.meta
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.by_id.get(id).map(|&i| &self.entries[i])
    }

    /// Find an entry by its catalog id
    pub fn lookup_by_id(&self, id: &str) -> Result<&CatalogEntry> {
        self.get(id)
            .ok_or_else(|| Error::NotFound(format!("catalog entry '{id}'")))
    }

    /// Find an entry by output filename; the suffix is optional
    pub fn lookup_by_filename(&self, filename: &str) -> Result<&CatalogEntry> {
        let filename = normalize_filename(filename);
        self.by_filename
            .get(&filename)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| Error::NotFound(format!("catalog entry with filename '{filename}'")))
    }

    /// Output filenames that more than one entry declares, with every id
    pub fn duplicate_filenames(&self) -> &[(String, Vec<String>)] {
        &self.duplicates
    }
}
