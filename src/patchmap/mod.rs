// src/patchmap/mod.rs

//! Declarative patch map for derived builds
//!
//! A patch map lists, per variant name, the base titles a variant can be
//! built from. Each node names the base identity and version it requires,
//! the byte patches to apply to existing contents, and the modules to
//! insert. The map is loaded once and is read-only afterwards.

mod parser;

use crate::error::{Error, Result};
use std::path::Path;
use tracing::debug;

/// Byte-level patch of one content record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPatch {
    pub content_id: u32,
    pub offset: usize,
    /// Must occur in the unpatched content before the write
    pub original: Vec<u8>,
    pub replacement: Vec<u8>,
}

/// Where an inserted module lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertTarget {
    /// Add as a new content record
    Append,
    /// Take over this content index; the displaced content is re-appended
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInsertion {
    /// Module name; the file is `<name>.app` in the modules directory
    pub module: String,
    pub target: InsertTarget,
    pub content_id: u32,
}

/// Build recipe for one variant on one base title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchNode {
    pub base_identity: u8,
    pub base_version: u16,
    pub content_patches: Vec<ContentPatch>,
    pub module_insertions: Vec<ModuleInsertion>,
}

impl PatchNode {
    /// Patches grouped by content id, groups in first-appearance order
    pub fn patches_by_content(&self) -> Vec<(u32, Vec<&ContentPatch>)> {
        let mut groups: Vec<(u32, Vec<&ContentPatch>)> = Vec::new();
        for patch in &self.content_patches {
            match groups.iter_mut().find(|(cid, _)| *cid == patch.content_id) {
                Some((_, group)) => group.push(patch),
                None => groups.push((patch.content_id, vec![patch])),
            }
        }
        groups
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub name: String,
    pub nodes: Vec<PatchNode>,
}

/// All variants of a patch map document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchMap {
    pub version: Option<String>,
    pub variants: Vec<Variant>,
}

impl PatchMap {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("Failed to read patch map {}", path.display()), e))?;
        let map = Self::parse(&text)?;
        debug!(
            "Loaded patch map {} ({} variants)",
            path.display(),
            map.variants.len()
        );
        Ok(map)
    }

    /// Parse a patch map XML document
    pub fn parse(xml: &str) -> Result<Self> {
        parser::parse_document(xml)
    }

    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn variant_names(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().map(|v| v.name.as_str())
    }

    /// Find the single node of `variant` built on the given base
    pub fn find_node(&self, variant: &str, identity: u8, version: u16) -> Result<&PatchNode> {
        let entry = self
            .variant(variant)
            .ok_or_else(|| Error::NotFound(format!("patch map variant '{variant}'")))?;

        let matches: Vec<&PatchNode> = entry
            .nodes
            .iter()
            .filter(|n| n.base_identity == identity && n.base_version == version)
            .collect();

        match matches.as_slice() {
            [node] => Ok(node),
            [] => Err(Error::BaseMismatch {
                variant: variant.to_string(),
                expected: describe_bases(&entry.nodes),
                actual: format!("IOS{identity} v{version}"),
            }),
            many => Err(Error::AmbiguousBase {
                variant: variant.to_string(),
                identity,
                version,
                count: many.len(),
            }),
        }
    }
}

fn describe_bases(nodes: &[PatchNode]) -> String {
    if nodes.is_empty() {
        return "no bases".to_string();
    }
    nodes
        .iter()
        .map(|n| format!("IOS{} v{}", n.base_identity, n.base_version))
        .collect::<Vec<_>>()
        .join(" or ")
}
