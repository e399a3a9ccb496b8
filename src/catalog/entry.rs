// src/catalog/entry.rs

//! Catalog entry descriptors
//!
//! Entries are read from the converted distribution database, whose scalar
//! fields are sometimes strings and sometimes numbers, and whose keys use
//! the legacy short names (`wadname`, `code1`, `md5base`, ...). Both the
//! legacy keys and descriptive names are accepted.

use crate::verify::ExpectedDigests;
use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{Display, EnumString};

/// Suffix every output filename carries
pub const PACKAGE_SUFFIX: &str = ".wad";

/// Source-strategy tag of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Versioned title from the distribution network
    #[strum(to_string = "direct", serialize = "ios")]
    Direct,
    /// Archive from the community repository
    #[strum(to_string = "repository", serialize = "osc")]
    Repository,
    /// Map-driven build on top of a base title
    #[strum(to_string = "derived-build", serialize = "cios", serialize = "d2x")]
    DerivedBuild,
    /// Firmware patch applied to a base title
    #[strum(to_string = "derived-patch", serialize = "patchios")]
    DerivedPatch,
}

/// Append the package suffix unless the name already carries it
pub fn normalize_filename(name: &str) -> String {
    let name = name.trim();
    if name.to_ascii_lowercase().ends_with(PACKAGE_SUFFIX) {
        name.to_string()
    } else {
        format!("{name}{PACKAGE_SUFFIX}")
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal number
pub fn parse_number(value: &str) -> Option<u64> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Immutable descriptor for one catalog artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: Option<String>,
    /// Always ends with [`PACKAGE_SUFFIX`]
    pub output_filename: String,
    pub category: Option<Category>,
    /// Category string as written in the catalog
    pub category_label: Option<String>,
    pub source_code1: Option<String>,
    pub source_code2: Option<String>,
    /// Replacement second half of the title id (patched firmware slots)
    pub source_code2_new: Option<String>,
    pub version: Option<String>,
    pub digests: ExpectedDigests,
    pub base_output_filename: Option<String>,
    pub base_digests: ExpectedDigests,
    pub variant_slot: Option<String>,
    pub variant_version: Option<String>,
    /// Explicit patch map variant; otherwise derived from the filename
    pub variant: Option<String>,
    /// Firmware patches for derived-patch entries
    pub patches: Option<Vec<String>>,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, output_filename: &str, category: Option<Category>) -> Self {
        Self {
            id: id.into(),
            name: None,
            output_filename: normalize_filename(output_filename),
            category,
            category_label: category.map(|c| c.to_string()),
            source_code1: None,
            source_code2: None,
            source_code2_new: None,
            version: None,
            digests: ExpectedDigests::default(),
            base_output_filename: None,
            base_digests: ExpectedDigests::default(),
            variant_slot: None,
            variant_version: None,
            variant: None,
            patches: None,
        }
    }

    pub fn with_source_codes(mut self, code1: &str, code2: &str) -> Self {
        self.source_code1 = Some(code1.to_string());
        self.source_code2 = Some(code2.to_string());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn with_digests(mut self, primary: Option<String>, alternate: Option<String>) -> Self {
        self.digests = ExpectedDigests::new(primary, alternate);
        self
    }

    pub fn with_base(mut self, filename: &str, digests: ExpectedDigests) -> Self {
        self.base_output_filename = Some(normalize_filename(filename));
        self.base_digests = digests;
        self
    }

    pub fn with_variant(mut self, slot: u32, version: u32) -> Self {
        self.variant_slot = Some(slot.to_string());
        self.variant_version = Some(version.to_string());
        self
    }

    pub fn with_patches(mut self, patches: &[&str]) -> Self {
        self.patches = Some(patches.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Build an entry from its catalog document record
    pub(crate) fn from_raw(id: &str, raw: RawEntry) -> Self {
        let category_label = raw.category.clone();
        let category = match raw.category.as_deref() {
            Some(label) => label.parse().ok(),
            None => infer_category(id, &raw),
        };

        let output_filename = raw
            .output_filename
            .as_deref()
            .map(normalize_filename)
            .unwrap_or_else(|| normalize_filename(id));

        Self {
            id: id.to_string(),
            name: raw.name,
            output_filename,
            category,
            category_label,
            source_code1: raw.source_code1,
            source_code2: raw.source_code2,
            source_code2_new: raw.source_code2_new,
            version: raw.version,
            digests: ExpectedDigests::new(raw.expected_digest, raw.expected_digest_alt),
            base_output_filename: raw.base_output_filename.as_deref().map(normalize_filename),
            base_digests: ExpectedDigests::new(raw.base_expected_digest, raw.base_expected_digest_alt),
            variant_slot: raw.variant_slot,
            variant_version: raw.variant_version,
            variant: raw.variant,
            patches: raw.patches,
        }
    }

    /// Composite 16-digit title id built from both source codes
    pub fn title_id(&self) -> Option<String> {
        let code1 = self.source_code1.as_deref()?;
        let code2 = self.source_code2.as_deref()?;
        Some(format!("{:0>8}{:0>8}", code1.trim(), code2.trim()).to_lowercase())
    }

    /// Patch map variant this entry builds
    ///
    /// `cIOS249[56]-d2x-v11.wad` builds `d2x-v11`.
    pub fn variant_name(&self) -> String {
        if let Some(variant) = &self.variant {
            return variant.clone();
        }
        let stem = self
            .output_filename
            .get(..self.output_filename.len() - PACKAGE_SUFFIX.len())
            .unwrap_or(&self.output_filename);
        match stem.split_once("]-") {
            Some((_, rest)) => rest.to_string(),
            None => stem.to_string(),
        }
    }

    /// Whether this entry may legitimately skip verification
    pub fn is_unverifiable(&self) -> bool {
        self.category == Some(Category::Repository) && self.digests.is_empty()
    }
}

/// Entries without a category tag are derived builds when they carry slot
/// information or a cIOS-style name, matching the catalog converter.
fn infer_category(id: &str, raw: &RawEntry) -> Option<Category> {
    let id = id.to_lowercase();
    let name = raw.name.as_deref().unwrap_or_default().to_lowercase();
    let cios_named = ["d2x", "cios"]
        .iter()
        .any(|needle| id.contains(needle) || name.contains(needle));
    if cios_named || raw.variant_slot.is_some() || raw.variant_version.is_some() {
        Some(Category::DerivedBuild)
    } else {
        None
    }
}

/// Entry record as written in the catalog document
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawEntry {
    #[serde(default, deserialize_with = "scalar")]
    pub name: Option<String>,
    #[serde(default, alias = "wadname", deserialize_with = "scalar")]
    pub output_filename: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub category: Option<String>,
    #[serde(default, alias = "code1", deserialize_with = "scalar")]
    pub source_code1: Option<String>,
    #[serde(default, alias = "code2", deserialize_with = "scalar")]
    pub source_code2: Option<String>,
    #[serde(default, alias = "code2new", deserialize_with = "scalar")]
    pub source_code2_new: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub version: Option<String>,
    #[serde(default, alias = "md5", deserialize_with = "scalar")]
    pub expected_digest: Option<String>,
    #[serde(default, alias = "md5alt", deserialize_with = "scalar")]
    pub expected_digest_alt: Option<String>,
    #[serde(default, alias = "basewad", deserialize_with = "scalar")]
    pub base_output_filename: Option<String>,
    #[serde(default, alias = "md5base", deserialize_with = "scalar")]
    pub base_expected_digest: Option<String>,
    #[serde(default, alias = "md5basealt", deserialize_with = "scalar")]
    pub base_expected_digest_alt: Option<String>,
    #[serde(default, alias = "ciosslot", deserialize_with = "scalar")]
    pub variant_slot: Option<String>,
    #[serde(default, alias = "ciosversion", deserialize_with = "scalar")]
    pub variant_version: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub variant: Option<String>,
    #[serde(default)]
    pub patches: Option<Vec<String>>,
}

/// Accept a string, number or bool; empty strings and null are absent
fn scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;
    use serde_json::Value;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!("expected a scalar value, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawEntry {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("ios".parse::<Category>().unwrap(), Category::Direct);
        assert_eq!("OSC".parse::<Category>().unwrap(), Category::Repository);
        assert_eq!("d2x".parse::<Category>().unwrap(), Category::DerivedBuild);
        assert_eq!("cios".parse::<Category>().unwrap(), Category::DerivedBuild);
        assert_eq!("patchios".parse::<Category>().unwrap(), Category::DerivedPatch);
        assert_eq!("derived-build".parse::<Category>().unwrap(), Category::DerivedBuild);
        assert!("mios".parse::<Category>().is_err());
        assert_eq!(Category::DerivedPatch.to_string(), "derived-patch");
    }

    #[test]
    fn test_normalize_filename() {
        assert_eq!(normalize_filename("IOS56-64-v5661"), "IOS56-64-v5661.wad");
        assert_eq!(normalize_filename("IOS56-64-v5661.wad"), "IOS56-64-v5661.wad");
        assert_eq!(normalize_filename("Loader.WAD"), "Loader.WAD");
    }

    #[test]
    fn test_legacy_record() {
        let entry = CatalogEntry::from_raw(
            "cIOS249[56]-d2x-v11",
            raw(r#"{
                "name": "cIOS249[56]-d2x-v11",
                "wadname": "cIOS249[56]-d2x-v11",
                "md5": "5eb63bbbe01eeed093cb22bb8f5acdc3",
                "md5alt": "",
                "code1": "00000001",
                "code2": "00000038",
                "version": 5661,
                "basewad": "IOS56-64-v5661",
                "md5base": "d41d8cd98f00b204e9800998ecf8427e",
                "ciosslot": 249,
                "ciosversion": 65535
            }"#),
        );

        assert_eq!(entry.output_filename, "cIOS249[56]-d2x-v11.wad");
        assert_eq!(entry.category, Some(Category::DerivedBuild));
        assert_eq!(entry.title_id().as_deref(), Some("0000000100000038"));
        assert_eq!(entry.version.as_deref(), Some("5661"));
        assert_eq!(entry.digests.alternate, None);
        assert_eq!(entry.base_output_filename.as_deref(), Some("IOS56-64-v5661.wad"));
        assert_eq!(entry.variant_slot.as_deref(), Some("249"));
        assert_eq!(entry.variant_name(), "d2x-v11");
    }

    #[test]
    fn test_uncategorized_entry_stays_unsupported() {
        let entry = CatalogEntry::from_raw("Mystery", raw(r#"{"wadname": "Mystery"}"#));
        assert_eq!(entry.category, None);
        assert_eq!(entry.category_label, None);

        let entry = CatalogEntry::from_raw("Odd", raw(r#"{"wadname": "Odd", "category": "mios"}"#));
        assert_eq!(entry.category, None);
        assert_eq!(entry.category_label.as_deref(), Some("mios"));
    }

    #[test]
    fn test_title_id_padding() {
        let entry = CatalogEntry::new("IOS36", "IOS36-64-v3351", Some(Category::Direct))
            .with_source_codes("1", "24");
        assert_eq!(entry.title_id().as_deref(), Some("0000000100000024"));
    }

    #[test]
    fn test_variant_name_fallback() {
        let entry = CatalogEntry::new("x", "d2x-v10", Some(Category::DerivedBuild));
        assert_eq!(entry.variant_name(), "d2x-v10");

        let mut entry = CatalogEntry::new("x", "cIOS250[57]-v21", Some(Category::DerivedBuild));
        assert_eq!(entry.variant_name(), "v21");
        entry.variant = Some("waninkoko-v21".into());
        assert_eq!(entry.variant_name(), "waninkoko-v21");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("249"), Some(249));
        assert_eq!(parse_number("0xEC"), Some(236));
        assert_eq!(parse_number("v2"), None);
    }
}
