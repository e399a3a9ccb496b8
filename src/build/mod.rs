// src/build/mod.rs

//! Patch build engine
//!
//! Builds a derived title from a verified base title and a patch map node:
//!
//! 1. validate the requested slot and version
//! 2. locate the map node for the base's identity and version
//! 3. check every content patch against the unpatched contents
//! 4. read every inserted module from the modules directory
//! 5. apply patches and insertions, assign the new identity
//! 6. re-key, fake-sign and write the serialized title
//!
//! Steps 1 to 4 touch nothing, so a failing build leaves both the base title
//! and the output path alone. The output file only appears once the whole
//! title has been serialized.

pub mod firmware;

use crate::error::{Error, PatchMismatch, Result};
use crate::package::{title_id_hex, title_identity, with_identity, ContentType, TitleCodec, TitlePackage};
use crate::patchmap::{InsertTarget, PatchMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub use firmware::{FirmwarePatch, FirmwareReport, FirmwareRequest};

/// Lowest slot a derived title may occupy
pub const MIN_SLOT: u64 = 3;
/// Highest slot a derived title may occupy
pub const MAX_SLOT: u64 = 255;
/// Common key the rebuilt title key is encrypted with
pub const COMMON_KEY_INDEX: u8 = 0;

/// What to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Patch map variant name
    pub variant: String,
    pub slot: u64,
    pub version: u64,
}

/// Outcome of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub variant: String,
    pub base_identity: u8,
    pub base_version: u16,
    /// Title id of the built title, 16 hex digits
    pub title_id: String,
    pub version: u16,
    pub patches_applied: usize,
    pub modules_inserted: Vec<String>,
}

/// Map-driven builder for derived titles
pub struct PatchBuilder<'a> {
    map: &'a PatchMap,
    modules_dir: PathBuf,
}

impl<'a> PatchBuilder<'a> {
    pub fn new(map: &'a PatchMap, modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            map,
            modules_dir: modules_dir.into(),
        }
    }

    /// Build the derived title in place
    ///
    /// On error the title has not been modified.
    pub fn build(&self, title: &mut dyn TitlePackage, request: &BuildRequest) -> Result<BuildReport> {
        let slot = validate_slot(request.slot)?;
        let version = validate_version(request.version)?;

        let base_identity = title_identity(title.title_id());
        let base_version = title.title_version();
        let node = self
            .map
            .find_node(&request.variant, base_identity, base_version)?;

        info!(
            "Building '{}' from base IOS{} v{}",
            request.variant, base_identity, base_version
        );

        // Patched copies of each content, checked against the unpatched bytes
        let mut mismatches = Vec::new();
        let mut patched: Vec<(usize, Vec<u8>, ContentType)> = Vec::new();
        for (content_id, patches) in node.patches_by_content() {
            let Some(index) = title.index_of(content_id) else {
                mismatches.extend(patches.iter().map(|p| PatchMismatch {
                    content_id,
                    offset: p.offset,
                    expected: p.original.clone(),
                }));
                continue;
            };
            let content_type = title
                .record(index)
                .map(|r| r.content_type)
                .unwrap_or_default();
            let original = title.content_by_index(index)?;
            let mut working = original.clone();

            // An offset outside the content counts as a mismatch
            for patch in patches {
                let applied = contains(&original, &patch.original)
                    && write_at(&mut working, patch.offset, &patch.replacement);
                if !applied {
                    mismatches.push(PatchMismatch {
                        content_id,
                        offset: patch.offset,
                        expected: patch.original.clone(),
                    });
                }
            }
            patched.push((index, working, content_type));
        }
        if !mismatches.is_empty() {
            return Err(Error::PatchVerificationFailed { mismatches });
        }

        let mut modules = Vec::with_capacity(node.module_insertions.len());
        for insertion in &node.module_insertions {
            if let InsertTarget::Index(index) = insertion.target
                && title.record(index).is_none()
            {
                return Err(Error::Package(format!(
                    "Module '{}' targets content index {} but the title has {} contents",
                    insertion.module,
                    index,
                    title.content_records().len()
                )));
            }
            modules.push((insertion, self.read_module(&insertion.module)?));
        }

        for (index, data, content_type) in patched {
            title.set_content(index, data, None, content_type)?;
        }

        let mut modules_inserted = Vec::with_capacity(modules.len());
        for (insertion, data) in modules {
            match insertion.target {
                InsertTarget::Append => {
                    title.add_content(data, insertion.content_id, ContentType::Normal)?;
                }
                InsertTarget::Index(index) => {
                    let displaced = title.record(index).ok_or_else(|| {
                        Error::Package(format!("Content index {index} disappeared during build"))
                    })?;
                    let displaced_data = title.content_by_index(index)?;
                    title.set_content(index, data, Some(insertion.content_id), ContentType::Normal)?;
                    title.add_content(displaced_data, displaced.content_id, displaced.content_type)?;
                    debug!(
                        "Relocated content {:08x} to make room for '{}'",
                        displaced.content_id, insertion.module
                    );
                }
            }
            modules_inserted.push(insertion.module.clone());
        }

        assign_identity(title, Some(slot), Some(version))?;
        finalize(title)?;

        Ok(BuildReport {
            variant: request.variant.clone(),
            base_identity,
            base_version,
            title_id: title_id_hex(title.title_id()),
            version,
            patches_applied: node.content_patches.len(),
            modules_inserted,
        })
    }

    /// Build from a base package file into `output`
    pub fn build_file(
        &self,
        codec: &dyn TitleCodec,
        base: &Path,
        output: &Path,
        request: &BuildRequest,
    ) -> Result<BuildReport> {
        let data = std::fs::read(base)
            .map_err(|e| Error::io(format!("Failed to read base {}", base.display()), e))?;
        let mut title = codec.parse(&data)?;
        let report = self.build(title.as_mut(), request)?;
        write_output(output, &title.dump()?)?;
        info!(
            "Built '{}' as title {} v{} ({} patches, {} modules)",
            report.variant,
            report.title_id,
            report.version,
            report.patches_applied,
            report.modules_inserted.len()
        );
        Ok(report)
    }

    fn read_module(&self, module: &str) -> Result<Vec<u8>> {
        let path = self.modules_dir.join(format!("{module}.app"));
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::MissingModule {
                module: module.to_string(),
                path: path.display().to_string(),
            }),
            Err(e) => Err(Error::io(format!("Failed to read module {}", path.display()), e)),
        }
    }
}

pub fn validate_slot(slot: u64) -> Result<u8> {
    if !(MIN_SLOT..=MAX_SLOT).contains(&slot) {
        return Err(Error::InvalidSlotOrVersion(format!(
            "slot {slot} is outside {MIN_SLOT}..={MAX_SLOT}"
        )));
    }
    u8::try_from(slot).map_err(|_| Error::InvalidSlotOrVersion(format!("slot {slot}")))
}

pub fn validate_version(version: u64) -> Result<u16> {
    u16::try_from(version).map_err(|_| {
        Error::InvalidSlotOrVersion(format!("version {version} exceeds {}", u16::MAX))
    })
}

/// Set the identity byte and version of a title
pub(crate) fn assign_identity(
    title: &mut dyn TitlePackage,
    slot: Option<u8>,
    version: Option<u16>,
) -> Result<()> {
    if let Some(slot) = slot {
        title.set_title_id(with_identity(title.title_id(), slot))?;
    }
    if let Some(version) = version {
        title.set_title_version(version)?;
    }
    debug!(
        "Title identity is now {} v{}",
        title_id_hex(title.title_id()),
        title.title_version()
    );
    Ok(())
}

/// Re-key and fake-sign after the contents or identity changed
pub(crate) fn finalize(title: &mut dyn TitlePackage) -> Result<()> {
    title.rekey(COMMON_KEY_INDEX)?;
    title.fakesign()
}

/// Write `data` to `output` through a temporary file in the same directory
pub(crate) fn write_output(output: &Path, data: &[u8]) -> Result<()> {
    let dir = output.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::io(format!("Failed to create temp file in {}", dir.display()), e))?;
    temp.write_all(data)
        .map_err(|e| Error::io(format!("Failed to write {}", output.display()), e))?;
    temp.persist(output)
        .map_err(|e| Error::io(format!("Failed to persist {}", output.display()), e.error))?;
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Overwrite at `offset`, growing the content when the write runs past its end
///
/// Returns false without writing when `offset` lies beyond the end of `data`.
fn write_at(data: &mut Vec<u8>, offset: usize, bytes: &[u8]) -> bool {
    if offset > data.len() {
        return false;
    }
    let Some(end) = offset.checked_add(bytes.len()) else {
        return false;
    };
    if data.len() < end {
        data.resize(end, 0);
    }
    data[offset..end].copy_from_slice(bytes);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::memory::MemoryTitle;
    use crate::patchmap::{ContentPatch, ModuleInsertion, PatchNode, Variant};

    const IOS56: u64 = 0x0000_0001_0000_0038;

    fn content_3() -> Vec<u8> {
        let mut data = vec![0u8; 0x20];
        data[0x10] = 0xaa;
        data[0x11] = 0xbb;
        data
    }

    fn base() -> MemoryTitle {
        MemoryTitle::new(IOS56, 5661)
            .with_content(0, vec![1, 2, 3])
            .with_content(3, content_3())
    }

    fn map_with(patches: Vec<ContentPatch>, modules: Vec<ModuleInsertion>) -> PatchMap {
        PatchMap {
            version: None,
            variants: vec![Variant {
                name: "d2x-v11".into(),
                nodes: vec![PatchNode {
                    base_identity: 56,
                    base_version: 5661,
                    content_patches: patches,
                    module_insertions: modules,
                }],
            }],
        }
    }

    fn patch(content_id: u32, offset: usize, original: &[u8], replacement: &[u8]) -> ContentPatch {
        ContentPatch {
            content_id,
            offset,
            original: original.to_vec(),
            replacement: replacement.to_vec(),
        }
    }

    fn request(slot: u64, version: u64) -> BuildRequest {
        BuildRequest {
            variant: "d2x-v11".into(),
            slot,
            version,
        }
    }

    #[test]
    fn test_build_applies_patch_and_identity() {
        let map = map_with(vec![patch(3, 0x10, &[0xaa, 0xbb], &[0xcc, 0xdd])], vec![]);
        let dir = tempfile::tempdir().unwrap();
        let builder = PatchBuilder::new(&map, dir.path());

        let mut title = base();
        let report = builder.build(&mut title, &request(250, 10)).unwrap();

        let content = title.content_by_id(3).unwrap();
        assert_eq!(&content[0x10..0x12], &[0xcc, 0xdd]);
        assert_eq!(title.title_id & 0xff, 0xfa);
        assert_eq!(title.title_version, 10);
        assert!(title.fakesigned);
        assert_eq!(report.title_id, "00000001000000fa");
        assert_eq!(report.patches_applied, 1);
    }

    #[test]
    fn test_invalid_slot_rejected_before_mutation() {
        let map = map_with(vec![patch(3, 0x10, &[0xaa, 0xbb], &[0xcc, 0xdd])], vec![]);
        let builder = PatchBuilder::new(&map, "/nonexistent");
        let mut title = base();

        let err = builder.build(&mut title, &request(2, 10)).unwrap_err();
        assert!(matches!(err, Error::InvalidSlotOrVersion(_)));
        assert_eq!(title, base());

        let err = builder.build(&mut title, &request(250, 70_000)).unwrap_err();
        assert!(matches!(err, Error::InvalidSlotOrVersion(_)));
    }

    #[test]
    fn test_patch_checks_unpatched_content() {
        // The second patch's original bytes only exist before the first patch
        let map = map_with(
            vec![
                patch(3, 0x10, &[0xaa, 0xbb], &[0x11, 0x22]),
                patch(3, 0x18, &[0xaa, 0xbb], &[0x33, 0x44]),
            ],
            vec![],
        );
        let builder = PatchBuilder::new(&map, "/nonexistent");
        let mut title = base();
        builder.build(&mut title, &request(249, 1)).unwrap();

        let content = title.content_by_id(3).unwrap();
        assert_eq!(&content[0x10..0x12], &[0x11, 0x22]);
        assert_eq!(&content[0x18..0x1a], &[0x33, 0x44]);
    }

    #[test]
    fn test_all_mismatches_reported() {
        let map = map_with(
            vec![
                patch(3, 0x10, &[0xde, 0xad], &[0, 0]),
                patch(0, 0x00, &[1, 2], &[9, 9]),
                patch(7, 0x04, &[5], &[6]),
            ],
            vec![],
        );
        let builder = PatchBuilder::new(&map, "/nonexistent");
        let mut title = base();

        match builder.build(&mut title, &request(249, 1)).unwrap_err() {
            Error::PatchVerificationFailed { mismatches } => {
                let ids: Vec<u32> = mismatches.iter().map(|m| m.content_id).collect();
                assert_eq!(ids, vec![3, 7]);
                assert_eq!(mismatches[0].offset, 0x10);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(title, base());
    }

    #[test]
    fn test_base_mismatch_leaves_title_untouched() {
        let map = map_with(vec![], vec![]);
        let builder = PatchBuilder::new(&map, "/nonexistent");
        let mut title = MemoryTitle::new(IOS56, 5405).with_content(3, content_3());
        let before = title.clone();

        let err = builder.build(&mut title, &request(249, 1)).unwrap_err();
        assert!(matches!(err, Error::BaseMismatch { .. }));
        assert_eq!(title, before);
    }

    #[test]
    fn test_module_insertion_relocates_displaced_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mload.app"), b"MLOAD").unwrap();
        std::fs::write(dir.path().join("FAT.app"), b"FAT").unwrap();

        let map = map_with(
            vec![],
            vec![
                ModuleInsertion {
                    module: "mload".into(),
                    target: InsertTarget::Append,
                    content_id: 0x10,
                },
                ModuleInsertion {
                    module: "FAT".into(),
                    target: InsertTarget::Index(0),
                    content_id: 0x11,
                },
            ],
        );
        let builder = PatchBuilder::new(&map, dir.path());
        let mut title = base();
        let report = builder.build(&mut title, &request(249, 65535)).unwrap();

        let ids: Vec<u32> = title.contents.iter().map(|c| c.content_id).collect();
        assert_eq!(ids, vec![0x11, 3, 0x10, 0]);
        assert_eq!(title.content_by_id(0x11).unwrap(), b"FAT");
        assert_eq!(title.content_by_id(0).unwrap(), vec![1, 2, 3]);
        assert_eq!(report.modules_inserted, vec!["mload", "FAT"]);
    }

    #[test]
    fn test_missing_module_fails_before_patching() {
        let dir = tempfile::tempdir().unwrap();
        let map = map_with(
            vec![patch(3, 0x10, &[0xaa, 0xbb], &[0xcc, 0xdd])],
            vec![ModuleInsertion {
                module: "EHCI".into(),
                target: InsertTarget::Append,
                content_id: 0x12,
            }],
        );
        let builder = PatchBuilder::new(&map, dir.path());
        let mut title = base();

        let err = builder.build(&mut title, &request(249, 1)).unwrap_err();
        assert!(matches!(err, Error::MissingModule { ref module, .. } if module == "EHCI"));
        assert_eq!(title, base());
    }

    #[test]
    fn test_write_past_end_extends_content() {
        let mut data = vec![1, 2];
        assert!(write_at(&mut data, 1, &[9, 9, 9]));
        assert_eq!(data, vec![1, 9, 9, 9]);

        assert!(!write_at(&mut data, 5, &[7]));
        assert!(!write_at(&mut data, usize::MAX, &[7]));
        assert_eq!(data, vec![1, 9, 9, 9]);
    }

    #[test]
    fn test_out_of_range_offset_is_a_mismatch() {
        let map = map_with(
            vec![
                patch(3, usize::MAX, &[0xaa, 0xbb], &[0xcc, 0xdd]),
                patch(3, 0xffff_ffff, &[0xaa, 0xbb], &[0xcc, 0xdd]),
            ],
            vec![],
        );
        let builder = PatchBuilder::new(&map, "/nonexistent");
        let mut title = base();

        match builder.build(&mut title, &request(249, 1)).unwrap_err() {
            Error::PatchVerificationFailed { mismatches } => {
                let offsets: Vec<usize> = mismatches.iter().map(|m| m.offset).collect();
                assert_eq!(offsets, vec![usize::MAX, 0xffff_ffff]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(title, base());
    }

    #[test]
    fn test_build_file_writes_only_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let base_path = dir.path().join("IOS56-64-v5661.wad");
        std::fs::write(&base_path, base().to_bytes().unwrap()).unwrap();
        let output = dir.path().join("out.wad");

        let map = map_with(vec![patch(3, 0x10, &[0xaa, 0xbb], &[0xcc, 0xdd])], vec![]);
        let builder = PatchBuilder::new(&map, dir.path());
        let codec = crate::package::memory::MemoryCodec;

        assert!(builder.build_file(&codec, &base_path, &output, &request(1, 1)).is_err());
        assert!(!output.exists());

        builder.build_file(&codec, &base_path, &output, &request(250, 10)).unwrap();
        let built = MemoryTitle::from_bytes(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(built.title_id & 0xff, 0xfa);
        assert_eq!(built.title_version, 10);
    }
}
