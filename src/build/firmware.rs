// src/build/firmware.rs

//! Firmware signature patches for derived-patch entries
//!
//! Unlike a map-driven build, a firmware patch searches every content of
//! the base title for known instruction sequences and rewrites each
//! occurrence. The title keeps its identity unless a slot or version is
//! requested.

use super::{assign_identity, finalize, validate_slot, validate_version, write_output};
use crate::error::{Error, Result};
use crate::package::{title_id_hex, TitleCodec, TitlePackage};
use std::path::Path;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use tracing::{debug, info};

/// Known firmware patches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum FirmwarePatch {
    /// Accept signatures that only compare with a zeroed hash
    #[strum(to_string = "fakesigning", serialize = "fake-signing", serialize = "trucha")]
    FakeSigning,
    /// Allow ES_Identify from any title
    #[strum(to_string = "es-identify")]
    EsIdentify,
    /// Skip NAND permission checks
    #[strum(to_string = "nand-permissions")]
    NandPermissions,
    /// Allow installing titles older than the installed version
    #[strum(to_string = "version-downgrade", serialize = "downgrade")]
    VersionDowngrade,
}

struct Signature {
    original: &'static [u8],
    replacement: &'static [u8],
}

const FAKESIGNING: &[Signature] = &[
    Signature {
        original: &[0x20, 0x07, 0x23, 0xa2],
        replacement: &[0x20, 0x00, 0x23, 0xa2],
    },
    Signature {
        original: &[0x20, 0x07, 0x4b, 0x0b],
        replacement: &[0x20, 0x00, 0x4b, 0x0b],
    },
];

const ES_IDENTIFY: &[Signature] = &[Signature {
    original: &[0x28, 0x03, 0xd1, 0x23],
    replacement: &[0x28, 0x03, 0x00, 0x00],
}];

const NAND_PERMISSIONS: &[Signature] = &[Signature {
    original: &[0x42, 0x8b, 0xd0, 0x01, 0x25, 0x66],
    replacement: &[0x42, 0x8b, 0xe0, 0x01, 0x25, 0x66],
}];

const VERSION_DOWNGRADE: &[Signature] = &[Signature {
    original: &[0xd2, 0x01, 0x4e, 0x56],
    replacement: &[0xe0, 0x01, 0x4e, 0x56],
}];

impl FirmwarePatch {
    fn signatures(&self) -> &'static [Signature] {
        match self {
            Self::FakeSigning => FAKESIGNING,
            Self::EsIdentify => ES_IDENTIFY,
            Self::NandPermissions => NAND_PERMISSIONS,
            Self::VersionDowngrade => VERSION_DOWNGRADE,
        }
    }

    pub fn all() -> Vec<Self> {
        Self::iter().collect()
    }

    /// Parse catalog patch names; an absent list means every patch
    pub fn parse_list(names: Option<&[String]>) -> Result<Vec<Self>> {
        let Some(names) = names else {
            return Ok(Self::all());
        };
        names
            .iter()
            .map(|name| {
                name.parse()
                    .map_err(|_| Error::ParseError(format!("Unknown firmware patch '{name}'")))
            })
            .collect()
    }
}

/// What to patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareRequest {
    pub patches: Vec<FirmwarePatch>,
    pub slot: Option<u64>,
    pub version: Option<u64>,
}

/// Patch sites rewritten per requested patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareReport {
    pub title_id: String,
    pub sites: Vec<(FirmwarePatch, usize)>,
}

/// Apply firmware patches in place
///
/// Every requested patch must find at least one site; on error the title
/// has not been modified.
pub fn patch_title(title: &mut dyn TitlePackage, request: &FirmwareRequest) -> Result<FirmwareReport> {
    let slot = request.slot.map(validate_slot).transpose()?;
    let version = request.version.map(validate_version).transpose()?;

    let mut sites: Vec<(FirmwarePatch, usize)> = request.patches.iter().map(|p| (*p, 0)).collect();
    let mut changed = Vec::new();

    for record in title.content_records() {
        let mut data = title.content_by_index(record.index)?;
        let mut touched = false;
        for (patch, count) in sites.iter_mut() {
            for signature in patch.signatures() {
                let n = replace_all(&mut data, signature.original, signature.replacement);
                if n > 0 {
                    debug!(
                        "{}: {} site(s) in content {:08x}",
                        patch, n, record.content_id
                    );
                    *count += n;
                    touched = true;
                }
            }
        }
        if touched {
            changed.push((record, data));
        }
    }

    if let Some((patch, _)) = sites.iter().find(|(_, count)| *count == 0) {
        return Err(Error::PatchSiteNotFound {
            patch: patch.to_string(),
            title_id: title_id_hex(title.title_id()),
        });
    }

    for (record, data) in changed {
        title.set_content(record.index, data, None, record.content_type)?;
    }
    assign_identity(title, slot, version)?;
    finalize(title)?;

    Ok(FirmwareReport {
        title_id: title_id_hex(title.title_id()),
        sites,
    })
}

/// Patch a base package file into `output`
pub fn patch_file(
    codec: &dyn TitleCodec,
    base: &Path,
    output: &Path,
    request: &FirmwareRequest,
) -> Result<FirmwareReport> {
    let data = std::fs::read(base)
        .map_err(|e| Error::io(format!("Failed to read base {}", base.display()), e))?;
    let mut title = codec.parse(&data)?;
    let report = patch_title(title.as_mut(), request)?;
    write_output(output, &title.dump()?)?;

    let applied: Vec<String> = report.sites.iter().map(|(p, _)| p.to_string()).collect();
    info!("Patched title {} ({})", report.title_id, applied.join(", "));
    Ok(report)
}

/// Replace every non-overlapping occurrence, returning the count
fn replace_all(data: &mut [u8], original: &[u8], replacement: &[u8]) -> usize {
    let len = original.len().min(replacement.len());
    if original.is_empty() || data.len() < original.len() {
        return 0;
    }
    let mut count = 0;
    let mut i = 0;
    while i + original.len() <= data.len() {
        if &data[i..i + original.len()] == original {
            data[i..i + len].copy_from_slice(&replacement[..len]);
            count += 1;
            i += original.len();
        } else {
            i += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::memory::MemoryTitle;

    fn kernel() -> Vec<u8> {
        let mut data = vec![0u8; 8];
        data.extend([0x20, 0x07, 0x23, 0xa2]);
        data.extend([0x00; 4]);
        data.extend([0x20, 0x07, 0x4b, 0x0b]);
        data.extend([0x28, 0x03, 0xd1, 0x23]);
        data
    }

    fn es_module() -> Vec<u8> {
        let mut data = vec![0x42, 0x8b, 0xd0, 0x01, 0x25, 0x66];
        data.extend([0xd2, 0x01, 0x4e, 0x56]);
        data
    }

    fn title() -> MemoryTitle {
        MemoryTitle::new(0x0000_0001_0000_0024, 3608)
            .with_content(0, kernel())
            .with_content(1, es_module())
    }

    #[test]
    fn test_patch_names() {
        assert_eq!("fakesigning".parse::<FirmwarePatch>().unwrap(), FirmwarePatch::FakeSigning);
        assert_eq!("ES-Identify".parse::<FirmwarePatch>().unwrap(), FirmwarePatch::EsIdentify);
        assert_eq!(FirmwarePatch::all().len(), 4);
        assert_eq!(FirmwarePatch::parse_list(None).unwrap().len(), 4);
        assert!(FirmwarePatch::parse_list(Some(&["bogus".to_string()])).is_err());
    }

    #[test]
    fn test_patch_all_sites() {
        let mut title = title();
        let request = FirmwareRequest {
            patches: FirmwarePatch::all(),
            slot: Some(236),
            version: None,
        };
        let report = patch_title(&mut title, &request).unwrap();

        assert_eq!(report.title_id, "00000001000000ec");
        assert_eq!(report.sites[0], (FirmwarePatch::FakeSigning, 2));
        let kernel = title.content_by_id(0).unwrap();
        assert_eq!(&kernel[8..12], &[0x20, 0x00, 0x23, 0xa2]);
        assert_eq!(&kernel[20..24], &[0x28, 0x03, 0x00, 0x00]);
        let es = title.content_by_id(1).unwrap();
        assert_eq!(&es[..6], &[0x42, 0x8b, 0xe0, 0x01, 0x25, 0x66]);
        assert_eq!(title.title_version, 3608);
        assert!(title.fakesigned);
    }

    #[test]
    fn test_missing_site_leaves_title_untouched() {
        let mut title = MemoryTitle::new(0x0000_0001_0000_0024, 3608).with_content(0, kernel());
        let before = title.clone();
        let request = FirmwareRequest {
            patches: FirmwarePatch::all(),
            slot: None,
            version: None,
        };
        let err = patch_title(&mut title, &request).unwrap_err();
        assert!(matches!(err, Error::PatchSiteNotFound { ref patch, .. } if patch == "nand-permissions"));
        assert_eq!(title, before);
    }

    #[test]
    fn test_replace_all_counts() {
        let mut data = vec![1, 2, 1, 2, 1];
        assert_eq!(replace_all(&mut data, &[1, 2], &[3, 4]), 2);
        assert_eq!(data, vec![3, 4, 3, 4, 1]);
        assert_eq!(replace_all(&mut data, &[9], &[0]), 0);
    }
}
