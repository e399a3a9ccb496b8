// src/package/mod.rs

//! Title-packaging collaborator seam
//!
//! The build engine never parses or encrypts title packages itself. It works
//! through [`TitlePackage`], an indexed collection of content blobs keyed by
//! content id plus the identity, re-keying, signing and serialization entry
//! points of the packaging library. A [`TitleCodec`] turns raw package bytes
//! into such an object.

pub mod memory;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Content type flags as recorded in the title metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    #[default]
    Normal,
    Development,
    HashTree,
    Dlc,
    Shared,
}

impl ContentType {
    pub const fn flags(&self) -> u16 {
        match self {
            Self::Normal => 0x0001,
            Self::Development => 0x0002,
            Self::HashTree => 0x0003,
            Self::Dlc => 0x4001,
            Self::Shared => 0x8001,
        }
    }

    pub fn from_flags(flags: u16) -> Option<Self> {
        match flags {
            0x0001 => Some(Self::Normal),
            0x0002 => Some(Self::Development),
            0x0003 => Some(Self::HashTree),
            0x4001 => Some(Self::Dlc),
            0x8001 => Some(Self::Shared),
            _ => None,
        }
    }
}

/// One content record of a title
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRecord {
    pub content_id: u32,
    pub index: usize,
    pub content_type: ContentType,
}

/// A parsed title package
pub trait TitlePackage: Send {
    /// 64-bit title id; the low byte is the title's numeric identity
    fn title_id(&self) -> u64;

    fn set_title_id(&mut self, title_id: u64) -> Result<()>;

    fn title_version(&self) -> u16;

    fn set_title_version(&mut self, version: u16) -> Result<()>;

    /// Content records in index order
    fn content_records(&self) -> Vec<ContentRecord>;

    /// Decrypted bytes of the content at `index`
    fn content_by_index(&self, index: usize) -> Result<Vec<u8>>;

    /// Replace the content at `index`
    ///
    /// `content_id` of `None` keeps the record's current id.
    fn set_content(
        &mut self,
        index: usize,
        data: Vec<u8>,
        content_id: Option<u32>,
        content_type: ContentType,
    ) -> Result<()>;

    /// Append a new content record
    fn add_content(&mut self, data: Vec<u8>, content_id: u32, content_type: ContentType) -> Result<()>;

    /// Re-encrypt the title key under the given common key
    fn rekey(&mut self, common_key_index: u8) -> Result<()>;

    /// Mark the title metadata and ticket fake-signed
    fn fakesign(&mut self) -> Result<()>;

    /// Serialize back to package bytes
    fn dump(&self) -> Result<Vec<u8>>;

    fn index_of(&self, content_id: u32) -> Option<usize> {
        self.content_records()
            .into_iter()
            .find(|r| r.content_id == content_id)
            .map(|r| r.index)
    }

    fn record(&self, index: usize) -> Option<ContentRecord> {
        self.content_records().into_iter().find(|r| r.index == index)
    }

    fn content_by_id(&self, content_id: u32) -> Result<Vec<u8>> {
        let index = self.index_of(content_id).ok_or_else(|| {
            Error::NotFound(format!(
                "content {:08x} in title {}",
                content_id,
                title_id_hex(self.title_id())
            ))
        })?;
        self.content_by_index(index)
    }
}

/// Parser for raw package bytes
pub trait TitleCodec: Send + Sync {
    fn parse(&self, data: &[u8]) -> Result<Box<dyn TitlePackage>>;

    /// Human-readable codec name for logging
    fn name(&self) -> &str;
}

/// Title id as 16 lowercase hex digits
pub fn title_id_hex(title_id: u64) -> String {
    format!("{title_id:016x}")
}

/// Numeric identity of a title (the low byte of its id)
pub fn title_identity(title_id: u64) -> u8 {
    (title_id & 0xff) as u8
}

/// Title id with its identity byte replaced
pub fn with_identity(title_id: u64, identity: u8) -> u64 {
    (title_id & !0xff) | u64::from(identity)
}
