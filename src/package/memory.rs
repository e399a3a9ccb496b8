// src/package/memory.rs

//! Unencrypted in-memory title image
//!
//! `MemoryTitle` serializes to JSON. It has no ticket or certificate chain;
//! re-keying records the common key index and fake-signing sets a flag.
//! It backs tests and tooling that need a working [`TitlePackage`] without
//! the real packaging library.

use super::{ContentRecord, ContentType, TitleCodec, TitlePackage};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryContent {
    pub content_id: u32,
    #[serde(default)]
    pub content_type: ContentType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTitle {
    pub title_id: u64,
    pub title_version: u16,
    #[serde(default)]
    pub common_key_index: u8,
    #[serde(default)]
    pub fakesigned: bool,
    #[serde(default)]
    pub contents: Vec<MemoryContent>,
}

impl MemoryTitle {
    pub fn new(title_id: u64, title_version: u16) -> Self {
        Self {
            title_id,
            title_version,
            common_key_index: 0,
            fakesigned: false,
            contents: Vec::new(),
        }
    }

    pub fn with_content(mut self, content_id: u32, data: impl Into<Vec<u8>>) -> Self {
        self.contents.push(MemoryContent {
            content_id,
            content_type: ContentType::Normal,
            data: data.into(),
        });
        self
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::Package(format!("Invalid title image: {e}")))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Package(format!("Failed to serialize title: {e}")))
    }

    fn ensure_unique(&self, content_id: u32, except: Option<usize>) -> Result<()> {
        let clash = self
            .contents
            .iter()
            .enumerate()
            .any(|(i, c)| c.content_id == content_id && Some(i) != except);
        if clash {
            return Err(Error::Package(format!("Duplicate content id {content_id:08x}")));
        }
        Ok(())
    }
}

impl TitlePackage for MemoryTitle {
    fn title_id(&self) -> u64 {
        self.title_id
    }

    fn set_title_id(&mut self, title_id: u64) -> Result<()> {
        self.title_id = title_id;
        Ok(())
    }

    fn title_version(&self) -> u16 {
        self.title_version
    }

    fn set_title_version(&mut self, version: u16) -> Result<()> {
        self.title_version = version;
        Ok(())
    }

    fn content_records(&self) -> Vec<ContentRecord> {
        self.contents
            .iter()
            .enumerate()
            .map(|(index, c)| ContentRecord {
                content_id: c.content_id,
                index,
                content_type: c.content_type,
            })
            .collect()
    }

    fn content_by_index(&self, index: usize) -> Result<Vec<u8>> {
        self.contents
            .get(index)
            .map(|c| c.data.clone())
            .ok_or_else(|| Error::Package(format!("Content index {index} out of range")))
    }

    fn set_content(
        &mut self,
        index: usize,
        data: Vec<u8>,
        content_id: Option<u32>,
        content_type: ContentType,
    ) -> Result<()> {
        if let Some(cid) = content_id {
            self.ensure_unique(cid, Some(index))?;
        }
        let content = self
            .contents
            .get_mut(index)
            .ok_or_else(|| Error::Package(format!("Content index {index} out of range")))?;
        if let Some(cid) = content_id {
            content.content_id = cid;
        }
        content.content_type = content_type;
        content.data = data;
        self.fakesigned = false;
        Ok(())
    }

    fn add_content(&mut self, data: Vec<u8>, content_id: u32, content_type: ContentType) -> Result<()> {
        self.ensure_unique(content_id, None)?;
        self.contents.push(MemoryContent {
            content_id,
            content_type,
            data,
        });
        self.fakesigned = false;
        Ok(())
    }

    fn rekey(&mut self, common_key_index: u8) -> Result<()> {
        self.common_key_index = common_key_index;
        Ok(())
    }

    fn fakesign(&mut self) -> Result<()> {
        self.fakesigned = true;
        Ok(())
    }

    fn dump(&self) -> Result<Vec<u8>> {
        self.to_bytes()
    }
}

/// Codec for [`MemoryTitle`] images
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryCodec;

impl TitleCodec for MemoryCodec {
    fn parse(&self, data: &[u8]) -> Result<Box<dyn TitlePackage>> {
        Ok(Box::new(MemoryTitle::from_bytes(data)?))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
