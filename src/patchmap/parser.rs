// src/patchmap/parser.rs

//! XML reader for patch map documents
//!
//! ```xml
//! <ciosmaps version="1">
//!   <cios name="d2x-v11">
//!     <base ios="56" version="5661">
//!       <content id="0x1">
//!         <patch offset="0x10" originalbytes="0xAA,0xBB" newbytes="0xCC,0xDD"/>
//!       </content>
//!       <content id="0x10" module="mload" tmdmoduleid="-1"/>
//!     </base>
//!   </cios>
//! </ciosmaps>
//! ```
//!
//! Content ids, offsets and module indices are hexadecimal; base identity
//! and version are decimal. Unknown elements are skipped with their
//! children.

use super::{ContentPatch, InsertTarget, ModuleInsertion, PatchMap, PatchNode, Variant};
use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

pub(super) fn parse_document(xml: &str) -> Result<PatchMap> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut state = ParseState::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => state.open(&e)?,
            Ok(Event::Empty(e)) => {
                state.open(&e)?;
                state.close(e.name().as_ref());
            }
            Ok(Event::End(e)) => state.close(e.name().as_ref()),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::ParseError(format!(
                    "Patch map XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
        }
    }

    state.finish()
}

#[derive(Default)]
struct ParseState {
    map: PatchMap,
    seen_root: bool,
    variant: Option<Variant>,
    node: Option<PatchNode>,
    content_id: Option<u32>,
    /// Nesting depth inside an unknown element
    skip_depth: usize,
}

impl ParseState {
    fn open(&mut self, element: &BytesStart) -> Result<()> {
        if self.skip_depth > 0 {
            self.skip_depth += 1;
            return Ok(());
        }

        let name = element.name();
        let tag = String::from_utf8_lossy(name.as_ref()).into_owned();
        match name.as_ref() {
            b"ciosmaps" => {
                let attrs = Attrs::read(element, &tag)?;
                self.seen_root = true;
                self.map.version = attrs.optional("version").map(str::to_string);
            }
            b"cios" if self.seen_root && self.variant.is_none() => {
                let attrs = Attrs::read(element, &tag)?;
                self.variant = Some(Variant {
                    name: attrs.required("name")?.to_string(),
                    nodes: Vec::new(),
                });
            }
            b"base" if self.variant.is_some() && self.node.is_none() => {
                let attrs = Attrs::read(element, &tag)?;
                let identity = attrs.required("ios")?;
                let version = attrs.required("version")?;
                self.node = Some(PatchNode {
                    base_identity: identity.trim().parse().map_err(|_| {
                        Error::ParseError(format!("Invalid base identity '{identity}'"))
                    })?,
                    base_version: version.trim().parse().map_err(|_| {
                        Error::ParseError(format!("Invalid base version '{version}'"))
                    })?,
                    content_patches: Vec::new(),
                    module_insertions: Vec::new(),
                });
            }
            b"content" if self.node.is_some() && self.content_id.is_none() => {
                let attrs = Attrs::read(element, &tag)?;
                let content_id = parse_hex_u32(attrs.required("id")?)?;
                if let (Some(module), Some(node)) = (attrs.optional("module"), self.node.as_mut()) {
                    let target = match attrs.optional("tmdmoduleid") {
                        Some(index) => parse_target(index)?,
                        None => InsertTarget::Append,
                    };
                    node.module_insertions.push(ModuleInsertion {
                        module: module.to_string(),
                        target,
                        content_id,
                    });
                }
                self.content_id = Some(content_id);
            }
            b"patch" if self.content_id.is_some() => {
                let attrs = Attrs::read(element, &tag)?;
                let offset = attrs.required("offset")?;
                let patch = ContentPatch {
                    content_id: self.content_id.unwrap_or_default(),
                    offset: parse_hex_u64(offset)?
                        .try_into()
                        .map_err(|_| Error::ParseError(format!("Offset '{offset}' out of range")))?,
                    original: parse_bytes(attrs.required("originalbytes")?)?,
                    replacement: parse_bytes(attrs.required("newbytes")?)?,
                };
                if let Some(node) = self.node.as_mut() {
                    node.content_patches.push(patch);
                }
            }
            b"ciosmaps" | b"cios" | b"base" | b"content" | b"patch" => {
                return Err(Error::ParseError(format!("Misplaced <{tag}> element")));
            }
            _ => self.skip_depth = 1,
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        if self.skip_depth > 0 {
            self.skip_depth -= 1;
            return;
        }
        match name {
            b"content" => self.content_id = None,
            b"base" => {
                if let (Some(node), Some(variant)) = (self.node.take(), self.variant.as_mut()) {
                    variant.nodes.push(node);
                }
            }
            b"cios" => {
                if let Some(variant) = self.variant.take() {
                    self.map.variants.push(variant);
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> Result<PatchMap> {
        if !self.seen_root {
            return Err(Error::ParseError(
                "Patch map has no <ciosmaps> root element".to_string(),
            ));
        }
        Ok(self.map)
    }
}

/// Unescaped attributes of one element
struct Attrs {
    tag: String,
    values: HashMap<String, String>,
}

impl Attrs {
    fn read(element: &BytesStart, tag: &str) -> Result<Self> {
        let mut values = HashMap::new();
        for attr in element.attributes() {
            let attr = attr
                .map_err(|e| Error::ParseError(format!("Invalid attribute on <{tag}>: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| Error::ParseError(format!("Invalid attribute on <{tag}>: {e}")))?
                .into_owned();
            values.insert(key, value);
        }
        Ok(Self {
            tag: tag.to_string(),
            values,
        })
    }

    fn optional(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn required(&self, key: &str) -> Result<&str> {
        self.optional(key).ok_or_else(|| {
            Error::ParseError(format!("<{}> is missing the '{}' attribute", self.tag, key))
        })
    }
}

fn parse_hex_u64(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16)
        .map_err(|_| Error::ParseError(format!("Invalid hex number '{value}'")))
}

fn parse_hex_u32(value: &str) -> Result<u32> {
    parse_hex_u64(value)?
        .try_into()
        .map_err(|_| Error::ParseError(format!("Content id '{value}' out of range")))
}

/// `-1` appends; anything else is a hex content index
fn parse_target(value: &str) -> Result<InsertTarget> {
    if value.trim() == "-1" {
        return Ok(InsertTarget::Append);
    }
    let index = parse_hex_u64(value)?;
    usize::try_from(index)
        .map(InsertTarget::Index)
        .map_err(|_| Error::ParseError(format!("Module index '{value}' out of range")))
}

/// Accepts `0xAA,0xBB` lists and plain hex strings
fn parse_bytes(value: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        let digits = part
            .strip_prefix("0x")
            .or_else(|| part.strip_prefix("0X"))
            .unwrap_or(part);
        let decoded = hex::decode(digits)
            .map_err(|e| Error::ParseError(format!("Invalid byte list '{value}': {e}")))?;
        bytes.extend(decoded);
    }
    if bytes.is_empty() {
        return Err(Error::ParseError("Empty byte list in patch".to_string()));
    }
    Ok(bytes)
}
