// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Template Object (class 0x6C) resolution: UDT layout metadata, the
//! per-session template cache, and recursive structure decoding

use super::cip::Request;
use super::constant::*;
use super::epath::EPath;
use super::error::Error;
use super::value::{self, PlcValue};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

/// One member of a parsed template. Hidden members are bitfield backing
/// and padding; they never appear in decoded output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMember {
    pub name: String,
    pub type_code: u16,
    pub array_count: u16,
    pub offset: u32,
    pub hidden: bool,
}

/// A parsed UDT layout, cached by template id for the session lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: u16,
    pub name: String,
    /// structure size in bytes
    pub size: u32,
    pub handle: u16,
    pub members: Vec<TemplateMember>,
}

/// Template instance attributes fetched ahead of the member block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemplateAttributes {
    /// attribute 4, in 32-bit words
    pub object_definition_size: u32,
    /// attribute 5, in bytes
    pub structure_size: u32,
    /// attribute 2
    pub member_count: u16,
    /// attribute 1
    pub handle: u16,
}

/// GetAttributeList for attributes 4, 5, 2 and 1. GetAttributeSingle is
/// not reliably supported on this object.
pub fn attributes_request(id: u16) -> Request {
    let mut data = Vec::with_capacity(10);
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, 4);
    data.extend_from_slice(&buf);
    for attribute in &[4u16, 5, 2, 1] {
        LittleEndian::write_u16(&mut buf, *attribute);
        data.extend_from_slice(&buf);
    }
    Request::with_data(
        SVC_GET_ATTRIBUTE_LIST,
        EPath::object(CLASS_TEMPLATE, id as u32),
        data,
    )
}

/// attr_count(2) then per attribute: id(2) | status(2) | value.
/// A nonzero per-attribute status fails the whole request.
pub fn parse_attributes(data: &[u8]) -> Result<TemplateAttributes, Error> {
    if data.len() < 2 {
        return Err(Error::Protocol("attribute list reply too short".to_string()));
    }
    let count = LittleEndian::read_u16(&data[..2]) as usize;
    let mut attrs = TemplateAttributes::default();
    let mut seen = 0usize;
    let mut at = 2usize;
    for _ in 0..count {
        if data.len() < at + 4 {
            return Err(Error::Protocol("attribute entry truncated".to_string()));
        }
        let id = LittleEndian::read_u16(&data[at..at + 2]);
        let status = LittleEndian::read_u16(&data[at + 2..at + 4]);
        if status != 0 {
            return Err(Error::cip(status as u8, None));
        }
        at += 4;
        let width = match id {
            4 | 5 => 4usize,
            2 | 1 => 2usize,
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected template attribute {}",
                    other
                )))
            }
        };
        if data.len() < at + width {
            return Err(Error::Protocol("attribute value truncated".to_string()));
        }
        match id {
            4 => attrs.object_definition_size = LittleEndian::read_u32(&data[at..at + 4]),
            5 => attrs.structure_size = LittleEndian::read_u32(&data[at..at + 4]),
            2 => attrs.member_count = LittleEndian::read_u16(&data[at..at + 2]),
            1 => attrs.handle = LittleEndian::read_u16(&data[at..at + 2]),
            _ => unreachable!(),
        }
        seen += 1;
        at += width;
    }
    if seen < 4 {
        return Err(Error::Protocol(format!(
            "template attribute list returned {} of 4 attributes",
            seen
        )));
    }
    Ok(attrs)
}

/// Total member definition block length derived from the object
/// definition size. Controllers reporting unusual padding fail the
/// underflow guard rather than producing a bogus read.
pub fn definition_len(attrs: &TemplateAttributes) -> Result<usize, Error> {
    let total = (attrs.object_definition_size as usize) * 4;
    let overhead = 23 * attrs.member_count as usize + 2;
    total.checked_sub(overhead).ok_or_else(|| {
        Error::Protocol(format!(
            "object definition size {} dwords cannot hold {} members",
            attrs.object_definition_size, attrs.member_count
        ))
    })
}

/// ReadTemplate with a byte offset, for fragmented member block fetches.
pub fn read_request(id: u16, offset: u32, bytes: u16) -> Request {
    let mut data = vec![0u8; 6];
    LittleEndian::write_u32(&mut data[..4], offset);
    LittleEndian::write_u16(&mut data[4..], bytes);
    Request::with_data(
        SVC_READ_TAG,
        EPath::object(CLASS_TEMPLATE, id as u32),
        data,
    )
}

// Rockwell-conventional padding and bitfield-backing names; best effort.
fn hidden_name(name: &str) -> bool {
    name.is_empty() || name.starts_with("ZZZZZZZZZZ") || name.starts_with("__")
}

/// Parse the accumulated member block: `member_count` definition records
/// of `array_count(2) | type(2) | offset(4)`, then the template's own name
/// and the member names as a NUL-separated, `;`-delimited ASCII region.
pub fn parse_definition(
    id: u16,
    attrs: &TemplateAttributes,
    block: &[u8],
) -> Result<Template, Error> {
    let count = attrs.member_count as usize;
    if block.len() < count * 8 {
        return Err(Error::Protocol(format!(
            "member block holds {} bytes, {} members need {}",
            block.len(),
            count,
            count * 8
        )));
    }

    let mut members = Vec::with_capacity(count);
    for i in 0..count {
        let at = i * 8;
        members.push(TemplateMember {
            name: String::new(),
            array_count: LittleEndian::read_u16(&block[at..at + 2]),
            type_code: LittleEndian::read_u16(&block[at + 2..at + 4]),
            offset: LittleEndian::read_u32(&block[at + 4..at + 8]),
            hidden: false,
        });
    }

    // first NUL-chunk is the template name up to the first ';', the rest
    // are member names in declaration order; an empty name is a hidden slot
    let mut chunks = block[count * 8..].split(|b| *b == 0);
    let first = String::from_utf8_lossy(chunks.next().unwrap_or(&[])).into_owned();
    let name = first.split(';').next().unwrap_or("").to_string();
    if name.is_empty() {
        return Err(Error::Protocol(
            "template name missing from member block".to_string(),
        ));
    }

    let mut names = chunks.map(|chunk| String::from_utf8_lossy(chunk).into_owned());
    for member in members.iter_mut() {
        member.name = names.next().unwrap_or_default();
        member.hidden = hidden_name(&member.name);
    }

    Ok(Template {
        id,
        name,
        size: attrs.structure_size,
        handle: attrs.handle,
        members,
    })
}

/// Per-session template store. Parses are cached by id; permanent
/// failures are cached so a bad id is never refetched, while transient
/// failures are left uncached for a reconnect to reprobe.
#[derive(Debug, Default)]
pub struct TemplateCache {
    parsed: HashMap<u16, Template>,
    failed: HashMap<u16, String>,
}

impl TemplateCache {
    pub fn new() -> TemplateCache {
        TemplateCache::default()
    }

    pub fn get(&self, id: u16) -> Option<&Template> {
        self.parsed.get(&id)
    }

    pub fn failure(&self, id: u16) -> Option<&str> {
        self.failed.get(&id).map(String::as_str)
    }

    pub fn insert(&mut self, template: Template) {
        self.parsed.insert(template.id, template);
    }

    pub fn insert_failure(&mut self, id: u16, reason: String) {
        self.failed.insert(id, reason);
    }
}

/// Atomic leaf paths of a template, recursing through nested structures
/// and skipping hidden members. Yields `(dotted_path, type_code, count)`.
pub fn leaf_paths(
    cache: &TemplateCache,
    id: u16,
    prefix: &str,
    out: &mut Vec<(String, u16, u16)>,
) -> Result<(), Error> {
    let template = cache.get(id).ok_or_else(|| Error::Template {
        id,
        reason: "not cached".to_string(),
    })?;
    for member in &template.members {
        if member.hidden {
            continue;
        }
        let path = format!("{}.{}", prefix, member.name);
        if is_struct(member.type_code) {
            leaf_paths(cache, template_id(member.type_code), &path, out)?;
        } else {
            out.push((path, member.type_code, member.array_count.max(1)));
        }
    }
    Ok(())
}

/// Decode a read result. Top-level structures carry a 2-byte structure
/// handle that is stripped; nested structures carry no such prefix.
pub fn decode_value(
    cache: &TemplateCache,
    type_code: u16,
    element_count: u16,
    bytes: &[u8],
) -> Result<PlcValue, Error> {
    if !is_struct(type_code) {
        if element_count <= 1 {
            return value::decode_atomic(type_code, bytes);
        }
        let size = element_size(type_code);
        if size == 0 {
            return Err(Error::Decode(format!(
                "cannot slice an array of variable-width type 0x{:04X}",
                type_code
            )));
        }
        let mut items = Vec::with_capacity(element_count as usize);
        for i in 0..element_count as usize {
            let start = i * size;
            let end = start + size;
            if bytes.len() < end {
                return Err(Error::Decode(format!(
                    "array element {} needs bytes {}..{}, {} available",
                    i,
                    start,
                    end,
                    bytes.len()
                )));
            }
            items.push(value::decode_atomic(type_code, &bytes[start..end])?);
        }
        return Ok(PlcValue::Array(items));
    }

    let id = template_id(type_code);
    if id == 0 {
        return Err(Error::Template {
            id,
            reason: "structure type code with id 0 is invalid".to_string(),
        });
    }
    let template = cache.get(id).ok_or_else(|| Error::Template {
        id,
        reason: "not cached".to_string(),
    })?;
    if bytes.len() < 2 {
        return Err(Error::Decode("structure shorter than its handle".to_string()));
    }
    let payload = &bytes[2..];

    if element_count > 1 {
        let stride = template.size as usize;
        let mut items = Vec::with_capacity(element_count as usize);
        for i in 0..element_count as usize {
            let start = i * stride;
            if payload.len() < start {
                break;
            }
            let end = (start + stride).min(payload.len());
            items.push(decode_structure(cache, template, &payload[start..end])?);
        }
        return Ok(PlcValue::Array(items));
    }
    decode_structure(cache, template, payload)
}

// Members beyond the supplied byte length are missing, not errors.
fn decode_structure(
    cache: &TemplateCache,
    template: &Template,
    bytes: &[u8],
) -> Result<PlcValue, Error> {
    let mut out = Vec::new();
    for member in &template.members {
        if member.hidden {
            continue;
        }
        let offset = member.offset as usize;
        if offset >= bytes.len() {
            continue;
        }
        let slice = &bytes[offset..];
        let decoded = if is_struct(member.type_code) {
            let nested_id = template_id(member.type_code);
            let nested = cache.get(nested_id).ok_or_else(|| Error::Template {
                id: nested_id,
                reason: "not cached".to_string(),
            })?;
            if member.array_count > 1 {
                let stride = nested.size as usize;
                let mut items = Vec::with_capacity(member.array_count as usize);
                for i in 0..member.array_count as usize {
                    let start = i * stride;
                    if slice.len() < start {
                        break;
                    }
                    let end = (start + stride).min(slice.len());
                    items.push(decode_structure(cache, nested, &slice[start..end])?);
                }
                PlcValue::Array(items)
            } else {
                decode_structure(cache, nested, slice)?
            }
        } else if member.array_count > 1 {
            let size = element_size(member.type_code);
            if size == 0 {
                return Err(Error::Decode(format!(
                    "member {} has no fixed element width",
                    member.name
                )));
            }
            let mut items = Vec::with_capacity(member.array_count as usize);
            for i in 0..member.array_count as usize {
                let start = i * size;
                let end = start + size;
                if slice.len() < end {
                    break;
                }
                items.push(value::decode_atomic(member.type_code, &slice[start..end])?);
            }
            PlcValue::Array(items)
        } else {
            value::decode_atomic(member.type_code, slice)?
        };
        out.push((member.name.clone(), decoded));
    }
    Ok(PlcValue::Structure(out))
}
