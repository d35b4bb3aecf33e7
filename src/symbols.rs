// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Symbol Object (class 0x6B) browsing: paginated tag enumeration at
//! controller and program scope

use super::cip::Request;
use super::constant::*;
use super::epath::EPath;
use super::error::Error;
use byteorder::{ByteOrder, LittleEndian};

/// One symbol table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub name: String,
    pub type_code: u16,
    pub instance_id: u32,
    /// 0 to 3 array dimensions; empty when not yet resolved
    pub dimensions: Vec<u32>,
}

impl TagInfo {
    /// A program entry names a scope to traverse, e.g. `Program:MainProgram`.
    pub fn is_program_entry(&self) -> bool {
        self.name.starts_with("Program:") && !self.name.contains('.')
    }

    pub fn is_system(&self) -> bool {
        self.name.starts_with("Map:")
            || self.name.starts_with("Task:")
            || self.name.starts_with("Cxn:")
    }

    pub fn is_routine(&self) -> bool {
        self.name.contains(".Routine:")
    }

    /// The gate for bulk reads; system tags, program entries and routine
    /// entries stay in the raw listing but are never read.
    pub fn is_readable(&self) -> bool {
        !self.is_program_entry() && !self.is_system() && !self.is_routine()
    }

    pub fn is_struct(&self) -> bool {
        is_struct(self.type_code)
    }

    pub fn array_rank(&self) -> u8 {
        array_rank(self.type_code)
    }

    pub fn template_id(&self) -> u16 {
        template_id(self.type_code)
    }

    /// Total element count across all known dimensions, at least 1.
    pub fn elements(&self) -> u32 {
        let product: u32 = self.dimensions.iter().filter(|d| **d > 0).product();
        product.max(1)
    }
}

fn scope_path(scope: Option<&str>) -> EPath {
    let mut path = EPath::new();
    if let Some(program) = scope {
        path.push_symbolic(program);
    }
    path
}

/// GetInstanceAttributeList page request starting at the given instance
/// cursor, asking for name, type code and byte count.
pub fn attribute_list_request(scope: Option<&str>, start_instance: u32) -> Request {
    let mut path = scope_path(scope);
    path.push_class(CLASS_SYMBOL);
    path.push_instance(start_instance);

    let mut data = vec![0u8; 2];
    LittleEndian::write_u16(&mut data, 3);
    for attribute in &[1u16, 2, 8] {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, *attribute);
        data.extend_from_slice(&buf);
    }
    Request::with_data(SVC_GET_INSTANCE_ATTRIBUTE_LIST, path, data)
}

/// Parse one reply page into its entries. Each entry spans
/// `name_length + 20` bytes: instance at +0, name length at +4, name at +6,
/// type code at +6+len, array size at +8+len.
pub fn parse_attribute_list(data: &[u8]) -> Result<Vec<TagInfo>, Error> {
    let mut tags = Vec::new();
    let mut at = 0usize;
    while at < data.len() {
        if data.len() < at + 6 {
            return Err(Error::Protocol("truncated symbol entry header".to_string()));
        }
        let instance_id = LittleEndian::read_u32(&data[at..at + 4]);
        let name_len = LittleEndian::read_u16(&data[at + 4..at + 6]) as usize;
        let stride = name_len + 20;
        if data.len() < at + stride {
            return Err(Error::Protocol("truncated symbol entry".to_string()));
        }
        let name = String::from_utf8_lossy(&data[at + 6..at + 6 + name_len]).into_owned();
        let type_code = LittleEndian::read_u16(&data[at + 6 + name_len..at + 8 + name_len]);
        let array_size = LittleEndian::read_u16(&data[at + 8 + name_len..at + 10 + name_len]);

        let dimensions = if array_rank(type_code) > 0 && array_size > 0 {
            vec![array_size as u32]
        } else {
            Vec::new()
        };
        tags.push(TagInfo {
            name,
            type_code,
            instance_id,
            dimensions,
        });
        at += stride;
    }
    Ok(tags)
}

/// GetAttributeSingle for attribute 8 (byte count) of a symbol instance.
pub fn byte_count_request(scope: Option<&str>, instance: u32) -> Request {
    let mut path = scope_path(scope);
    path.push_class(CLASS_SYMBOL);
    path.push_instance(instance);
    path.push_attribute(8);
    Request::new(SVC_GET_ATTRIBUTE_SINGLE, path)
}

pub fn parse_byte_count(data: &[u8]) -> Result<u32, Error> {
    match data.len() {
        n if n >= 4 => Ok(LittleEndian::read_u32(&data[..4])),
        2 | 3 => Ok(LittleEndian::read_u16(&data[..2]) as u32),
        _ => Err(Error::Protocol("byte count attribute too short".to_string())),
    }
}

/// GetAttributeSingle for attribute 3 (dimensions), the fallback for
/// controllers that lack attribute 8.
pub fn dimensions_request(scope: Option<&str>, instance: u32) -> Request {
    let mut path = scope_path(scope);
    path.push_class(CLASS_SYMBOL);
    path.push_instance(instance);
    path.push_attribute(3);
    Request::new(SVC_GET_ATTRIBUTE_SINGLE, path)
}

/// 1 to 3 little-endian u32 dimensions; trailing zeros are not dimensions.
pub fn parse_dimensions(data: &[u8]) -> Result<Vec<u32>, Error> {
    if data.len() < 4 {
        return Err(Error::Protocol("dimensions attribute too short".to_string()));
    }
    let mut dimensions = Vec::new();
    for chunk in data.chunks_exact(4).take(3) {
        let dimension = LittleEndian::read_u32(chunk);
        if dimension == 0 {
            break;
        }
        dimensions.push(dimension);
    }
    Ok(dimensions)
}
