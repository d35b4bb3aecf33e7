// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Encoded path (EPath) segment builder for CIP object and symbol addressing

use super::error::Error;
use byteorder::{ByteOrder, LittleEndian};

/// A CIP path as a flat byte sequence of encoded segments. Paths report
/// their length in 16-bit words, so the byte length is always even.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EPath {
    bytes: Vec<u8>,
}

impl EPath {
    pub fn new() -> EPath {
        EPath { bytes: Vec::new() }
    }

    /// Path addressing a class instance, e.g. the Message Router at 2/1.
    pub fn object(class: u16, instance: u32) -> EPath {
        let mut path = EPath::new();
        path.push_class(class);
        path.push_instance(instance);
        path
    }

    pub fn push_class(&mut self, class: u16) {
        if class <= 0xFF {
            self.bytes.push(0x20);
            self.bytes.push(class as u8);
        } else {
            self.bytes.push(0x21);
            self.bytes.push(0x00);
            let mut buf = [0u8; 2];
            LittleEndian::write_u16(&mut buf, class);
            self.bytes.extend_from_slice(&buf);
        }
    }

    pub fn push_instance(&mut self, instance: u32) {
        if instance <= 0xFF {
            self.bytes.push(0x24);
            self.bytes.push(instance as u8);
        } else if instance <= 0xFFFF {
            self.bytes.push(0x25);
            self.bytes.push(0x00);
            let mut buf = [0u8; 2];
            LittleEndian::write_u16(&mut buf, instance as u16);
            self.bytes.extend_from_slice(&buf);
        } else {
            self.bytes.push(0x26);
            self.bytes.push(0x00);
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, instance);
            self.bytes.extend_from_slice(&buf);
        }
    }

    pub fn push_attribute(&mut self, attribute: u8) {
        self.bytes.push(0x30);
        self.bytes.push(attribute);
    }

    /// ANSI extended symbolic segment, padded to an even byte count.
    pub fn push_symbolic(&mut self, name: &str) {
        self.bytes.push(0x91);
        self.bytes.push(name.len() as u8);
        self.bytes.extend_from_slice(name.as_bytes());
        if name.len() % 2 != 0 {
            self.bytes.push(0x00);
        }
    }

    /// Array element segment following a symbolic segment.
    pub fn push_element(&mut self, index: u32) {
        if index <= 0xFF {
            self.bytes.push(0x28);
            self.bytes.push(index as u8);
        } else if index <= 0xFFFF {
            self.bytes.push(0x29);
            self.bytes.push(0x00);
            let mut buf = [0u8; 2];
            LittleEndian::write_u16(&mut buf, index as u16);
            self.bytes.extend_from_slice(&buf);
        } else {
            self.bytes.push(0x2A);
            self.bytes.push(0x00);
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, index);
            self.bytes.extend_from_slice(&buf);
        }
    }

    pub fn word_len(&self) -> u8 {
        (self.bytes.len() / 2) as u8
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Parse a dotted tag path into symbolic and element segments.
    ///
    /// `Program:MainProgram.Counts[3].Total` becomes three symbolic segments
    /// with an element segment after `Counts`. Multi-dimensional indices are
    /// comma-separated inside one bracket pair.
    pub fn parse_tag(path: &str) -> Result<EPath, Error> {
        if path.is_empty() {
            return Err(Error::InvalidInput("empty tag path".to_string()));
        }
        let mut epath = EPath::new();
        for part in path.split('.') {
            let (name, indices) = split_indices(part)?;
            if name.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "empty segment in tag path {:?}",
                    path
                )));
            }
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
            {
                return Err(Error::InvalidInput(format!(
                    "invalid characters in tag path segment {:?}",
                    name
                )));
            }
            epath.push_symbolic(name);
            for index in indices {
                epath.push_element(index);
            }
        }
        Ok(epath)
    }
}

// "Counts[1,2]" -> ("Counts", [1, 2]); no brackets -> (part, [])
fn split_indices(part: &str) -> Result<(&str, Vec<u32>), Error> {
    let open = match part.find('[') {
        Some(i) => i,
        None => return Ok((part, Vec::new())),
    };
    if !part.ends_with(']') {
        return Err(Error::InvalidInput(format!(
            "unterminated index in tag path segment {:?}",
            part
        )));
    }
    let name = &part[..open];
    let inner = &part[open + 1..part.len() - 1];
    let mut indices = Vec::new();
    for piece in inner.split(',') {
        let index = piece
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::InvalidInput(format!("invalid array index {:?}", piece)))?;
        indices.push(index);
    }
    Ok((name, indices))
}
