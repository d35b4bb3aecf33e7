// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Decoded tag values and the coercion rules applied on write

use super::constant::*;
use super::error::Error;
use super::template::TemplateCache;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// A decoded controller value.
#[derive(Debug, Clone, PartialEq)]
pub enum PlcValue {
    Bool(bool),
    Sint(i8),
    Int(i16),
    Dint(i32),
    Lint(i64),
    Usint(u8),
    Uint(u16),
    Udint(u32),
    Ulint(u64),
    Real(f32),
    Lreal(f64),
    String(String),
    Array(Vec<PlcValue>),
    /// UDT members in declaration order.
    Structure(Vec<(String, PlcValue)>),
}

impl fmt::Display for PlcValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PlcValue::Bool(v) => write!(f, "{}", v),
            PlcValue::Sint(v) => write!(f, "{}", v),
            PlcValue::Int(v) => write!(f, "{}", v),
            PlcValue::Dint(v) => write!(f, "{}", v),
            PlcValue::Lint(v) => write!(f, "{}", v),
            PlcValue::Usint(v) => write!(f, "{}", v),
            PlcValue::Uint(v) => write!(f, "{}", v),
            PlcValue::Udint(v) => write!(f, "{}", v),
            PlcValue::Ulint(v) => write!(f, "{}", v),
            PlcValue::Real(v) => write!(f, "{}", v),
            PlcValue::Lreal(v) => write!(f, "{}", v),
            PlcValue::String(v) => write!(f, "{:?}", v),
            PlcValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            PlcValue::Structure(members) => {
                write!(f, "{{")?;
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for PlcValue {
    fn from(v: bool) -> PlcValue {
        PlcValue::Bool(v)
    }
}
impl From<i8> for PlcValue {
    fn from(v: i8) -> PlcValue {
        PlcValue::Sint(v)
    }
}
impl From<i16> for PlcValue {
    fn from(v: i16) -> PlcValue {
        PlcValue::Int(v)
    }
}
impl From<i32> for PlcValue {
    fn from(v: i32) -> PlcValue {
        PlcValue::Dint(v)
    }
}
impl From<i64> for PlcValue {
    fn from(v: i64) -> PlcValue {
        PlcValue::Lint(v)
    }
}
impl From<f32> for PlcValue {
    fn from(v: f32) -> PlcValue {
        PlcValue::Real(v)
    }
}
impl From<f64> for PlcValue {
    fn from(v: f64) -> PlcValue {
        PlcValue::Lreal(v)
    }
}
impl From<&str> for PlcValue {
    fn from(v: &str) -> PlcValue {
        PlcValue::String(v.to_string())
    }
}
impl From<String> for PlcValue {
    fn from(v: String) -> PlcValue {
        PlcValue::String(v)
    }
}

impl PlcValue {
    fn as_i64(&self) -> Option<i64> {
        match self {
            PlcValue::Bool(v) => Some(*v as i64),
            PlcValue::Sint(v) => Some(*v as i64),
            PlcValue::Int(v) => Some(*v as i64),
            PlcValue::Dint(v) => Some(*v as i64),
            PlcValue::Lint(v) => Some(*v),
            PlcValue::Usint(v) => Some(*v as i64),
            PlcValue::Uint(v) => Some(*v as i64),
            PlcValue::Udint(v) => Some(*v as i64),
            PlcValue::Ulint(v) => Some(*v as i64),
            PlcValue::Real(v) => Some(*v as i64),
            PlcValue::Lreal(v) => Some(*v as i64),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            PlcValue::Real(v) => Some(*v as f64),
            PlcValue::Lreal(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }
}

/// Little-endian decode of one atomic element.
pub fn decode_atomic(type_code: u16, bytes: &[u8]) -> Result<PlcValue, Error> {
    let base = base_type(type_code);
    let need = element_size(type_code);
    if need > 0 && bytes.len() < need {
        return Err(Error::Decode(format!(
            "type 0x{:04X} needs {} bytes, got {}",
            type_code,
            need,
            bytes.len()
        )));
    }
    match base {
        t if t == TYPE_BOOL => Ok(PlcValue::Bool(bytes[0] != 0)),
        t if t == TYPE_SINT => Ok(PlcValue::Sint(bytes[0] as i8)),
        t if t == TYPE_USINT => Ok(PlcValue::Usint(bytes[0])),
        t if t == TYPE_INT => Ok(PlcValue::Int(LittleEndian::read_i16(bytes))),
        t if t == TYPE_UINT => Ok(PlcValue::Uint(LittleEndian::read_u16(bytes))),
        t if t == TYPE_DINT => Ok(PlcValue::Dint(LittleEndian::read_i32(bytes))),
        t if t == TYPE_UDINT => Ok(PlcValue::Udint(LittleEndian::read_u32(bytes))),
        t if t == TYPE_LINT => Ok(PlcValue::Lint(LittleEndian::read_i64(bytes))),
        t if t == TYPE_ULINT => Ok(PlcValue::Ulint(LittleEndian::read_u64(bytes))),
        t if t == TYPE_REAL => Ok(PlcValue::Real(LittleEndian::read_f32(bytes))),
        t if t == TYPE_LREAL => Ok(PlcValue::Lreal(LittleEndian::read_f64(bytes))),
        t if t == TYPE_STRING => decode_string(bytes, 4),
        t if t == TYPE_SHORT_STRING => decode_string(bytes, 1),
        _ => Err(Error::Decode(format!(
            "no atomic decoding for type 0x{:04X}",
            type_code
        ))),
    }
}

// STRING carries a 4-byte length prefix, SHORT_STRING a 1-byte prefix.
// The two are never unified without a type-code check.
fn decode_string(bytes: &[u8], prefix: usize) -> Result<PlcValue, Error> {
    if bytes.len() < prefix {
        return Err(Error::Decode("string shorter than length prefix".to_string()));
    }
    let len = match prefix {
        1 => bytes[0] as usize,
        _ => LittleEndian::read_u32(&bytes[..4]) as usize,
    };
    if bytes.len() < prefix + len {
        return Err(Error::Decode(format!(
            "string claims {} bytes, {} available",
            len,
            bytes.len() - prefix
        )));
    }
    Ok(PlcValue::String(
        String::from_utf8_lossy(&bytes[prefix..prefix + len]).into_owned(),
    ))
}

/// Encode a value as the target type, applying standard truncation and
/// extension rules. Booleans write to integer targets as 1/0; integers
/// write to booleans as nonzero-is-true.
pub fn coerce(value: &PlcValue, target: u16) -> Result<Vec<u8>, Error> {
    if let PlcValue::Array(items) = value {
        let mut out = Vec::new();
        for item in items {
            out.extend_from_slice(&coerce(item, target)?);
        }
        return Ok(out);
    }

    let base = base_type(target);
    let numeric = |v: &PlcValue| {
        v.as_i64().ok_or_else(|| {
            Error::InvalidInput(format!("cannot convert {} to type 0x{:04X}", v, target))
        })
    };
    match base {
        t if t == TYPE_BOOL => Ok(vec![if numeric(value)? != 0 { 0xFF } else { 0x00 }]),
        t if t == TYPE_SINT || t == TYPE_USINT => Ok(vec![numeric(value)? as u8]),
        t if t == TYPE_INT || t == TYPE_UINT => {
            let mut buf = [0u8; 2];
            LittleEndian::write_u16(&mut buf, numeric(value)? as u16);
            Ok(buf.to_vec())
        }
        t if t == TYPE_DINT || t == TYPE_UDINT => {
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, numeric(value)? as u32);
            Ok(buf.to_vec())
        }
        t if t == TYPE_LINT || t == TYPE_ULINT => {
            let mut buf = [0u8; 8];
            LittleEndian::write_u64(&mut buf, numeric(value)? as u64);
            Ok(buf.to_vec())
        }
        t if t == TYPE_REAL => {
            let v = value.as_f64().ok_or_else(|| {
                Error::InvalidInput(format!("cannot convert {} to REAL", value))
            })?;
            let mut buf = [0u8; 4];
            LittleEndian::write_f32(&mut buf, v as f32);
            Ok(buf.to_vec())
        }
        t if t == TYPE_LREAL => {
            let v = value.as_f64().ok_or_else(|| {
                Error::InvalidInput(format!("cannot convert {} to LREAL", value))
            })?;
            let mut buf = [0u8; 8];
            LittleEndian::write_f64(&mut buf, v);
            Ok(buf.to_vec())
        }
        t if t == TYPE_STRING || t == TYPE_SHORT_STRING => match value {
            PlcValue::String(s) => {
                let mut out = Vec::with_capacity(s.len() + 4);
                if base == TYPE_STRING {
                    let mut buf = [0u8; 4];
                    LittleEndian::write_u32(&mut buf, s.len() as u32);
                    out.extend_from_slice(&buf);
                } else {
                    out.push(s.len() as u8);
                }
                out.extend_from_slice(s.as_bytes());
                Ok(out)
            }
            other => Err(Error::InvalidInput(format!(
                "cannot write {} as a string",
                other
            ))),
        },
        _ => Err(Error::InvalidInput(format!(
            "no write encoding for type 0x{:04X}",
            target
        ))),
    }
}

/// Fallback type inference from the caller-supplied value, used when
/// neither a template member nor a discovered type code names the target.
pub fn infer_type(value: &PlcValue) -> Result<u16, Error> {
    match value {
        PlcValue::Bool(_) => Ok(TYPE_BOOL),
        PlcValue::Sint(_) => Ok(TYPE_SINT),
        PlcValue::Int(_) => Ok(TYPE_INT),
        PlcValue::Dint(_) => Ok(TYPE_DINT),
        PlcValue::Lint(_) => Ok(TYPE_LINT),
        PlcValue::Usint(_) => Ok(TYPE_USINT),
        PlcValue::Uint(_) => Ok(TYPE_UINT),
        PlcValue::Udint(_) => Ok(TYPE_UDINT),
        PlcValue::Ulint(_) => Ok(TYPE_ULINT),
        PlcValue::Real(_) => Ok(TYPE_REAL),
        PlcValue::Lreal(_) => Ok(TYPE_LREAL),
        PlcValue::String(_) => Ok(TYPE_STRING),
        PlcValue::Array(items) => items
            .first()
            .ok_or_else(|| Error::InvalidInput("cannot infer type of an empty array".to_string()))
            .and_then(infer_type),
        PlcValue::Structure(_) => Err(Error::InvalidInput(
            "whole-structure writes need a named member path".to_string(),
        )),
    }
}

/// An undecoded read result. Decoding is a separate step consuming the
/// template cache; the bytes stay little-endian as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagValue {
    pub name: String,
    pub type_code: u16,
    pub bytes: Vec<u8>,
    pub element_count: u16,
    pub error: Option<String>,
}

impl TagValue {
    pub fn failed(name: &str, error: String) -> TagValue {
        TagValue {
            name: name.to_string(),
            type_code: 0,
            bytes: Vec::new(),
            element_count: 0,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Decode against the template cache. A top-level structure read
    /// carries a 2-byte structure handle that is stripped here.
    pub fn decode(&self, templates: &TemplateCache) -> Result<PlcValue, Error> {
        if let Some(error) = &self.error {
            return Err(Error::Decode(error.clone()));
        }
        super::template::decode_value(templates, self.type_code, self.element_count, &self.bytes)
    }
}
