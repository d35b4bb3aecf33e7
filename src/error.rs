// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use std::fmt;
use std::io::{Error as IoError, ErrorKind};
use thiserror::Error;

/// A CIP general status with its optional first extended status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipStatus {
    pub status: u8,
    pub extended: Option<u16>,
}

impl CipStatus {
    pub fn new(status: u8, extended: Option<u16>) -> CipStatus {
        CipStatus { status, extended }
    }
}

impl fmt::Display for CipStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:02X} {}", self.status, status_text(self.status))?;
        if let Some(ext) = self.extended {
            write!(f, " (0x{:04X} {})", ext, extended_status_text(ext))?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// TCP failure, timeout or short read. The session is no longer usable.
    #[error("transport error: {0}")]
    Transport(#[from] IoError),

    /// Unexpected reply service, truncated frame or mismatched handle.
    /// The session is no longer usable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Nonzero status in an ENIP encapsulation header.
    #[error("encapsulation status 0x{0:08X}")]
    Encapsulation(u32),

    /// Non-success status in a CIP reply. The session remains usable.
    #[error("CIP status {0}")]
    Cip(CipStatus),

    /// Insufficient bytes for a claimed type, or a missing template.
    /// Affects the requested tag only.
    #[error("decode error: {0}")]
    Decode(String),

    /// A template that previously failed to parse, or whose id is invalid.
    #[error("template 0x{id:03X}: {reason}")]
    Template { id: u16, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("lock error: panicked")]
    Lock,
}

impl Error {
    pub fn cip(status: u8, extended: Option<u16>) -> Error {
        Error::Cip(CipStatus::new(status, extended))
    }

    /// Transient failures are not cached by the template engine so a
    /// reconnect reprobes them.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::WouldBlock
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ),
            Error::Protocol(_) | Error::Encapsulation(_) => true,
            _ => false,
        }
    }
}

// general status to message, per the CIP common status code table
pub fn status_text(status: u8) -> &'static str {
    match status {
        0x00 => "Success",
        0x01 => "Connection failure",
        0x02 => "Resource unavailable",
        0x03 => "Invalid parameter value",
        0x04 => "Path segment error",
        0x05 => "Path destination unknown (tag not found)",
        0x06 => "Partial transfer",
        0x07 => "Connection lost",
        0x08 => "Service not supported",
        0x09 => "Invalid attribute value",
        0x0A => "Attribute list error",
        0x0B => "Already in requested mode",
        0x0C => "Object state conflict",
        0x0D => "Object already exists",
        0x0E => "Attribute not settable (read-only)",
        0x0F => "Privilege violation",
        0x10 => "Device state conflict",
        0x11 => "Reply data too large",
        0x13 => "Not enough data",
        0x14 => "Attribute not supported",
        0x15 => "Too much data",
        0x1A => "Bridge request too large",
        0x1B => "Bridge response too large",
        0x1C => "Missing attribute list entry",
        0x1D => "Invalid attribute value list",
        0x1E => "Embedded service error",
        0x1F => "Vendor specific error",
        0x20 => "Invalid parameter",
        0x26 => "Path size invalid",
        0xFF => "General error",
        _ => "Unknown status",
    }
}

// extended status to message, Connection Manager and Logix-specific codes
pub fn extended_status_text(extended: u16) -> &'static str {
    match extended {
        0x0100 => "Connection in use or duplicate Forward Open",
        0x0103 => "Transport class and trigger not supported",
        0x0106 => "Ownership conflict",
        0x0107 => "Connection not found",
        0x0108 => "Invalid connection type",
        0x0109 => "Invalid connection size",
        0x0111 => "RPI not supported",
        0x0113 => "Out of connections",
        0x0203 => "Connection timed out",
        0x0204 => "Unconnected request timed out",
        0x0205 => "Unconnected send parameter error",
        0x0301 => "No buffer memory available",
        0x0311 => "Invalid port in path",
        0x0312 => "Invalid link address in path",
        0x0315 => "Invalid segment type in path",
        0x2104 => "Offset out of range",
        0x2105 => "Offset and elements extend beyond the end of the tag (size too large)",
        0x2107 => "Abbreviated type does not match the tag (size too small or wrong type)",
        _ => "Unknown extended status",
    }
}
