// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

// ENIP encapsulation commands
pub const ENIP_LIST_IDENTITY: u16 = 0x0063;
pub const ENIP_REGISTER_SESSION: u16 = 0x0065;
pub const ENIP_UNREGISTER_SESSION: u16 = 0x0066;
pub const ENIP_SEND_RR_DATA: u16 = 0x006F;
pub const ENIP_SEND_UNIT_DATA: u16 = 0x0070;

/// TCP and UDP port registered for EtherNet/IP explicit messaging.
pub const ENIP_PORT: u16 = 44818;

// CPF item type ids
pub const CPF_NULL_ADDRESS: u16 = 0x0000;
pub const CPF_IDENTITY_RESPONSE: u16 = 0x000C;
pub const CPF_CONNECTED_ADDRESS: u16 = 0x00A1;
pub const CPF_CONNECTED_DATA: u16 = 0x00B1;
pub const CPF_UNCONNECTED_DATA: u16 = 0x00B2;

// CIP service codes
pub const SVC_GET_ATTRIBUTE_LIST: u8 = 0x03;
pub const SVC_MULTIPLE_SERVICE: u8 = 0x0A;
pub const SVC_GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
pub const SVC_NOP: u8 = 0x17;
pub const SVC_READ_TAG: u8 = 0x4C; // ReadTemplate on the Template object
pub const SVC_WRITE_TAG: u8 = 0x4D;
pub const SVC_FORWARD_CLOSE: u8 = 0x4E;
pub const SVC_READ_TAG_FRAGMENTED: u8 = 0x52;
pub const SVC_UNCONNECTED_SEND: u8 = 0x52; // same code, Connection Manager context
pub const SVC_FORWARD_OPEN: u8 = 0x54;
pub const SVC_GET_INSTANCE_ATTRIBUTE_LIST: u8 = 0x55;
pub const SVC_LARGE_FORWARD_OPEN: u8 = 0x5B;

/// Set in the service byte of every CIP reply.
pub const REPLY_MASK: u8 = 0x80;

// CIP object classes
pub const CLASS_IDENTITY: u16 = 0x01;
pub const CLASS_MESSAGE_ROUTER: u16 = 0x02;
pub const CLASS_CONNECTION_MANAGER: u16 = 0x06;
pub const CLASS_SYMBOL: u16 = 0x6B;
pub const CLASS_TEMPLATE: u16 = 0x6C;

// CIP general status
pub const STATUS_OK: u8 = 0x00;
pub const STATUS_PARTIAL_TRANSFER: u8 = 0x06;
pub const STATUS_SERVICE_NOT_SUPPORTED: u8 = 0x08;
pub const STATUS_EMBEDDED_SERVICE_ERROR: u8 = 0x1E;

// Atomic type codes
pub const TYPE_BOOL: u16 = 0x00C1;
pub const TYPE_SINT: u16 = 0x00C2;
pub const TYPE_INT: u16 = 0x00C3;
pub const TYPE_DINT: u16 = 0x00C4;
pub const TYPE_LINT: u16 = 0x00C5;
pub const TYPE_USINT: u16 = 0x00C6;
pub const TYPE_UINT: u16 = 0x00C7;
pub const TYPE_UDINT: u16 = 0x00C8;
pub const TYPE_ULINT: u16 = 0x00C9;
pub const TYPE_REAL: u16 = 0x00CA;
pub const TYPE_LREAL: u16 = 0x00CB;
pub const TYPE_STRING: u16 = 0x00D0;
pub const TYPE_SHORT_STRING: u16 = 0x00DA;

/// Marker carried in the type field of a read reply when the payload is a
/// structure; the structure handle follows it.
pub const TYPE_STRUCT_MARKER: u16 = 0x02A0;

// Type code bit layout: bit 15 structure, bits 14-13 array rank,
// bit 12 system, bits 11-0 base type or template instance id.
pub const TYPE_STRUCT_BIT: u16 = 0x8000;
pub const TYPE_DIM_MASK: u16 = 0x6000;
pub const TYPE_SYSTEM_BIT: u16 = 0x1000;
pub const TYPE_ID_MASK: u16 = 0x0FFF;

pub fn is_struct(type_code: u16) -> bool {
    type_code & TYPE_STRUCT_BIT != 0
}

pub fn is_system_type(type_code: u16) -> bool {
    type_code & TYPE_SYSTEM_BIT != 0
}

/// Array rank encoded in bits 14-13: 0 scalar, 1..3 dimensions.
pub fn array_rank(type_code: u16) -> u8 {
    ((type_code & TYPE_DIM_MASK) >> 13) as u8
}

/// Template instance id of a structure type code.
pub fn template_id(type_code: u16) -> u16 {
    type_code & TYPE_ID_MASK
}

pub fn base_type(type_code: u16) -> u16 {
    type_code & TYPE_ID_MASK
}

// element size in bytes of a fixed-width atomic, 0 for structures and strings
pub fn element_size(type_code: u16) -> usize {
    if is_struct(type_code) {
        return 0;
    }
    match base_type(type_code) {
        t if t == TYPE_BOOL || t == TYPE_SINT || t == TYPE_USINT => 1,
        t if t == TYPE_INT || t == TYPE_UINT => 2,
        t if t == TYPE_DINT || t == TYPE_UDINT || t == TYPE_REAL => 4,
        t if t == TYPE_LINT || t == TYPE_ULINT || t == TYPE_LREAL => 8,
        _ => 0,
    }
}

// Connected messaging parameters (Forward Open)
pub const PAYLOAD_STANDARD: u16 = 504;
pub const PAYLOAD_LARGE: u16 = 4002;
pub const VENDOR_ID: u16 = 0x1009;
pub const ORIGINATOR_SERIAL: u32 = 0x3141_5926;
pub const PRIORITY_TICK_TIME: u8 = 0x0A;
pub const TIMEOUT_TICKS: u8 = 0x05;
pub const TIMEOUT_MULTIPLIER: u8 = 0x01;
/// Class 3, server, application triggered.
pub const TRANSPORT_CLASS_TRIGGER: u8 = 0xA3;
/// Requested packet interval in microseconds, both directions.
pub const RPI_MICROS: u32 = 2_000_000;

/// Hard page cap for symbol table enumeration.
pub const SYMBOL_PAGE_CAP: usize = 1000;

// Multiple Service Packet batch limits
pub const MSP_BATCH_CONNECTED: usize = 50;
pub const MSP_BATCH_UNCONNECTED: usize = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_code_bits() {
        // REAL[2] in a 2-D array: struct bit clear, rank 2
        let t = TYPE_REAL | 0x4000;
        assert!(!is_struct(t));
        assert_eq!(array_rank(t), 2);
        assert_eq!(base_type(t), TYPE_REAL);

        // structure with template id 0x20
        let s = TYPE_STRUCT_BIT | 0x0020;
        assert!(is_struct(s));
        assert_eq!(template_id(s), 0x0020);
        assert_eq!(array_rank(s), 0);

        assert!(is_system_type(0x1068));
        assert!(!is_system_type(TYPE_DINT));
    }

    #[test]
    fn test_element_size() {
        assert_eq!(element_size(TYPE_BOOL), 1);
        assert_eq!(element_size(TYPE_INT), 2);
        assert_eq!(element_size(TYPE_DINT), 4);
        assert_eq!(element_size(TYPE_REAL), 4);
        assert_eq!(element_size(TYPE_LREAL), 8);
        // arrays keep the element size of their base type
        assert_eq!(element_size(TYPE_DINT | 0x2000), 4);
        // structures have no fixed width
        assert_eq!(element_size(TYPE_STRUCT_BIT | 0x0020), 0);
        assert_eq!(element_size(TYPE_STRING), 0);
    }
}
