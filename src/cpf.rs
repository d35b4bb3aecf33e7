// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Common Packet Format item lists carried by SendRRData and SendUnitData

use super::constant::*;
use super::error::Error;
use byteorder::{ByteOrder, LittleEndian};

/// One tagged byte container inside a CPF list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub type_id: u16,
    pub data: Vec<u8>,
}

impl Item {
    pub fn null_address() -> Item {
        Item {
            type_id: CPF_NULL_ADDRESS,
            data: Vec::new(),
        }
    }

    pub fn connected_address(connection_id: u32) -> Item {
        let mut data = vec![0u8; 4];
        LittleEndian::write_u32(&mut data, connection_id);
        Item {
            type_id: CPF_CONNECTED_ADDRESS,
            data,
        }
    }

    pub fn connected_data(data: Vec<u8>) -> Item {
        Item {
            type_id: CPF_CONNECTED_DATA,
            data,
        }
    }

    pub fn unconnected_data(data: Vec<u8>) -> Item {
        Item {
            type_id: CPF_UNCONNECTED_DATA,
            data,
        }
    }
}

pub fn encode(items: &[Item]) -> Vec<u8> {
    let mut out = vec![0u8; 2];
    LittleEndian::write_u16(&mut out, items.len() as u16);
    for item in items {
        let mut head = [0u8; 4];
        LittleEndian::write_u16(&mut head[..2], item.type_id);
        LittleEndian::write_u16(&mut head[2..], item.data.len() as u16);
        out.extend_from_slice(&head);
        out.extend_from_slice(&item.data);
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Vec<Item>, Error> {
    if bytes.len() < 2 {
        return Err(Error::Protocol("CPF shorter than item count".to_string()));
    }
    let count = LittleEndian::read_u16(&bytes[..2]) as usize;
    let mut items = Vec::with_capacity(count);
    let mut at = 2usize;
    for _ in 0..count {
        if bytes.len() < at + 4 {
            return Err(Error::Protocol("truncated CPF item header".to_string()));
        }
        let type_id = LittleEndian::read_u16(&bytes[at..at + 2]);
        let len = LittleEndian::read_u16(&bytes[at + 2..at + 4]) as usize;
        at += 4;
        if bytes.len() < at + len {
            return Err(Error::Protocol("truncated CPF item payload".to_string()));
        }
        items.push(Item {
            type_id,
            data: bytes[at..at + len].to_vec(),
        });
        at += len;
    }
    Ok(items)
}

/// The first item of the given type, or a protocol error naming it.
pub fn find(items: &[Item], type_id: u16) -> Result<&Item, Error> {
    items
        .iter()
        .find(|item| item.type_id == type_id)
        .ok_or_else(|| Error::Protocol(format!("CPF item 0x{:04X} missing from reply", type_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_unconnected() {
        let cpf = encode(&[
            Item::null_address(),
            Item::unconnected_data(vec![0x4C, 0x02]),
        ]);
        assert_eq!(
            cpf,
            vec![
                0x02, 0x00, // two items
                0x00, 0x00, 0x00, 0x00, // null address
                0xB2, 0x00, 0x02, 0x00, 0x4C, 0x02, // unconnected data
            ]
        );
    }

    #[test]
    fn test_encode_connected() {
        let cpf = encode(&[
            Item::connected_address(0x00AA_BB01),
            Item::connected_data(vec![0x01, 0x00]),
        ]);
        assert_eq!(
            cpf,
            vec![
                0x02, 0x00, //
                0xA1, 0x00, 0x04, 0x00, 0x01, 0xBB, 0xAA, 0x00, //
                0xB1, 0x00, 0x02, 0x00, 0x01, 0x00,
            ]
        );
    }

    #[test]
    fn test_roundtrip() {
        let items = vec![
            Item::connected_address(7),
            Item::connected_data(vec![1, 2, 3, 4, 5]),
        ];
        let decoded = decode(&encode(&items)).unwrap();
        assert_eq!(decoded, items);
        assert_eq!(
            find(&decoded, CPF_CONNECTED_DATA).unwrap().data,
            vec![1, 2, 3, 4, 5]
        );
        assert!(find(&decoded, CPF_UNCONNECTED_DATA).is_err());
    }

    #[test]
    fn test_decode_truncated() {
        let mut cpf = encode(&[Item::unconnected_data(vec![0u8; 8])]);
        cpf.truncate(cpf.len() - 2);
        assert!(decode(&cpf).is_err());
        assert!(decode(&[0x01]).is_err());
    }
}
