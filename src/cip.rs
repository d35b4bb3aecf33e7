// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! CIP request/reply codec and the envelope dispatcher
//!
//! Every CIP request travels in one of three envelopes: connected (with a
//! sequence prefix, via SendUnitData), routed unconnected (wrapped in an
//! Unconnected_Send to the Connection Manager, via SendRRData), or direct
//! unconnected. The envelope is chosen once per request from session state.

use super::connection::Connection;
use super::constant::*;
use super::cpf;
use super::epath::EPath;
use super::error::Error;
use super::transport::Transport;
use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

/// service(1) | path_size_words(1) | path(n) | service_data(n)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub service: u8,
    pub path: EPath,
    pub data: Vec<u8>,
}

impl Request {
    pub fn new(service: u8, path: EPath) -> Request {
        Request {
            service,
            path,
            data: Vec::new(),
        }
    }

    pub fn with_data(service: u8, path: EPath, data: Vec<u8>) -> Request {
        Request {
            service,
            path,
            data,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.path.as_bytes().len() + self.data.len());
        out.push(self.service);
        out.push(self.path.word_len());
        out.extend_from_slice(self.path.as_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

/// reply_service(1) | reserved(1) | status(1) | ext_words(1) | ext(n*2) | data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub service: u8,
    pub status: u8,
    pub extended: Vec<u16>,
    pub data: Vec<u8>,
}

impl Reply {
    pub fn decode(bytes: &[u8]) -> Result<Reply, Error> {
        if bytes.len() < 4 {
            return Err(Error::Protocol("CIP reply shorter than header".to_string()));
        }
        let ext_words = bytes[3] as usize;
        if bytes.len() < 4 + ext_words * 2 {
            return Err(Error::Protocol(
                "CIP reply extended status truncated".to_string(),
            ));
        }
        let mut extended = Vec::with_capacity(ext_words);
        for i in 0..ext_words {
            extended.push(LittleEndian::read_u16(&bytes[4 + i * 2..6 + i * 2]));
        }
        Ok(Reply {
            service: bytes[0],
            status: bytes[2],
            extended,
            data: bytes[4 + ext_words * 2..].to_vec(),
        })
    }

    /// Framing check: a reply must echo the request service with the high
    /// bit set.
    pub fn check_service(&self, request_service: u8) -> Result<(), Error> {
        if self.service != request_service | REPLY_MASK {
            return Err(Error::Protocol(format!(
                "reply service 0x{:02X} does not match request 0x{:02X}",
                self.service, request_service
            )));
        }
        Ok(())
    }

    pub fn status_error(&self) -> Error {
        Error::cip(self.status, self.extended.first().copied())
    }

    /// Success, or partial transfer for services that page.
    pub fn is_ok_or_partial(&self) -> bool {
        self.status == STATUS_OK || self.status == STATUS_PARTIAL_TRANSFER
    }
}

pub enum Envelope<'a> {
    Connected { connection: &'a mut Connection },
    RoutedUcmm { route: &'a [u8] },
    Direct,
}

/// Send one CIP request in the given envelope and peel the reply down to
/// the embedded service reply, verified against the request service.
pub fn send<T: Transport>(
    transport: &mut T,
    envelope: Envelope,
    request: &Request,
) -> Result<Reply, Error> {
    match envelope {
        Envelope::Connected { connection } => {
            let sequence = connection.next_sequence();
            trace!(service = request.service, sequence, "connected send");
            let mut body = vec![0u8; 2];
            LittleEndian::write_u16(&mut body, sequence);
            body.extend_from_slice(&request.encode());

            let frame = cpf::encode(&[
                cpf::Item::connected_address(connection.ot_connection_id),
                cpf::Item::connected_data(body),
            ]);
            let response = transport.send_unit_data(&frame)?;
            let items = cpf::decode(&response)?;
            let item = cpf::find(&items, CPF_CONNECTED_DATA)?;
            if item.data.len() < 2 {
                return Err(Error::Protocol(
                    "connected reply shorter than sequence".to_string(),
                ));
            }
            let echoed = LittleEndian::read_u16(&item.data[..2]);
            if echoed != sequence {
                return Err(Error::Protocol(format!(
                    "connected sequence mismatch: sent {}, received {}",
                    sequence, echoed
                )));
            }
            let reply = Reply::decode(&item.data[2..])?;
            reply.check_service(request.service)?;
            Ok(reply)
        }
        Envelope::RoutedUcmm { route } => {
            trace!(service = request.service, "routed unconnected send");
            let outer = unconnected_send(request, route);
            let frame = cpf::encode(&[
                cpf::Item::null_address(),
                cpf::Item::unconnected_data(outer.encode()),
            ]);
            let response = transport.send_rr_data(&frame)?;
            let items = cpf::decode(&response)?;
            let item = cpf::find(&items, CPF_UNCONNECTED_DATA)?;
            let wrapper = Reply::decode(&item.data)?;
            wrapper.check_service(SVC_UNCONNECTED_SEND)?;
            if wrapper.status != STATUS_OK {
                return Err(wrapper.status_error());
            }
            let reply = Reply::decode(&wrapper.data)?;
            reply.check_service(request.service)?;
            Ok(reply)
        }
        Envelope::Direct => {
            trace!(service = request.service, "direct unconnected send");
            let frame = cpf::encode(&[
                cpf::Item::null_address(),
                cpf::Item::unconnected_data(request.encode()),
            ]);
            let response = transport.send_rr_data(&frame)?;
            let items = cpf::decode(&response)?;
            let item = cpf::find(&items, CPF_UNCONNECTED_DATA)?;
            let reply = Reply::decode(&item.data)?;
            reply.check_service(request.service)?;
            Ok(reply)
        }
    }
}

/// Wrap a request in an Unconnected_Send to the Connection Manager.
///
/// priority_tick(1) | timeout_ticks(1) | embedded_size(2) | embedded(n) |
/// pad_to_even | route_words(1) | reserved(1) | route_path(n)
pub fn unconnected_send(request: &Request, route: &[u8]) -> Request {
    let embedded = request.encode();
    let mut data = Vec::with_capacity(embedded.len() + route.len() + 8);
    data.push(PRIORITY_TICK_TIME);
    data.push(TIMEOUT_TICKS);
    let mut size = [0u8; 2];
    LittleEndian::write_u16(&mut size, embedded.len() as u16);
    data.extend_from_slice(&size);
    data.extend_from_slice(&embedded);
    if embedded.len() % 2 != 0 {
        data.push(0x00);
    }
    let mut route = route.to_vec();
    if route.len() % 2 != 0 {
        route.push(0x00);
    }
    data.push((route.len() / 2) as u8);
    data.push(0x00);
    data.extend_from_slice(&route);

    Request::with_data(
        SVC_UNCONNECTED_SEND,
        EPath::object(CLASS_CONNECTION_MANAGER, 1),
        data,
    )
}

/// Pack embedded requests into a Multiple Service Packet against the
/// Message Router.
///
/// service_count(2) | offsets[count](2 each, from the count field) | bodies
pub fn multiple_service(requests: &[Request]) -> Request {
    let bodies: Vec<Vec<u8>> = requests.iter().map(Request::encode).collect();
    let count = bodies.len();
    let mut data = Vec::new();
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, count as u16);
    data.extend_from_slice(&buf);

    let mut offset = 2 + 2 * count;
    for body in &bodies {
        LittleEndian::write_u16(&mut buf, offset as u16);
        data.extend_from_slice(&buf);
        offset += body.len();
    }
    for body in &bodies {
        data.extend_from_slice(body);
    }

    Request::with_data(
        SVC_MULTIPLE_SERVICE,
        EPath::object(CLASS_MESSAGE_ROUTER, 1),
        data,
    )
}

/// Split an MSP reply into its embedded replies, in submission order.
pub fn split_multiple(data: &[u8]) -> Result<Vec<Reply>, Error> {
    if data.len() < 2 {
        return Err(Error::Protocol("MSP reply missing count".to_string()));
    }
    let count = LittleEndian::read_u16(&data[..2]) as usize;
    if data.len() < 2 + 2 * count {
        return Err(Error::Protocol("MSP reply offset table truncated".to_string()));
    }
    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        offsets.push(LittleEndian::read_u16(&data[2 + i * 2..4 + i * 2]) as usize);
    }
    let mut replies = Vec::with_capacity(count);
    for i in 0..count {
        let start = offsets[i];
        let end = if i + 1 < count {
            offsets[i + 1]
        } else {
            data.len()
        };
        if start > end || end > data.len() {
            return Err(Error::Protocol(format!(
                "MSP reply offset {} out of bounds",
                start
            )));
        }
        replies.push(Reply::decode(&data[start..end])?);
    }
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_tag_request_bytes() {
        // ReadTag "Counter", one element
        let mut data = vec![0u8; 2];
        LittleEndian::write_u16(&mut data, 1);
        let request =
            Request::with_data(SVC_READ_TAG, EPath::parse_tag("Counter").unwrap(), data);
        assert_eq!(
            request.encode(),
            vec![
                0x4C, 0x05, 0x91, 0x07, b'C', b'o', b'u', b'n', b't', b'e', b'r', 0x00, 0x01,
                0x00
            ]
        );
    }

    #[test]
    fn test_reply_decode() {
        let reply = Reply::decode(&[0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00, 0x2A, 0x00, 0x00, 0x00])
            .unwrap();
        assert_eq!(reply.service, 0xCC);
        assert_eq!(reply.status, 0);
        assert!(reply.extended.is_empty());
        assert_eq!(reply.data, vec![0xC4, 0x00, 0x2A, 0x00, 0x00, 0x00]);
        assert!(reply.check_service(SVC_READ_TAG).is_ok());
        assert!(reply.check_service(SVC_WRITE_TAG).is_err());
    }

    #[test]
    fn test_reply_decode_extended() {
        let reply = Reply::decode(&[0xD4, 0x00, 0x01, 0x01, 0x09, 0x01]).unwrap();
        assert_eq!(reply.status, 0x01);
        assert_eq!(reply.extended, vec![0x0109]);
        assert!(reply.data.is_empty());
        assert_eq!(
            reply.status_error().to_string(),
            "CIP status 0x01 Connection failure (0x0109 Invalid connection size)"
        );
    }

    #[test]
    fn test_unconnected_send_pads_odd_embedded() {
        // ReadTag "Vec" is 4C 03 91 03 'V' 'e' 'c' 00 + 01 00 = 10 bytes, even
        let mut inner = Request::new(SVC_READ_TAG, EPath::parse_tag("Vec").unwrap());
        inner.data = vec![0x01];
        let embedded = inner.encode();
        assert_eq!(embedded.len() % 2, 1);

        let outer = unconnected_send(&inner, &[0x01, 0x00]);
        assert_eq!(outer.service, SVC_UNCONNECTED_SEND);
        assert_eq!(outer.path, EPath::object(CLASS_CONNECTION_MANAGER, 1));
        assert_eq!(outer.data[0], PRIORITY_TICK_TIME);
        assert_eq!(outer.data[1], TIMEOUT_TICKS);
        assert_eq!(
            LittleEndian::read_u16(&outer.data[2..4]) as usize,
            embedded.len()
        );
        // pad byte after the odd embedded message, then one-word route
        let tail = &outer.data[4 + embedded.len()..];
        assert_eq!(tail, &[0x00, 0x01, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_multiple_service_offsets() {
        let requests: Vec<Request> = ["A", "B", "C"]
            .iter()
            .map(|name| {
                Request::with_data(
                    SVC_READ_TAG,
                    EPath::parse_tag(name).unwrap(),
                    vec![0x01, 0x00],
                )
            })
            .collect();
        let msp = multiple_service(&requests);
        assert_eq!(msp.service, SVC_MULTIPLE_SERVICE);
        assert_eq!(msp.path, EPath::object(CLASS_MESSAGE_ROUTER, 1));

        let data = &msp.data;
        assert_eq!(LittleEndian::read_u16(&data[..2]), 3);
        // each body is 4C 02 91 01 'X' 00 01 00 = 8 bytes
        assert_eq!(LittleEndian::read_u16(&data[2..4]), 8);
        assert_eq!(LittleEndian::read_u16(&data[4..6]), 16);
        assert_eq!(LittleEndian::read_u16(&data[6..8]), 24);
        assert_eq!(data.len(), 8 + 24);
    }

    #[test]
    fn test_split_multiple_with_embedded_failure() {
        // two embedded replies: a DINT success and a tag-not-found
        let ok = vec![0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00, 0x05, 0x00, 0x00, 0x00];
        let failed = vec![0xCC, 0x00, 0x05, 0x01, 0x00, 0x00];
        let mut data = Vec::new();
        data.extend_from_slice(&[0x02, 0x00]);
        data.extend_from_slice(&[0x06, 0x00]); // offsets from the count field
        data.extend_from_slice(&[0x10, 0x00]);
        data.extend_from_slice(&ok);
        data.extend_from_slice(&failed);

        let replies = split_multiple(&data).unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].status, 0x00);
        assert_eq!(replies[0].data, vec![0xC4, 0x00, 0x05, 0x00, 0x00, 0x00]);
        assert_eq!(replies[1].status, 0x05);
        assert_eq!(replies[1].extended, vec![0x0000]);
    }

    #[test]
    fn test_split_multiple_bad_offsets() {
        let data = vec![0x01, 0x00, 0xFF, 0x00];
        assert!(split_multiple(&data).is_err());
    }
}
