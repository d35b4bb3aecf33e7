// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Forward Open / Forward Close lifecycle of the explicit messaging circuit

use super::cip::{self, Envelope, Request};
use super::constant::*;
use super::epath::EPath;
use super::error::Error;
use super::transport::Transport;
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, warn};

/// An open explicit messaging circuit. Created by Forward Open, destroyed
/// by Forward Close or session teardown.
#[derive(Debug, Clone)]
pub struct Connection {
    pub ot_connection_id: u32,
    pub to_connection_id: u32,
    pub serial: u16,
    /// negotiated max payload: 504 standard, 4002 large
    pub size: u16,
    sequence: u16,
}

impl Connection {
    /// The next outgoing sequence number, pre-incremented and wrapping at
    /// 2^16. The first connected send carries 1. Wrapping is not desync;
    /// replies are compared for equality modulo 2^16.
    pub fn next_sequence(&mut self) -> u16 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }
}

/// Open a circuit, trying Large Forward Open first and falling back to a
/// Standard Forward Open exactly once when the large attempt is rejected
/// with a classifying status. A fresh connection serial is used per attempt.
pub fn forward_open<T: Transport>(
    transport: &mut T,
    route: &[u8],
    serial: u16,
) -> Result<Connection, Error> {
    match forward_open_sized(transport, route, serial, true) {
        Ok(connection) => Ok(connection),
        Err(Error::Cip(status)) => {
            warn!(%status, "large Forward Open rejected, retrying standard");
            forward_open_sized(transport, route, serial.wrapping_add(1), false)
        }
        Err(e) => Err(e),
    }
}

fn forward_open_sized<T: Transport>(
    transport: &mut T,
    route: &[u8],
    serial: u16,
    large: bool,
) -> Result<Connection, Error> {
    let (service, size) = if large {
        (SVC_LARGE_FORWARD_OPEN, PAYLOAD_LARGE)
    } else {
        (SVC_FORWARD_OPEN, PAYLOAD_STANDARD)
    };

    let mut data = Vec::with_capacity(40 + route.len());
    data.push(PRIORITY_TICK_TIME);
    data.push(TIMEOUT_TICKS);
    push_u32(&mut data, 0); // O->T id, assigned by the target
    push_u32(&mut data, 0x0001_0000 | serial as u32); // T->O id, ours
    push_u16(&mut data, serial);
    push_u16(&mut data, VENDOR_ID);
    push_u32(&mut data, ORIGINATOR_SERIAL);
    data.push(TIMEOUT_MULTIPLIER);
    data.extend_from_slice(&[0x00, 0x00, 0x00]); // reserved
    push_u32(&mut data, RPI_MICROS);
    push_params(&mut data, size, large);
    push_u32(&mut data, RPI_MICROS);
    push_params(&mut data, size, large);
    data.push(TRANSPORT_CLASS_TRIGGER);

    // connection path: route to the target, then Message Router 2/1
    let mut path = route.to_vec();
    path.extend_from_slice(&[0x20, 0x02, 0x24, 0x01]);
    data.push((path.len() / 2) as u8);
    data.extend_from_slice(&path);

    let request = Request::with_data(service, EPath::object(CLASS_CONNECTION_MANAGER, 1), data);
    let reply = cip::send(transport, Envelope::Direct, &request)?;
    if reply.status != STATUS_OK {
        return Err(reply.status_error());
    }
    if reply.data.len() < 26 {
        return Err(Error::Protocol("Forward Open reply too short".to_string()));
    }

    let ot_connection_id = LittleEndian::read_u32(&reply.data[0..4]);
    let to_connection_id = LittleEndian::read_u32(&reply.data[4..8]);
    let echoed_serial = LittleEndian::read_u16(&reply.data[8..10]);
    if echoed_serial != serial {
        return Err(Error::Protocol(format!(
            "Forward Open echoed serial {} instead of {}",
            echoed_serial, serial
        )));
    }

    info!(
        ot = ot_connection_id,
        to = to_connection_id,
        serial,
        size,
        "circuit opened"
    );
    Ok(Connection {
        ot_connection_id,
        to_connection_id,
        serial,
        size,
        sequence: 0,
    })
}

/// Best-effort circuit teardown; the caller logs failure and proceeds.
pub fn forward_close<T: Transport>(
    transport: &mut T,
    route: &[u8],
    connection: &Connection,
) -> Result<(), Error> {
    let mut data = Vec::with_capacity(16 + route.len());
    data.push(PRIORITY_TICK_TIME);
    data.push(TIMEOUT_TICKS);
    push_u16(&mut data, connection.serial);
    push_u16(&mut data, VENDOR_ID);
    push_u32(&mut data, ORIGINATOR_SERIAL);

    let mut path = route.to_vec();
    path.extend_from_slice(&[0x20, 0x02, 0x24, 0x01]);
    data.push((path.len() / 2) as u8);
    data.push(0x00); // reserved
    data.extend_from_slice(&path);

    let request = Request::with_data(
        SVC_FORWARD_CLOSE,
        EPath::object(CLASS_CONNECTION_MANAGER, 1),
        data,
    );
    let reply = cip::send(transport, Envelope::Direct, &request)?;
    if reply.status != STATUS_OK {
        return Err(reply.status_error());
    }
    debug!(serial = connection.serial, "circuit closed");
    Ok(())
}

/// A CIP NOP to the Identity object, proving the circuit alive. The reply
/// must be success or service-not-supported.
pub fn keepalive_request() -> Request {
    Request::new(SVC_NOP, EPath::object(CLASS_IDENTITY, 1))
}

pub fn keepalive_ok(status: u8) -> bool {
    status == STATUS_OK || status == STATUS_SERVICE_NOT_SUPPORTED
}

// network connection parameters: u16 for standard, u32 for large.
// variable size, class 3, owned: 0x42 in the high byte of the u16 form.
fn push_params(data: &mut Vec<u8>, size: u16, large: bool) {
    if large {
        push_u32(data, 0x4200_0000 | size as u32);
    } else {
        push_u16(data, 0x4200 | size);
    }
}

fn push_u16(data: &mut Vec<u8>, value: u16) {
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, value);
    data.extend_from_slice(&buf);
}

fn push_u32(data: &mut Vec<u8>, value: u32) {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, value);
    data.extend_from_slice(&buf);
}
