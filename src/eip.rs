// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! ENIP encapsulation transport over TCP, plus ListIdentity discovery

use super::constant::*;
use super::cpf;
use super::error::Error;
use super::transport::Transport as PackTrait;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, TcpStream, UdpSocket};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default TCP timeout
pub const TIMEOUT: Duration = Duration::from_secs(10);
/// Default ListIdentity broadcast collection window
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(1);

const HEADER_SIZE: usize = 24;
// encapsulation timeout field, seconds; zero for connected traffic
const RR_TIMEOUT_SECS: u16 = 10;

pub struct Transport {
    options: Options,
    stream: Mutex<TcpStream>,
    session: u32,
    // sender context, stamped into every frame
    context: u64,
}

/// a set of options for the TCP connection
#[derive(Debug, Clone)]
pub struct Options {
    pub connection_timeout: Option<Duration>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    address: String,
    /// backplane slot of the CPU, used for the default route path
    pub slot: u8,
    /// explicit route path overriding the backplane default
    pub route: Option<Vec<u8>>,
    /// register the session but never attempt a Forward Open
    pub skip_forward_open: bool,
    /// Micro800 targets take an empty route and no Forward Open
    pub micro800: bool,
}

impl Options {
    pub fn new(address: IpAddr, slot: u8) -> Options {
        Options {
            connection_timeout: None,
            read_timeout: TIMEOUT,
            write_timeout: TIMEOUT,
            address: format!("{}:{}", address, ENIP_PORT),
            slot,
            route: None,
            skip_forward_open: false,
            micro800: false,
        }
    }

    pub fn micro800(address: IpAddr) -> Options {
        let mut options = Options::new(address, 0);
        options.micro800 = true;
        options.skip_forward_open = true;
        options
    }

    /// The route path for unconnected sends and connection paths.
    /// `[0x01, slot]` routes through backplane port 1 to the CPU slot;
    /// Micro800 targets route nowhere.
    pub fn route_path(&self) -> Vec<u8> {
        if self.micro800 {
            return Vec::new();
        }
        match &self.route {
            Some(route) => route.clone(),
            None => vec![0x01, self.slot],
        }
    }
}

// command(2) | length(2) | session(4) | status(4) | context(8) | options(4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub command: u16,
    pub length: u16,
    pub session: u32,
    pub status: u32,
    pub context: u64,
}

pub(crate) fn encode_frame(command: u16, session: u32, context: u64, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; HEADER_SIZE + payload.len()];
    LittleEndian::write_u16(&mut frame[0..2], command);
    LittleEndian::write_u16(&mut frame[2..4], payload.len() as u16);
    LittleEndian::write_u32(&mut frame[4..8], session);
    // status stays zero on requests
    LittleEndian::write_u64(&mut frame[12..20], context);
    // options stays zero
    frame[HEADER_SIZE..].copy_from_slice(payload);
    frame
}

pub(crate) fn parse_header(buf: &[u8]) -> Header {
    Header {
        command: LittleEndian::read_u16(&buf[0..2]),
        length: LittleEndian::read_u16(&buf[2..4]),
        session: LittleEndian::read_u32(&buf[4..8]),
        status: LittleEndian::read_u32(&buf[8..12]),
        context: LittleEndian::read_u64(&buf[12..20]),
    }
}

impl Transport {
    pub fn connect(options: Options) -> Result<Transport, Error> {
        let tcp_client = match options.connection_timeout {
            Some(timeout) => {
                // Trying connecting with timeout
                match options.address.parse::<std::net::SocketAddr>() {
                    Ok(socket_address) => TcpStream::connect_timeout(&socket_address, timeout)?,
                    Err(e) => return Err(Error::InvalidInput(e.to_string())),
                }
            }
            None => TcpStream::connect(&options.address)?,
        };

        tcp_client.set_read_timeout(Some(options.read_timeout))?;
        tcp_client.set_write_timeout(Some(options.write_timeout))?;
        tcp_client.set_nodelay(true)?;
        Ok(Transport {
            options,
            stream: Mutex::new(tcp_client),
            session: 0,
            context: 0,
        })
    }

    // Writes one frame and reads exactly one reply. The caller must consume
    // the reply before issuing another request; responses are correlated by
    // TCP order only.
    fn exchange(&mut self, command: u16, payload: &[u8]) -> Result<(Header, Vec<u8>), Error> {
        self.context = self.context.wrapping_add(1);
        let frame = encode_frame(command, self.session, self.context, payload);

        let mut stream = match self.stream.lock() {
            Ok(s) => s,
            Err(_) => return Err(Error::Lock),
        };
        stream.write_all(&frame)?;

        let mut head = [0u8; HEADER_SIZE];
        stream.read_exact(&mut head)?;
        let header = parse_header(&head);

        if header.command != command {
            return Err(Error::Protocol(format!(
                "reply command 0x{:04X} does not match request 0x{:04X}",
                header.command, command
            )));
        }
        if self.session != 0 && header.session != self.session {
            return Err(Error::Protocol(format!(
                "reply session 0x{:08X} does not match 0x{:08X}",
                header.session, self.session
            )));
        }
        if header.status != 0 {
            return Err(Error::Encapsulation(header.status));
        }

        let mut body = vec![0u8; header.length as usize];
        stream.read_exact(&mut body)?;
        Ok((header, body))
    }

    // interface_handle(4)=0 | timeout(2) | cpf
    fn send_data(&mut self, command: u16, timeout: u16, cpf: &[u8]) -> Result<Vec<u8>, Error> {
        let mut payload = vec![0u8; 6];
        LittleEndian::write_u16(&mut payload[4..6], timeout);
        payload.extend_from_slice(cpf);

        let (_, body) = self.exchange(command, &payload)?;
        if body.len() < 6 {
            return Err(Error::Protocol(
                "send data reply shorter than interface header".to_string(),
            ));
        }
        Ok(body[6..].to_vec())
    }
}

impl PackTrait for Transport {
    fn register_session(&mut self) -> Result<(), Error> {
        // protocol_version=1, options=0
        let (header, body) = self.exchange(ENIP_REGISTER_SESSION, &[0x01, 0x00, 0x00, 0x00])?;
        if body.len() < 4 {
            return Err(Error::Protocol(
                "register session reply too short".to_string(),
            ));
        }
        self.session = header.session;
        info!(session = header.session, "ENIP session registered");
        Ok(())
    }

    fn send_rr_data(&mut self, cpf: &[u8]) -> Result<Vec<u8>, Error> {
        self.send_data(ENIP_SEND_RR_DATA, RR_TIMEOUT_SECS, cpf)
    }

    fn send_unit_data(&mut self, cpf: &[u8]) -> Result<Vec<u8>, Error> {
        self.send_data(ENIP_SEND_UNIT_DATA, 0, cpf)
    }

    fn list_identity(&mut self) -> Result<Identity, Error> {
        let (_, body) = self.exchange(ENIP_LIST_IDENTITY, &[])?;
        let mut identities = parse_identity_payload(&body)?;
        if identities.is_empty() {
            return Err(Error::Protocol(
                "ListIdentity reply carried no identity item".to_string(),
            ));
        }
        Ok(identities.remove(0))
    }

    fn close(&mut self) {
        self.context = self.context.wrapping_add(1);
        let frame = encode_frame(ENIP_UNREGISTER_SESSION, self.session, self.context, &[]);
        if let Ok(mut stream) = self.stream.lock() {
            // UnregisterSession has no reply; the close is the acknowledgement
            let _ = stream.write_all(&frame);
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.session = 0;
        debug!(address = %self.options.address, "ENIP session closed");
    }
}

/// Identity record returned by ListIdentity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub vendor_id: u16,
    pub device_type: u16,
    pub product_code: u16,
    pub revision_major: u8,
    pub revision_minor: u8,
    pub status: u16,
    pub serial_number: u32,
    pub product_name: String,
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Collect ListIdentity replies from a broadcast or directed-broadcast
/// address until the timeout elapses, in arrival order.
pub fn list_identity_udp(broadcast: Ipv4Addr, timeout: Duration) -> Result<Vec<Identity>, Error> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;

    let frame = encode_frame(ENIP_LIST_IDENTITY, 0, 0, &[]);
    socket.send_to(&frame, (broadcast, ENIP_PORT))?;

    collect_identities(Instant::now() + timeout, |buf| {
        match socket.recv_from(buf) {
            Ok((n, peer)) => {
                debug!(peer = %peer, "ListIdentity reply");
                Ok(Some(n))
            }
            Err(e) => match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut => Ok(None),
                _ => Err(Error::Transport(e)),
            },
        }
    })
}

// The accumulation loop behind UDP discovery: drain datagrams until the
// deadline, keeping well-formed identity replies in arrival order. `recv`
// yields None when a poll interval passes without a datagram; runts,
// foreign commands, nonzero statuses and malformed payloads are skipped.
fn collect_identities<F>(deadline: Instant, mut recv: F) -> Result<Vec<Identity>, Error>
where
    F: FnMut(&mut [u8]) -> Result<Option<usize>, Error>,
{
    let mut found = Vec::new();
    let mut buf = [0u8; 4096];
    while Instant::now() < deadline {
        let n = match recv(&mut buf)? {
            Some(n) => n,
            None => continue,
        };
        if n < HEADER_SIZE {
            continue;
        }
        let header = parse_header(&buf[..HEADER_SIZE]);
        if header.command != ENIP_LIST_IDENTITY || header.status != 0 {
            continue;
        }
        let body = &buf[HEADER_SIZE..(HEADER_SIZE + header.length as usize).min(n)];
        match parse_identity_payload(body) {
            Ok(identities) => found.extend(identities),
            Err(e) => debug!(error = %e, "discarding malformed identity reply"),
        }
    }
    Ok(found)
}

pub(crate) fn parse_identity_payload(body: &[u8]) -> Result<Vec<Identity>, Error> {
    let items = cpf::decode(body)?;
    let mut out = Vec::new();
    for item in items {
        if item.type_id != CPF_IDENTITY_RESPONSE {
            continue;
        }
        out.push(parse_identity_item(&item.data)?);
    }
    Ok(out)
}

// encap_version(2) | sockaddr{family,port,addr BE + 8 zero} | vendor(2) |
// device_type(2) | product_code(2) | revision(2) | status(2) | serial(4) |
// name_len(1) | name | state(1)
fn parse_identity_item(data: &[u8]) -> Result<Identity, Error> {
    if data.len() < 33 {
        return Err(Error::Protocol("identity item too short".to_string()));
    }
    let name_len = data[32] as usize;
    if data.len() < 33 + name_len {
        return Err(Error::Protocol(
            "identity item product name truncated".to_string(),
        ));
    }
    let product_name = String::from_utf8_lossy(&data[33..33 + name_len]).into_owned();

    // the embedded sockaddr is big-endian, unlike everything else on the wire
    let port = BigEndian::read_u16(&data[4..6]);
    let ip = Ipv4Addr::from(BigEndian::read_u32(&data[6..10]));

    Ok(Identity {
        vendor_id: LittleEndian::read_u16(&data[18..20]),
        device_type: LittleEndian::read_u16(&data[20..22]),
        product_code: LittleEndian::read_u16(&data[22..24]),
        revision_major: data[24],
        revision_minor: data[25],
        status: LittleEndian::read_u16(&data[26..28]),
        serial_number: LittleEndian::read_u32(&data[28..32]),
        product_name,
        ip,
        port,
    })
}
